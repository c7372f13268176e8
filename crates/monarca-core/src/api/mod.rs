//! REST client for the hosted message store.
//!
//! This module provides the `ApiClient` for reading recent chat history,
//! inserting messages and obtaining an anonymous access token. Requests
//! carry the project's anon key as `apikey` and as bearer token unless a
//! signed-in token replaces it.
//!
//! The chat client talks to the store through the `MessageStore` trait so
//! it can be driven by an in-memory store in tests.

pub mod client;
pub mod error;

pub use client::{ApiClient, MessageStore};
pub use error::ApiError;
