//! Radio Monarca core.
//!
//! The pieces behind the radio web app that are not UI: an offline cache for
//! the static bundle and a realtime chat client backed by a hosted store.

pub mod api;
pub mod chat;
pub mod config;
pub mod offline;
pub mod prefs;
pub mod utils;

pub use config::Config;
