//! Realtime chat sync.
//!
//! The `ChatClient` keeps an ordered log of chat messages. History comes from
//! the REST store, new messages arrive over the realtime socket, and sends go
//! out as REST inserts. When the store cannot be reached the log degrades to
//! a local echo, and to a sample conversation when no history loads at all.

pub mod client;
pub mod message;
pub mod protocol;
pub mod realtime;
pub mod session;

pub use client::ChatClient;
pub use message::{avatar_color, sample_messages, ChatMessage, MessageId, MessageOrigin, NewMessage, RemoteRecord};
pub use protocol::{DecodeError, Frame, Inbound};
pub use realtime::{subscribe, ConnectionState, RealtimeEvent, RealtimeOptions, Subscription};
pub use session::{Change, ChatSession, PendingSend, SessionEvent};
