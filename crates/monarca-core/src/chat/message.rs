//! Chat message model and the rows exchanged with the remote store.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::format_clock;

/// Avatar palette. A nickname always maps to the same entry.
pub const AVATAR_PALETTE: [&str; 5] = ["#6366F1", "#8B5CF6", "#EC4899", "#14B8A6", "#F59E0B"];

/// Pick the avatar color for a nickname: the sum of its UTF-16 code units
/// modulo the palette size, matching the web front end.
pub fn avatar_color(nickname: &str) -> &'static str {
    let hash: u64 = nickname.encode_utf16().map(u64::from).sum();
    AVATAR_PALETTE[(hash % AVATAR_PALETTE.len() as u64) as usize]
}

/// Message identifier. The store hands out numbers, but text ids are
/// accepted so a schema change does not break decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(untagged)]
pub enum MessageId {
    Number(i64),
    Text(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{}", n),
            MessageId::Text(s) => f.write_str(s),
        }
    }
}

/// Where a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Delivered by the store (history or push)
    Remote,
    /// Accepted by the store, but its push echo never arrived
    Confirmed,
    /// Local echo after a failed send. The id is a wall-clock tick.
    Local,
    /// Built-in placeholder conversation
    Sample,
}

impl MessageOrigin {
    /// True when the id was assigned by the store.
    pub fn has_server_id(&self) -> bool {
        matches!(self, MessageOrigin::Remote | MessageOrigin::Confirmed)
    }
}

/// One entry of the chat log as the UI shows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ChatMessage {
    pub id: MessageId,
    pub nickname: String,
    pub content: String,
    /// Display time, `HH:MM`
    pub time: String,
    pub color: String,
    pub origin: MessageOrigin,
}

impl ChatMessage {
    pub fn from_record(record: &RemoteRecord, origin: MessageOrigin) -> Self {
        Self {
            id: record.id.clone(),
            nickname: record.nickname.clone(),
            content: record.content.clone(),
            time: format_clock(&record.created_at.with_timezone(&Local)),
            color: avatar_color(&record.nickname).to_string(),
            origin,
        }
    }

    /// Local echo for a message the store did not take.
    pub fn local(nickname: &str, content: &str, now: DateTime<Local>) -> Self {
        Self {
            id: MessageId::Number(now.timestamp_millis()),
            nickname: nickname.to_string(),
            content: content.to_string(),
            time: format_clock(&now),
            color: avatar_color(nickname).to_string(),
            origin: MessageOrigin::Local,
        }
    }

    /// First letter of the nickname, upper-cased, for the avatar bubble.
    pub fn initial(&self) -> String {
        self.nickname
            .chars()
            .next()
            .map(|c| c.to_uppercase().collect())
            .unwrap_or_default()
    }
}

/// A row of the remote message table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: MessageId,
    pub nickname: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Body of an insert request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMessage {
    pub nickname: String,
    pub content: String,
}

/// The placeholder conversation shown when no history can be loaded.
pub fn sample_messages() -> Vec<ChatMessage> {
    const SAMPLES: [(i64, &str, &str, &str, &str); 6] = [
        (1, "RadioFan", "¡Buena música hoy! 🎵", "10:00", "#6366F1"),
        (2, "MusicLover", "Me encanta esta canción, ¿alguien sabe el nombre?", "10:05", "#8B5CF6"),
        (3, "DJ_Night", "Saludos desde España! 🇪🇸", "10:10", "#EC4899"),
        (4, "RadioFan", "¿Pueden poner algo de rock clásico?", "10:15", "#6366F1"),
        (5, "NightOwl", "Primera vez escuchando esta radio, me gusta mucho!", "10:20", "#14B8A6"),
        (6, "Melody", "La mejor radio online! 📻", "10:25", "#F59E0B"),
    ];

    SAMPLES
        .iter()
        .map(|(id, nickname, content, time, color)| ChatMessage {
            id: MessageId::Number(*id),
            nickname: nickname.to_string(),
            content: content.to_string(),
            time: time.to_string(),
            color: color.to_string(),
            origin: MessageOrigin::Sample,
        })
        .collect()
}
