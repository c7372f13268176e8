//! Frames of the realtime push channel (Phoenix channel protocol).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::message::RemoteRecord;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_CHANGES: &str = "postgres_changes";

/// Topic heartbeats are sent on.
const TOPIC_PHOENIX: &str = "phoenix";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Frame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Change frame carries no record")]
    MissingRecord,

    #[error("Change record has an unexpected shape: {0}")]
    BadRecord(serde_json::Error),
}

/// A server frame after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Insert(RemoteRecord),
    Reply { topic: String, status: Option<String> },
    /// Anything the client does not act on
    Other(String),
}

/// Channel topic for a table.
pub fn topic(schema: &str, table: &str) -> String {
    format!("realtime:{}:{}", schema, table)
}

/// Join frame asking for INSERT events on one table.
pub fn join_frame(schema: &str, table: &str, reference: &str) -> Frame {
    Frame {
        topic: topic(schema, table),
        event: EVENT_JOIN.to_string(),
        payload: json!({
            "config": {
                "postgres_changes": [
                    { "event": "INSERT", "schema": schema, "table": table }
                ]
            }
        }),
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: &str) -> Frame {
    Frame {
        topic: TOPIC_PHOENIX.to_string(),
        event: EVENT_HEARTBEAT.to_string(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decode a text frame from the server.
pub fn decode(text: &str) -> Result<Inbound, DecodeError> {
    let frame: Frame = serde_json::from_str(text)?;

    match frame.event.as_str() {
        EVENT_CHANGES => {
            let data = frame.payload.get("data").ok_or(DecodeError::MissingRecord)?;
            if let Some(kind) = data.get("type").and_then(Value::as_str) {
                if kind != "INSERT" {
                    return Ok(Inbound::Other(format!("{} {}", EVENT_CHANGES, kind)));
                }
            }
            let record = data.get("record").ok_or(DecodeError::MissingRecord)?;
            let record = RemoteRecord::deserialize(record).map_err(DecodeError::BadRecord)?;
            Ok(Inbound::Insert(record))
        }
        EVENT_REPLY => Ok(Inbound::Reply {
            topic: frame.topic,
            status: frame
                .payload
                .get("status")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => Ok(Inbound::Other(frame.event)),
    }
}
