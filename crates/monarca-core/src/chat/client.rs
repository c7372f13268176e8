//! Chat driver: runs store calls and feeds their outcome to the session.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::MessageStore;
use crate::config::ChatConfig;
use crate::prefs::Preferences;

use super::message::{ChatMessage, NewMessage};
use super::realtime::RealtimeEvent;
use super::session::{Change, ChatSession, SessionEvent};

/// Owns the session and the store it talks to. Every mutation of the
/// message log goes through here, from one task.
pub struct ChatClient<S: MessageStore> {
    store: S,
    session: ChatSession,
    history_limit: usize,
    prefs: Option<Preferences>,
}

impl<S: MessageStore> ChatClient<S> {
    pub fn new(store: S, nickname: &str, config: &ChatConfig) -> Self {
        Self {
            store,
            session: ChatSession::new(nickname)
                .with_pending_timeout(Duration::from_secs(config.pending_timeout_secs)),
            history_limit: config.history_limit,
            prefs: None,
        }
    }

    /// Create a client whose nickname is read from and saved to `prefs`.
    pub fn with_preferences(store: S, prefs: Preferences, config: &ChatConfig) -> Self {
        let mut client = Self::new(store, &prefs.nickname(), config);
        client.prefs = Some(prefs);
        client
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn messages(&self) -> &[ChatMessage] {
        self.session.messages()
    }

    pub fn nickname(&self) -> &str {
        self.session.nickname()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the most recent history. Falls back to the sample conversation
    /// when the store fails or is empty.
    pub async fn load_initial(&mut self) -> Change {
        match self.store.recent_messages(self.history_limit).await {
            Ok(records) => {
                info!(count = records.len(), "History loaded");
                self.session.apply(SessionEvent::HistoryLoaded(records))
            }
            Err(e) => {
                warn!(error = %e, "Failed to load history, showing sample conversation");
                self.session.apply(SessionEvent::HistoryFailed)
            }
        }
    }

    /// Fetch history again and merge anything missed while disconnected.
    pub async fn resync(&mut self) -> Change {
        match self.store.recent_messages(self.history_limit).await {
            Ok(records) => self.session.apply(SessionEvent::HistoryResynced(records)),
            Err(e) => {
                warn!(error = %e, "History resync failed");
                Change::Unchanged
            }
        }
    }

    /// Send as the current nickname.
    pub async fn send(&mut self, content: &str) -> Change {
        let nickname = self.session.nickname().to_string();
        self.send_as(&nickname, content).await
    }

    pub async fn send_as(&mut self, nickname: &str, content: &str) -> Change {
        let content = content.trim();
        if content.is_empty() {
            return Change::Unchanged;
        }

        let message = NewMessage {
            nickname: nickname.to_string(),
            content: content.to_string(),
        };

        match self.store.insert_message(&message).await {
            Ok(records) => {
                let correlation = Uuid::new_v4();
                debug!(%correlation, "Message accepted by store");
                self.session.apply(SessionEvent::SendAccepted {
                    correlation,
                    records,
                    at: Utc::now(),
                })
            }
            Err(e) => {
                warn!(error = %e, "Send failed, keeping message locally");
                self.session.apply(SessionEvent::SendFailed {
                    nickname: message.nickname,
                    content: message.content,
                    at: Local::now(),
                })
            }
        }
    }

    /// Change the nickname used for future sends. Returns the saved value.
    pub fn set_nickname(&mut self, name: &str) -> Result<String> {
        let nickname = match self.prefs.as_mut() {
            Some(prefs) => prefs.set_nickname(name)?,
            None => crate::prefs::normalize_nickname(name),
        };
        self.session
            .apply(SessionEvent::NicknameChanged(nickname.clone()));
        Ok(nickname)
    }

    /// Apply an event from the push channel.
    pub async fn handle_realtime(&mut self, event: RealtimeEvent) -> Change {
        match event {
            RealtimeEvent::Insert(record) => self.session.apply(SessionEvent::Pushed(record)),
            RealtimeEvent::Connected { reconnect: true } => {
                info!("Realtime reconnected, resyncing history");
                self.resync().await
            }
            RealtimeEvent::Connected { reconnect: false } => Change::Unchanged,
            RealtimeEvent::Disconnected { reason } => {
                debug!(reason = %reason, "Realtime disconnected");
                Change::Unchanged
            }
        }
    }

    /// Expire pending sends whose echo never arrived.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Change {
        self.session.apply(SessionEvent::Tick(now))
    }
}
