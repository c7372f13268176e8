//! Chat session state.
//!
//! `ChatSession` owns the ordered message log, the current nickname and the
//! set of sends the store accepted but has not pushed back yet. It performs
//! no I/O: the driver feeds it `SessionEvent`s and renders the returned
//! `Change`.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::prefs::normalize_nickname;

use super::message::{sample_messages, ChatMessage, MessageId, MessageOrigin, RemoteRecord};

/// Default wait for the push echo of an accepted send.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(10);

/// Something that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Initial history fetch returned these records, oldest first
    HistoryLoaded(Vec<RemoteRecord>),
    /// Initial history fetch failed
    HistoryFailed,
    /// History fetched again after a reconnect
    HistoryResynced(Vec<RemoteRecord>),
    /// A record arrived on the push channel
    Pushed(RemoteRecord),
    /// The store took a send and echoed the stored rows
    SendAccepted {
        correlation: Uuid,
        records: Vec<RemoteRecord>,
        at: DateTime<Utc>,
    },
    /// The store did not take a send
    SendFailed {
        nickname: String,
        content: String,
        at: DateTime<Local>,
    },
    /// Clock tick used to expire pending sends
    Tick(DateTime<Utc>),
    NicknameChanged(String),
}

/// What an event did to the visible log.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Unchanged,
    /// The whole log was swapped out
    Replaced,
    /// These entries were added at the end
    Appended(Vec<ChatMessage>),
}

impl Change {
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Change::Unchanged)
    }
}

/// A send the store accepted whose push echo has not arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSend {
    pub correlation: Uuid,
    /// Stored rows still waiting for their echo
    pub awaiting: Vec<RemoteRecord>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    nickname: String,
    log: Vec<ChatMessage>,
    pending: Vec<PendingSend>,
    pending_timeout: Duration,
}

impl ChatSession {
    pub fn new(nickname: &str) -> Self {
        Self {
            nickname: normalize_nickname(nickname),
            log: Vec::new(),
            pending: Vec::new(),
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
        }
    }

    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = timeout;
        self
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.log
    }

    pub fn pending(&self) -> &[PendingSend] {
        &self.pending
    }

    /// Apply one event. This is the only way the session changes.
    pub fn apply(&mut self, event: SessionEvent) -> Change {
        match event {
            SessionEvent::HistoryLoaded(records) if records.is_empty() => self.show_samples(),
            SessionEvent::HistoryLoaded(records) => {
                self.log = records
                    .iter()
                    .map(|r| ChatMessage::from_record(r, MessageOrigin::Remote))
                    .collect();
                self.resolve_known();
                Change::Replaced
            }
            SessionEvent::HistoryFailed => self.show_samples(),
            SessionEvent::HistoryResynced(records) => self.merge_history(records),
            SessionEvent::Pushed(record) => self.push(record),
            SessionEvent::SendAccepted {
                correlation,
                records,
                at,
            } => {
                let known = self.server_ids();
                let awaiting: Vec<RemoteRecord> = records
                    .into_iter()
                    .filter(|r| !known.contains(&r.id))
                    .collect();
                if !awaiting.is_empty() {
                    debug!(%correlation, rows = awaiting.len(), "Waiting for push echo");
                    self.pending.push(PendingSend {
                        correlation,
                        awaiting,
                        sent_at: at,
                    });
                }
                Change::Unchanged
            }
            SessionEvent::SendFailed {
                nickname,
                content,
                at,
            } => {
                let message = ChatMessage::local(&nickname, &content, at);
                self.log.push(message.clone());
                Change::Appended(vec![message])
            }
            SessionEvent::Tick(now) => self.expire_pending(now),
            SessionEvent::NicknameChanged(name) => {
                self.nickname = normalize_nickname(&name);
                Change::Unchanged
            }
        }
    }

    fn show_samples(&mut self) -> Change {
        self.log = sample_messages();
        Change::Replaced
    }

    fn push(&mut self, record: RemoteRecord) -> Change {
        self.settle_pending(&record.id);
        if self.server_ids().contains(&record.id) {
            debug!(id = %record.id, "Duplicate push ignored");
            return Change::Unchanged;
        }
        let message = ChatMessage::from_record(&record, MessageOrigin::Remote);
        self.log.push(message.clone());
        Change::Appended(vec![message])
    }

    fn merge_history(&mut self, records: Vec<RemoteRecord>) -> Change {
        if records.is_empty() {
            return Change::Unchanged;
        }

        let placeholder_only = self.log.iter().all(|m| m.origin == MessageOrigin::Sample);
        if placeholder_only {
            return self.apply(SessionEvent::HistoryLoaded(records));
        }

        let mut known = self.server_ids();
        let mut added = Vec::new();
        for record in &records {
            if known.insert(record.id.clone()) {
                added.push(ChatMessage::from_record(record, MessageOrigin::Remote));
            }
        }
        self.log.extend(added.iter().cloned());
        self.resolve_known();

        if added.is_empty() {
            Change::Unchanged
        } else {
            Change::Appended(added)
        }
    }

    fn expire_pending(&mut self, now: DateTime<Utc>) -> Change {
        let timeout = self.pending_timeout;
        let (expired, waiting): (Vec<PendingSend>, Vec<PendingSend>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|p| {
                    (now - p.sent_at)
                        .to_std()
                        .map(|elapsed| elapsed >= timeout)
                        .unwrap_or(false)
                });
        self.pending = waiting;

        let mut known = self.server_ids();
        let mut added = Vec::new();
        for pending in expired {
            debug!(correlation = %pending.correlation, "No push echo, keeping store reply");
            for record in pending.awaiting {
                if known.insert(record.id.clone()) {
                    added.push(ChatMessage::from_record(&record, MessageOrigin::Confirmed));
                }
            }
        }

        if added.is_empty() {
            return Change::Unchanged;
        }
        self.log.extend(added.iter().cloned());
        Change::Appended(added)
    }

    /// Drop a record from every pending send, discarding sends with nothing left.
    fn settle_pending(&mut self, id: &MessageId) {
        for pending in &mut self.pending {
            pending.awaiting.retain(|r| &r.id != id);
        }
        self.pending.retain(|p| !p.awaiting.is_empty());
    }

    fn resolve_known(&mut self) {
        let known = self.server_ids();
        for pending in &mut self.pending {
            pending.awaiting.retain(|r| !known.contains(&r.id));
        }
        self.pending.retain(|p| !p.awaiting.is_empty());
    }

    fn server_ids(&self) -> HashSet<MessageId> {
        self.log
            .iter()
            .filter(|m| m.origin.has_server_id())
            .map(|m| m.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: i64, nickname: &str, content: &str) -> RemoteRecord {
        RemoteRecord {
            id: MessageId::Number(id),
            nickname: nickname.to_string(),
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 18, 0, 0).unwrap()
                + chrono::Duration::minutes(id),
        }
    }

    fn ids(session: &ChatSession) -> Vec<MessageId> {
        session.messages().iter().map(|m| m.id.clone()).collect()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 19, 0, 0).unwrap()
    }

    #[test]
    fn test_history_replaces_log() {
        let mut session = ChatSession::new("Ana");
        let change = session.apply(SessionEvent::HistoryLoaded(vec![
            record(1, "Ana", "hola"),
            record(2, "Luis", "qué tal"),
        ]));
        assert_eq!(change, Change::Replaced);
        assert_eq!(ids(&session), vec![MessageId::Number(1), MessageId::Number(2)]);
        assert!(session
            .messages()
            .iter()
            .all(|m| m.origin == MessageOrigin::Remote));
    }

    #[test]
    fn test_empty_or_failed_history_shows_samples() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(Vec::new()));
        assert_eq!(session.messages().len(), 6);

        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryFailed);
        assert_eq!(session.messages(), sample_messages().as_slice());
    }

    #[test]
    fn test_push_appends_once() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Ana", "hola")]));

        let change = session.apply(SessionEvent::Pushed(record(2, "Luis", "buenas")));
        assert!(matches!(change, Change::Appended(ref m) if m.len() == 1));
        assert_eq!(session.apply(SessionEvent::Pushed(record(2, "Luis", "buenas"))), Change::Unchanged);
        assert_eq!(session.apply(SessionEvent::Pushed(record(1, "Ana", "hola"))), Change::Unchanged);
        assert_eq!(ids(&session), vec![MessageId::Number(1), MessageId::Number(2)]);
    }

    #[test]
    fn test_push_after_samples_appends() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryFailed);
        // Sample ids do not shadow store ids
        session.apply(SessionEvent::Pushed(record(3, "Luis", "hola")));
        assert_eq!(session.messages().len(), 7);
        assert_eq!(session.messages()[6].origin, MessageOrigin::Remote);
    }

    #[test]
    fn test_failed_send_appends_local_echo() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola")]));

        let at = Local.with_ymd_and_hms(2024, 5, 1, 21, 7, 0).unwrap();
        let change = session.apply(SessionEvent::SendFailed {
            nickname: "Ana".to_string(),
            content: "hola".to_string(),
            at,
        });

        let Change::Appended(added) = change else {
            panic!("expected append");
        };
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].origin, MessageOrigin::Local);
        assert_eq!(added[0].time, "21:07");
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_accepted_send_waits_for_echo() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola")]));

        let change = session.apply(SessionEvent::SendAccepted {
            correlation: Uuid::new_v4(),
            records: vec![record(2, "Ana", "buenas")],
            at: t0(),
        });
        assert_eq!(change, Change::Unchanged);
        assert_eq!(session.pending().len(), 1);
        assert_eq!(session.messages().len(), 1);

        session.apply(SessionEvent::Pushed(record(2, "Ana", "buenas")));
        assert!(session.pending().is_empty());
        assert_eq!(session.messages().len(), 2);

        // Nothing left to expire
        let later = t0() + chrono::Duration::seconds(60);
        assert_eq!(session.apply(SessionEvent::Tick(later)), Change::Unchanged);
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_echo_before_reply_is_not_pending() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola")]));
        session.apply(SessionEvent::Pushed(record(2, "Ana", "buenas")));

        session.apply(SessionEvent::SendAccepted {
            correlation: Uuid::new_v4(),
            records: vec![record(2, "Ana", "buenas")],
            at: t0(),
        });
        assert!(session.pending().is_empty());
    }

    #[test]
    fn test_pending_send_expires_into_confirmed_entry() {
        let mut session = ChatSession::new("Ana").with_pending_timeout(Duration::from_secs(10));
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola")]));
        session.apply(SessionEvent::SendAccepted {
            correlation: Uuid::new_v4(),
            records: vec![record(2, "Ana", "buenas")],
            at: t0(),
        });

        let early = t0() + chrono::Duration::seconds(9);
        assert_eq!(session.apply(SessionEvent::Tick(early)), Change::Unchanged);
        assert_eq!(session.pending().len(), 1);

        let late = t0() + chrono::Duration::seconds(10);
        let Change::Appended(added) = session.apply(SessionEvent::Tick(late)) else {
            panic!("expected append");
        };
        assert_eq!(added[0].id, MessageId::Number(2));
        assert_eq!(added[0].origin, MessageOrigin::Confirmed);
        assert!(session.pending().is_empty());

        // A late echo does not duplicate the entry
        assert_eq!(session.apply(SessionEvent::Pushed(record(2, "Ana", "buenas"))), Change::Unchanged);
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_resync_appends_unknown_records() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola"), record(2, "Ana", "hey")]));

        let change = session.apply(SessionEvent::HistoryResynced(vec![
            record(1, "Luis", "hola"),
            record(2, "Ana", "hey"),
            record(3, "Luis", "me perdí algo"),
            record(4, "Eva", "ya volví"),
        ]));
        assert!(matches!(change, Change::Appended(ref m) if m.len() == 2));
        assert_eq!(
            ids(&session),
            (1..=4).map(MessageId::Number).collect::<Vec<_>>()
        );

        assert_eq!(
            session.apply(SessionEvent::HistoryResynced(vec![record(4, "Eva", "ya volví")])),
            Change::Unchanged
        );
    }

    #[test]
    fn test_resync_replaces_samples() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryFailed);
        let change = session.apply(SessionEvent::HistoryResynced(vec![record(9, "Luis", "hola")]));
        assert_eq!(change, Change::Replaced);
        assert_eq!(ids(&session), vec![MessageId::Number(9)]);

        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryFailed);
        assert_eq!(session.apply(SessionEvent::HistoryResynced(Vec::new())), Change::Unchanged);
        assert_eq!(session.messages().len(), 6);
    }

    #[test]
    fn test_resync_resolves_pending() {
        let mut session = ChatSession::new("Ana");
        session.apply(SessionEvent::HistoryLoaded(vec![record(1, "Luis", "hola")]));
        session.apply(SessionEvent::SendAccepted {
            correlation: Uuid::new_v4(),
            records: vec![record(2, "Ana", "buenas")],
            at: t0(),
        });

        session.apply(SessionEvent::HistoryResynced(vec![record(1, "Luis", "hola"), record(2, "Ana", "buenas")]));
        assert!(session.pending().is_empty());
        assert_eq!(session.messages().len(), 2);
    }

    #[test]
    fn test_nickname_change_normalizes() {
        let mut session = ChatSession::new("  ");
        assert_eq!(session.nickname(), "Anónimo");
        session.apply(SessionEvent::NicknameChanged("  Ana ".to_string()));
        assert_eq!(session.nickname(), "Ana");
        session.apply(SessionEvent::NicknameChanged(String::new()));
        assert_eq!(session.nickname(), "Anónimo");
    }
}
