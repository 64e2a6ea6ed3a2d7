use crate::error::FilterError;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Init,
    Data,
    Commit,
    Rollback,
}

/// One SMTP transaction within a session.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub envelope_from: Vec<String>,
    pub envelope_to: Vec<String>,
    pub state: TxState,
    pub in_header: bool,
    pub spam_score: f64,
    pub spam_score_set: bool,
}

impl Message {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            from: Vec::new(),
            to: Vec::new(),
            envelope_from: Vec::new(),
            envelope_to: Vec::new(),
            state: TxState::Init,
            in_header: true,
            spam_score: 0.0,
            spam_score_set: false,
        }
    }
}

/// One smtpd client connection.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub rdns: String,
    pub confirmed: bool,
    pub remote: String,
    pub local: String,
    pub authorized_user: Option<String>,
    pub data_message: Option<String>,
    pub messages: HashMap<String, Message>,
}

impl Session {
    pub fn new(id: &str, rdns: &str, confirmed: bool, remote: &str, local: &str) -> Self {
        Self {
            id: id.to_string(),
            rdns: rdns.to_string(),
            confirmed,
            remote: remote.to_string(),
            local: local.to_string(),
            authorized_user: None,
            data_message: None,
            messages: HashMap::new(),
        }
    }

    pub fn message_mut(&mut self, event: &str, mid: &str) -> Result<&mut Message, FilterError> {
        let sid = &self.id;
        self.messages
            .get_mut(mid)
            .ok_or_else(|| FilterError::UnknownMessage {
                event: event.to_string(),
                session: sid.clone(),
                message: mid.to_string(),
            })
    }
}

/// Owns every live session. Lookups of unknown ids are fatal.
#[derive(Debug, Default, Serialize)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.sessions.contains_key(sid)
    }

    pub fn insert(&mut self, event: &str, session: Session) -> Result<(), FilterError> {
        if self.sessions.contains_key(&session.id) {
            return Err(FilterError::DuplicateSession {
                event: event.to_string(),
                session: session.id,
            });
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub fn remove(&mut self, event: &str, sid: &str) -> Result<Session, FilterError> {
        self.sessions
            .remove(sid)
            .ok_or_else(|| unknown_session(event, sid))
    }

    pub fn get(&self, event: &str, sid: &str) -> Result<&Session, FilterError> {
        self.sessions
            .get(sid)
            .ok_or_else(|| unknown_session(event, sid))
    }

    pub fn get_mut(&mut self, event: &str, sid: &str) -> Result<&mut Session, FilterError> {
        self.sessions
            .get_mut(sid)
            .ok_or_else(|| unknown_session(event, sid))
    }

    pub fn message_mut(
        &mut self,
        event: &str,
        sid: &str,
        mid: &str,
    ) -> Result<&mut Message, FilterError> {
        self.get_mut(event, sid)?.message_mut(event, mid)
    }
}

fn unknown_session(event: &str, sid: &str) -> FilterError {
    FilterError::UnknownSession {
        event: event.to_string(),
        session: sid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session() -> SessionStore {
        let mut store = SessionStore::new();
        store
            .insert(
                "link-connect",
                Session::new("deadbeef", "host.example.org", true, "1.2.3.4:1", "5.6.7.8:25"),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_new_message_starts_in_header() {
        let message = Message::new("cafebabe");
        assert_eq!(message.state, TxState::Init);
        assert!(message.in_header);
        assert!(!message.spam_score_set);
    }

    #[test]
    fn test_duplicate_session_rejected() {
        let mut store = store_with_session();
        let err = store
            .insert("link-connect", Session::new("deadbeef", "", false, "", ""))
            .unwrap_err();
        assert!(matches!(err, FilterError::DuplicateSession { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_session_and_message() {
        let mut store = store_with_session();
        assert!(matches!(
            store.get_mut("tx-begin", "nope"),
            Err(FilterError::UnknownSession { .. })
        ));
        assert!(matches!(
            store.message_mut("tx-mail", "deadbeef", "nope"),
            Err(FilterError::UnknownMessage { .. })
        ));
        assert!(matches!(
            store.remove("link-disconnect", "nope"),
            Err(FilterError::UnknownSession { .. })
        ));
    }

    #[test]
    fn test_remove_drops_messages() {
        let mut store = store_with_session();
        let session = store.get_mut("tx-begin", "deadbeef").unwrap();
        session
            .messages
            .insert("cafebabe".to_string(), Message::new("cafebabe"));
        let removed = store.remove("link-disconnect", "deadbeef").unwrap();
        assert_eq!(removed.messages.len(), 1);
        assert!(store.is_empty());
    }
}
