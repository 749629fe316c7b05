//! Live-connection registry for the relay
//!
//! Maps session ids to the outbound queue of each connection. Insert, remove
//! and the published count are updated under one lock so the count never
//! disagrees with the map.

use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Opaque identifier of one relay connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh 128-bit random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub type SessionSender = mpsc::UnboundedSender<Message>;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionSender>>,
    count: AtomicUsize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning the new connection count
    pub fn insert(&self, id: SessionId, sender: SessionSender) -> usize {
        let mut sessions = self.sessions.lock();
        sessions.insert(id, sender);
        let count = sessions.len();
        self.count.store(count, Ordering::SeqCst);
        debug!("Connected clients: {}", count);
        count
    }

    /// Remove a session, returning whether it was present and the new count
    pub fn remove(&self, id: &SessionId) -> (bool, usize) {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(id).is_some();
        let count = sessions.len();
        self.count.store(count, Ordering::SeqCst);
        debug!("Connected clients: {}", count);
        (removed, count)
    }

    /// Current number of registered sessions
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `text` for every session except `from`, returning how many got it.
    ///
    /// Recipients are snapshotted under the lock; a session that disconnects
    /// meanwhile just drops the frame.
    pub fn broadcast_except(&self, from: &SessionId, text: &str) -> usize {
        let recipients: Vec<(SessionId, SessionSender)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .filter(|(id, _)| *id != from)
                .map(|(id, tx)| (id.clone(), tx.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (id, tx) in recipients {
            trace!("Sending to: {}", id);
            if tx.send(Message::Text(text.to_string())).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
