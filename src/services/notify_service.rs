use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events buffered per channel before a slow observer starts lagging.
const CHANNEL_CAPACITY: usize = 64;

/// Which observers hear about a basket change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyScope {
    /// Only observers attached to the session that changed.
    #[default]
    Session,
    /// Every observer, whatever session it belongs to.
    Global,
}

/// New contents of one session's basket. `session_id` is used for routing
/// and never leaves the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasketEvent {
    pub session_id: String,
    pub kbs: Vec<u64>,
}

/// Fans basket changes out to live observers (WebSocket connections).
pub struct BasketNotifier {
    scope: NotifyScope,
    global: broadcast::Sender<BasketEvent>,
    sessions: Mutex<HashMap<String, broadcast::Sender<BasketEvent>>>,
}

impl BasketNotifier {
    pub fn new(scope: NotifyScope) -> Self {
        let (global, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            scope,
            global,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> NotifyScope {
        self.scope
    }

    /// Attach an observer belonging to `session_id`.
    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<BasketEvent> {
        match self.scope {
            NotifyScope::Global => self.global.subscribe(),
            NotifyScope::Session => self
                .sessions
                .lock()
                .entry(session_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .subscribe(),
        }
    }

    /// Forget the channel of `session_id` once its last observer is gone.
    pub fn release(&self, session_id: &str) {
        if self.scope != NotifyScope::Session {
            return;
        }

        let mut sessions = self.sessions.lock();
        if sessions
            .get(session_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            sessions.remove(session_id);
        }
    }

    /// Deliver `kbs` as the new basket of `session_id`. Returns how many
    /// observers received it.
    pub fn publish(&self, session_id: &str, kbs: Vec<u64>) -> usize {
        let event = BasketEvent {
            session_id: session_id.to_string(),
            kbs,
        };

        match self.scope {
            NotifyScope::Global => self.global.send(event).unwrap_or(0),
            NotifyScope::Session => {
                let mut sessions = self.sessions.lock();
                let Some(sender) = sessions.get(session_id) else {
                    return 0;
                };
                match sender.send(event) {
                    Ok(n) => n,
                    Err(_) => {
                        // every observer of this session is gone
                        sessions.remove(session_id);
                        0
                    }
                }
            }
        }
    }
}
