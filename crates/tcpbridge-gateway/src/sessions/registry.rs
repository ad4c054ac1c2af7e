use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct SessionEntry {
    stop: CancellationToken,
    seq: u64,
}

/// Live sessions keyed by session id.
///
/// At most one client is attached per id. Registering an id that is already
/// live stops the previous session; its cleanup runs in its own mailbox task.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    seq: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            seq: AtomicU64::new(1),
        }
    }

    /// Register `id`. Returns the registration sequence (needed for
    /// [`remove`](Self::remove)) and whether a previous session was replaced.
    pub fn insert(&self, id: &str, stop: CancellationToken) -> (u64, bool) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let prev = self.sessions.insert(id.to_string(), SessionEntry { stop, seq });
        let replaced = match prev {
            Some(old) => {
                old.stop.cancel();
                true
            }
            None => false,
        };
        (seq, replaced)
    }

    /// Remove `id` if it is still the registration `seq`. A newer session
    /// under the same id is left alone.
    pub fn remove(&self, id: &str, seq: u64) -> bool {
        self.sessions.remove_if(id, |_, e| e.seq == seq).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every live session (shutdown).
    pub fn stop_all(&self) {
        for e in self.sessions.iter() {
            e.value().stop.cancel();
        }
    }
}
