//! Session store abstraction. The wire-visible piece is a 32-character
//! base62 session id carried in a cookie; the storage backing it is
//! pluggable behind the `SessionStore` trait so a deployment can swap in a
//! Redis- or SQLite-backed store the way the original library's
//! `sessions_redis.c`/`sessions_sqlite3.c` did, without changing request
//! handling code.
//!
//! Grounded on `examples/original_source/src/onion/sessions.c` and
//! `sessions_mem.c` for the get/save/remove contract, and the teacher's
//! (superseded) `utils/session.rs` for the in-process map shape.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::dict::Dict;

pub const SESSION_ID_LEN: usize = 32;
const BASE62_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Generates a 32-character base62 session id from a cryptographically
/// secure RNG. Collisions are astronomically unlikely (62^32 space) and
/// are not checked for here; a store that wants a guarantee should retry
/// on a pre-existing key.
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    (0..SESSION_ID_LEN)
        .map(|_| BASE62_ALPHABET[rng.gen_range(0..BASE62_ALPHABET.len())] as char)
        .collect()
}

/// Pluggable session storage backend. `save(id, None)` always removes the
/// session — there is no meaningful "save nothing" operation distinct from
/// deletion (see DESIGN.md's Open Question decisions).
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Dict>;
    fn save(&self, id: &str, data: Option<Dict>);
    fn remove(&self, id: &str);
    /// Drops sessions that have been idle longer than their TTL. Called
    /// periodically by the server's timeout sweep, not per-request.
    fn sweep_expired(&self);
}

struct Entry {
    data: Dict,
    last_touched: Instant,
}

/// Default backend: a process-local map guarded by a single `RwLock`.
/// Lazily creates a session's backing `Dict` on first `get` for an unknown
/// id that was nonetheless handed a fresh id by the connection layer
/// (mirrors `onion_sessions_mem` allocating on demand rather than at
/// cookie-mint time).
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
    ttl: Duration,
    last_cleanup: Mutex<Instant>,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        InMemorySessionStore {
            entries: RwLock::new(HashMap::new()),
            ttl,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn should_sweep(&self, cleanup_interval: Duration) -> bool {
        self.last_cleanup.lock().unwrap().elapsed() > cleanup_interval
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, id: &str) -> Option<Dict> {
        let mut entries = self.entries.write().unwrap();
        if let Some(entry) = entries.get_mut(id) {
            entry.last_touched = Instant::now();
            return Some(entry.data.soft_dup());
        }
        None
    }

    fn save(&self, id: &str, data: Option<Dict>) {
        match data {
            None => {
                self.remove(id);
            }
            Some(data) => {
                let mut entries = self.entries.write().unwrap();
                entries.insert(
                    id.to_string(),
                    Entry {
                        data,
                        last_touched: Instant::now(),
                    },
                );
            }
        }
    }

    fn remove(&self, id: &str) {
        self.entries.write().unwrap().remove(id);
    }

    fn sweep_expired(&self) {
        let ttl = self.ttl;
        self.entries
            .write()
            .unwrap()
            .retain(|_, entry| entry.last_touched.elapsed() < ttl);
        *self.last_cleanup.lock().unwrap() = Instant::now();
    }
}
