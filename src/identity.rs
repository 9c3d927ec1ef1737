//! Durable client-side identifiers.
//!
//! The engine keeps two entries in whatever durable storage the embedder
//! provides (browser cookies, a config file, an in-memory jar for tests): a
//! long-lived anonymous identifier and a shorter-lived session identifier.
//! There is no logic here beyond get/set/clear; validation and lifecycle
//! decisions belong to the session resolver.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Lifetime of the anonymous visitor identifier.
pub const ANON_ID_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifetime of the stored session identifier.
pub const SESSION_ID_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Storage for the two durable identifiers.
///
/// Values are raw strings: a stored identifier may be arbitrarily corrupted,
/// and deciding what to do about that is the resolver's job.
pub trait IdentityStore: Send + Sync {
    fn anon_id(&self) -> Option<String>;
    fn set_anon_id(&self, id: &str);
    fn session_id(&self) -> Option<String>;
    fn set_session_id(&self, id: &str);
    fn clear_session_id(&self);
}

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn new(value: &str, ttl: Duration) -> Self {
        Self { value: value.to_string(), expires_at: Instant::now() + ttl }
    }

    fn live_value(&self) -> Option<String> {
        (Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

/// In-process identity store honoring the cookie lifetimes. Used by embedders
/// that are not behind a browser, and by tests.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    anon: Mutex<Option<Entry>>,
    session: Mutex<Option<Entry>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn anon_id(&self) -> Option<String> {
        self.anon.lock().unwrap().as_ref().and_then(Entry::live_value)
    }

    fn set_anon_id(&self, id: &str) {
        *self.anon.lock().unwrap() = Some(Entry::new(id, ANON_ID_TTL));
    }

    fn session_id(&self) -> Option<String> {
        self.session.lock().unwrap().as_ref().and_then(Entry::live_value)
    }

    fn set_session_id(&self, id: &str) {
        *self.session.lock().unwrap() = Some(Entry::new(id, SESSION_ID_TTL));
    }

    fn clear_session_id(&self) {
        *self.session.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_clears_identifiers() {
        let store = MemoryIdentityStore::new();
        assert_eq!(store.anon_id(), None);
        assert_eq!(store.session_id(), None);

        store.set_anon_id("a1");
        store.set_session_id("s1");
        assert_eq!(store.anon_id(), Some("a1".to_string()));
        assert_eq!(store.session_id(), Some("s1".to_string()));

        store.clear_session_id();
        assert_eq!(store.session_id(), None);
        // clearing the session leaves the anonymous identifier alone
        assert_eq!(store.anon_id(), Some("a1".to_string()));
    }

    #[test]
    fn overwriting_replaces_the_previous_value() {
        let store = MemoryIdentityStore::new();
        store.set_session_id("s1");
        store.set_session_id("s2");
        assert_eq!(store.session_id(), Some("s2".to_string()));
    }
}
