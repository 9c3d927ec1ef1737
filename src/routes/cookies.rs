//! Cookie-backed identity storage for the HTTP surface.
//!
//! Each request gets a store snapshot built from its `Cookie` header; writes
//! are recorded and turned into `Set-Cookie` values on the way out, with the
//! same lifetimes the engine promises (anon id ≈ a year, session id ≈ a
//! week).

use std::sync::Mutex;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use cookie::time::Duration as CookieDuration;
use cookie::{Cookie, SameSite};

use crate::identity::{IdentityStore, ANON_ID_TTL, SESSION_ID_TTL};

pub const ANON_COOKIE: &str = "sw_anon_id";
pub const SESSION_COOKIE: &str = "sw_session_id";

#[derive(Default)]
pub struct CookieIdentityStore {
    anon: Mutex<Option<String>>,
    session: Mutex<Option<String>>,
    outgoing: Mutex<Vec<Cookie<'static>>>,
}

impl CookieIdentityStore {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let store = Self::default();
        if let Some(raw) = headers.get(COOKIE).and_then(|v| v.to_str().ok()) {
            for cookie in Cookie::split_parse(raw.to_owned()).flatten() {
                match cookie.name() {
                    ANON_COOKIE => *store.anon.lock().unwrap() = Some(cookie.value().to_string()),
                    SESSION_COOKIE => {
                        *store.session.lock().unwrap() = Some(cookie.value().to_string());
                    }
                    _ => {}
                }
            }
        }
        store
    }

    /// Drain the recorded writes as `Set-Cookie` values.
    pub fn take_set_cookies(&self) -> Vec<Cookie<'static>> {
        std::mem::take(&mut *self.outgoing.lock().unwrap())
    }

    fn record(&self, name: &'static str, value: String, max_age: CookieDuration) {
        let cookie = Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build();
        let mut outgoing = self.outgoing.lock().unwrap();
        // last write per name wins
        outgoing.retain(|c| c.name() != name);
        outgoing.push(cookie);
    }
}

impl IdentityStore for CookieIdentityStore {
    fn anon_id(&self) -> Option<String> {
        self.anon.lock().unwrap().clone()
    }

    fn set_anon_id(&self, id: &str) {
        *self.anon.lock().unwrap() = Some(id.to_string());
        self.record(
            ANON_COOKIE,
            id.to_string(),
            CookieDuration::seconds(ANON_ID_TTL.as_secs() as i64),
        );
    }

    fn session_id(&self) -> Option<String> {
        self.session.lock().unwrap().clone()
    }

    fn set_session_id(&self, id: &str) {
        *self.session.lock().unwrap() = Some(id.to_string());
        self.record(
            SESSION_COOKIE,
            id.to_string(),
            CookieDuration::seconds(SESSION_ID_TTL.as_secs() as i64),
        );
    }

    fn clear_session_id(&self) {
        *self.session.lock().unwrap() = None;
        self.record(SESSION_COOKIE, String::new(), CookieDuration::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn parses_both_identifiers_from_the_cookie_header() {
        let headers = headers_with_cookie("sw_anon_id=a1; sw_session_id=s1; other=x");
        let store = CookieIdentityStore::from_headers(&headers);
        assert_eq!(store.anon_id(), Some("a1".to_string()));
        assert_eq!(store.session_id(), Some("s1".to_string()));
    }

    #[test]
    fn writes_become_set_cookie_values_with_lifetimes() {
        let store = CookieIdentityStore::default();
        store.set_anon_id("a1");
        store.set_session_id("s1");

        let cookies = store.take_set_cookies();
        assert_eq!(cookies.len(), 2);
        let session = cookies.iter().find(|c| c.name() == SESSION_COOKIE).unwrap();
        assert_eq!(session.value(), "s1");
        assert_eq!(
            session.max_age(),
            Some(CookieDuration::seconds(SESSION_ID_TTL.as_secs() as i64))
        );
        // drained
        assert!(store.take_set_cookies().is_empty());
    }

    #[test]
    fn clearing_the_session_emits_a_removal_cookie() {
        let headers = headers_with_cookie("sw_session_id=stale");
        let store = CookieIdentityStore::from_headers(&headers);

        store.clear_session_id();

        assert_eq!(store.session_id(), None);
        let cookies = store.take_set_cookies();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].max_age(), Some(CookieDuration::ZERO));
    }

    #[test]
    fn rewriting_the_same_cookie_keeps_only_the_last_value() {
        let store = CookieIdentityStore::default();
        store.clear_session_id();
        store.set_session_id("s2");

        let cookies = store.take_set_cookies();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].value(), "s2");
    }
}
