//! Split-storage token store.
//!
//! The access token lives only in process memory. The refresh token is
//! written, obfuscated, to a domain-scoped cookie. Nothing here performs
//! network calls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::clock::SharedClock;
use crate::config::TokenConfig;
use crate::token::claims::decode_claims;
use crate::token::cookie::{deobfuscate, obfuscate, Cookie, CookieJar, SameSite};
use crate::token::types::{DecodedClaims, TokenError, TokenInfo, TokenPair, TokenValidation};

/// In-memory half of the session.
#[derive(Clone)]
struct AccessState {
    access_token: String,
    /// Epoch milliseconds.
    expires_at_ms: u64,
    claims: Option<DecodedClaims>,
    user: Option<serde_json::Value>,
}

/// Owner of the current token material.
#[derive(Debug)]
pub struct TokenStore {
    access: ArcSwapOption<AccessState>,
    /// Set by a stored pair, reset by an explicit clear. Survives the
    /// expiry-buffer discard.
    held: AtomicBool,
    cookies: Arc<dyn CookieJar>,
    config: TokenConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for AccessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessState")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish_non_exhaustive()
    }
}

impl TokenStore {
    pub fn new(config: TokenConfig, cookies: Arc<dyn CookieJar>, clock: SharedClock) -> Self {
        Self {
            access: ArcSwapOption::empty(),
            held: AtomicBool::new(false),
            cookies,
            config,
            clock,
        }
    }

    /// Replace the session with a new token pair.
    ///
    /// The access token expiry is taken from its `exp` claim when it decodes,
    /// otherwise from `expires_in`.
    pub fn store_tokens(&self, pair: &TokenPair, user: Option<serde_json::Value>) -> Result<(), TokenError> {
        let now_ms = self.clock.now_millis();
        let claims = decode_claims(&pair.access_token).ok();
        let expires_at_ms = self.expiry_for(pair);

        self.cookies.set(Cookie {
            name: self.config.cookie_name.clone(),
            value: obfuscate(&pair.refresh_token, &self.config.obfuscation_key),
            domain: self.config.cookie_domain.clone(),
            path: "/".to_string(),
            secure: self.config.cookie_secure,
            same_site: SameSite::Strict,
            max_age_secs: self.config.cookie_max_age_secs,
            expires_at_ms: now_ms.saturating_add(self.config.cookie_max_age_secs.saturating_mul(1000)),
        })?;

        // Keep the user profile across refreshes that don't carry one.
        let user = user.or_else(|| self.access.load().as_deref().and_then(|s| s.user.clone()));
        self.access.store(Some(Arc::new(AccessState {
            access_token: pair.access_token.clone(),
            expires_at_ms,
            claims,
            user,
        })));
        self.held.store(true, Ordering::Release);

        tracing::debug!(expires_at_ms, "Stored token pair");
        Ok(())
    }

    /// Expiry of a pair's access token in epoch milliseconds, as
    /// [`store_tokens`](Self::store_tokens) would record it.
    pub fn expiry_for(&self, pair: &TokenPair) -> u64 {
        match decode_claims(&pair.access_token) {
            Ok(claims) => claims.exp.saturating_mul(1000),
            Err(_) => self
                .clock
                .now_millis()
                .saturating_add(pair.expires_in.saturating_mul(1000)),
        }
    }

    /// The held session as a pair, for handing to another tab. Ignores the
    /// expiry buffer; `None` without both halves.
    pub fn current_pair(&self) -> Option<TokenPair> {
        let state = self.access.load_full()?;
        let refresh_token = self.refresh_token()?;
        let remaining_ms = state.expires_at_ms.saturating_sub(self.clock.now_millis());
        Some(TokenPair::new(state.access_token.clone(), refresh_token, remaining_ms / 1000))
    }

    /// Current access token, or `None` when missing or within the expiry buffer.
    ///
    /// A token inside the buffer is dropped from memory so that callers refresh
    /// instead of racing a request against its expiry. The refresh token is kept.
    pub fn access_token(&self) -> Option<String> {
        let state = self.access.load_full()?;
        let now_ms = self.clock.now_millis();
        if now_ms.saturating_add(self.buffer_ms()) >= state.expires_at_ms {
            tracing::debug!("Access token inside expiry buffer, discarding");
            let _ = self
                .access
                .compare_and_swap(&Some(state), None::<Arc<AccessState>>);
            return None;
        }
        Some(state.access_token.clone())
    }

    /// De-obfuscated refresh token from the cookie jar.
    pub fn refresh_token(&self) -> Option<String> {
        let cookie = self
            .cookies
            .get(&self.config.cookie_name, self.clock.now_millis())?;
        let token = deobfuscate(&cookie.value, &self.config.obfuscation_key);
        if token.is_none() {
            tracing::warn!(cookie = %self.config.cookie_name, "Refresh cookie could not be decoded");
        }
        token
    }

    /// Drop both halves of the session.
    pub fn clear_tokens(&self) {
        self.access.store(None);
        self.held.store(false, Ordering::Release);
        if let Err(e) = self.cookies.remove(&self.config.cookie_name) {
            tracing::error!(error = %e, "Failed to remove refresh cookie");
        }
        tracing::debug!("Cleared tokens");
    }

    /// Whether this store has held a session since it was created or last
    /// cleared. A tab that never signed in has nothing to expire.
    pub fn has_held_session(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    /// True when an access token is held and has not expired.
    pub fn is_access_token_valid(&self) -> bool {
        self.access
            .load()
            .as_deref()
            .is_some_and(|s| self.clock.now_millis() < s.expires_at_ms)
    }

    /// True when there is no access token or it expires within `buffer`.
    pub fn is_access_token_expiring_soon(&self, buffer: Duration) -> bool {
        match self.access.load().as_deref() {
            Some(s) => {
                self.clock.now_millis().saturating_add(buffer.as_millis() as u64) >= s.expires_at_ms
            }
            None => true,
        }
    }

    /// Access token expiry in epoch milliseconds.
    pub fn access_token_expiry(&self) -> Option<u64> {
        self.access.load().as_deref().map(|s| s.expires_at_ms)
    }

    pub fn user(&self) -> Option<serde_json::Value> {
        self.access.load().as_deref().and_then(|s| s.user.clone())
    }

    pub fn expiry_buffer(&self) -> Duration {
        self.config.expiry_buffer()
    }

    /// Decode an arbitrary token and report its expiry status.
    pub fn validate_token(&self, token: &str) -> TokenValidation {
        match decode_claims(token) {
            Ok(claims) => {
                let is_expired = self.clock.now_secs() >= claims.exp;
                TokenValidation {
                    is_valid: !is_expired,
                    is_expired,
                    expires_at: Some(claims.exp),
                    claims: Some(claims),
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Token failed to decode");
                TokenValidation {
                    is_valid: false,
                    is_expired: false,
                    expires_at: None,
                    claims: None,
                }
            }
        }
    }

    /// Summary for diagnostics surfaces.
    pub fn token_info(&self) -> TokenInfo {
        let state = self.access.load_full();
        let now_ms = self.clock.now_millis();
        TokenInfo {
            has_access_token: state.is_some(),
            has_refresh_token: self.refresh_token().is_some(),
            expires_at: state.as_ref().map(|s| s.expires_at_ms),
            seconds_remaining: state
                .as_ref()
                .map(|s| s.expires_at_ms.saturating_sub(now_ms) / 1000),
            subject: state
                .as_ref()
                .and_then(|s| s.claims.as_ref().map(|c| c.sub.clone())),
        }
    }

    fn buffer_ms(&self) -> u64 {
        self.config.expiry_buffer().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::token::claims::encode_unsigned;
    use crate::token::cookie::MemoryCookieJar;

    fn store_with(clock: &ManualClock) -> (TokenStore, MemoryCookieJar) {
        let jar = MemoryCookieJar::new();
        let store = TokenStore::new(TokenConfig::default(), Arc::new(jar.clone()), Arc::new(clock.clone()));
        (store, jar)
    }

    #[test]
    fn test_access_token_disappears_inside_buffer() {
        let clock = ManualClock::new(1_700_000_000_000);
        let (store, _) = store_with(&clock);
        store.store_tokens(&TokenPair::new("access", "refresh", 3600), None).unwrap();

        assert_eq!(store.access_token().as_deref(), Some("access"));

        clock.advance(Duration::from_secs(3600 - 300));
        assert_eq!(store.access_token(), None);
        // the refresh half survives so the session can be renewed
        assert_eq!(store.refresh_token().as_deref(), Some("refresh"));
        assert!(!store.token_info().has_access_token);
    }

    #[test]
    fn test_refresh_token_is_obfuscated_in_cookie() {
        let clock = ManualClock::new(0);
        let (store, jar) = store_with(&clock);
        store.store_tokens(&TokenPair::new("a", "my-refresh", 60), None).unwrap();

        let cookie = jar.get("__session_rt", 0).unwrap();
        assert_ne!(cookie.value, "my-refresh");
        assert_eq!(cookie.same_site, SameSite::Strict);
        assert!(cookie.secure);
        assert_eq!(cookie.max_age_secs, 30 * 24 * 3600);
    }

    #[test]
    fn test_jwt_expiry_wins_over_expires_in() {
        let clock = ManualClock::new(1_000_000_000);
        let (store, _) = store_with(&clock);
        let token = encode_unsigned(&DecodedClaims {
            sub: "u1".into(),
            exp: 1_000_000 + 7200,
            iat: None,
            email_verified: false,
            is_admin: false,
            mfa_enabled: false,
        });
        store.store_tokens(&TokenPair::new(token, "r", 60), None).unwrap();

        assert_eq!(store.access_token_expiry(), Some((1_000_000 + 7200) * 1000));
        assert_eq!(store.token_info().subject.as_deref(), Some("u1"));
    }

    #[test]
    fn test_validity_and_expiring_soon() {
        let clock = ManualClock::new(0);
        let (store, _) = store_with(&clock);
        assert!(!store.is_access_token_valid());
        assert!(store.is_access_token_expiring_soon(Duration::ZERO));

        store.store_tokens(&TokenPair::new("a", "r", 600), None).unwrap();
        assert!(store.is_access_token_valid());
        assert!(!store.is_access_token_expiring_soon(Duration::from_secs(300)));
        assert!(store.is_access_token_expiring_soon(Duration::from_secs(600)));

        clock.advance(Duration::from_secs(600));
        assert!(!store.is_access_token_valid());
    }

    #[test]
    fn test_clear_removes_both_halves() {
        let clock = ManualClock::new(0);
        let (store, jar) = store_with(&clock);
        store.store_tokens(&TokenPair::new("a", "r", 600), None).unwrap();
        store.clear_tokens();

        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
        assert!(jar.get("__session_rt", 0).is_none());
    }

    #[test]
    fn test_user_survives_refresh_without_profile() {
        let clock = ManualClock::new(0);
        let (store, _) = store_with(&clock);
        let user = serde_json::json!({"id": "u1"});
        store.store_tokens(&TokenPair::new("a", "r", 600), Some(user.clone())).unwrap();
        store.store_tokens(&TokenPair::new("b", "r2", 600), None).unwrap();
        assert_eq!(store.user(), Some(user));
    }

    #[test]
    fn test_current_pair_reports_remaining_lifetime() {
        let clock = ManualClock::new(0);
        let (store, _) = store_with(&clock);
        assert!(store.current_pair().is_none());

        store.store_tokens(&TokenPair::new("a", "r", 600), None).unwrap();
        clock.advance(Duration::from_secs(500));
        let pair = store.current_pair().unwrap();
        assert_eq!(pair.access_token, "a");
        assert_eq!(pair.refresh_token, "r");
        assert_eq!(pair.expires_in, 100);
        assert_eq!(store.expiry_for(&pair), 600_000);
    }

    #[test]
    fn test_validate_token_reports_expiry() {
        let clock = ManualClock::new(2_000_000_000);
        let (store, _) = store_with(&clock);
        let make = |exp| {
            encode_unsigned(&DecodedClaims {
                sub: "u".into(),
                exp,
                iat: None,
                email_verified: false,
                is_admin: false,
                mfa_enabled: false,
            })
        };

        let fresh = store.validate_token(&make(2_000_100));
        assert!(fresh.is_valid);
        assert_eq!(fresh.expires_at, Some(2_000_100));

        let stale = store.validate_token(&make(1_999_000));
        assert!(stale.is_expired);
        assert!(!stale.is_valid);

        let garbage = store.validate_token("nope");
        assert!(!garbage.is_valid);
        assert!(garbage.claims.is_none());
    }

    #[test]
    fn test_held_session_survives_buffer_discard_until_cleared() {
        let clock = ManualClock::new(1_700_000_000_000);
        let (store, jar) = store_with(&clock);
        assert!(!store.has_held_session());

        store.store_tokens(&TokenPair::new("access", "refresh", 60), None).unwrap();
        assert!(store.access_token().is_none());
        assert!(store.has_held_session());

        // Another tab on the same jar sees the cookie but never held a session.
        let sibling = TokenStore::new(TokenConfig::default(), Arc::new(jar), Arc::new(clock.clone()));
        assert_eq!(sibling.refresh_token().as_deref(), Some("refresh"));
        assert!(!sibling.has_held_session());

        store.clear_tokens();
        assert!(!store.has_held_session());
    }
}
