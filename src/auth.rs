//! Bearer credential for the upstream API.
//!
//! The credential is the only shared mutable state in the refresh path. It lives behind an
//! `RwLock<Option<Arc<Credential>>>` and is replaced in one assignment, so a reader always sees
//! a token together with the expiry it was issued with. Two refreshers that both find the token
//! stale will both ask upstream for a new one; whichever stores last wins.

use chrono::Utc;
use log::{debug, info};
use std::sync::{Arc, PoisonError, RwLock};

/// Seconds shaved off the advertised lifetime so a token is not used right at its edge.
pub const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Credential {
    /// Build from an `expires_in` lifetime as returned by a token endpoint.
    pub fn from_lifetime(access_token: String, expires_in: u64) -> Self {
        let lifetime = i64::try_from(expires_in).unwrap_or(i64::MAX);
        Credential {
            access_token,
            expires_at: Utc::now().timestamp().saturating_add(lifetime).saturating_sub(EXPIRY_SKEW_SECS),
        }
    }

    pub fn is_valid(&self) -> bool {
        token_valid(&self.access_token, self.expires_at)
    }
}

/// True iff `token` is non-empty and `expiry` (unix seconds) is still in the future.
pub fn token_valid(token: &str, expiry: i64) -> bool {
    !token.is_empty() && expiry > Utc::now().timestamp()
}

pub fn build_auth_header(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Something that can mint a fresh credential, normally the upstream token endpoint.
pub trait TokenIssuer {
    type Error;

    fn issue(&self) -> Result<Credential, Self::Error>;
}

pub struct AuthManager<I> {
    issuer: I,
    current: RwLock<Option<Arc<Credential>>>,
}

impl<I: TokenIssuer> AuthManager<I> {
    pub fn new(issuer: I) -> Self {
        AuthManager {
            issuer,
            current: RwLock::new(None),
        }
    }

    pub fn current(&self) -> Option<Arc<Credential>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Return a valid credential, refreshing it first when needed.
    pub fn credential(&self) -> Result<Arc<Credential>, I::Error> {
        if let Some(cred) = self.current().filter(|c| c.is_valid()) {
            return Ok(cred);
        }
        self.refresh()
    }

    /// `Authorization` header value for the next upstream call.
    pub fn header(&self) -> Result<String, I::Error> {
        Ok(build_auth_header(&self.credential()?.access_token))
    }

    /// Unconditionally fetch a new credential. The issuer is called without holding the lock.
    pub fn refresh(&self) -> Result<Arc<Credential>, I::Error> {
        debug!("Requesting new upstream credential");
        let fresh = Arc::new(self.issuer.issue()?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&fresh));
        info!("Upstream credential refreshed (expires_at={})", fresh.expires_at);
        Ok(fresh)
    }

    /// Drop the current credential, e.g. after upstream answered 401.
    pub fn invalidate(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingIssuer {
        calls: AtomicUsize,
        lifetime: u64,
    }

    impl TokenIssuer for CountingIssuer {
        type Error = String;

        fn issue(&self) -> Result<Credential, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Credential::from_lifetime(format!("token-{n}"), self.lifetime))
        }
    }

    struct FailingIssuer;

    impl TokenIssuer for FailingIssuer {
        type Error = String;

        fn issue(&self) -> Result<Credential, String> {
            Err("auth endpoint down".to_string())
        }
    }

    fn issuer(lifetime: u64) -> CountingIssuer {
        CountingIssuer {
            calls: AtomicUsize::new(0),
            lifetime,
        }
    }

    #[test]
    fn token_expiry() {
        assert!(!token_valid("blahblah", 1));
        // 1st January 2100
        assert!(token_valid("blahblah", 4_102_444_800));
        assert!(!token_valid("", 4_102_444_800));
    }

    #[test]
    fn bearer_header_format() {
        let token = format!("{:x}", rand::random::<u128>());
        assert_eq!(build_auth_header(&token), format!("Bearer {token}"));
    }

    #[test]
    fn valid_credential_is_reused() {
        let auth = AuthManager::new(issuer(3600));
        assert_eq!(auth.header(), Ok("Bearer token-1".to_string()));
        assert_eq!(auth.header(), Ok("Bearer token-1".to_string()));
        assert_eq!(auth.issuer.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn short_lived_credential_is_refreshed_every_time() {
        // lifetime below the skew: already stale on arrival
        let auth = AuthManager::new(issuer(5));
        assert_eq!(auth.header(), Ok("Bearer token-1".to_string()));
        assert_eq!(auth.header(), Ok("Bearer token-2".to_string()));
    }

    #[test]
    fn invalidate_forces_refresh() {
        let auth = AuthManager::new(issuer(3600));
        auth.credential().expect("first");
        auth.invalidate();
        assert!(auth.current().is_none());
        assert_eq!(auth.credential().expect("second").access_token, "token-2");
    }

    #[test]
    fn issuer_failure_leaves_state_untouched() {
        let auth = AuthManager::new(FailingIssuer);
        assert_eq!(auth.header(), Err("auth endpoint down".to_string()));
        assert!(auth.current().is_none());
    }

    #[test]
    fn concurrent_refreshers_always_see_a_consistent_pair() {
        let auth = Arc::new(AuthManager::new(issuer(3600)));
        let handles = (0..8)
            .map(|_| {
                let auth = Arc::clone(&auth);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let cred = auth.credential().expect("credential");
                        assert!(cred.is_valid());
                        assert!(cred.access_token.starts_with("token-"));
                        if rand::random::<u8>() < 16 {
                            auth.invalidate();
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.join().expect("thread");
        }
        let last = auth.current();
        assert!(last.is_none() || last.is_some_and(|c| c.is_valid()));
    }
}
