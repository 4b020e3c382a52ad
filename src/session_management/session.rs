use base64::{engine::general_purpose, Engine as _};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use zeroize::Zeroizing;

use crate::cryptography::primitives::{ct_eq, random_array, MasterKey};

/// Sliding session lifetime.
pub const SESSION_TTL: Duration = Duration::from_secs(600);
pub const TOKEN_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not authorized")]
    Unauthorized,
    #[error("session expired")]
    Expired,
    #[error("session state is invalid")]
    InvalidState,
    #[error("request nonce was already used")]
    NonceReplay,
    #[error("system randomness unavailable")]
    Rng,
}

/// Resolves the OS identity a session is bound to. Unresolvable identity
/// (None) skips the owner check rather than failing it.
pub trait OwnerIdentity: Send + Sync {
    fn current_uid(&self) -> Option<u32>;
}

pub struct SystemOwner;

impl OwnerIdentity for SystemOwner {
    #[cfg(unix)]
    fn current_uid(&self) -> Option<u32> {
        // Safety: getuid has no failure mode.
        Some(unsafe { libc::getuid() })
    }

    #[cfg(not(unix))]
    fn current_uid(&self) -> Option<u32> {
        None
    }
}

struct SessionState {
    token: [u8; TOKEN_LEN],
    // 32 bytes expected; length is re-checked on every validate
    mek: Zeroizing<Vec<u8>>,
    dir: PathBuf,
    expires: Instant,
    nonces: HashSet<String>,
    owner_uid: Option<u32>,
}

impl SessionState {
    fn new(
        token: [u8; TOKEN_LEN],
        mek: &MasterKey,
        dir: PathBuf,
        expires: Instant,
        owner_uid: Option<u32>,
    ) -> Self {
        let mek = Zeroizing::new(mek.as_bytes().to_vec());
        // Keep the unlocked MEK's pages out of swap for the session's
        // lifetime. mlock can fail (RLIMIT_MEMLOCK); the session works the
        // same without it.
        #[cfg(unix)]
        if !mek.is_empty() {
            // Safety: mlock reads the pointer and length only; the kernel
            // rounds to page boundaries.
            let _ = unsafe { libc::mlock(mek.as_ptr() as *const libc::c_void, mek.len()) };
        }
        Self {
            token,
            mek,
            dir,
            expires,
            nonces: HashSet::new(),
            owner_uid,
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        // Release the page pin before Zeroizing clears the buffer. Runs on
        // clear, expiry and session replacement alike.
        #[cfg(unix)]
        if !self.mek.is_empty() {
            let _ =
                unsafe { libc::munlock(self.mek.as_ptr() as *const libc::c_void, self.mek.len()) };
        }
    }
}

/// Single-slot session holder. All transitions run under one mutex; the
/// MEK is handed out only as per-call copies so callers can zeroize theirs
/// independently.
pub struct SessionManager {
    inner: Mutex<Option<SessionState>>,
    ttl: Duration,
    owner: Box<dyn OwnerIdentity>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            ttl,
            owner: Box::new(SystemOwner),
        }
    }

    pub fn with_owner(mut self, owner: Box<dyn OwnerIdentity>) -> Self {
        self.owner = owner;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace any prior session (zeroizing its MEK) with a fresh one.
    /// Returns the base64 token and the TTL in seconds.
    pub fn establish(&self, dir: PathBuf, mek: MasterKey) -> Result<(String, u64), SessionError> {
        let token: [u8; TOKEN_LEN] = random_array().map_err(|_| SessionError::Rng)?;
        let state = SessionState::new(
            token,
            &mek,
            dir,
            Instant::now() + self.ttl,
            self.owner.current_uid(),
        );
        let mut guard = self.inner.lock().expect("session mutex poisoned");
        // Dropping the old state unpins and zeroizes its MEK.
        *guard = Some(state);
        debug!("session established");
        Ok((general_purpose::STANDARD.encode(token), self.ttl.as_secs()))
    }

    /// Authenticate one privileged request.
    ///
    /// Order matters: expiry clears state before the token is even looked
    /// at; token and owner checks reject without clearing; a short MEK
    /// clears (the state is unusable); replay rejects but preserves the
    /// session for other nonces. Success records the nonce, slides the
    /// expiry and returns a fresh MEK copy plus the bound vault directory.
    pub fn validate(
        &self,
        token_b64: &str,
        nonce: &str,
    ) -> Result<(MasterKey, PathBuf), SessionError> {
        if token_b64.is_empty() || nonce.is_empty() {
            return Err(SessionError::Unauthorized);
        }
        let presented = general_purpose::STANDARD
            .decode(token_b64)
            .map_err(|_| SessionError::Unauthorized)?;

        let mut guard = self.inner.lock().expect("session mutex poisoned");
        let state = guard.as_mut().ok_or(SessionError::Unauthorized)?;

        if Instant::now() > state.expires {
            *guard = None;
            debug!("session expired");
            return Err(SessionError::Expired);
        }

        if !ct_eq(&presented, &state.token) {
            return Err(SessionError::Unauthorized);
        }

        if let (Some(bound), Some(current)) = (state.owner_uid, self.owner.current_uid()) {
            if bound != current {
                debug!("session owner mismatch");
                return Err(SessionError::Unauthorized);
            }
        }

        let Ok(mek_copy) = MasterKey::from_slice(&state.mek) else {
            *guard = None;
            return Err(SessionError::InvalidState);
        };

        if state.nonces.contains(nonce) {
            debug!("request nonce replayed");
            return Err(SessionError::NonceReplay);
        }
        state.nonces.insert(nonce.to_string());
        state.expires = Instant::now() + self.ttl;

        Ok((mek_copy, state.dir.clone()))
    }

    /// Drop the session, zeroizing the MEK. Idempotent.
    pub fn clear(&self) {
        let mut guard = self.inner.lock().expect("session mutex poisoned");
        if guard.take().is_some() {
            debug!("session cleared");
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().expect("session mutex poisoned").is_some()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptography::primitives::KEY_LEN;

    fn mek() -> MasterKey {
        MasterKey::from_bytes([9u8; KEY_LEN])
    }

    #[test]
    fn establish_validate_roundtrip() {
        let mgr = SessionManager::new();
        let (token, ttl) = mgr.establish(PathBuf::from("/tmp/vault"), mek()).unwrap();
        assert_eq!(ttl, 600);
        let (key, dir) = mgr.validate(&token, "n1").unwrap();
        assert_eq!(key.as_bytes(), mek().as_bytes());
        assert_eq!(dir, PathBuf::from("/tmp/vault"));
    }

    #[test]
    fn empty_or_wrong_token_rejected() {
        let mgr = SessionManager::new();
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        assert_eq!(mgr.validate("", "n").unwrap_err(), SessionError::Unauthorized);
        assert_eq!(mgr.validate(&token, "").unwrap_err(), SessionError::Unauthorized);

        let wrong = general_purpose::STANDARD.encode([0u8; TOKEN_LEN]);
        assert_eq!(mgr.validate(&wrong, "n").unwrap_err(), SessionError::Unauthorized);
        // session survives a bad token
        assert!(mgr.validate(&token, "n").is_ok());
    }

    #[test]
    fn nonce_replay_rejected_session_preserved() {
        let mgr = SessionManager::new();
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        mgr.validate(&token, "n1").unwrap();
        assert_eq!(
            mgr.validate(&token, "n1").unwrap_err(),
            SessionError::NonceReplay
        );
        assert!(mgr.validate(&token, "n2").is_ok());
    }

    #[test]
    fn expiry_clears_state() {
        let mgr = SessionManager::with_ttl(Duration::from_millis(30));
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(mgr.validate(&token, "n1").unwrap_err(), SessionError::Expired);
        // second attempt: no session at all
        assert_eq!(
            mgr.validate(&token, "n2").unwrap_err(),
            SessionError::Unauthorized
        );
    }

    #[test]
    fn ttl_slides_on_success() {
        let mgr = SessionManager::with_ttl(Duration::from_millis(80));
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        mgr.validate(&token, "n1").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        // 100ms after establish, but only 50ms after the last validate
        assert!(mgr.validate(&token, "n2").is_ok());
    }

    #[test]
    fn replay_does_not_slide_ttl() {
        let mgr = SessionManager::with_ttl(Duration::from_millis(80));
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        mgr.validate(&token, "n1").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            mgr.validate(&token, "n1").unwrap_err(),
            SessionError::NonceReplay
        );
        std::thread::sleep(Duration::from_millis(50));
        // replay at 50ms must not have extended the 80ms window
        assert_eq!(mgr.validate(&token, "n2").unwrap_err(), SessionError::Expired);
    }

    struct FixedOwner(Option<u32>);
    impl OwnerIdentity for FixedOwner {
        fn current_uid(&self) -> Option<u32> {
            self.0
        }
    }

    struct FlippingOwner {
        calls: std::sync::atomic::AtomicU32,
    }
    impl OwnerIdentity for FlippingOwner {
        fn current_uid(&self) -> Option<u32> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Some(n) // different uid on every resolution
        }
    }

    #[test]
    fn owner_mismatch_is_unauthorized() {
        let mgr = SessionManager::new().with_owner(Box::new(FlippingOwner {
            calls: std::sync::atomic::AtomicU32::new(0),
        }));
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        assert_eq!(mgr.validate(&token, "n1").unwrap_err(), SessionError::Unauthorized);
    }

    #[test]
    fn unresolvable_owner_skips_check() {
        let mgr = SessionManager::new().with_owner(Box::new(FixedOwner(None)));
        let (token, _) = mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        assert!(mgr.validate(&token, "n1").is_ok());
    }

    #[test]
    fn clear_is_idempotent() {
        let mgr = SessionManager::new();
        mgr.establish(PathBuf::from("/v"), mek()).unwrap();
        mgr.clear();
        mgr.clear();
        assert!(!mgr.is_active());
    }
}
