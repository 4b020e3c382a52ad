use thiserror::Error;
use tracing::debug;

/// ASCII punctuation accepted as the "special character" class.
pub const SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{};:'\",.<>?/\\|`~";

pub const MIN_MASTER_LEN: usize = 12;
pub const MIN_STRENGTH_SCORE: u8 = 3;

/// Single coarse rejection kind. Which rule failed is logged, never
/// returned, so a caller with partial knowledge of the password gets no
/// guidance from the error.
#[derive(Debug, Error)]
#[error("master password rejected by policy")]
pub struct PolicyReject;

/// User-presence (biometric) oracle. `Unsupported` is equivalent to the
/// check not being consulted at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Confirmed,
    Unsupported,
    Denied,
}

pub trait UserPresence: Send + Sync {
    fn user_presence(&self) -> Presence;
}

/// Breach oracle (e.g. a k-anonymity range lookup). `None` means the
/// oracle could not answer; the password is not rejected for that.
pub trait BreachOracle: Send + Sync {
    fn breached(&self, password: &str) -> Option<bool>;
}

/// Strength estimator oracle, scoring 0 (worst) to 4 (best).
pub trait StrengthEstimator: Send + Sync {
    fn score(&self, password: &str) -> u8;
}

/// Defaults: no biometric hardware, no breach lookups.
pub struct NoPresence;

impl UserPresence for NoPresence {
    fn user_presence(&self) -> Presence {
        Presence::Unsupported
    }
}

pub struct NoBreachOracle;

impl BreachOracle for NoBreachOracle {
    fn breached(&self, _password: &str) -> Option<bool> {
        None
    }
}

/// Built-in estimator: pool-size entropy heuristic mapped onto the 0-4
/// scale. External estimators plug in through the trait.
pub struct HeuristicEstimator;

impl StrengthEstimator for HeuristicEstimator {
    fn score(&self, password: &str) -> u8 {
        score_from_bits(estimate_bits(password))
    }
}

fn estimate_bits(password: &str) -> f64 {
    if password.is_empty() {
        return 0.0;
    }
    let mut pool: usize = 0;
    if password.chars().any(|c| c.is_ascii_lowercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_uppercase()) {
        pool += 26;
    }
    if password.chars().any(|c| c.is_ascii_digit()) {
        pool += 10;
    }
    if password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        pool += SPECIAL_CHARS.len();
    }
    if password.chars().any(|c| !c.is_ascii()) {
        pool += 64;
    }
    if pool == 0 {
        pool = 10;
    }
    // Penalize runs of the same character; "aaaaaaaaaaaa" is not 12 chars
    // of entropy.
    let mut effective = 0usize;
    let mut prev: Option<char> = None;
    for c in password.chars() {
        if prev != Some(c) {
            effective += 1;
        }
        prev = Some(c);
    }
    (pool as f64).log2() * (effective as f64)
}

fn score_from_bits(bits: f64) -> u8 {
    if bits < 28.0 {
        0
    } else if bits < 36.0 {
        1
    } else if bits < 60.0 {
        2
    } else if bits < 80.0 {
        3
    } else {
        4
    }
}

/// Validate a candidate master password.
///
/// Rules: length >= 12, an uppercase letter, a digit, a special character,
/// estimator score >= 3, and — when the breach oracle can answer — not
/// known-breached. All failures collapse into `PolicyReject`.
pub fn validate_master_password(
    password: &str,
    estimator: &dyn StrengthEstimator,
    breach: &dyn BreachOracle,
) -> Result<(), PolicyReject> {
    let mut failed: Vec<&'static str> = Vec::new();

    if password.chars().count() < MIN_MASTER_LEN {
        failed.push("length");
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        failed.push("uppercase");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        failed.push("digit");
    }
    if !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
        failed.push("special");
    }
    if estimator.score(password) < MIN_STRENGTH_SCORE {
        failed.push("strength");
    }
    if breach.breached(password) == Some(true) {
        failed.push("breached");
    }

    if failed.is_empty() {
        Ok(())
    } else {
        debug!(rules = ?failed, "master password rejected");
        Err(PolicyReject)
    }
}
