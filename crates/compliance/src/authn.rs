//! Authentication: MFA challenges, sessions, lockout, password policy.
//!
//! MFA codes are compared in constant time and challenges die after three
//! failed attempts or five minutes. Sessions run 8h (4h privileged) with a
//! 15-minute idle timeout. Five failed logins inside 30 minutes lock the
//! account for 30 minutes.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use forge_core::{Clock, Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Supported multi-factor methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MfaMethod {
    Totp,
    Sms,
    Email,
    Push,
    HardwareKey,
    Biometric,
}

impl MfaMethod {
    fn uses_shared_secret(&self) -> bool {
        matches!(self, MfaMethod::Totp | MfaMethod::Sms | MfaMethod::Email)
    }
}

/// Single-use MFA challenge. `verified` is monotonic true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub challenge_id: String,
    pub user_id: String,
    pub method: MfaMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub secret: Option<String>,
    pub verified: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

/// Authenticated session with security attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip_address: String,
    pub user_agent: String,
    pub mfa_verified: bool,
    pub mfa_method: Option<MfaMethod>,
    pub is_privileged: bool,
}

impl AuthSession {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        now - self.last_activity > Duration::minutes(15)
    }
}

/// Authentication service with MFA support.
pub struct AuthenticationService {
    clock: Arc<dyn Clock>,
    challenges: Mutex<HashMap<String, MfaChallenge>>,
    sessions: Mutex<HashMap<String, AuthSession>>,
    failed_attempts: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    lockouts: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl AuthenticationService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            challenges: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            failed_attempts: Mutex::new(HashMap::new()),
            lockouts: Mutex::new(HashMap::new()),
        }
    }

    /// Create an MFA challenge with a 5-minute expiry.
    pub async fn create_mfa_challenge(&self, user_id: &str, method: MfaMethod) -> MfaChallenge {
        let now = self.clock.now();
        let secret = if method.uses_shared_secret() {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut bytes);
            Some(hex_encode(&bytes))
        } else {
            None
        };

        let challenge = MfaChallenge {
            challenge_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            method,
            created_at: now,
            expires_at: now + Duration::minutes(5),
            secret,
            verified: false,
            attempts: 0,
            max_attempts: 3,
        };

        self.challenges
            .lock()
            .await
            .insert(challenge.challenge_id.clone(), challenge.clone());

        info!(user_id, method = ?method, "mfa challenge created");
        challenge
    }

    /// Verify an MFA response. Constant-time comparison; exceeding the retry
    /// budget kills the challenge.
    pub async fn verify_mfa(&self, challenge_id: &str, code: &str) -> bool {
        let mut challenges = self.challenges.lock().await;
        let Some(challenge) = challenges.get_mut(challenge_id) else {
            return false;
        };

        if challenge.verified {
            return false;
        }

        if self.clock.now() > challenge.expires_at {
            warn!(challenge_id, "mfa challenge expired");
            return false;
        }

        challenge.attempts += 1;
        if challenge.attempts > challenge.max_attempts {
            warn!(user_id = %challenge.user_id, "mfa max attempts exceeded");
            return false;
        }

        let expected = match (&challenge.method, challenge.secret.as_deref()) {
            (MfaMethod::Totp, Some(secret)) => totp_code(secret, self.clock.now()),
            (_, Some(secret)) => secret[..6.min(secret.len())].to_string(),
            (_, None) => String::new(),
        };

        if constant_time_eq(code, &expected) {
            challenge.verified = true;
            info!(user_id = %challenge.user_id, "mfa verified");
            return true;
        }

        false
    }

    /// The code the user should currently present for a challenge. Used by
    /// the delivery channel (SMS/email body, authenticator provisioning).
    pub async fn current_mfa_code(&self, challenge_id: &str) -> Option<String> {
        let challenges = self.challenges.lock().await;
        let challenge = challenges.get(challenge_id)?;
        let secret = challenge.secret.as_deref()?;
        Some(match challenge.method {
            MfaMethod::Totp => totp_code(secret, self.clock.now()),
            _ => secret[..6.min(secret.len())].to_string(),
        })
    }

    /// Whether a challenge is dead (expired or out of attempts).
    pub async fn challenge_exhausted(&self, challenge_id: &str) -> bool {
        let challenges = self.challenges.lock().await;
        match challenges.get(challenge_id) {
            Some(c) => c.attempts > c.max_attempts || self.clock.now() > c.expires_at,
            None => true,
        }
    }

    /// Create an authenticated session: 8h, or 4h when privileged.
    pub async fn create_session(
        &self,
        user_id: &str,
        ip_address: &str,
        user_agent: &str,
        mfa_verified: bool,
        mfa_method: Option<MfaMethod>,
        is_privileged: bool,
    ) -> AuthSession {
        let now = self.clock.now();
        let duration = if is_privileged {
            Duration::hours(4)
        } else {
            Duration::hours(8)
        };

        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);

        let session = AuthSession {
            session_id: hex_encode(&token),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + duration,
            last_activity: now,
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            mfa_verified,
            mfa_method,
            is_privileged,
        };

        self.sessions
            .lock()
            .await
            .insert(session.session_id.clone(), session.clone());

        info!(user_id, is_privileged, mfa_verified, "session created");
        session
    }

    /// Validate a session. Refreshes `last_activity` on success; expiry or
    /// idleness invalidates it and returns `None`.
    pub async fn validate_session(&self, session_id: &str) -> Option<AuthSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;

        let session = sessions.get(session_id)?;
        if session.is_expired(now) || session.is_idle(now) {
            let removed = sessions.remove(session_id);
            if let Some(s) = removed {
                info!(session_id, user_id = %s.user_id, "session invalidated");
            }
            return None;
        }

        let session = sessions.get_mut(session_id)?;
        session.last_activity = now;
        Some(session.clone())
    }

    pub async fn invalidate_session(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().await.remove(session_id) {
            info!(session_id, user_id = %session.user_id, "session invalidated");
        }
    }

    /// Whether the account is currently locked out.
    pub async fn check_account_lockout(&self, user_id: &str) -> bool {
        let lockouts = self.lockouts.lock().await;
        matches!(lockouts.get(user_id), Some(until) if self.clock.now() < *until)
    }

    /// Record a failed login. Five failures within 30 minutes lock the
    /// account for 30 minutes.
    pub async fn record_failed_attempt(&self, user_id: &str) {
        let now = self.clock.now();
        let cutoff = now - Duration::minutes(30);

        let mut attempts = self.failed_attempts.lock().await;
        let entry = attempts.entry(user_id.to_string()).or_default();
        entry.retain(|t| *t > cutoff);
        entry.push(now);

        if entry.len() >= 5 {
            self.lockouts
                .lock()
                .await
                .insert(user_id.to_string(), now + Duration::minutes(30));
            warn!(user_id, duration_minutes = 30, "account locked");
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Six-digit time-based code over the challenge secret, evaluated at the
/// injected clock's time so verification stays deterministic under test.
fn totp_code(secret: &str, at: DateTime<Utc>) -> String {
    let totp = totp_rs::TOTP::new_unchecked(
        totp_rs::Algorithm::SHA1,
        6,
        1,
        30,
        secret.as_bytes().to_vec(),
    );
    totp.generate(at.timestamp().max(0) as u64)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Password requirements, enforced at change time.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_special: bool,
    pub max_age_days: i64,
    /// Cannot reuse this many previous passwords.
    pub history_count: usize,
    pub min_age_days: i64,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
            max_age_days: 90,
            history_count: 4,
            min_age_days: 1,
        }
    }
}

const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;':\",./<>?";

struct PasswordHistory {
    hashes: Vec<String>,
    last_changed: Option<DateTime<Utc>>,
}

/// Password management with policy enforcement. Hashing via Argon2id.
pub struct PasswordService {
    policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
    history: Mutex<HashMap<String, PasswordHistory>>,
}

impl PasswordService {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_policy(clock, PasswordPolicy::default())
    }

    pub fn with_policy(clock: Arc<dyn Clock>, policy: PasswordPolicy) -> Self {
        Self {
            policy,
            clock,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Validate a candidate password against the policy. Returns the list of
    /// violations; empty means acceptable.
    pub fn validate_password(&self, password: &str) -> Vec<String> {
        let mut violations = Vec::new();

        if password.len() < self.policy.min_length {
            violations.push(format!(
                "Password must be at least {} characters",
                self.policy.min_length
            ));
        }
        if self.policy.require_uppercase && !password.chars().any(|c| c.is_ascii_uppercase()) {
            violations.push("Password must contain uppercase letter".to_string());
        }
        if self.policy.require_lowercase && !password.chars().any(|c| c.is_ascii_lowercase()) {
            violations.push("Password must contain lowercase letter".to_string());
        }
        if self.policy.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            violations.push("Password must contain digit".to_string());
        }
        if self.policy.require_special && !password.chars().any(|c| SPECIAL_CHARS.contains(c)) {
            violations.push("Password must contain special character".to_string());
        }

        violations
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| Error::fatal(format!("password hashing failed: {}", e)))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> bool {
        match PasswordHash::new(hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// Change a password: policy check, reuse check against the last N
    /// hashes, and minimum-age check.
    pub async fn change_password(&self, user_id: &str, new_password: &str) -> Result<String> {
        let violations = self.validate_password(new_password);
        if !violations.is_empty() {
            return Err(Error::validation(violations.join("; ")));
        }

        let now = self.clock.now();
        let mut history = self.history.lock().await;
        let entry = history.entry(user_id.to_string()).or_insert(PasswordHistory {
            hashes: Vec::new(),
            last_changed: None,
        });

        if let Some(last) = entry.last_changed {
            if now - last < Duration::days(self.policy.min_age_days) {
                return Err(Error::validation("Password changed too recently"));
            }
        }

        for old_hash in entry.hashes.iter().take(self.policy.history_count) {
            if self.verify_password(new_password, old_hash) {
                return Err(Error::validation("Password was recently used"));
            }
        }

        let hash = self.hash_password(new_password)?;
        entry.hashes.insert(0, hash.clone());
        entry.hashes.truncate(self.policy.history_count + 1);
        entry.last_changed = Some(now);

        Ok(hash)
    }

    /// Whether a password set at `changed_at` is past the max-age window.
    pub fn is_password_expired(&self, changed_at: DateTime<Utc>) -> bool {
        self.clock.now() - changed_at > Duration::days(self.policy.max_age_days)
    }
}
