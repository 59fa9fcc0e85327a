//! API key registry.
//!
//! Keys are bootstrapped from a `key:owner:limit[,...]` string, validated on
//! every request against the shared [`RateLimiter`], and can be issued or
//! revoked at runtime. All state lives in memory.

use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::error::{GateError, Result};
use crate::rate_limiter::{RateLimitInfo, RateLimiter};
use crate::unix_secs;
use crate::validation::RequestValidator;

/// Scope granting access to every resource.
pub const ALL_SCOPES: &str = "*";

/// Owner name that unlocks the admin endpoints.
pub const ADMIN_OWNER: &str = "admin";

pub const DEV_KEY: &str = "dev-key-12345";
pub const DEV_OWNER: &str = "developer";
pub const DEV_RATE_LIMIT: u32 = 100;

const ISSUED_KEY_PREFIX: &str = "cg_";
const ISSUED_KEY_BYTES: usize = 24;

#[derive(Debug, Clone)]
pub struct Credential {
    pub key: String,
    pub owner: String,
    pub rate_limit: u32,
    pub created_at: SystemTime,
    pub last_used_at: Option<SystemTime>,
    pub total_requests: u64,
    pub allowed_scopes: BTreeSet<String>,
}

impl Credential {
    pub fn new(key: String, owner: String, rate_limit: u32, scopes: BTreeSet<String>) -> Self {
        Self {
            key,
            owner,
            rate_limit,
            created_at: SystemTime::now(),
            last_used_at: None,
            total_requests: 0,
            allowed_scopes: scopes,
        }
    }

    pub fn permits(&self, resource: &str) -> bool {
        self.allowed_scopes.contains(ALL_SCOPES) || self.allowed_scopes.contains(resource)
    }
}

/// Identity handed back to the request path after a successful validation.
#[derive(Debug, Clone)]
pub struct ValidatedCredential {
    pub owner: String,
    pub scopes: BTreeSet<String>,
    pub rate_limit: RateLimitInfo,
}

impl ValidatedCredential {
    pub fn is_admin(&self) -> bool {
        self.owner == ADMIN_OWNER
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyStats {
    pub api_key: String,
    pub owner: String,
    pub rate_limit: u32,
    pub total_requests: u64,
    pub created_at: u64,
    pub last_used: Option<u64>,
    pub allowed_scopes: Vec<String>,
}

impl From<&Credential> for KeyStats {
    fn from(cred: &Credential) -> Self {
        Self {
            api_key: mask_key(&cred.key),
            owner: cred.owner.clone(),
            rate_limit: cred.rate_limit,
            total_requests: cred.total_requests,
            created_at: unix_secs(cred.created_at),
            last_used: cred.last_used_at.map(unix_secs),
            allowed_scopes: cred.allowed_scopes.iter().cloned().collect(),
        }
    }
}

fn mask_key(key: &str) -> String {
    let visible: String = key.chars().take(8).collect();
    format!("{}...", visible)
}

/// Parse `key:owner:limit` triples separated by commas.
///
/// Malformed entries are logged and skipped so one typo does not drop the
/// whole key set.
pub fn parse_credential_entries(raw: &str) -> Vec<Credential> {
    let mut parsed = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let mut parts = entry.splitn(3, ':');
        let (Some(key), Some(owner), Some(limit)) = (parts.next(), parts.next(), parts.next()) else {
            tracing::error!(entry_index = parsed.len(), "Skipping API key entry without key:owner:limit");
            continue;
        };

        let rate_limit = match limit.trim().parse::<u32>() {
            Ok(limit) if limit > 0 => limit,
            _ => {
                tracing::error!(owner = %owner, "Skipping API key entry with invalid rate limit");
                continue;
            }
        };

        if let Err(e) = RequestValidator::validate_credential_entry(key, owner) {
            tracing::error!(owner = %owner, error = %e, "Skipping malformed API key entry");
            continue;
        }

        parsed.push(Credential::new(
            key.to_string(),
            owner.to_string(),
            rate_limit,
            BTreeSet::from([ALL_SCOPES.to_string()]),
        ));
    }

    parsed
}

pub struct CredentialStore {
    credentials: Mutex<HashMap<String, Credential>>,
    limiter: Arc<RateLimiter>,
    window: Duration,
}

impl CredentialStore {
    pub fn new(limiter: Arc<RateLimiter>, window: Duration) -> Self {
        Self {
            credentials: Mutex::new(HashMap::new()),
            limiter,
            window,
        }
    }

    /// Build a store from the configured key string, falling back to a
    /// single development key when nothing usable is configured.
    pub fn from_config(raw: Option<&str>, limiter: Arc<RateLimiter>, window: Duration) -> Self {
        let mut credentials: HashMap<String, Credential> = raw
            .map(parse_credential_entries)
            .unwrap_or_default()
            .into_iter()
            .map(|c| (c.key.clone(), c))
            .collect();

        if credentials.is_empty() {
            tracing::warn!(
                key = DEV_KEY,
                owner = DEV_OWNER,
                rate_limit = DEV_RATE_LIMIT,
                "No API keys configured, created development key; do not use in production"
            );
            credentials.insert(
                DEV_KEY.to_string(),
                Credential::new(
                    DEV_KEY.to_string(),
                    DEV_OWNER.to_string(),
                    DEV_RATE_LIMIT,
                    BTreeSet::from([ALL_SCOPES.to_string()]),
                ),
            );
        } else {
            tracing::info!(count = credentials.len(), "Loaded API keys");
        }

        Self {
            credentials: Mutex::new(credentials),
            limiter,
            window,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Credential>>> {
        self.credentials
            .lock()
            .map_err(|_| GateError::Internal("Failed to acquire credential store lock".to_string()))
    }

    /// Validate a key and count the request against its rate limit.
    pub fn validate(&self, key: &str) -> Result<ValidatedCredential> {
        let rate_limit = {
            let credentials = self.lock()?;
            credentials
                .get(key)
                .map(|c| c.rate_limit)
                .ok_or(GateError::UnknownCredential)?
        };

        // The limiter has its own lock; ours is released before calling it.
        let info = self.limiter.check(key, rate_limit, self.window)?;
        if !info.allowed {
            return Err(GateError::RateLimited(info));
        }

        let mut credentials = self.lock()?;
        // Revoked between the two critical sections.
        let credential = credentials.get_mut(key).ok_or(GateError::UnknownCredential)?;
        credential.last_used_at = Some(SystemTime::now());
        credential.total_requests += 1;

        Ok(ValidatedCredential {
            owner: credential.owner.clone(),
            scopes: credential.allowed_scopes.clone(),
            rate_limit: info,
        })
    }

    pub fn check_scope(&self, key: &str, resource: &str) -> bool {
        self.lock()
            .map(|credentials| credentials.get(key).is_some_and(|c| c.permits(resource)))
            .unwrap_or(false)
    }

    /// Register a new key with a random, unguessable value.
    pub fn issue(&self, owner: &str, rate_limit: u32, scopes: BTreeSet<String>) -> Result<String> {
        if rate_limit == 0 {
            return Err(GateError::Validation("Rate limit must be greater than 0".to_string()));
        }
        let scopes = if scopes.is_empty() {
            BTreeSet::from([ALL_SCOPES.to_string()])
        } else {
            scopes
        };

        let mut credentials = self.lock()?;
        let key = loop {
            let candidate = generate_key();
            if !credentials.contains_key(&candidate) {
                break candidate;
            }
        };

        credentials.insert(
            key.clone(),
            Credential::new(key.clone(), owner.to_string(), rate_limit, scopes),
        );
        tracing::info!(owner = %owner, rate_limit, "Issued new API key");

        Ok(key)
    }

    /// Remove a key. Returns `false` when it was not registered.
    pub fn revoke(&self, key: &str) -> bool {
        let removed = match self.lock() {
            Ok(mut credentials) => credentials.remove(key),
            Err(e) => {
                tracing::warn!(error = %e, "Could not revoke API key");
                None
            }
        };

        match removed {
            Some(credential) => {
                let _ = self.limiter.reset(key);
                tracing::info!(owner = %credential.owner, "Revoked API key");
                true
            }
            None => false,
        }
    }

    pub fn key_stats(&self, key: &str) -> Option<KeyStats> {
        self.lock().ok()?.get(key).map(KeyStats::from)
    }

    pub fn all_stats(&self) -> Vec<KeyStats> {
        let mut stats: Vec<KeyStats> = self
            .lock()
            .map(|credentials| credentials.values().map(KeyStats::from).collect())
            .unwrap_or_default();
        stats.sort_by_key(|s| s.created_at);
        stats
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; ISSUED_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", ISSUED_KEY_PREFIX, hex)
}
