//! License key lifecycle and entitlement engine.
//!
//! Key state machine: `unused -> active` (user activation), `active ->
//! expired` (periodic sweep only), `any -> revoked` (admin). Deletion and
//! purge remove records outright and are not lifecycle transitions.
//!
//! Every operation is a full read-modify-write cycle against the store.
//! Methods come in pairs: the public one uses the wall clock, the `*_at`
//! variant takes an explicit `now` so tests can advance time.

use chrono::{DateTime, Datelike, Days, Duration, NaiveDate, Timelike, Utc};
use rand::{rngs::OsRng, Rng};

use crate::{
    domain::{KeyStatus, Plan, UserId},
    store::{ClientBinding, LicenseKey, Store},
    Error, Result,
};

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const TOKEN_GROUPS: usize = 4;
const TOKEN_GROUP_LEN: usize = 4;

// A fresh token colliding with an existing key is astronomically unlikely
// (36^16 space); the retry loop makes the decision explicit anyway.
const MAX_TOKEN_RETRIES: usize = 8;

/// Why an activation attempt was refused.
///
/// The user-facing surface collapses the first three into one generic
/// rejection; admins and logs see the precise kind.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("no such key")]
    InvalidKey,

    #[error("key is not in unused state")]
    AlreadyUsedOrBlocked,

    #[error("key session cap reached")]
    MaxSessionsReached,

    #[error(transparent)]
    Store(#[from] Error),
}

/// Successful activation outcome, safe to echo back to the user.
#[derive(Clone, Debug)]
pub struct Activation {
    pub plan: Plan,
    pub expires_at: DateTime<Utc>,
}

/// Admin-facing view of one entitled user.
#[derive(Clone, Debug)]
pub struct ActiveClient {
    pub user_id: UserId,
    pub key: String,
    pub plan: Plan,
    pub expires_at: DateTime<Utc>,
}

pub struct LicenseService {
    store: Store,
}

impl LicenseService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Mint a fresh key in `unused` state.
    pub fn generate_key(&self, plan: Plan, created_by: &str, max_sessions: u32) -> Result<LicenseKey> {
        let mut state = self.store.load_licenses()?;

        let mut token = generate_token();
        let mut retries = 0;
        while state.keys.iter().any(|k| k.key == token) {
            retries += 1;
            if retries > MAX_TOKEN_RETRIES {
                return Err(Error::External(
                    "key generation kept colliding with existing tokens".to_string(),
                ));
            }
            token = generate_token();
        }

        let record = LicenseKey {
            key: token,
            plan,
            status: KeyStatus::Unused,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            owner_id: None,
            activated_at: None,
            expires_at: None,
            sessions_used: 0,
            max_sessions,
        };
        state.keys.push(record.clone());
        self.store.save_licenses(&state)?;
        Ok(record)
    }

    pub fn list_keys(&self) -> Result<Vec<LicenseKey>> {
        Ok(self.store.load_licenses()?.keys)
    }

    pub fn find_key(&self, key: &str) -> Result<Option<LicenseKey>> {
        let state = self.store.load_licenses()?;
        Ok(state.keys.into_iter().find(|k| k.key == key))
    }

    /// Remove a key record entirely, regardless of state.
    /// Returns false when the key does not exist.
    pub fn delete_key(&self, key: &str) -> Result<bool> {
        let mut state = self.store.load_licenses()?;
        let before = state.keys.len();
        state.keys.retain(|k| k.key != key);
        if state.keys.len() == before {
            return Ok(false);
        }
        self.store.save_licenses(&state)?;
        Ok(true)
    }

    /// Force a key into `revoked` from any state. The owner's binding stays
    /// on disk; `is_active` re-checks key status so entitlement drops
    /// immediately anyway.
    pub fn revoke_key(&self, key: &str) -> Result<bool> {
        let mut state = self.store.load_licenses()?;
        let Some(record) = state.keys.iter_mut().find(|k| k.key == key) else {
            return Ok(false);
        };
        record.status = KeyStatus::Revoked;
        self.store.save_licenses(&state)?;
        Ok(true)
    }

    pub fn activate(
        &self,
        key: &str,
        user: UserId,
    ) -> std::result::Result<Activation, ActivationError> {
        self.activate_at(key, user, Utc::now())
    }

    /// `unused -> active`: bind the key to `user`, start its expiry window
    /// and create (or overwrite) the user's client binding.
    pub fn activate_at(
        &self,
        key: &str,
        user: UserId,
        now: DateTime<Utc>,
    ) -> std::result::Result<Activation, ActivationError> {
        let mut state = self.store.load_licenses()?;
        let Some(record) = state.keys.iter_mut().find(|k| k.key == key) else {
            return Err(ActivationError::InvalidKey);
        };
        if record.status != KeyStatus::Unused {
            return Err(ActivationError::AlreadyUsedOrBlocked);
        }
        if record.sessions_used >= record.max_sessions {
            return Err(ActivationError::MaxSessionsReached);
        }

        let expires_at = expiry_after(now, record.plan);
        record.status = KeyStatus::Active;
        record.owner_id = Some(user.0);
        record.activated_at = Some(now);
        record.expires_at = Some(expires_at);
        record.sessions_used += 1;

        let activation = Activation {
            plan: record.plan,
            expires_at,
        };
        state.clients.insert(
            user.0,
            ClientBinding {
                key: key.to_string(),
                plan: activation.plan,
                expires_at,
            },
        );
        self.store.save_licenses(&state)?;
        Ok(activation)
    }

    pub fn client(&self, user: UserId) -> Result<Option<ClientBinding>> {
        let state = self.store.load_licenses()?;
        Ok(state.clients.get(&user.0).cloned())
    }

    /// Drop a user's binding after its window has lapsed. No-op when the
    /// user has no binding.
    pub fn clear_expired_client(&self, user: UserId) -> Result<()> {
        let mut state = self.store.load_licenses()?;
        if state.clients.remove(&user.0).is_some() {
            self.store.save_licenses(&state)?;
        }
        Ok(())
    }

    pub fn all_clients(&self) -> Result<Vec<ActiveClient>> {
        let state = self.store.load_licenses()?;
        Ok(state
            .clients
            .iter()
            .map(|(uid, c)| ActiveClient {
                user_id: UserId(*uid),
                key: c.key.clone(),
                plan: c.plan,
                expires_at: c.expires_at,
            })
            .collect())
    }

    pub fn is_active(&self, user: UserId) -> Result<bool> {
        self.is_active_at(user, Utc::now())
    }

    /// Entitled iff a binding exists, its window is still open AND the
    /// referenced key is currently `active`. The status re-check is what
    /// makes an admin revoke bite before the next sweep.
    pub fn is_active_at(&self, user: UserId, now: DateTime<Utc>) -> Result<bool> {
        let state = self.store.load_licenses()?;
        let Some(binding) = state.clients.get(&user.0) else {
            return Ok(false);
        };
        let time_ok = binding.expires_at > now;
        let status_ok = state
            .keys
            .iter()
            .find(|k| k.key == binding.key)
            .map(|k| k.status == KeyStatus::Active)
            .unwrap_or(false);
        Ok(time_ok && status_ok)
    }

    pub fn expire_sweep(&self) -> Result<usize> {
        self.expire_sweep_at(Utc::now())
    }

    /// `active -> expired` for every key whose window has closed. Idempotent;
    /// never touches client bindings. Returns how many keys transitioned.
    pub fn expire_sweep_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.store.load_licenses()?;
        let mut transitioned = 0;
        for record in &mut state.keys {
            if record.status == KeyStatus::Active
                && record.expires_at.map(|t| t <= now).unwrap_or(false)
            {
                record.status = KeyStatus::Expired;
                transitioned += 1;
            }
        }
        self.store.save_licenses(&state)?;
        Ok(transitioned)
    }

    pub fn purge_expired_keys(&self) -> Result<usize> {
        self.purge_expired_keys_at(Utc::now())
    }

    /// Destructive compaction: drop every key that is `expired` (by status
    /// or by elapsed window) plus any binding whose key did not survive.
    pub fn purge_expired_keys_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut state = self.store.load_licenses()?;
        let before = state.keys.len();
        state.keys.retain(|k| {
            !(k.status == KeyStatus::Expired || k.expires_at.map(|t| t <= now).unwrap_or(false))
        });
        let removed = before - state.keys.len();

        let surviving: std::collections::HashSet<&str> =
            state.keys.iter().map(|k| k.key.as_str()).collect();
        state
            .clients
            .retain(|_, binding| surviving.contains(binding.key.as_str()));

        self.store.save_licenses(&state)?;
        Ok(removed)
    }
}

fn generate_token() -> String {
    let mut rng = OsRng;
    let mut groups = Vec::with_capacity(TOKEN_GROUPS);
    for _ in 0..TOKEN_GROUPS {
        let group: String = (0..TOKEN_GROUP_LEN)
            .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
            .collect();
        groups.push(group);
    }
    groups.join("-")
}

/// Compute an expiry timestamp via calendar-field increments. Day-of-month
/// overflow rolls into the following month (Jan 31 + 1 month lands on
/// Mar 2/3), matching ordinary calendar-field arithmetic.
pub fn expiry_after(now: DateTime<Utc>, plan: Plan) -> DateTime<Utc> {
    match plan {
        Plan::Minute => now + Duration::minutes(1),
        Plan::Hour => now + Duration::hours(1),
        Plan::Day => now + Duration::days(1),
        Plan::Week => now + Duration::days(7),
        Plan::Month => add_months(now, 1),
        Plan::Year => add_months(now, 12),
    }
}

fn add_months(at: DateTime<Utc>, months: i32) -> DateTime<Utc> {
    let date = at.date_naive();
    let total = date.year() * 12 + date.month0() as i32 + months;
    let (year, month0) = (total.div_euclid(12), total.rem_euclid(12) as u32);

    // Walk from the 1st of the target month so day overflow spills into the
    // following month instead of clamping.
    let first = NaiveDate::from_ymd_opt(year, month0 + 1, 1)
        .unwrap_or(date)
        .checked_add_days(Days::new(u64::from(date.day() - 1)))
        .unwrap_or(date);

    first
        .and_hms_nano_opt(at.hour(), at.minute(), at.second(), at.nanosecond())
        .unwrap_or_else(|| first.and_hms_opt(0, 0, 0).unwrap_or_default())
        .and_utc()
}
