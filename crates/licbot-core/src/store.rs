//! Whole-file JSON persistence for the license and usage tables.
//!
//! The store is the only owner of the on-disk representation. Callers do a
//! full load, mutate in memory and save the whole document back; with a
//! single active process that gives all-or-nothing record updates. Two
//! interleaved read-modify-write cycles race last-write-wins — accepted for
//! interactive chat volume, see DESIGN.md.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    domain::{KeyStatus, Plan},
    Result,
};

const LICENSE_FILE: &str = "licenses.json";
const USAGE_FILE: &str = "usage.json";

/// One license key record.
///
/// Field names on disk stay camelCase for compatibility with the data files
/// the previous deployment wrote.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseKey {
    pub key: String,
    pub plan: Plan,
    pub status: KeyStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub owner_id: Option<i64>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub sessions_used: u32,
    pub max_sessions: u32,
}

/// Which key/plan/expiry currently entitles a given user.
///
/// `plan`/`expires_at` are denormalized from the key so entitlement checks
/// don't need a join; the key's live status is still re-checked.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientBinding {
    pub key: String,
    pub plan: Plan,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LicenseState {
    pub keys: Vec<LicenseKey>,
    pub clients: BTreeMap<i64, ClientBinding>,
}

/// Per-model usage aggregate. Costs are estimates in USD.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    pub usd: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub calls: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UserUsage {
    pub usd: f64,
    pub messages: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UsageState {
    pub models: BTreeMap<String, ModelUsage>,
    #[serde(rename = "totalUSD")]
    pub total_usd: f64,
    #[serde(rename = "byUser")]
    pub by_user: BTreeMap<i64, UserUsage>,
}

/// File-backed store for both tables under one data directory.
#[derive(Clone, Debug)]
pub struct Store {
    data_dir: PathBuf,
}

impl Store {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn load_licenses(&self) -> Result<LicenseState> {
        self.load_or_init(LICENSE_FILE)
    }

    pub fn save_licenses(&self, state: &LicenseState) -> Result<()> {
        self.save(LICENSE_FILE, state)
    }

    pub fn load_usage(&self) -> Result<UsageState> {
        self.load_or_init(USAGE_FILE)
    }

    pub fn save_usage(&self, state: &UsageState) -> Result<()> {
        self.save(USAGE_FILE, state)
    }

    /// Read the full document; if no prior state exists, write out an empty
    /// default first so subsequent readers see a concrete file.
    fn load_or_init<T: Default + Serialize + DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.data_dir.join(file);
        if !path.exists() {
            let state = T::default();
            self.save(file, &state)?;
            return Ok(state);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save<T: Serialize>(&self, file: &str, state: &T) -> Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        let path = self.data_dir.join(file);
        write_json_pretty(&path, state)
    }
}

fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_load_bootstraps_empty_tables() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let licenses = store.load_licenses().unwrap();
        assert!(licenses.keys.is_empty());
        assert!(licenses.clients.is_empty());
        assert!(dir.path().join("licenses.json").exists());

        let usage = store.load_usage().unwrap();
        assert_eq!(usage.total_usd, 0.0);
        assert!(dir.path().join("usage.json").exists());
    }

    #[test]
    fn save_then_load_round_trips_license_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut state = store.load_licenses().unwrap();
        state.keys.push(LicenseKey {
            key: "AAAA-BBBB-CCCC-DDDD".to_string(),
            plan: Plan::Day,
            status: KeyStatus::Unused,
            created_by: "admin".to_string(),
            created_at: Utc::now(),
            owner_id: None,
            activated_at: None,
            expires_at: None,
            sessions_used: 0,
            max_sessions: 1,
        });
        store.save_licenses(&state).unwrap();

        let reloaded = store.load_licenses().unwrap();
        assert_eq!(reloaded.keys.len(), 1);
        assert_eq!(reloaded.keys[0].status, KeyStatus::Unused);
        assert_eq!(reloaded.keys[0].plan, Plan::Day);
    }

    #[test]
    fn on_disk_field_names_stay_camel_case() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());

        let mut state = store.load_licenses().unwrap();
        state.keys.push(LicenseKey {
            key: "AAAA-BBBB-CCCC-DDDD".to_string(),
            plan: Plan::Minute,
            status: KeyStatus::Unused,
            created_by: "founder".to_string(),
            created_at: Utc::now(),
            owner_id: None,
            activated_at: None,
            expires_at: None,
            sessions_used: 0,
            max_sessions: 1,
        });
        store.save_licenses(&state).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("licenses.json")).unwrap();
        assert!(raw.contains("\"createdBy\""));
        assert!(raw.contains("\"sessionsUsed\""));
        assert!(raw.contains("\"maxSessions\""));
    }
}
