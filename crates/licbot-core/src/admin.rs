//! Admin authentication and menu conversation state.
//!
//! Credentials live in `admin.json` next to the license tables: a salted
//! PBKDF2-SHA256 password hash plus the list of logged-in admin user ids.
//! Provisioning fails closed — the file is only bootstrapped from an
//! explicitly supplied password, never from a built-in default.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    time::{Duration, Instant},
};

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{domain::UserId, Result};

const ADMIN_FILE: &str = "admin.json";
const PBKDF2_ROUNDS: u32 = 120_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

const CONVERSATION_TTL: Duration = Duration::from_secs(2 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
struct PasswordRecord {
    salt: String,
    hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct AdminFile {
    pass: PasswordRecord,
    sessions: Vec<String>,
}

pub struct AdminAuth {
    path: PathBuf,
}

impl AdminAuth {
    /// Open (or bootstrap) the admin credential file. `password` is only
    /// used when no file exists yet.
    pub fn provision(data_dir: impl Into<PathBuf>, password: &str) -> Result<Self> {
        let dir = data_dir.into();
        fs::create_dir_all(&dir)?;
        let path = dir.join(ADMIN_FILE);
        if !path.exists() {
            let file = AdminFile {
                pass: make_hash(password),
                sessions: Vec::new(),
            };
            write_file(&path, &file)?;
        }
        Ok(Self { path })
    }

    pub fn verify(&self, password: &str) -> Result<bool> {
        let file = self.read()?;
        Ok(verify_hash(password, &file.pass))
    }

    pub fn is_logged_in(&self, user: UserId) -> Result<bool> {
        let file = self.read()?;
        Ok(file.sessions.iter().any(|s| s == &user.0.to_string()))
    }

    pub fn login(&self, user: UserId) -> Result<()> {
        let mut file = self.read()?;
        let id = user.0.to_string();
        if !file.sessions.contains(&id) {
            file.sessions.push(id);
        }
        write_file(&self.path, &file)
    }

    pub fn logout(&self, user: UserId) -> Result<()> {
        let mut file = self.read()?;
        let id = user.0.to_string();
        file.sessions.retain(|s| s != &id);
        write_file(&self.path, &file)
    }

    /// Returns false (without changing anything) when `old` doesn't verify.
    pub fn change_password(&self, old: &str, new: &str) -> Result<bool> {
        let mut file = self.read()?;
        if !verify_hash(old, &file.pass) {
            return Ok(false);
        }
        file.pass = make_hash(new);
        write_file(&self.path, &file)?;
        Ok(true)
    }

    fn read(&self) -> Result<AdminFile> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn write_file(path: &std::path::Path, file: &AdminFile) -> Result<()> {
    let raw = serde_json::to_string_pretty(file)?;
    fs::write(path, raw)?;
    Ok(())
}

fn make_hash(password: &str) -> PasswordRecord {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let salt_hex = to_hex(&salt);

    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt_hex.as_bytes(),
        PBKDF2_ROUNDS,
        &mut out,
    );
    PasswordRecord {
        salt: salt_hex,
        hash: to_hex(&out),
    }
}

fn verify_hash(password: &str, record: &PasswordRecord) -> bool {
    let mut out = [0u8; HASH_LEN];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        record.salt.as_bytes(),
        PBKDF2_ROUNDS,
        &mut out,
    );
    to_hex(&out) == record.hash
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

/// What the admin bot is waiting for from a given admin.
#[derive(Clone, Debug)]
pub enum PendingInput {
    LoginPassword,
    OldPassword,
    NewPassword { old: String },
    PromptText,
    PromptFile,
}

struct PendingEntry {
    input: PendingInput,
    deadline: Instant,
}

/// Per-admin conversation state with a short TTL, so a half-finished flow
/// (e.g. a password change) silently evaporates instead of lingering.
#[derive(Default)]
pub struct AdminConversations {
    inner: tokio::sync::Mutex<HashMap<i64, PendingEntry>>,
}

impl AdminConversations {
    pub async fn expect(&self, user: UserId, input: PendingInput) {
        self.inner.lock().await.insert(
            user.0,
            PendingEntry {
                input,
                deadline: Instant::now() + CONVERSATION_TTL,
            },
        );
    }

    /// Take the pending state for this admin, dropping it if it timed out.
    pub async fn take(&self, user: UserId) -> Option<PendingInput> {
        let mut map = self.inner.lock().await;
        let entry = map.remove(&user.0)?;
        if Instant::now() > entry.deadline {
            return None;
        }
        Some(entry.input)
    }

    pub async fn clear(&self, user: UserId) {
        self.inner.lock().await.remove(&user.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_verify_and_change_password() {
        let dir = tempfile::tempdir().unwrap();
        let auth = AdminAuth::provision(dir.path(), "correct horse").unwrap();

        assert!(auth.verify("correct horse").unwrap());
        assert!(!auth.verify("wrong").unwrap());

        assert!(!auth.change_password("wrong", "new pass").unwrap());
        assert!(auth.verify("correct horse").unwrap());

        assert!(auth.change_password("correct horse", "new pass").unwrap());
        assert!(auth.verify("new pass").unwrap());
        assert!(!auth.verify("correct horse").unwrap());
    }

    #[test]
    fn provision_is_idempotent_and_keeps_the_first_password() {
        let dir = tempfile::tempdir().unwrap();
        let _ = AdminAuth::provision(dir.path(), "first").unwrap();
        let auth = AdminAuth::provision(dir.path(), "second").unwrap();
        assert!(auth.verify("first").unwrap());
        assert!(!auth.verify("second").unwrap());
    }

    #[test]
    fn login_state_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let auth = AdminAuth::provision(dir.path(), "pw").unwrap();

        assert!(!auth.is_logged_in(UserId(7)).unwrap());
        auth.login(UserId(7)).unwrap();
        auth.login(UserId(7)).unwrap(); // no duplicate entries
        assert!(auth.is_logged_in(UserId(7)).unwrap());

        auth.logout(UserId(7)).unwrap();
        assert!(!auth.is_logged_in(UserId(7)).unwrap());
    }

    #[tokio::test]
    async fn pending_input_is_taken_once() {
        let conv = AdminConversations::default();
        conv.expect(UserId(1), PendingInput::LoginPassword).await;

        assert!(matches!(
            conv.take(UserId(1)).await,
            Some(PendingInput::LoginPassword)
        ));
        assert!(conv.take(UserId(1)).await.is_none());
    }
}
