//! System-prompt file with bootstrap and hot reload.
//!
//! The prompt lives in a plain text file the admin bot can overwrite. We
//! bootstrap a default when the file is missing or degenerate, and re-read
//! on each access when the mtime moved (cheap; the relay reads once per
//! message).

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::info;

use crate::Result;

const MIN_PROMPT_LEN: usize = 10;

const DEFAULT_PROMPT: &str = "You are a helpful assistant available through a chat bot.\n\
Answer in the same language the user writes in.\n\
Be accurate, direct and concise; say so when you are unsure.";

struct PromptState {
    text: String,
    modified: Option<SystemTime>,
}

pub struct PromptFile {
    path: PathBuf,
    state: tokio::sync::Mutex<PromptState>,
}

impl PromptFile {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = read_or_bootstrap(&path)?;
        let modified = mtime(&path);
        Ok(Self {
            path,
            state: tokio::sync::Mutex::new(PromptState { text, modified }),
        })
    }

    /// Current prompt text, re-reading the file when it changed on disk.
    pub async fn current(&self) -> String {
        let mut state = self.state.lock().await;
        let on_disk = mtime(&self.path);
        if on_disk != state.modified {
            if let Ok(text) = read_or_bootstrap(&self.path) {
                info!("system prompt reloaded from {}", self.path.display());
                state.text = text;
                state.modified = on_disk;
            }
        }
        state.text.clone()
    }

    /// Replace the prompt file contents (admin update path).
    pub async fn write(&self, text: &str) -> Result<()> {
        fs::write(&self.path, text)?;
        let mut state = self.state.lock().await;
        state.text = text.to_string();
        state.modified = mtime(&self.path);
        Ok(())
    }
}

fn read_or_bootstrap(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(raw) if raw.trim().len() >= MIN_PROMPT_LEN => Ok(raw.trim().to_string()),
        _ => {
            fs::write(path, DEFAULT_PROMPT)?;
            Ok(DEFAULT_PROMPT.to_string())
        }
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
