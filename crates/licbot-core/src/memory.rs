//! Per-user conversation memory.
//!
//! Explicit registry owned by whoever constructs it (no ambient global),
//! with oldest-first trimming at a fixed per-user cap.

use std::collections::{HashMap, VecDeque};

use crate::domain::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

pub struct MemoryRegistry {
    inner: tokio::sync::Mutex<HashMap<i64, VecDeque<ChatTurn>>>,
    cap: usize,
}

impl MemoryRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(HashMap::new()),
            cap: cap.max(1),
        }
    }

    pub async fn push(&self, user: UserId, turn: ChatTurn) {
        let mut map = self.inner.lock().await;
        let history = map.entry(user.0).or_default();
        history.push_back(turn);
        while history.len() > self.cap {
            history.pop_front();
        }
    }

    pub async fn history(&self, user: UserId) -> Vec<ChatTurn> {
        let map = self.inner.lock().await;
        map.get(&user.0)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn clear(&self, user: UserId) {
        self.inner.lock().await.remove(&user.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trims_oldest_turns_at_the_cap() {
        let mem = MemoryRegistry::new(3);
        for i in 0..5 {
            mem.push(
                UserId(1),
                ChatTurn {
                    role: Role::User,
                    content: format!("msg {i}"),
                },
            )
            .await;
        }

        let h = mem.history(UserId(1)).await;
        assert_eq!(h.len(), 3);
        assert_eq!(h[0].content, "msg 2");
        assert_eq!(h[2].content, "msg 4");
    }

    #[tokio::test]
    async fn users_do_not_share_history() {
        let mem = MemoryRegistry::new(10);
        mem.push(
            UserId(1),
            ChatTurn {
                role: Role::User,
                content: "a".to_string(),
            },
        )
        .await;

        assert_eq!(mem.history(UserId(1)).await.len(), 1);
        assert!(mem.history(UserId(2)).await.is_empty());

        mem.clear(UserId(1)).await;
        assert!(mem.history(UserId(1)).await.is_empty());
    }
}
