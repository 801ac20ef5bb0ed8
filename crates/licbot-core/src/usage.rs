//! Usage-metering ledger.
//!
//! Converts model token counts into USD estimates using a static price
//! table and accumulates per-model, per-user and global totals. Recording
//! is a best-effort side effect of the chat flow: failures are logged and
//! swallowed, never surfaced to the user.

use serde::Serialize;
use tracing::warn;

use crate::{
    domain::UserId,
    store::{ModelUsage, Store, UserUsage},
    Result,
};

/// Token counts reported by a model response.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// USD per 1000 tokens.
#[derive(Clone, Copy, Debug)]
struct ModelPrice {
    input: f64,
    output: f64,
}

const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input: 0.5,
    output: 0.5,
};

fn price_for(model: &str) -> ModelPrice {
    match model {
        "deepseek/deepseek-chat" => ModelPrice {
            input: 0.27,
            output: 1.1,
        },
        "openai/gpt-4o" => ModelPrice {
            input: 5.0,
            output: 15.0,
        },
        "openai/gpt-4o-mini" => ModelPrice {
            input: 0.15,
            output: 0.6,
        },
        "anthropic/claude-3-5-sonnet" => ModelPrice {
            input: 3.0,
            output: 15.0,
        },
        "anthropic/claude-3-haiku" => ModelPrice {
            input: 0.25,
            output: 1.25,
        },
        _ => DEFAULT_PRICE,
    }
}

/// Read-only snapshot for the admin surface.
#[derive(Clone, Debug, Serialize)]
pub struct UsageSummary {
    pub consumed_usd: f64,
    pub models: std::collections::BTreeMap<String, ModelUsage>,
    pub by_user: std::collections::BTreeMap<i64, UserUsage>,
}

pub struct UsageLedger {
    store: Store,
}

impl UsageLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Record one model call. Never fails the caller's flow: store errors
    /// are logged at warn level and dropped.
    pub fn record(&self, user: UserId, model: &str, usage: TokenUsage) {
        if let Err(e) = self.record_inner(user, model, usage) {
            warn!("usage recording failed for user {}: {e}", user.0);
        }
    }

    fn record_inner(&self, user: UserId, model: &str, usage: TokenUsage) -> Result<()> {
        let price = price_for(model);
        let usd = (usage.prompt_tokens as f64 / 1000.0) * price.input
            + (usage.completion_tokens as f64 / 1000.0) * price.output;

        let mut state = self.store.load_usage()?;
        state.total_usd += usd;

        let bucket = state.models.entry(model.to_string()).or_default();
        bucket.usd += usd;
        bucket.prompt_tokens += usage.prompt_tokens;
        bucket.completion_tokens += usage.completion_tokens;
        bucket.calls += 1;

        let user_bucket = state.by_user.entry(user.0).or_default();
        user_bucket.usd += usd;
        user_bucket.messages += 1;

        self.store.save_usage(&state)
    }

    pub fn summary(&self) -> Result<UsageSummary> {
        let state = self.store.load_usage()?;
        Ok(UsageSummary {
            consumed_usd: round4(state.total_usd),
            models: state.models,
            by_user: state.by_user,
        })
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, UsageLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = UsageLedger::new(Store::new(dir.path()));
        (dir, ledger)
    }

    #[test]
    fn thousand_tokens_cost_exactly_the_listed_prices() {
        let (_dir, ledger) = ledger();
        ledger.record(
            UserId(1),
            "openai/gpt-4o-mini",
            TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 1000,
            },
        );

        let s = ledger.summary().unwrap();
        let bucket = &s.models["openai/gpt-4o-mini"];
        assert!((bucket.usd - 0.75).abs() < 1e-9);
        assert!((s.consumed_usd - 0.75).abs() < 1e-9);
        assert_eq!(bucket.prompt_tokens, 1000);
        assert_eq!(bucket.completion_tokens, 1000);
        assert_eq!(bucket.calls, 1);
    }

    #[test]
    fn unknown_models_fall_back_to_the_default_rate() {
        let (_dir, ledger) = ledger();
        ledger.record(
            UserId(5),
            "mystery/model",
            TokenUsage {
                prompt_tokens: 2000,
                completion_tokens: 0,
            },
        );

        let s = ledger.summary().unwrap();
        assert!((s.models["mystery/model"].usd - 1.0).abs() < 1e-9);
    }

    #[test]
    fn totals_stay_additive_across_models_and_users() {
        let (_dir, ledger) = ledger();
        ledger.record(
            UserId(1),
            "deepseek/deepseek-chat",
            TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 1000,
            },
        );
        ledger.record(
            UserId(2),
            "anthropic/claude-3-haiku",
            TokenUsage {
                prompt_tokens: 1000,
                completion_tokens: 1000,
            },
        );

        let s = ledger.summary().unwrap();
        let sum: f64 = s.models.values().map(|m| m.usd).sum();
        assert!((s.consumed_usd - round4(sum)).abs() < 1e-9);
        assert_eq!(s.by_user[&1].messages, 1);
        assert_eq!(s.by_user[&2].messages, 1);
    }

    #[test]
    fn recording_survives_a_broken_store() {
        // Point the ledger at a path that cannot be a directory.
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let ledger = UsageLedger::new(Store::new(&file));

        // Must not panic or propagate.
        ledger.record(
            UserId(1),
            "deepseek/deepseek-chat",
            TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            },
        );
    }

    #[test]
    fn summary_rounds_to_four_decimals() {
        let (_dir, ledger) = ledger();
        ledger.record(
            UserId(1),
            "deepseek/deepseek-chat",
            TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
            },
        );
        let s = ledger.summary().unwrap();
        // 0.00027 + 0.0011 = 0.00137 -> 0.0014
        assert!((s.consumed_usd - 0.0014).abs() < 1e-9);
    }
}
