//! Access-gate middleware.
//!
//! Single authorization checkpoint in front of the chat relay. Evaluation
//! order per inbound message:
//!
//! 1. explicit `/activate` or a key token anywhere in the text -> try to
//!    redeem it (takes priority so a lapsed user can always renew);
//! 2. entitled user -> forward downstream;
//! 3. lapsed binding -> clear it and tell the user their subscription ended;
//! 4. otherwise -> ask for a key.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::{
    domain::{Plan, UserId},
    license::{ActivationError, LicenseService},
    usage::{TokenUsage, UsageLedger},
    Result,
};

const KEY_PATTERN: &str = r"[A-Z0-9]{4}-[A-Z0-9]{4}-[A-Z0-9]{4}-[A-Z0-9]{4}";

/// What the messaging adapter should do with an inbound message.
#[derive(Clone, Debug)]
pub enum GateDecision {
    /// A key was redeemed; reply with plan + expiry, do not forward.
    Activated {
        plan: Plan,
        expires_at: DateTime<Utc>,
    },
    /// Activation was refused. One flat rejection for every refusal kind so
    /// the message cannot be used to probe key state.
    ActivationRejected,
    /// `/activate` without a recognizable token; reply with the format hint.
    MissingKey,
    /// Entitled; forward to the chat relay (and record usage afterwards).
    Allowed,
    /// Binding lapsed and was cleared; prompt for a new key.
    SubscriptionExpired,
    /// Never subscribed; prompt for a key.
    NeedKey,
}

pub struct AccessGate {
    licenses: Arc<LicenseService>,
    ledger: Arc<UsageLedger>,
    key_re: Regex,
}

impl AccessGate {
    pub fn new(licenses: Arc<LicenseService>, ledger: Arc<UsageLedger>) -> Self {
        let key_re = Regex::new(&format!("(?i){KEY_PATTERN}")).expect("key pattern is valid");
        Self {
            licenses,
            ledger,
            key_re,
        }
    }

    /// Pull a key token out of free text, normalized to uppercase.
    pub fn extract_key(&self, text: &str) -> Option<String> {
        self.key_re
            .find(text.trim())
            .map(|m| m.as_str().to_uppercase())
    }

    pub fn check(&self, user: UserId, text: &str) -> Result<GateDecision> {
        self.check_at(user, text, Utc::now())
    }

    pub fn check_at(&self, user: UserId, text: &str, now: DateTime<Utc>) -> Result<GateDecision> {
        let key = self.extract_key(text);

        if is_activate_command(text) || key.is_some() {
            let Some(key) = key else {
                return Ok(GateDecision::MissingKey);
            };
            return match self.licenses.activate_at(&key, user, now) {
                Ok(a) => Ok(GateDecision::Activated {
                    plan: a.plan,
                    expires_at: a.expires_at,
                }),
                Err(ActivationError::Store(e)) => Err(e),
                Err(_) => Ok(GateDecision::ActivationRejected),
            };
        }

        if self.licenses.is_active_at(user, now)? {
            return Ok(GateDecision::Allowed);
        }

        // Distinguish "subscription lapsed" from "never subscribed".
        if let Some(binding) = self.licenses.client(user)? {
            if binding.expires_at <= now {
                self.licenses.clear_expired_client(user)?;
                return Ok(GateDecision::SubscriptionExpired);
            }
        }

        Ok(GateDecision::NeedKey)
    }

    /// Usage hook the relay invokes after each successful model response.
    pub fn track_usage(&self, user: UserId, model: &str, usage: TokenUsage) {
        self.ledger.record(user, model, usage);
    }
}

fn is_activate_command(text: &str) -> bool {
    text.trim().to_lowercase().starts_with("/activate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::KeyStatus;
    use crate::store::Store;
    use chrono::{Duration, TimeZone};

    fn gate() -> (tempfile::TempDir, Arc<LicenseService>, AccessGate) {
        let dir = tempfile::tempdir().unwrap();
        let licenses = Arc::new(LicenseService::new(Store::new(dir.path())));
        let ledger = Arc::new(UsageLedger::new(Store::new(dir.path())));
        let g = AccessGate::new(licenses.clone(), ledger);
        (dir, licenses, g)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn extracts_keys_case_insensitively_from_surrounding_text() {
        let (_d, _l, g) = gate();
        assert_eq!(
            g.extract_key("here it is: abcd-1234-efgh-5678 thanks"),
            Some("ABCD-1234-EFGH-5678".to_string())
        );
        assert_eq!(g.extract_key("ABC-1234-EFGH-5678"), None);
        assert_eq!(g.extract_key("hello"), None);
    }

    #[test]
    fn bare_key_in_text_activates() {
        let (_d, licenses, g) = gate();
        let k = licenses.generate_key(Plan::Day, "admin", 1).unwrap();

        let d = g
            .check_at(UserId(1), &format!("please {}", k.key.to_lowercase()), now())
            .unwrap();
        assert!(matches!(d, GateDecision::Activated { plan: Plan::Day, .. }));
        assert!(licenses.is_active_at(UserId(1), now()).unwrap());
    }

    #[test]
    fn activate_command_without_token_asks_for_format() {
        let (_d, _l, g) = gate();
        let d = g.check_at(UserId(1), "/activate", now()).unwrap();
        assert!(matches!(d, GateDecision::MissingKey));
    }

    #[test]
    fn used_and_unknown_keys_get_the_same_flat_rejection() {
        let (_d, licenses, g) = gate();
        let k = licenses.generate_key(Plan::Day, "admin", 1).unwrap();
        licenses.activate_at(&k.key, UserId(9), now()).unwrap();

        let reused = g.check_at(UserId(1), &k.key, now()).unwrap();
        assert!(matches!(reused, GateDecision::ActivationRejected));

        let unknown = g
            .check_at(UserId(1), "ZZZZ-ZZZZ-ZZZZ-0000", now())
            .unwrap();
        assert!(matches!(unknown, GateDecision::ActivationRejected));
    }

    #[test]
    fn entitled_users_are_forwarded() {
        let (_d, licenses, g) = gate();
        let k = licenses.generate_key(Plan::Day, "admin", 1).unwrap();
        licenses.activate_at(&k.key, UserId(3), now()).unwrap();

        let d = g.check_at(UserId(3), "hello there", now()).unwrap();
        assert!(matches!(d, GateDecision::Allowed));
    }

    #[test]
    fn lapsed_binding_is_cleared_and_reported_once() {
        let (_d, licenses, g) = gate();
        let k = licenses.generate_key(Plan::Minute, "admin", 1).unwrap();
        licenses.activate_at(&k.key, UserId(4), now()).unwrap();

        let later = now() + Duration::seconds(61);
        let d = g.check_at(UserId(4), "hello", later).unwrap();
        assert!(matches!(d, GateDecision::SubscriptionExpired));
        assert!(licenses.client(UserId(4)).unwrap().is_none());

        // Next message from the same user is a plain "need key".
        let d = g.check_at(UserId(4), "hello again", later).unwrap();
        assert!(matches!(d, GateDecision::NeedKey));
    }

    #[test]
    fn strangers_are_prompted_for_a_key() {
        let (_d, _l, g) = gate();
        let d = g.check_at(UserId(99), "hi", now()).unwrap();
        assert!(matches!(d, GateDecision::NeedKey));
    }

    #[test]
    fn lapsed_user_can_still_redeem_a_fresh_key() {
        let (_d, licenses, g) = gate();
        let old = licenses.generate_key(Plan::Minute, "admin", 1).unwrap();
        licenses.activate_at(&old.key, UserId(5), now()).unwrap();

        let later = now() + Duration::minutes(2);
        let fresh = licenses.generate_key(Plan::Day, "admin", 1).unwrap();
        let d = g.check_at(UserId(5), &fresh.key, later).unwrap();
        assert!(matches!(d, GateDecision::Activated { .. }));
        assert!(licenses.is_active_at(UserId(5), later).unwrap());
    }

    #[test]
    fn revoked_key_holder_is_not_reported_as_expired() {
        // Revocation drops entitlement via the status check while the
        // binding window is still open, so the user lands on NeedKey (the
        // expired branch only fires for time-wise lapses).
        let (_d, licenses, g) = gate();
        let k = licenses.generate_key(Plan::Day, "admin", 1).unwrap();
        licenses.activate_at(&k.key, UserId(6), now()).unwrap();
        licenses.revoke_key(&k.key).unwrap();

        let d = g.check_at(UserId(6), "hello", now()).unwrap();
        assert!(matches!(d, GateDecision::NeedKey));
        assert_eq!(
            licenses.find_key(&k.key).unwrap().unwrap().status,
            KeyStatus::Revoked
        );
    }
}
