use serde::{Deserialize, Serialize};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Named entitlement duration of a license key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Plan {
    pub const ALL: [Plan; 6] = [
        Plan::Minute,
        Plan::Hour,
        Plan::Day,
        Plan::Week,
        Plan::Month,
        Plan::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Minute => "minute",
            Plan::Hour => "hour",
            Plan::Day => "day",
            Plan::Week => "week",
            Plan::Month => "month",
            Plan::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Plan> {
        match s {
            "minute" => Some(Plan::Minute),
            "hour" => Some(Plan::Hour),
            "day" => Some(Plan::Day),
            "week" => Some(Plan::Week),
            "month" => Some(Plan::Month),
            "year" => Some(Plan::Year),
            _ => None,
        }
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a license key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Unused,
    Active,
    Expired,
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Unused => "unused",
            KeyStatus::Active => "active",
            KeyStatus::Expired => "expired",
            KeyStatus::Revoked => "revoked",
        }
    }
}
