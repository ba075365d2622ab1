use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// How matching navigations to a site are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    #[default]
    Off,
    Block,
    Redirect,
}

/// A user-configured destination to avoid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSite {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default)]
    pub block_mode: BlockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl TrackedSite {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        pattern: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            pattern: pattern.into(),
            is_regex: false,
            block_mode: BlockMode::Off,
            redirect_url: None,
            created_at,
        }
    }

    /// The configured redirect target, if any non-blank value is set.
    pub fn custom_redirect(&self) -> Option<&str> {
        self.redirect_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Local calendar day on which tracking began.
    pub fn created_day(&self) -> NaiveDate {
        self.created_at.with_timezone(&Local).date_naive()
    }
}

/// A free-text note the user keeps alongside their streak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: i64,
    pub text: String,
}
