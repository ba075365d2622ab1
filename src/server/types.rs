use crate::error::CommandError;
use crate::model::{BlockMode, TrackedSite};
use crate::store::Snapshot;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Which navigation callback produced the event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NavigationKind {
    #[default]
    Committed,
    HistoryStateUpdated,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    #[serde(alias = "frame_id")]
    pub frame_id: u32,
    pub url: String,
    #[serde(default)]
    pub kind: NavigationKind,
}

impl NavigationEvent {
    pub fn top_level(url: impl Into<String>) -> Self {
        Self {
            frame_id: 0,
            url: url.into(),
            kind: NavigationKind::Committed,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.frame_id == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSite {
    pub label: String,
    pub pattern: String,
    #[serde(default)]
    pub is_regex: bool,
}

/// Fields a user may edit on an existing site. Absent fields stay as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitePatch {
    pub label: Option<String>,
    pub block_mode: Option<BlockMode>,
    /// An empty string clears the custom target.
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    AllowSiteTemporarily { site_id: String, allow_until_ms: i64 },
    AddSite(NewSite),
    UpdateSite { site_id: String, patch: SitePatch },
    DeleteSite { site_id: String },
    ResetSiteVisits { site_id: String },
    ResetAllVisits,
    ResetEverything,
    AddMotivation(String),
    DeleteMotivation(usize),
    AddJournalEntry(String),
    DeleteJournalEntry(usize),
    Import(Snapshot),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::AllowSiteTemporarily { .. } => "allowSiteTemporarily",
            Command::AddSite(_) => "addSite",
            Command::UpdateSite { .. } => "updateSite",
            Command::DeleteSite { .. } => "deleteSite",
            Command::ResetSiteVisits { .. } => "resetSiteVisits",
            Command::ResetAllVisits => "resetAllVisits",
            Command::ResetEverything => "resetEverything",
            Command::AddMotivation(_) => "addMotivation",
            Command::DeleteMotivation(_) => "deleteMotivation",
            Command::AddJournalEntry(_) => "addJournalEntry",
            Command::DeleteJournalEntry(_) => "deleteJournalEntry",
            Command::Import(_) => "import",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Ok,
    Site { site: TrackedSite },
    Allowed { site_id: String, allow_until: i64 },
    Imported { keys: Vec<String> },
}

pub type ReplySender = oneshot::Sender<Result<Reply, CommandError>>;

/// A command plus the channel its result goes back on.
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: Command,
    pub reply: ReplySender,
}
