use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::NotificationId;
use crate::secret::SecretRef;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdoOnDuplicate {
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub comment: Option<String>,
    /// Clauses under which a duplicate report update is skipped entirely.
    /// Each entry is a field-value map that must match in full, e.g.
    /// `{state=Closed, reason="Wont Fix"}` skips only items that are both
    /// closed and resolved as won't-fix; any one matching entry suppresses.
    #[serde(default)]
    pub unless: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdoTemplate {
    pub base_url: String,
    pub auth_token_ref: SecretRef,
    pub project: String,
    pub work_item_type: String,
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub on_duplicate: AdoOnDuplicate,
    #[serde(default)]
    pub ado_fields: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UniqueSearch {
    pub str: String,
    #[serde(default)]
    pub match_list: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GithubOnDuplicate {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub reopen: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubIssuesTemplate {
    pub auth_ref: SecretRef,
    pub organization: String,
    pub repository: String,
    pub title: String,
    pub body: String,
    pub unique_search: UniqueSearch,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<String>,
    #[serde(default)]
    pub on_duplicate: GithubOnDuplicate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TeamsTemplate {
    pub webhook_url_ref: SecretRef,
}

/// A polymorphic notification config, modeled as a tagged variant with a
/// dedicated renderer per variant.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationConfig {
    Ado(AdoTemplate),
    GithubIssues(GithubIssuesTemplate),
    Teams(TeamsTemplate),
}

impl NotificationConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationConfig::Ado(_) => "ado",
            NotificationConfig::GithubIssues(_) => "github_issues",
            NotificationConfig::Teams(_) => "teams",
        }
    }
}

/// A notification config attached to a report container.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub notification_id: NotificationId,
    pub container: String,
    pub config: NotificationConfig,
    #[serde(default)]
    pub replace_existing: bool,
    pub created_at: DateTime<Utc>,
}
