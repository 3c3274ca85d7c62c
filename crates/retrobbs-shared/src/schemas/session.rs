//! Session wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

/// The slice of a session echoed back in every `/terminal/command` reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
#[ts(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub current_area: String,
    pub command_history: Vec<String>,
}

/// Read-only projection of a session handed to apps.
///
/// Apps never see the full session record; `data` carries only the calling
/// app's own scratch map. Mutations of this value are ignored by the host —
/// an app reaches persistent state through its capability facade alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub current_area: String,
    #[serde(default)]
    pub data: Value,
}

impl SessionView {
    pub fn anonymous(id: &str, area: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: None,
            username: None,
            role: None,
            current_area: area.to_string(),
            data: Value::Object(Default::default()),
        }
    }
}
