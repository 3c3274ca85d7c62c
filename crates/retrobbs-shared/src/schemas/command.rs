use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

fn default_refresh() -> bool {
    true
}

/// What an app returns from `handle_command`.
///
/// `screen = None` means "leave the app, back to the main menu". An empty
/// string is normalized to `None` before the shell interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    #[serde(default)]
    pub screen: Option<String>,
    pub response: String,
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn stay(screen: &str, response: impl Into<String>) -> Self {
        Self {
            screen: Some(screen.to_string()),
            response: response.into(),
            refresh: false,
            data: None,
        }
    }

    pub fn exit(response: impl Into<String>) -> Self {
        Self {
            screen: None,
            response: response.into(),
            refresh: true,
            data: None,
        }
    }
}

/// One entry of the main-menu catalog returned by `/terminal/init`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
#[ts(rename_all = "camelCase")]
pub struct MenuOption {
    pub number: u32,
    pub id: String,
    pub name: String,
    pub description: String,
}
