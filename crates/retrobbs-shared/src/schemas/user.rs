use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// What the outside world is allowed to see of a user. Never carries the
/// password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
#[ts(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: String,
    pub join_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<i64>,
}
