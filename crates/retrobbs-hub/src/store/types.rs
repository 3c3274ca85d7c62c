use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StoredSession {
    pub id: String,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub current_area: String,
    pub command_history: Vec<String>,
    pub data: Value,
    pub created_at: i64,
    pub last_activity: i64,
    pub client_addr: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredUser {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub role: String,
    pub joined_at: i64,
    pub last_login: Option<i64>,
    pub settings: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct StoredKeyValue {
    pub id: i64,
    pub app_id: String,
    pub key: String,
    pub user_id: Option<String>,
    pub namespace: Option<String>,
    pub value: Value,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}
