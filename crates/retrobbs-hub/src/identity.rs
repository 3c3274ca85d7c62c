//! Password hashing and the public projection of a user record.

use anyhow::{Context, Result};
use retrobbs_shared::schemas::PublicUser;

use crate::store::types::StoredUser;

/// Floor below which an adaptive hash is considered too cheap.
pub const MIN_HASH_COST: u32 = 10;
const HASH_COST: u32 = 12;

/// Salted adaptive hash; the salt is embedded in the output string.
pub fn hash_password(plain: &str) -> Result<String> {
    let cost = HASH_COST.max(MIN_HASH_COST);
    bcrypt::hash(plain, cost).context("failed to hash password")
}

/// Constant-time verification. Any malformed hash verifies false rather than
/// erroring out to the caller.
pub fn verify_password(plain: &str, hash: &str) -> bool {
    bcrypt::verify(plain, hash).unwrap_or(false)
}

/// Everything a client may see of a user. The hash never crosses this line.
pub fn public_view(user: &StoredUser) -> PublicUser {
    PublicUser {
        id: user.id.clone(),
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        email: user.email.clone(),
        role: user.role.clone(),
        join_date: user.joined_at,
        last_login: user.last_login,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verify_roundtrip() {
        let hash = hash_password("hunter22").unwrap();
        assert_ne!(hash, "hunter22");
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
    }

    #[test]
    fn malformed_hash_verifies_false() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn public_view_has_no_hash() {
        let user = StoredUser {
            id: "user_1".into(),
            username: "ada".into(),
            display_name: "Ada".into(),
            email: Some("ada@example.com".into()),
            password_hash: "$2b$12$secret".into(),
            role: "admin".into(),
            joined_at: 1,
            last_login: Some(2),
            settings: None,
        };
        let view = public_view(&user);
        let encoded = serde_json::to_string(&view).unwrap();
        assert!(!encoded.contains("secret"));
        assert!(!encoded.contains("password"));
        assert_eq!(view.username, "ada");
    }
}
