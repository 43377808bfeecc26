// 👤 User Entity - staff login records
//
// Passwords are stored as "<salt>$<sha256(salt || password)>" and never
// serialized back out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    #[default]
    Staff,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Staff => "staff",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Role::Owner),
            "staff" => Some(Role::Staff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub business_id: Option<i64>,
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: &str, display_name: &str, role: Role, password: &str) -> Self {
        User {
            id: 0,
            business_id: None,
            username: username.to_string(),
            display_name: display_name.to_string(),
            role,
            password_hash: hash_password(password),
            created_at: Utc::now(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        match self.password_hash.split_once('$') {
            Some((salt, digest)) => salted_digest(salt, password) == digest,
            None => false,
        }
    }
}

/// Fresh random salt per call
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    let digest = salted_digest(&salt, password);
    format!("{}${}", salt, digest)
}

fn salted_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}
