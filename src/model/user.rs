//! User accounts; only the fields needed to address notifications.

use super::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Role allowed to operate on batches; receives approval failure alerts.
pub const PRODUCTION_MANAGER: &str = "production_manager";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    rev: Option<String>,
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Document for User {
    const COLLECTION: &'static str = "users";

    fn id(&self) -> &str {
        &self.id
    }
}

impl User {
    pub fn new(username: &str, email: &str, role: &str) -> Self {
        Self {
            id: username.to_string(),
            rev: None,
            username: username.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            extra: Map::new(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn role(&self) -> &str {
        &self.role
    }
}
