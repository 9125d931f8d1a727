// src/models/user.rs

use serde::{Deserialize, Serialize};

/// Role carried in the identity token.
/// Unknown role strings are treated as `Student`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub fn from_claim(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "teacher" => Role::Teacher,
            "admin" => Role::Admin,
            _ => Role::Student,
        }
    }

    /// Teachers and admins may review any attempt and see results early.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Teacher | Role::Admin)
    }
}

/// The authenticated caller, as supplied by the identity layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: i64,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: i64, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn student(user_id: i64) -> Self {
        Self::new(user_id, Role::Student)
    }
}
