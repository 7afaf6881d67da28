use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    FacilityOwner,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::FacilityOwner => "facility_owner",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "facility_owner" => Some(Role::FacilityOwner),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Authenticated caller identity, as established by the upstream auth layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owner of the given facility, acting in that capacity.
    pub fn owns_facility(&self, facility_owner_id: &str) -> bool {
        self.role == Role::FacilityOwner && self.user_id == facility_owner_id
    }
}
