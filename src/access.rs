//! Caller identity and role checks.
//!
//! Authentication happens upstream; the authenticating proxy forwards the
//! resolved role in `x-user-role` and the user name in `x-user-name`.
//! Requests without a role header are treated as guests.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};

use crate::Error;

pub const ROLE_HEADER: &str = "x-user-role";
pub const USER_HEADER: &str = "x-user-name";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
    Guest,
}

impl Role {
    // ---
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            "guest" => Some(Role::Guest),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }
}

/// What an operation needs from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Queries: every role.
    Read,
    /// Ingestion, corrections, aggregation, reports, anomaly handling.
    Write,
    /// Destructive operations.
    Admin,
}

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub role: Role,
    pub name: Option<String>,
}

impl Caller {
    // ---
    pub fn new(role: Role, name: Option<&str>) -> Self {
        Self {
            role,
            name: name.map(str::to_string),
        }
    }

    pub fn admin() -> Self {
        Self::new(Role::Admin, Some("admin"))
    }

    pub fn user(name: &str) -> Self {
        Self::new(Role::User, Some(name))
    }

    pub fn guest() -> Self {
        Self::new(Role::Guest, None)
    }

    /// Name recorded in `generated_by` / `processed_by` columns.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.role.as_str())
    }

    pub fn require(&self, access: Access) -> Result<(), Error> {
        // ---
        let allowed = match access {
            Access::Read => true,
            Access::Write => matches!(self.role, Role::Admin | Role::User),
            Access::Admin => self.role == Role::Admin,
        };
        if allowed {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role '{}' may not perform this operation",
                self.role.as_str()
            )))
        }
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // ---
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let role = match header(ROLE_HEADER) {
            Some(value) => Role::parse(value)
                .ok_or_else(|| Error::validation(format!("unknown role '{value}'")))?,
            None => Role::Guest,
        };
        Ok(Caller::new(role, header(USER_HEADER)))
    }
}
