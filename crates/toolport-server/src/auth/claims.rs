//! JWT claims carried by user and operator access tokens.

use serde::{Deserialize, Serialize};

pub const ROLE_USER: &str = "user";
pub const ROLE_OPERATOR: &str = "operator";
pub const ROLE_ADMIN: &str = "admin";

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// JWT ID (unique per token).
    pub jti: String,
    /// Subject (user ID).
    pub sub: String,
    pub username: String,
    /// `user`, `operator` or `admin`.
    pub role: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Expiration (unix timestamp).
    pub exp: i64,
}

impl Claims {
    /// Operators and admins may pin runs and command machines.
    pub fn can_operate(&self) -> bool {
        self.role == ROLE_OPERATOR || self.role == ROLE_ADMIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: &str) -> Claims {
        Claims {
            jti: "j".into(),
            sub: "u1".into(),
            username: "alice".into(),
            role: role.into(),
            iat: 0,
            exp: 0,
        }
    }

    #[test]
    fn only_operators_and_admins_operate() {
        assert!(!claims(ROLE_USER).can_operate());
        assert!(claims(ROLE_OPERATOR).can_operate());
        assert!(claims(ROLE_ADMIN).can_operate());
        assert!(!claims("Operator").can_operate());
    }
}
