//! Caller identity (§6 inward contract): opaque to the core beyond
//! these two fields. `user_id: None` means anonymous.

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: Option<Uuid>,
    pub is_admin: bool,
}

impl CallerIdentity {
    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            is_admin: false,
        }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            is_admin: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// §7: anonymous callers get `Unauthenticated` for a non-public read or
/// any write; authenticated callers lacking permission get `NotFound`
/// on read (don't leak existence of objects they can't see) or
/// `Forbidden` on write.
pub fn read_denied(caller: &CallerIdentity, what: impl std::fmt::Display) -> crate::error::CoreError {
    if caller.is_anonymous() {
        crate::error::CoreError::Unauthenticated(format!("{what} requires authentication"))
    } else {
        crate::error::CoreError::not_found(what.to_string())
    }
}

pub fn write_denied(caller: &CallerIdentity, what: impl std::fmt::Display) -> crate::error::CoreError {
    if caller.is_anonymous() {
        crate::error::CoreError::Unauthenticated(format!("{what} requires authentication"))
    } else {
        crate::error::CoreError::Forbidden(what.to_string())
    }
}
