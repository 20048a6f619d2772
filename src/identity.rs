//! Read-only view of the authentication provider.

use std::sync::RwLock;

use crate::model::UserId;

pub trait IdentityProvider: Send + Sync {
    /// Signed-in user, or `None` for an anonymous session.
    fn current_user(&self) -> Option<UserId>;
}

/// Identity slot the host updates on sign-in and sign-out.
#[derive(Debug, Default)]
pub struct SessionIdentity {
    user: RwLock<Option<UserId>>,
}

impl SessionIdentity {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn set(&self, user: Option<UserId>) {
        // A poisoned lock still holds a valid Option; keep going with it.
        let mut guard = self.user.write().unwrap_or_else(|e| e.into_inner());
        *guard = user;
    }
}

impl IdentityProvider for SessionIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.user
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
