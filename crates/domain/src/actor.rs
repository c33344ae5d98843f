//! The authenticated caller identity.

use common::UserId;

/// An already-authenticated caller, as handed in by the auth boundary.
///
/// The domain never validates credentials; it only checks ownership and
/// privilege against this identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_superuser: bool,
}

impl Actor {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            is_superuser: false,
        }
    }

    pub fn superuser(user_id: UserId) -> Self {
        Self {
            user_id,
            is_superuser: true,
        }
    }

    /// True when this actor may act on resources owned by `owner`.
    pub fn can_act_for(&self, owner: UserId) -> bool {
        self.is_superuser || self.user_id == owner
    }
}
