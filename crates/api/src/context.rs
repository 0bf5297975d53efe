use crewbook_core::ProfileId;

/// Authenticated caller for a request.
///
/// Only the identity comes from the token. Company and role are resolved
/// from memberships by each operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProfileContext {
    profile_id: ProfileId,
}

impl ProfileContext {
    pub fn new(profile_id: ProfileId) -> Self {
        Self { profile_id }
    }

    pub fn profile_id(&self) -> ProfileId {
        self.profile_id
    }
}
