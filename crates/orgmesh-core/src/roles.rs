//! Role resolution collaborator
//!
//! The identity/role resolver is external to the sync core: it knows who the
//! local actor is and which role a member holds in an organization. The core
//! only consumes it through the [`RoleResolver`] trait so embedders can plug
//! in their own identity service.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::MeshResult;
use crate::types::{MemberId, OrgId, Role};

/// Resolves the local actor and per-organization roles
#[async_trait]
pub trait RoleResolver: Send + Sync {
    /// Identifier of the local actor
    fn current_id(&self) -> MemberId;

    /// Role of a member within an organization, `None` if not a member
    async fn role_of(&self, org_id: &OrgId, member: &MemberId) -> MeshResult<Option<Role>>;
}

/// In-memory role resolver for tests and embedders without an identity service
pub struct StaticRoleResolver {
    me: MemberId,
    roles: RwLock<HashMap<(OrgId, MemberId), Role>>,
}

impl StaticRoleResolver {
    pub fn new(me: impl Into<MemberId>) -> Self {
        Self {
            me: me.into(),
            roles: RwLock::new(HashMap::new()),
        }
    }

    /// Assign a member's role within an organization
    pub fn set_role(&self, org_id: &OrgId, member: impl Into<MemberId>, role: Role) {
        self.roles
            .write()
            .insert((org_id.clone(), member.into()), role);
    }

    /// Remove a member from an organization
    pub fn clear_role(&self, org_id: &OrgId, member: &MemberId) {
        self.roles.write().remove(&(org_id.clone(), member.clone()));
    }
}

impl From<MemberId> for StaticRoleResolver {
    fn from(me: MemberId) -> Self {
        Self::new(me)
    }
}

#[async_trait]
impl RoleResolver for StaticRoleResolver {
    fn current_id(&self) -> MemberId {
        self.me.clone()
    }

    async fn role_of(&self, org_id: &OrgId, member: &MemberId) -> MeshResult<Option<Role>> {
        Ok(self
            .roles
            .read()
            .get(&(org_id.clone(), member.clone()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_roles() {
        let resolver = StaticRoleResolver::new("did:example:alice");
        let org = OrgId::new();

        assert_eq!(resolver.current_id(), MemberId::from("did:example:alice"));

        let member = MemberId::from("did:example:bob");
        assert_eq!(resolver.role_of(&org, &member).await.unwrap(), None);

        resolver.set_role(&org, "did:example:bob", Role::Member);
        assert_eq!(
            resolver.role_of(&org, &member).await.unwrap(),
            Some(Role::Member)
        );

        resolver.clear_role(&org, &member);
        assert_eq!(resolver.role_of(&org, &member).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_roles_are_scoped_per_org() {
        let resolver = StaticRoleResolver::new("did:example:alice");
        let org_a = OrgId::new();
        let org_b = OrgId::new();
        let member = MemberId::from("did:example:carol");

        resolver.set_role(&org_a, member.clone(), Role::Admin);
        assert_eq!(
            resolver.role_of(&org_a, &member).await.unwrap(),
            Some(Role::Admin)
        );
        assert_eq!(resolver.role_of(&org_b, &member).await.unwrap(), None);
    }
}
