use mnemo_core::Requester;

use crate::record::Category;

/// Categories that only privileged requesters may see in someone else's
/// (or the global) memory.
pub const PRIVATE_CATEGORIES: &[Category] = &[Category::Health, Category::Relationship];

/// Access levels allowed to read [`PRIVATE_CATEGORIES`].
pub const PRIVILEGED_LEVELS: &[&str] = &["owner", "family"];

/// Decides whether a requester may see a record owned by `record_owner`.
///
/// Recall consults this once per candidate result and performs no
/// authorization logic of its own.
pub trait AccessControl: Send + Sync {
    fn permit(&self, requester: &Requester, record_owner: Option<&str>, category: Category) -> bool;
}

/// Global records are visible to everyone; owned records only to their owner.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerScoped;

impl AccessControl for OwnerScoped {
    fn permit(
        &self,
        requester: &Requester,
        record_owner: Option<&str>,
        _category: Category,
    ) -> bool {
        match record_owner {
            None => true,
            Some(owner) => requester.id.as_deref() == Some(owner),
        }
    }
}

/// Wraps another policy and hides [`PRIVATE_CATEGORIES`] from requesters
/// below [`PRIVILEGED_LEVELS`]. A requester always sees their own records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryPrivacy<A = OwnerScoped> {
    inner: A,
}

impl<A: AccessControl> CategoryPrivacy<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl<A: AccessControl> AccessControl for CategoryPrivacy<A> {
    fn permit(
        &self,
        requester: &Requester,
        record_owner: Option<&str>,
        category: Category,
    ) -> bool {
        if !self.inner.permit(requester, record_owner, category) {
            return false;
        }
        if !PRIVATE_CATEGORIES.contains(&category) {
            return true;
        }
        let own = record_owner.is_some() && requester.id.as_deref() == record_owner;
        own || PRIVILEGED_LEVELS.contains(&requester.access_level.as_str())
    }
}

/// Everything is visible. For operator tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn permit(
        &self,
        _requester: &Requester,
        _record_owner: Option<&str>,
        _category: Category,
    ) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_scoped() {
        let acl = OwnerScoped;
        let fact = Category::Fact;
        assert!(acl.permit(&Requester::anonymous(), None, fact));
        assert!(!acl.permit(&Requester::anonymous(), Some("alice"), fact));
        assert!(acl.permit(&Requester::user("alice"), Some("alice"), fact));
        assert!(!acl.permit(&Requester::user("bob"), Some("alice"), fact));
    }

    #[test]
    fn test_private_categories_need_privileged_level() {
        let acl = CategoryPrivacy::new(OwnerScoped);
        let public = Requester::user("bob");
        let family = Requester::user("bob").with_access_level("family");

        assert!(acl.permit(&public, None, Category::Fact));
        assert!(!acl.permit(&public, None, Category::Health));
        assert!(!acl.permit(&public, None, Category::Relationship));
        assert!(acl.permit(&family, None, Category::Health));
        let owner = Requester::anonymous().with_access_level("owner");
        assert!(acl.permit(&owner, None, Category::Health));
    }

    #[test]
    fn test_privacy_never_widens_owner_scope() {
        let acl = CategoryPrivacy::new(OwnerScoped);
        let family = Requester::user("bob").with_access_level("family");
        assert!(!acl.permit(&family, Some("alice"), Category::Fact));
        assert!(!acl.permit(&family, Some("alice"), Category::Health));
        // Own records stay visible at any level.
        assert!(acl.permit(&Requester::user("alice"), Some("alice"), Category::Health));
    }
}
