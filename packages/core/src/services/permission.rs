//! Permission evaluation
//!
//! The store never decides on its own who may do what. Each check goes
//! through a [`PermissionEvaluator`] supplied by the embedding application.
//! Entity checks are keyed by [`NodeId`]. Attribute checks are keyed by
//! [`AttributeKey`].

use crate::models::{NodeId, Permission, Principal, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

pub trait PermissionEvaluator<K>: Send + Sync {
    fn has_permission(&self, principal: &Principal, key: &K, permission: Permission) -> bool;
}

/// Text or reference attribute of a type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeKey {
    pub type_id: TypeId,
    pub attribute_id: String,
}

impl AttributeKey {
    pub fn new(type_id: TypeId, attribute_id: impl Into<String>) -> Self {
        Self {
            type_id,
            attribute_id: attribute_id.into(),
        }
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_id, self.attribute_id)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl<K> PermissionEvaluator<K> for AllowAll {
    fn has_permission(&self, _principal: &Principal, _key: &K, _permission: Permission) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl<K> PermissionEvaluator<K> for DenyAll {
    fn has_permission(&self, _principal: &Principal, _key: &K, _permission: Permission) -> bool {
        false
    }
}

/// Evaluator backed by a closure
pub struct FnEvaluator<F>(pub F);

impl<K, F> PermissionEvaluator<K> for FnEvaluator<F>
where
    F: Fn(&Principal, &K, Permission) -> bool + Send + Sync,
{
    fn has_permission(&self, principal: &Principal, key: &K, permission: Permission) -> bool {
        (self.0)(principal, key, permission)
    }
}

pub fn from_fn<K, F>(f: F) -> Arc<dyn PermissionEvaluator<K>>
where
    K: 'static,
    F: Fn(&Principal, &K, Permission) -> bool + Send + Sync + 'static,
{
    Arc::new(FnEvaluator(f))
}

/// Allows when any delegate allows; empty denies
pub struct AnyOf<K> {
    evaluators: Vec<Arc<dyn PermissionEvaluator<K>>>,
}

impl<K> PermissionEvaluator<K> for AnyOf<K> {
    fn has_permission(&self, principal: &Principal, key: &K, permission: Permission) -> bool {
        self.evaluators
            .iter()
            .any(|e| e.has_permission(principal, key, permission))
    }
}

pub fn any_of<K: 'static>(
    evaluators: Vec<Arc<dyn PermissionEvaluator<K>>>,
) -> Arc<dyn PermissionEvaluator<K>> {
    Arc::new(AnyOf { evaluators })
}

/// Admins and superusers may do everything; others ask the delegate
pub struct AppAdminBypass<K> {
    delegate: Arc<dyn PermissionEvaluator<K>>,
}

impl<K> AppAdminBypass<K> {
    pub fn new(delegate: Arc<dyn PermissionEvaluator<K>>) -> Self {
        Self { delegate }
    }
}

impl<K> PermissionEvaluator<K> for AppAdminBypass<K> {
    fn has_permission(&self, principal: &Principal, key: &K, permission: Permission) -> bool {
        principal.is_admin() || self.delegate.has_permission(principal, key, permission)
    }
}

/// Memoizes decisions of the delegate until `clear()`
pub struct CachedEvaluator<K> {
    delegate: Arc<dyn PermissionEvaluator<K>>,
    decisions: RwLock<HashMap<(Principal, K, Permission), bool>>,
}

impl<K> CachedEvaluator<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new(delegate: Arc<dyn PermissionEvaluator<K>>) -> Self {
        Self {
            delegate,
            decisions: RwLock::new(HashMap::new()),
        }
    }

    /// Forget every cached decision, e.g. after permission data changed
    pub fn clear(&self) {
        self.decisions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.decisions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> PermissionEvaluator<K> for CachedEvaluator<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn has_permission(&self, principal: &Principal, key: &K, permission: Permission) -> bool {
        let cache_key = (principal.clone(), key.clone(), permission);
        if let Some(decision) = self
            .decisions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&cache_key)
        {
            return *decision;
        }

        let decision = self.delegate.has_permission(principal, key, permission);
        self.decisions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(cache_key, decision);
        decision
    }
}

/// Evaluators consulted by read filtering and write pre-authorization
///
/// Internal principals pass every check.
#[derive(Clone)]
pub struct NodePermissions {
    pub nodes: Arc<dyn PermissionEvaluator<NodeId>>,
    pub text_attributes: Arc<dyn PermissionEvaluator<AttributeKey>>,
    pub reference_attributes: Arc<dyn PermissionEvaluator<AttributeKey>>,
}

impl NodePermissions {
    pub fn new(
        nodes: Arc<dyn PermissionEvaluator<NodeId>>,
        text_attributes: Arc<dyn PermissionEvaluator<AttributeKey>>,
        reference_attributes: Arc<dyn PermissionEvaluator<AttributeKey>>,
    ) -> Self {
        Self {
            nodes,
            text_attributes,
            reference_attributes,
        }
    }

    pub fn allow_all() -> Self {
        Self::new(Arc::new(AllowAll), Arc::new(AllowAll), Arc::new(AllowAll))
    }

    /// Wrap every evaluator so that admins bypass it
    pub fn with_admin_bypass(self) -> Self {
        Self {
            nodes: Arc::new(AppAdminBypass::new(self.nodes)),
            text_attributes: Arc::new(AppAdminBypass::new(self.text_attributes)),
            reference_attributes: Arc::new(AppAdminBypass::new(self.reference_attributes)),
        }
    }

    pub fn node(&self, principal: &Principal, id: &NodeId, permission: Permission) -> bool {
        principal.is_internal() || self.nodes.has_permission(principal, id, permission)
    }

    pub fn text_attribute(
        &self,
        principal: &Principal,
        type_id: &TypeId,
        attribute_id: &str,
        permission: Permission,
    ) -> bool {
        principal.is_internal()
            || self.text_attributes.has_permission(
                principal,
                &AttributeKey::new(type_id.clone(), attribute_id),
                permission,
            )
    }

    pub fn reference_attribute(
        &self,
        principal: &Principal,
        type_id: &TypeId,
        attribute_id: &str,
        permission: Permission,
    ) -> bool {
        principal.is_internal()
            || self.reference_attributes.has_permission(
                principal,
                &AttributeKey::new(type_id.clone(), attribute_id),
                permission,
            )
    }
}

impl Default for NodePermissions {
    fn default() -> Self {
        Self::allow_all()
    }
}

impl fmt::Debug for NodePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodePermissions").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn key() -> NodeId {
        NodeId::new(Uuid::new_v4(), TypeId::new(Uuid::new_v4(), "Person"))
    }

    #[test]
    fn test_any_of() {
        let deny: Arc<dyn PermissionEvaluator<NodeId>> = Arc::new(DenyAll);
        let allow: Arc<dyn PermissionEvaluator<NodeId>> = Arc::new(AllowAll);
        let ann = Principal::user("ann");

        assert!(any_of(vec![deny.clone(), allow]).has_permission(&ann, &key(), Permission::Read));
        assert!(!any_of(vec![deny]).has_permission(&ann, &key(), Permission::Read));
        assert!(!any_of::<NodeId>(vec![]).has_permission(&ann, &key(), Permission::Read));
    }

    #[test]
    fn test_admin_bypass() {
        let evaluator = AppAdminBypass::<NodeId>::new(Arc::new(DenyAll));
        let admin = Principal::new("root", crate::models::AppRole::Admin);

        assert!(evaluator.has_permission(&admin, &key(), Permission::Delete));
        assert!(!evaluator.has_permission(&Principal::user("ann"), &key(), Permission::Read));
    }

    #[test]
    fn test_cached_evaluator_memoizes_until_cleared() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cached = CachedEvaluator::new(from_fn(move |_: &Principal, _: &NodeId, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));
        let ann = Principal::user("ann");
        let id = key();

        assert!(cached.has_permission(&ann, &id, Permission::Read));
        assert!(cached.has_permission(&ann, &id, Permission::Read));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cached.len(), 1);

        cached.clear();
        assert!(cached.is_empty());
        assert!(cached.has_permission(&ann, &id, Permission::Read));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_internal_principal_passes_node_permissions() {
        let permissions = NodePermissions::new(
            Arc::new(DenyAll),
            Arc::new(DenyAll),
            Arc::new(DenyAll),
        );
        let id = key();

        assert!(permissions.node(&Principal::internal("test"), &id, Permission::Read));
        assert!(!permissions.node(&Principal::user("ann"), &id, Permission::Read));
        assert!(!permissions.text_attribute(
            &Principal::user("ann"),
            &id.type_id,
            "name",
            Permission::Read
        ));
    }
}
