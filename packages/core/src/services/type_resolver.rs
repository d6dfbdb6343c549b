//! Type resolution
//!
//! Type and attribute definitions are owned by the embedding application.
//! The store only needs to look them up.

use crate::models::{Principal, TypeDef, TypeId};
use crate::services::error::NodeServiceError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait TypeResolver: Send + Sync {
    /// Definition of `type_id`, or `None` if no such type exists
    async fn resolve(
        &self,
        type_id: &TypeId,
        principal: &Principal,
    ) -> Result<Option<TypeDef>, NodeServiceError>;

    /// URI namespace configured for a graph
    async fn graph_namespace(&self, _graph_id: Uuid) -> Result<Option<String>, NodeServiceError> {
        Ok(None)
    }
}

/// Resolver over a fixed, in-process set of types
#[derive(Debug, Default)]
pub struct InMemoryTypeResolver {
    types: RwLock<HashMap<TypeId, TypeDef>>,
    namespaces: RwLock<HashMap<Uuid, String>>,
}

impl InMemoryTypeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_types(types: impl IntoIterator<Item = TypeDef>) -> Self {
        Self {
            types: RwLock::new(types.into_iter().map(|t| (t.id.clone(), t)).collect()),
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, type_def: TypeDef) {
        self.types.write().await.insert(type_def.id.clone(), type_def);
    }

    pub async fn set_graph_namespace(&self, graph_id: Uuid, namespace: impl Into<String>) {
        self.namespaces.write().await.insert(graph_id, namespace.into());
    }
}

#[async_trait]
impl TypeResolver for InMemoryTypeResolver {
    async fn resolve(
        &self,
        type_id: &TypeId,
        _principal: &Principal,
    ) -> Result<Option<TypeDef>, NodeServiceError> {
        Ok(self.types.read().await.get(type_id).cloned())
    }

    async fn graph_namespace(&self, graph_id: Uuid) -> Result<Option<String>, NodeServiceError> {
        Ok(self.namespaces.read().await.get(&graph_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_types_resolve() {
        let resolver = InMemoryTypeResolver::new();
        let concept = TypeId::new(Uuid::new_v4(), "Concept");
        let principal = Principal::user("ann");

        tokio_test::block_on(async {
            assert!(resolver.resolve(&concept, &principal).await.unwrap().is_none());
            resolver.register(TypeDef::new(concept.clone())).await;
            let resolved = resolver.resolve(&concept, &principal).await.unwrap();
            assert_eq!(resolved.map(|t| t.id), Some(concept.clone()));
        });
    }

    #[test]
    fn test_graph_namespace_defaults_to_none() {
        let resolver = InMemoryTypeResolver::new();
        let graph = Uuid::new_v4();

        tokio_test::block_on(async {
            assert_eq!(resolver.graph_namespace(graph).await.unwrap(), None);
            resolver.set_graph_namespace(graph, "http://example.org/").await;
            assert_eq!(
                resolver.graph_namespace(graph).await.unwrap().as_deref(),
                Some("http://example.org/")
            );
        });
    }
}
