//! Node Pipeline Tests
//!
//! End-to-end behavior of the assembled stack: metadata generation, save
//! modes, validation, read-after-write through the index, neighbor
//! re-indexing, permission filtering, events and revision reconstruction.

#[cfg(test)]
mod pipeline_tests {
    use anyhow::Result;
    use nodegraph_core::models::{
        AppRole, LangValue, Node, NodeId, Permission, Principal, ReferenceAttribute, RevisionType,
        TextAttribute, TypeDef, TypeId,
    };
    use chrono::{Duration as ChronoDuration, Utc};
    use nodegraph_core::logging::init_tracing;
    use nodegraph_core::query::{
        relational, MatchAll, NodeById, NodesByCode, NodesByGraphId, NodesByLastModifiedDate,
        NodesByNumber, NodesByProperty, NodesByPropertyPrefix, NodesByPropertyStringRange,
        NodesByPropertyToken, NodesByReference, NodesByReferrer, NodesByTypeId, NodesByUri, Query,
        Sort, SpecRef,
    };
    use nodegraph_core::services::{
        from_fn, AllowAll, AttributeKey, InMemoryTypeResolver, NodeEvent, NodePermissions,
        NodeServiceError, SaveMode, Service, WriteOptions,
    };
    use nodegraph_core::{NodePipeline, StoreConfig};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    struct Fixture {
        pipeline: NodePipeline,
        person: TypeId,
        temp_dir: TempDir,
    }

    fn person_type() -> TypeId {
        TypeId::new(Uuid::from_u128(7), "Person")
    }

    fn resolver(person: &TypeId) -> Arc<InMemoryTypeResolver> {
        Arc::new(InMemoryTypeResolver::with_types([TypeDef::new(person.clone())
            .with_code_prefix("P-")
            .with_text_attribute(TextAttribute::new("name"))
            .with_text_attribute(TextAttribute::new("salary").with_regex("[0-9]+"))
            .with_reference_attribute(ReferenceAttribute::new("knows", person.clone()))]))
    }

    async fn open(path: &Path, person: &TypeId, permissions: NodePermissions) -> Result<NodePipeline> {
        let _ = init_tracing("warn");
        let config = StoreConfig::default().with_db_path(path.join("test.db"));
        Ok(NodePipeline::open(config, resolver(person), permissions).await?)
    }

    async fn setup_with(permissions: NodePermissions) -> Result<Fixture> {
        let temp_dir = TempDir::new()?;
        let person = person_type();
        let pipeline = open(temp_dir.path(), &person, permissions).await?;
        Ok(Fixture {
            pipeline,
            person,
            temp_dir,
        })
    }

    async fn setup() -> Result<Fixture> {
        setup_with(NodePermissions::allow_all()).await
    }

    fn ann() -> Principal {
        Principal::user("ann")
    }

    fn named(type_id: &TypeId, name: &str) -> Node {
        Node::new(Uuid::new_v4(), type_id.clone()).with_property("name", LangValue::new("en", name))
    }

    #[tokio::test]
    async fn test_insert_generates_metadata() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();

        let node = named(&f.person, "Ann");
        let key = service
            .save(node.clone(), SaveMode::Insert, &WriteOptions::default(), &ann())
            .await?;

        let stored = service.get(&key, &ann()).await?.expect("stored node");
        assert_eq!(stored.number, 1);
        assert_eq!(stored.code.as_deref(), Some("P-1"));
        assert_eq!(stored.uri, Some(format!("urn:uuid:{}", node.id)));
        assert_eq!(stored.created_by.as_deref(), Some("ann"));
        assert_eq!(stored.last_modified_by.as_deref(), Some("ann"));
        assert!(stored.created_date.is_some());
        assert_eq!(stored.first_property_value("name"), Some("Ann"));
        Ok(())
    }

    #[tokio::test]
    async fn test_generated_uris_follow_namespaces() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let person = person_type();
        let types = resolver(&person);
        types
            .set_graph_namespace(person.graph_id, "http://example.org/people/")
            .await;
        let config = StoreConfig::default().with_db_path(temp_dir.path().join("test.db"));
        let pipeline = NodePipeline::open(config, types, NodePermissions::allow_all()).await?;
        let service = pipeline.service();

        let key = service
            .save(named(&person, "Ann"), SaveMode::Insert, &WriteOptions::default(), &ann())
            .await?;
        let stored = service.get(&key, &ann()).await?.expect("stored");
        assert_eq!(stored.uri.as_deref(), Some("http://example.org/people/P-1"));

        let opts = WriteOptions::default().with_uri_namespace("http://example.org/other/");
        let key = service.save(named(&person, "Bob"), SaveMode::Insert, &opts, &ann()).await?;
        let stored = service.get(&key, &ann()).await?.expect("stored");
        assert_eq!(stored.uri.as_deref(), Some("http://example.org/other/P-2"));

        let opts = WriteOptions::default().without_generated_identifiers();
        let key = service.save(named(&person, "Cid"), SaveMode::Insert, &opts, &ann()).await?;
        let stored = service.get(&key, &ann()).await?.expect("stored");
        assert_eq!(stored.number, 3);
        assert!(stored.code.is_none());
        assert!(stored.uri.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_keeps_creation_metadata() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();

        let node = named(&f.person, "Ann");
        let key = service
            .save(node.clone(), SaveMode::Insert, &WriteOptions::default(), &ann())
            .await?;
        let created = service.get(&key, &ann()).await?.expect("created");

        let bob = Principal::user("bob");
        let mut renamed = node.clone();
        renamed.properties.clear();
        let renamed = renamed.with_property("name", LangValue::new("en", "Anna"));
        service
            .save(renamed, SaveMode::Update, &WriteOptions::default(), &bob)
            .await?;

        let updated = service.get(&key, &ann()).await?.expect("updated");
        assert_eq!(updated.number, created.number);
        assert_eq!(updated.code, created.code);
        assert_eq!(updated.uri, created.uri);
        assert_eq!(updated.created_by.as_deref(), Some("ann"));
        assert_eq!(updated.created_date, created.created_date);
        assert_eq!(updated.last_modified_by.as_deref(), Some("bob"));
        assert_eq!(updated.first_property_value("name"), Some("Anna"));
        Ok(())
    }

    #[tokio::test]
    async fn test_save_modes_are_enforced() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();

        let node = named(&f.person, "Ann");
        let missing = service
            .save(node.clone(), SaveMode::Update, &opts, &ann())
            .await
            .unwrap_err();
        assert!(matches!(missing, NodeServiceError::NotFound(_)));

        service.save(node.clone(), SaveMode::Upsert, &opts, &ann()).await?;
        service.save(node.clone(), SaveMode::Upsert, &opts, &ann()).await?;

        let duplicate = service
            .save(node, SaveMode::Insert, &opts, &ann())
            .await
            .unwrap_err();
        assert!(matches!(duplicate, NodeServiceError::BadRequest(_)));

        let all: SpecRef<NodeId, Node> = Arc::new(MatchAll);
        assert_eq!(service.count(&all, &ann()).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();

        let undeclared = named(&f.person, "Ann").with_property("age", LangValue::new("", "41"));
        let err = service
            .save(undeclared, SaveMode::Insert, &opts, &ann())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeServiceError::BadRequest(_)));

        let malformed = named(&f.person, "Ann").with_property("salary", LangValue::new("", "lots"));
        let err = service
            .save(malformed, SaveMode::Insert, &opts, &ann())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeServiceError::BadRequest(_)));

        let dangling = named(&f.person, "Ann")
            .with_reference("knows", NodeId::new(Uuid::new_v4(), f.person.clone()));
        let err = service
            .save(dangling, SaveMode::Insert, &opts, &ann())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeServiceError::BadRequest(_)));

        let all: SpecRef<NodeId, Node> = Arc::new(MatchAll);
        assert_eq!(service.count(&all, &ann()).await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_index_reads_see_completed_writes() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();

        let spec: SpecRef<NodeId, Node> = Arc::new(NodesByPropertyToken::new("name", "Anna"));
        let query = Query::new(spec.clone());

        let node = named(&f.person, "Anna Smith");
        let key = service.save(node, SaveMode::Insert, &opts, &ann()).await?;
        assert_eq!(service.keys(&query, &ann()).await?, vec![key.clone()]);
        assert_eq!(service.count(&spec, &ann()).await?, 1);

        service.delete(key, &opts, &ann()).await?;
        assert!(service.keys(&query, &ann()).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_index_and_relational_routes_agree() -> Result<()> {
        let _ = init_tracing("warn");
        let temp_dir = TempDir::new()?;
        let person = person_type();
        let mut config = StoreConfig::default().with_db_path(temp_dir.path().join("test.db"));
        config.max_term_length = 40;
        let pipeline = NodePipeline::open(config, resolver(&person), NodePermissions::allow_all()).await?;
        let service = pipeline.service();
        let opts = WriteOptions::default();
        let start = Utc::now() - ChronoDuration::seconds(1);

        let long_name = "x".repeat(60);
        let a = service
            .save(named(&person, "Ann"), SaveMode::Insert, &opts, &Principal::user("zed"))
            .await?;
        let b = service
            .save(
                named(&person, &long_name).with_reference("knows", a.clone()),
                SaveMode::Insert,
                &opts,
                &Principal::user("amy"),
            )
            .await?;
        let c = service
            .save(
                named(&person, "Cid"),
                SaveMode::Insert,
                &opts.clone().without_generated_identifiers(),
                &Principal::user("mia"),
            )
            .await?;
        let a_uri = service.get(&a, &ann()).await?.and_then(|n| n.uri).expect("uri");

        let leaves: Vec<(SpecRef<NodeId, Node>, usize)> = vec![
            (Arc::new(NodeById(a.clone())), 1),
            (Arc::new(NodesByGraphId(person.graph_id)), 3),
            (Arc::new(NodesByTypeId(person.clone())), 3),
            (Arc::new(NodesByCode("P-1".to_string())), 1),
            (Arc::new(NodesByUri(a_uri)), 1),
            (Arc::new(NodesByNumber(3)), 1),
            (Arc::new(NodesByProperty::new("name", "Ann")), 1),
            (Arc::new(NodesByProperty::new("name", long_name.as_str())), 1),
            (Arc::new(NodesByPropertyPrefix::new("name", "x".repeat(50))), 1),
            (
                Arc::new(NodesByPropertyStringRange::new(
                    "name",
                    Some("B".to_string()),
                    Some("Z".to_string()),
                )),
                1,
            ),
            (Arc::new(NodesByReference::new("knows", a.id)), 1),
            (Arc::new(NodesByReference::any(a.id)), 1),
            (Arc::new(NodesByReferrer::new("knows", b.id)), 1),
            (
                Arc::new(NodesByLastModifiedDate {
                    from: Some(start),
                    to: None,
                }),
                3,
            ),
            (
                Arc::new(NodesByLastModifiedDate {
                    from: None,
                    to: Some(start - ChronoDuration::days(1)),
                }),
                0,
            ),
        ];

        for (spec, expected) in leaves {
            let mut indexed = service.keys(&Query::new(spec.clone()), &ann()).await?;
            let mut stored = service.keys(&Query::new(relational(spec.clone())), &ann()).await?;
            indexed.sort();
            stored.sort();
            assert_eq!(indexed, stored, "{:?}", spec);
            assert_eq!(indexed.len(), expected, "{:?}", spec);
        }

        let all: SpecRef<NodeId, Node> = Arc::new(MatchAll);
        let sorted = [
            (Sort::asc("createdBy"), vec![b.clone(), c.clone(), a.clone()]),
            (Sort::desc("lastModifiedBy"), vec![a.clone(), c.clone(), b.clone()]),
            (Sort::asc("code"), vec![a.clone(), b.clone(), c.clone()]),
            (Sort::desc("code"), vec![b.clone(), a.clone(), c.clone()]),
        ];
        for (sort, expected) in sorted {
            let indexed = Query::new(all.clone()).sorted_by(sort.clone());
            let stored = Query::new(relational(all.clone())).sorted_by(sort.clone());
            assert_eq!(service.keys(&indexed, &ann()).await?, expected, "{:?}", sort);
            assert_eq!(service.keys(&stored, &ann()).await?, expected, "{:?}", sort);
        }

        let top = Query::new(all.clone()).sorted_by(Sort::desc("code")).with_max(1);
        let top_stored = Query::new(relational(all)).sorted_by(Sort::desc("code")).with_max(1);
        assert_eq!(service.keys(&top, &ann()).await?, vec![b.clone()]);
        assert_eq!(service.keys(&top_stored, &ann()).await?, vec![b]);
        Ok(())
    }

    #[tokio::test]
    async fn test_deleting_target_reindexes_referrer() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();

        let bob = named(&f.person, "Bob");
        let bob_key = service.save(bob.clone(), SaveMode::Insert, &opts, &ann()).await?;
        let ann_node = named(&f.person, "Ann").with_reference("knows", bob_key.clone());
        let ann_key = service.save(ann_node, SaveMode::Insert, &opts, &ann()).await?;

        let stored_bob = service.get(&bob_key, &ann()).await?.expect("bob");
        assert_eq!(stored_bob.referrers.get("knows"), Some(&vec![ann_key.clone()]));

        let knows_bob: SpecRef<NodeId, Node> = Arc::new(NodesByReference::new("knows", bob.id));
        let query = Query::new(knows_bob);
        assert_eq!(service.keys(&query, &ann()).await?, vec![ann_key.clone()]);

        service.delete(bob_key, &opts, &ann()).await?;
        assert!(service.keys(&query, &ann()).await?.is_empty());

        let stored_ann = service.get(&ann_key, &ann()).await?.expect("ann");
        assert!(stored_ann.references.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_restricted_attributes_are_redacted_and_guarded() -> Result<()> {
        let permissions = NodePermissions::new(
            Arc::new(AllowAll),
            from_fn(|principal: &Principal, key: &AttributeKey, _permission: Permission| {
                key.attribute_id != "salary" || principal.is_admin()
            }),
            Arc::new(AllowAll),
        );
        let f = setup_with(permissions).await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();
        let admin = Principal::new("root", AppRole::Admin);
        let bob = Principal::user("bob");

        let node = named(&f.person, "Ann").with_property("salary", LangValue::new("", "1000"));
        let key = service.save(node, SaveMode::Insert, &opts, &admin).await?;

        let as_admin = service.get(&key, &admin).await?.expect("visible to admin");
        assert_eq!(as_admin.first_property_value("salary"), Some("1000"));

        let as_bob = service.get(&key, &bob).await?.expect("visible to bob");
        assert_eq!(as_bob.first_property_value("name"), Some("Ann"));
        assert!(as_bob.properties.get("salary").is_none());

        let raise = named(&f.person, "Bob").with_property("salary", LangValue::new("", "2000"));
        let err = service
            .save(raise, SaveMode::Insert, &opts, &bob)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeServiceError::AccessDenied(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_nodes_are_hidden() -> Result<()> {
        let permissions = NodePermissions::new(
            from_fn(|principal: &Principal, _key: &NodeId, permission: Permission| {
                permission != Permission::Read || principal.username == "ann"
            }),
            Arc::new(AllowAll),
            Arc::new(AllowAll),
        );
        let f = setup_with(permissions).await?;
        let service = f.pipeline.service();
        let bob = Principal::user("bob");

        let key = service
            .save(named(&f.person, "Ann"), SaveMode::Insert, &WriteOptions::default(), &ann())
            .await?;

        let all: SpecRef<NodeId, Node> = Arc::new(MatchAll);
        assert!(service.get(&key, &bob).await?.is_none());
        assert!(!service.exists(&key, &bob).await?);
        assert!(service.values(&Query::new(all.clone()), &bob).await?.is_empty());
        assert_eq!(service.count(&all, &bob).await?, 0);
        assert_eq!(service.count(&all, &ann()).await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_links_to_unreadable_nodes_are_redacted() -> Result<()> {
        let secret_id = Uuid::new_v4();
        let permissions = NodePermissions::new(
            from_fn(move |principal: &Principal, key: &NodeId, permission: Permission| {
                permission != Permission::Read || principal.username != "bob" || key.id != secret_id
            }),
            Arc::new(AllowAll),
            Arc::new(AllowAll),
        );
        let f = setup_with(permissions).await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();
        let bob = Principal::user("bob");

        let public_key = service
            .save(named(&f.person, "Ann"), SaveMode::Insert, &opts, &ann())
            .await?;
        let secret = Node::new(secret_id, f.person.clone())
            .with_property("name", LangValue::new("en", "Sam"))
            .with_reference("knows", public_key.clone());
        let secret_key = service.save(secret, SaveMode::Insert, &opts, &ann()).await?;
        let linked_key = service
            .save(
                named(&f.person, "Cid").with_reference("knows", secret_key.clone()),
                SaveMode::Insert,
                &opts,
                &ann(),
            )
            .await?;

        assert!(service.get(&secret_key, &bob).await?.is_none());

        let linked = service.get(&linked_key, &bob).await?.expect("linked node");
        assert_eq!(linked.first_property_value("name"), Some("Cid"));
        assert!(linked.references.get("knows").is_none());

        let public = service.get(&public_key, &bob).await?.expect("public node");
        assert!(public.referrers.get("knows").is_none());

        let as_ann = service.get(&linked_key, &ann()).await?.expect("linked node");
        assert_eq!(as_ann.references["knows"], vec![secret_key.clone()]);
        let as_ann = service.get(&public_key, &ann()).await?.expect("public node");
        assert_eq!(as_ann.referrers["knows"], vec![secret_key]);
        Ok(())
    }

    #[tokio::test]
    async fn test_writes_emit_events() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();
        let mut rx = f.pipeline.subscribe();

        let key = service
            .save(named(&f.person, "Ann"), SaveMode::Insert, &opts, &ann())
            .await?;
        let event = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("Event should be emitted within 1 second")
            .expect("Should receive event");
        assert_eq!(
            event,
            NodeEvent::Saved {
                ids: vec![key.clone()],
                principal: "ann".to_string()
            }
        );

        service.delete(key.clone(), &opts, &ann()).await?;
        let event = timeout(Duration::from_secs(1), rx.recv()).await??;
        assert_eq!(
            event,
            NodeEvent::Deleted {
                ids: vec![key],
                principal: "ann".to_string()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_write_emits_nothing() -> Result<()> {
        let f = setup().await?;
        let mut rx = f.pipeline.subscribe();

        let result = f
            .pipeline
            .service()
            .save(named(&f.person, "Ann"), SaveMode::Update, &WriteOptions::default(), &ann())
            .await;
        assert!(result.is_err());
        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_each_revision_can_be_reconstructed() -> Result<()> {
        let f = setup().await?;
        let service = f.pipeline.service();
        let opts = WriteOptions::default();

        let node = named(&f.person, "Ann");
        let key = service
            .save(node.clone(), SaveMode::Insert, &opts, &ann())
            .await?;
        let mut renamed = node;
        renamed.properties.clear();
        let renamed = renamed.with_property("name", LangValue::new("en", "Anna"));
        service.save(renamed, SaveMode::Update, &opts, &ann()).await?;
        service.delete(key.clone(), &opts, &ann()).await?;

        let revisions = f.pipeline.revisions();
        let numbers: Vec<i64> = revisions
            .revisions()
            .list()
            .await?
            .into_iter()
            .map(|r| r.number)
            .collect();
        assert_eq!(numbers.len(), 3);

        let first = revisions.reconstruct(&key, numbers[0]).await?.expect("inserted");
        assert_eq!(first.first_property_value("name"), Some("Ann"));
        let second = revisions.reconstruct(&key, numbers[1]).await?.expect("updated");
        assert_eq!(second.first_property_value("name"), Some("Anna"));
        assert!(revisions.reconstruct(&key, numbers[2]).await?.is_none());

        let history = revisions.history(&key).await?;
        assert_eq!(
            history,
            vec![
                (numbers[0], RevisionType::Insert),
                (numbers[1], RevisionType::Update),
                (numbers[2], RevisionType::Delete),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_reopen_rebuilds_index() -> Result<()> {
        let f = setup().await?;
        let key = f
            .pipeline
            .service()
            .save(named(&f.person, "Anna"), SaveMode::Insert, &WriteOptions::default(), &ann())
            .await?;
        f.pipeline.close().await?;
        let Fixture {
            pipeline,
            person,
            temp_dir,
        } = f;
        drop(pipeline);

        let reopened = open(temp_dir.path(), &person, NodePermissions::allow_all()).await?;
        let spec: SpecRef<NodeId, Node> = Arc::new(NodesByPropertyToken::new("name", "anna"));
        let keys = reopened.service().keys(&Query::new(spec), &ann()).await?;
        assert_eq!(keys, vec![key]);
        Ok(())
    }
}
