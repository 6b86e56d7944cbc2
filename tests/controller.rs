//! End-to-end node tree scenarios over the in-memory stores.

use cellstore::acl::{Ace, Acl, Principal};
use cellstore::binary::BinaryDataStore;
use cellstore::cell::{BoxContext, CellContext};
use cellstore::config::StoreConfig;
use cellstore::controller::{GetOutcome, NodeController, SchemaCounter, TreeEnv};
use cellstore::error::{Error, Result};
use cellstore::lock::LockCoordinator;
use cellstore::node::{NodeRecord, NodeType};
use cellstore::store::memory::{MemoryCellIndex, MemoryNodeStore, MemoryRoleIndex};
use cellstore::store::{NodeStore, RoleDoc};
use cellstore::types::new_id;
use async_trait::async_trait;
use std::sync::Arc;

struct NoSchema;

#[async_trait]
impl SchemaCounter for NoSchema {
    async fn entity_type_count(&self, _: &str) -> Result<u64> {
        Ok(0)
    }
    async fn complex_type_count(&self, _: &str) -> Result<u64> {
        Ok(0)
    }
}

struct Harness {
    env: Arc<TreeEnv>,
    roles: Arc<MemoryRoleIndex>,
    cell: CellContext,
    boxc: BoxContext,
    root_id: String,
    _dir: tempfile::TempDir,
}

async fn harness_with(config: StoreConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
    let roles = Arc::new(MemoryRoleIndex::new());
    let cells = Arc::new(MemoryCellIndex::new());

    let root_id = new_id();
    store
        .create(
            &root_id,
            &NodeRecord::collection(
                "cell1",
                Some("box1".into()),
                NodeType::WebdavCollection,
                None,
            ),
        )
        .await
        .unwrap();

    let env = Arc::new(TreeEnv {
        store,
        roles: roles.clone(),
        cells,
        schema: Arc::new(NoSchema),
        blobs: Arc::new(BinaryDataStore::open(dir.path().join("blobs")).unwrap()),
        locks: Arc::new(LockCoordinator::new()),
        config: Arc::new(config),
    });
    Harness {
        env,
        roles,
        cell: CellContext {
            id: "cell1".into(),
            name: "alpha".into(),
            url: "https://unit.example/alpha/".into(),
            owner: None,
        },
        boxc: BoxContext {
            id: "box1".into(),
            name: "app".into(),
        },
        root_id,
        _dir: dir,
    }
}

async fn harness() -> Harness {
    harness_with(StoreConfig::default()).await
}

impl Harness {
    async fn root(&self) -> NodeController {
        NodeController::box_root(
            Arc::clone(&self.env),
            self.cell.clone(),
            self.boxc.clone(),
            &self.root_id,
        )
        .await
        .unwrap()
    }
}

#[tokio::test]
async fn propfind_depth_one_lists_children() {
    let h = harness().await;
    let mut root = h.root().await;
    root.get_child("docs")
        .mkcol(NodeType::WebdavCollection)
        .await
        .unwrap();
    root.get_child("data")
        .mkcol(NodeType::OdataCollection)
        .await
        .unwrap();
    root.load().await.unwrap();

    let ms = root
        .propfind(Some("1"), "/alpha/app/", false)
        .await
        .unwrap();
    assert_eq!(ms.responses.len(), 3);
    assert_eq!(ms.responses[0].href, "/alpha/app");
    let hrefs: Vec<&str> = ms.responses[1..].iter().map(|r| r.href.as_str()).collect();
    assert!(hrefs.contains(&"/alpha/app/docs"));
    assert!(hrefs.contains(&"/alpha/app/data"));
}

#[tokio::test]
async fn propfind_with_unsupported_depth_always_fails() {
    let h = harness().await;
    let root = h.root().await;
    // Even on an existing node, depth 2 and infinity are refused.
    assert!(matches!(
        root.propfind(Some("2"), "/alpha/app/", false).await,
        Err(Error::InvalidDepthHeader(_))
    ));
    assert!(matches!(
        root.propfind(Some("infinity"), "/alpha/app/", false).await,
        Err(Error::PropfindFiniteDepth)
    ));
    // And on a placeholder too: the header is checked before existence.
    let ghost = root.get_child("ghost");
    assert!(matches!(
        ghost.propfind(Some("infinity"), "/alpha/app/ghost", false).await,
        Err(Error::PropfindFiniteDepth)
    ));
}

#[tokio::test]
async fn acl_round_trips_through_role_ids() {
    let h = harness().await;
    h.roles.put(
        "role-1",
        RoleDoc {
            cell_id: "cell1".into(),
            box_id: None,
            name: "editor".into(),
        },
    );
    let root = h.root().await;
    let mut docs = root.get_child("docs");
    docs.mkcol(NodeType::WebdavCollection).await.unwrap();

    let acl = Acl {
        ace: vec![Ace {
            principal: Principal::Href("https://unit.example/alpha/__role/__/editor".into()),
            grant: vec!["read".into(), "write".into()],
        }],
        base: None,
        require_schema_authz: None,
    };
    docs.set_acl(acl).await.unwrap();

    // Stored form holds the role id, not the URL.
    let stored = h
        .env
        .store
        .get(docs.node_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    let stored_acl = stored.record.acl.unwrap();
    assert_eq!(stored_acl.ace[0].principal, Principal::Href("role-1".into()));

    // Rendered form resolves back to a reference relative to the level's base.
    let ms = docs
        .propfind(Some("0"), "/alpha/app/docs", true)
        .await
        .unwrap();
    let rendered = ms.responses[0].acl.as_ref().unwrap();
    assert_eq!(
        rendered.base.as_deref(),
        Some("https://unit.example/alpha/__role/app/")
    );
    assert_eq!(
        rendered.ace[0].principal,
        Principal::Href("../__/editor".into())
    );

    // Deleting the role tombstones its ACE on the next render.
    h.roles.remove("role-1");
    let ms = docs
        .propfind(Some("0"), "/alpha/app/docs", true)
        .await
        .unwrap();
    assert!(ms.responses[0].acl.as_ref().unwrap().ace.is_empty());
}

#[tokio::test]
async fn acl_with_unknown_role_fails() {
    let h = harness().await;
    let root = h.root().await;
    let mut docs = root.get_child("docs");
    docs.mkcol(NodeType::WebdavCollection).await.unwrap();

    let acl = Acl {
        ace: vec![Ace {
            principal: Principal::Href("https://unit.example/alpha/__role/__/ghost".into()),
            grant: vec!["read".into()],
        }],
        base: None,
        require_schema_authz: None,
    };
    assert!(matches!(
        docs.set_acl(acl).await,
        Err(Error::RoleNotFound(_))
    ));
}

#[tokio::test]
async fn collection_depth_limit_is_exact() {
    let cfg = StoreConfig {
        max_collection_depth: 3,
        ..StoreConfig::default()
    };
    let h = harness_with(cfg).await;
    let mut current = h.root().await;

    // Depth 1..=3 succeed.
    for level in ["a", "b", "c"] {
        let mut child = current.get_child(level);
        child.mkcol(NodeType::WebdavCollection).await.unwrap();
        current = child;
    }
    // Depth 4 is one past the limit.
    let err = current
        .get_child("d")
        .mkcol(NodeType::WebdavCollection)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CollectionDepthLimit));
}

#[tokio::test]
async fn child_count_limit_applies_to_files_and_collections() {
    let cfg = StoreConfig {
        max_child_resource_count: 2,
        ..StoreConfig::default()
    };
    let h = harness_with(cfg).await;
    let root = h.root().await;

    root.get_child("one")
        .mkcol(NodeType::WebdavCollection)
        .await
        .unwrap();
    root.get_child("two")
        .put_for_create("text/plain", b"x")
        .await
        .unwrap();

    assert!(matches!(
        root.get_child("three")
            .mkcol(NodeType::WebdavCollection)
            .await,
        Err(Error::ChildResourceLimit)
    ));
    assert!(matches!(
        root.get_child("three")
            .put_for_create("text/plain", b"x")
            .await,
        Err(Error::ChildResourceLimit)
    ));
}

#[tokio::test]
async fn ranged_get_first_byte_and_out_of_bounds() {
    let h = harness().await;
    let root = h.root().await;
    let mut file = root.get_child("doc.bin");
    file.put_for_create("application/octet-stream", b"0123456789")
        .await
        .unwrap();

    match file.get(None, Some("bytes=0-0")).await.unwrap() {
        GetOutcome::Partial {
            content_range,
            body,
            ..
        } => {
            assert_eq!(content_range, "bytes 0-0/10");
            assert_eq!(body, b"0");
        }
        other => panic!("expected partial content, got {other:?}"),
    }

    assert!(matches!(
        file.get(None, Some("bytes=100-200")).await,
        Err(Error::RangeNotSatisfiable(_))
    ));

    assert!(matches!(
        file.get(None, Some("bytes=0-1,3-4")).await,
        Err(Error::NotImplemented(_))
    ));
}

#[tokio::test]
async fn if_none_match_short_circuits_body() {
    let h = harness().await;
    let root = h.root().await;
    let mut file = root.get_child("doc.txt");
    file.put_for_create("text/plain", b"hello").await.unwrap();
    let etag = file.etag().unwrap();

    assert!(matches!(
        file.get(Some(etag.as_str()), None).await.unwrap(),
        GetOutcome::NotModified { .. }
    ));
    assert!(matches!(
        file.get(Some("\"0-0\""), None).await.unwrap(),
        GetOutcome::Full { .. }
    ));
}

#[tokio::test]
async fn delete_with_stale_if_match_leaves_node() {
    let h = harness().await;
    let root = h.root().await;
    let mut file = root.get_child("doc.txt");
    file.put_for_create("text/plain", b"one").await.unwrap();
    let stale = file.etag().unwrap();
    file.put_for_update("text/plain", b"two", None).await.unwrap();

    assert!(matches!(
        file.delete(Some(stale.as_str())).await,
        Err(Error::EtagMismatch)
    ));
    // Still there, wildcard removes it.
    assert!(matches!(
        file.get(None, None).await.unwrap(),
        GetOutcome::Full { .. }
    ));
    file.delete(Some("*")).await.unwrap();
    assert!(!file.exists());
}

#[tokio::test]
async fn concurrent_mkcol_same_name_has_one_winner() {
    let h = harness().await;
    let root = h.root().await;

    let mut set = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let mut contender = root.get_child("contest");
        set.spawn(async move { contender.mkcol(NodeType::WebdavCollection).await });
    }

    let mut created = 0;
    let mut conflicts = 0;
    while let Some(joined) = set.join_next().await {
        match joined.unwrap() {
            Ok(_) => created += 1,
            Err(Error::NameExists) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 7);

    let mut reloaded = h.root().await;
    reloaded.load().await.unwrap();
    assert_eq!(reloaded.children_count(), 1);
}

#[tokio::test]
async fn concurrent_put_create_falls_through_to_update() {
    let h = harness().await;
    let root = h.root().await;

    let mut set = tokio::task::JoinSet::new();
    for i in 0..4u8 {
        let mut contender = root.get_child("doc.txt");
        set.spawn(async move {
            contender
                .put_for_create("text/plain", format!("body-{i}").as_bytes())
                .await
        });
    }
    // Every contender succeeds: one creates, the rest overwrite.
    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        outcomes.push(joined.unwrap().unwrap());
    }
    let created = outcomes
        .iter()
        .filter(|o| matches!(o, cellstore::PutOutcome::Created { .. }))
        .count();
    assert_eq!(created, 1);

    let mut reloaded = h.root().await;
    reloaded.load().await.unwrap();
    assert_eq!(reloaded.children_count(), 1);
}

#[tokio::test]
async fn proppatch_then_propfind_shows_properties() {
    use cellstore::node::PropKey;
    use cellstore::propfind::{PropPatch, PropStatus};

    let h = harness().await;
    let root = h.root().await;
    let mut docs = root.get_child("docs");
    docs.mkcol(NodeType::WebdavCollection).await.unwrap();

    let patch = PropPatch {
        set: vec![
            Some((PropKey::new("displayname", "DAV:"), "Documents".into())),
            Some((PropKey::new("color", "urn:x-app:props"), "blue".into())),
        ],
        remove: vec![Some(PropKey::new("missing", "DAV:"))],
    };
    let result = docs.proppatch(&patch, "/alpha/app/docs").await.unwrap();
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.results[2].1, PropStatus::NotFound);

    let ms = docs
        .propfind(Some("0"), "/alpha/app/docs", false)
        .await
        .unwrap();
    let props = &ms.responses[0].properties;
    assert_eq!(props.len(), 2);
    assert!(props
        .iter()
        .any(|(k, v)| k.name == "displayname" && k.namespace == "DAV:" && v == "Documents"));

    // Removing an existing property takes it back out.
    let patch = PropPatch {
        set: vec![],
        remove: vec![Some(PropKey::new("color", "urn:x-app:props"))],
    };
    let result = docs.proppatch(&patch, "/alpha/app/docs").await.unwrap();
    assert_eq!(result.results[0].1, PropStatus::Ok);
    let ms = docs
        .propfind(Some("0"), "/alpha/app/docs", false)
        .await
        .unwrap();
    assert_eq!(ms.responses[0].properties.len(), 1);
}

#[tokio::test]
async fn link_and_unlink_child_manage_the_children_index() {
    let h = harness().await;
    let mut root = h.root().await;

    // A node materialized out of band, then linked in by name.
    let external_id = new_id();
    h.env
        .store
        .create(
            &external_id,
            &NodeRecord::collection(
                "cell1",
                Some("box1".into()),
                NodeType::WebdavCollection,
                Some(h.root_id.clone()),
            ),
        )
        .await
        .unwrap();

    root.link_child("imported", &external_id).await.unwrap();
    assert_eq!(root.children_count(), 1);
    let mut linked = root.get_child("imported");
    linked.load().await.unwrap();
    assert_eq!(linked.node_id(), Some(external_id.as_str()));

    // The name is now taken.
    assert!(matches!(
        root.link_child("imported", &new_id()).await,
        Err(Error::NameExists)
    ));

    root.unlink_child("imported").await.unwrap();
    assert_eq!(root.children_count(), 0);
    // Unlinking removes the reference, not the document.
    assert!(h.env.store.get(&external_id).await.unwrap().is_some());

    // A second unlink has nothing left to remove.
    assert!(matches!(
        root.unlink_child("imported").await,
        Err(Error::AlreadyUnlinked)
    ));
}

#[tokio::test]
async fn set_acl_rereads_before_its_versioned_write() {
    use cellstore::node::PropKey;
    use cellstore::propfind::PropPatch;

    let h = harness().await;
    let mut writer = h.root().await.get_child("docs");
    writer.mkcol(NodeType::WebdavCollection).await.unwrap();

    let root = h.root().await;
    let mut stale = root.get_child("docs");
    stale.load().await.unwrap();
    let before = stale.etag().unwrap();

    // Another controller updates the node first.
    let patch = PropPatch {
        set: vec![Some((PropKey::new("displayname", "DAV:"), "Docs".into()))],
        remove: vec![],
    };
    writer.proppatch(&patch, "/alpha/app/docs").await.unwrap();

    // The stale controller still succeeds: the versioned write follows a
    // reload under the lock.
    let acl = Acl {
        ace: vec![Ace {
            principal: Principal::All,
            grant: vec!["read".into()],
        }],
        base: None,
        require_schema_authz: None,
    };
    let after = stale.set_acl(acl).await.unwrap();
    assert_ne!(before, after);

    // Both mutations landed.
    let ms = stale
        .propfind(Some("0"), "/alpha/app/docs", true)
        .await
        .unwrap();
    assert_eq!(ms.responses[0].properties.len(), 1);
    assert_eq!(ms.responses[0].acl.as_ref().unwrap().ace.len(), 1);
}

#[tokio::test]
async fn cell_level_controller_rejects_schema_authz() {
    let h = harness().await;
    let cell_root_id = new_id();
    h.env
        .store
        .create(
            &cell_root_id,
            &NodeRecord::collection("cell1", None, NodeType::WebdavCollection, None),
        )
        .await
        .unwrap();
    let mut root = NodeController::cell_root(Arc::clone(&h.env), h.cell.clone(), &cell_root_id)
        .await
        .unwrap();
    assert!(root.is_cell_level());

    let mut acl = Acl::default();
    acl.require_schema_authz = Some("public".into());
    assert!(matches!(
        root.set_acl(acl).await,
        Err(Error::AclValidation(_))
    ));
}
