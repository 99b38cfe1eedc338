mod common;

use content_store::{ContentAddress, ContentNode, ContentStore, LocalContentStore, NodeKind};
use sync_service::snapshot::{RootIndex, parse_ndjson};
use warp::WarpError;
use warp_core::EventName;
use warp_core::testing::{MemoryLogSource, addr};

use common::{Node, fixture_chain, header, temp_dir};

async fn build_two_passes(name: &str) -> (Node, std::sync::Arc<MemoryLogSource>, ContentAddress) {
    let source = MemoryLogSource::new(fixture_chain());
    let node = Node::new(name, source.clone()).await;

    node.sync.sync(Some(167)).await.unwrap();
    node.warp
        .create_all_checkpoints(header(&source, 167))
        .await
        .unwrap();

    node.sync.sync(Some(177)).await.unwrap();
    let root = node
        .warp
        .create_all_checkpoints(header(&source, 177))
        .await
        .unwrap();
    (node, source, root)
}

#[tokio::test]
async fn checkpoint_boundaries_follow_passes_and_event_density() {
    let (node, _source, root) = build_two_passes("boundaries").await;

    assert_eq!(
        node.warp.get_available_checkpoints_by_hash(&root).await.unwrap(),
        vec![0, 168, 176]
    );
    assert_eq!(node.warp.get_checkpoint_block_range().unwrap(), Some((0, 177)));
    assert_eq!(node.warp.latest_root().unwrap(), Some(root));

    let checkpoints = node.store.checkpoints().unwrap();
    let sealed: Vec<_> = checkpoints.iter().map(|c| c.sealed).collect();
    assert_eq!(sealed, vec![true, true, false]);
    let counts: Vec<_> = checkpoints.iter().map(|c| c.event_count).collect();
    assert_eq!(counts, vec![3, 4, 1]);

    node.cleanup();
}

#[tokio::test]
async fn checkpoints_are_contiguous_from_the_upload_block() {
    let (node, _source, _root) = build_two_passes("contiguity").await;

    let checkpoints = node.store.checkpoints().unwrap();
    assert_eq!(checkpoints.first().unwrap().begin.number, 0);
    assert_eq!(checkpoints.last().unwrap().end.number, 177);
    for pair in checkpoints.windows(2) {
        assert_eq!(pair[1].begin.number, pair[0].end.number + 1);
    }
    let ids: Vec<_> = checkpoints.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    node.cleanup();
}

#[tokio::test]
async fn rebuilding_at_the_same_tip_yields_the_same_root() {
    let (node, source, root) = build_two_passes("deterministic").await;

    let again = node
        .warp
        .create_all_checkpoints(header(&source, 177))
        .await
        .unwrap();
    assert_eq!(again, root);
    assert_eq!(node.store.checkpoints().unwrap().len(), 3);

    node.cleanup();
}

#[tokio::test]
async fn snapshot_tree_has_the_published_layout() {
    let (node, _source, root) = build_two_passes("layout").await;
    let content = &node.content;

    let names: Vec<_> = content
        .ls(&root, "")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(
        names,
        vec!["VERSION", "accounts", "checkpoints", "index", "markets", "tables"]
    );
    assert_eq!(content.cat(&root, "VERSION").await.unwrap(), b"1");

    let index: RootIndex =
        serde_json::from_slice(&content.cat(&root, "index").await.unwrap()).unwrap();
    assert_eq!(index.version, "1");
    assert_eq!(index.begin.number, 0);
    assert_eq!(index.end.number, 177);
    assert_eq!(index.markets, 2);
    assert_eq!(index.checkpoints.len(), 3);

    let markets = content.ls(&root, "markets").await.unwrap();
    assert_eq!(markets.len(), 3);
    assert!(markets.iter().any(|e| e.name == "index"));
    assert!(
        markets
            .iter()
            .any(|e| e.name == format!("{:#x}", common::MARKET))
    );

    let tables = content.ls(&root, "tables").await.unwrap();
    assert_eq!(tables.len(), EventName::ALL.len());
    assert!(tables.iter().all(|e| e.kind == NodeKind::Dir));
    let transfers = parse_ndjson(
        &content
            .cat(&root, "tables/TransferSingle/index")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(
        transfers.iter().map(|r| r.block_number).collect::<Vec<_>>(),
        vec![100, 174]
    );

    let chunk = parse_ndjson(&content.cat(&root, "checkpoints/168").await.unwrap()).unwrap();
    assert_eq!(chunk.len(), 4);

    node.cleanup();
}

#[tokio::test]
async fn rollback_drops_checkpoints_past_the_new_tip() {
    let (node, source, _root) = build_two_passes("rollback").await;

    source.with_chain(|chain| chain.reorg_to(172));
    node.sync.sync(None).await.unwrap();
    let root = node
        .warp
        .create_all_checkpoints(header(&source, 172))
        .await
        .unwrap();

    assert_eq!(node.warp.get_checkpoint_block_range().unwrap(), Some((0, 172)));
    assert_eq!(
        node.warp.get_available_checkpoints_by_hash(&root).await.unwrap(),
        vec![0, 168]
    );
    assert!(
        node.store
            .checkpoints()
            .unwrap()
            .iter()
            .all(|c| c.end.number <= 172)
    );

    let index: RootIndex =
        serde_json::from_slice(&node.content.cat(&root, "index").await.unwrap()).unwrap();
    assert_eq!(index.end, header(&source, 172));
    let transfers = parse_ndjson(
        &node
            .content
            .cat(&root, "tables/TransferSingle/index")
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(transfers.len(), 1);

    node.cleanup();
}

#[tokio::test]
async fn reorg_inside_a_checkpoint_rebuilds_it_from_the_canonical_chain() {
    let (node, source, _root) = build_two_passes("reorg-inside").await;

    source.with_chain(|chain| {
        chain.reorg_to(171);
        chain.mine_to(190);
    });
    node.sync.sync(None).await.unwrap();
    let tip = header(&source, 190);
    let root = node.warp.create_all_checkpoints(tip).await.unwrap();

    assert_eq!(
        node.warp.get_available_checkpoints_by_hash(&root).await.unwrap(),
        vec![0, 168]
    );
    let checkpoints = node.store.checkpoints().unwrap();
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(checkpoints[1].begin.number, 168);
    assert_eq!(checkpoints[1].end.number, 190);
    assert!(!checkpoints[1].sealed);
    for checkpoint in &checkpoints {
        assert_eq!(
            checkpoint.end.hash,
            header(&source, checkpoint.end.number).hash.0
        );
    }
    assert_eq!(node.warp.get_checkpoint_block_range().unwrap(), Some((0, 190)));

    let chunk = parse_ndjson(&node.content.cat(&root, "checkpoints/168").await.unwrap()).unwrap();
    let blocks: Vec<_> = chunk.iter().map(|r| r.block_number).collect();
    assert_eq!(blocks, vec![170]);
    let live: Vec<_> = node
        .store
        .events_in_range(168, 190)
        .unwrap()
        .iter()
        .map(|r| r.block_number)
        .collect();
    assert_eq!(blocks, live);

    node.cleanup();
}

#[tokio::test]
async fn create_checkpoint_spans_exactly_the_requested_blocks() {
    let (node, source, _root) = build_two_passes("export").await;

    let entry = node
        .warp
        .create_checkpoint(&header(&source, 170), &header(&source, 175))
        .await
        .unwrap();
    let records = parse_ndjson(&node.content.cat(&entry.hash, "").await.unwrap()).unwrap();
    let blocks: Vec<_> = records.iter().map(|r| r.block_number).collect();
    assert_eq!(blocks.iter().min(), Some(&170));
    assert_eq!(blocks.iter().max(), Some(&175));
    assert_eq!(records.len(), 4);

    assert!(matches!(
        node.warp
            .create_checkpoint(&header(&source, 175), &header(&source, 170))
            .await,
        Err(WarpError::InvalidRange { .. })
    ));

    node.cleanup();
}

#[tokio::test]
async fn query_db_matches_any_of_the_fields() {
    let (node, _source, _root) = build_two_passes("query").await;
    let account = format!("{:#x}", addr(2));

    let hits = node
        .warp
        .query_db(EventName::TransferSingle, &["to", "from"], &account, 0, 177)
        .unwrap();
    assert_eq!(
        hits.iter().map(|r| r.block_number).collect::<Vec<_>>(),
        vec![100, 174]
    );
    let early = node
        .warp
        .query_db(EventName::TransferSingle, &["to", "from"], &account, 0, 150)
        .unwrap();
    assert_eq!(early.len(), 1);

    assert!(matches!(
        node.warp
            .query_db(EventName::TransferSingle, &["recipient"], &account, 0, 177),
        Err(WarpError::InvalidQuery(_))
    ));

    node.cleanup();
}

#[tokio::test]
async fn pinning_copies_content_and_reports_failures() {
    let (node, _source, root) = build_two_passes("pin").await;
    let other = LocalContentStore::open(temp_dir("pin-other")).await.unwrap();

    assert!(node.warp.pin_hash_by_gateway_url("not a url").await.is_err());
    assert!(
        node.warp
            .pin_hash_by_gateway_url("https://gateway.example/ipfs/xyz")
            .await
            .is_err()
    );

    let missing = ContentAddress::of(b"fmissing");
    assert!(matches!(
        node.warp.pin_hash_from(&other, &missing).await,
        Err(WarpError::Content(_))
    ));
    assert!(!node.content.is_pinned(&missing).await.unwrap());

    let published = other
        .add(&ContentNode::dir().with("note", ContentNode::file("hello")))
        .await
        .unwrap();
    assert_eq!(
        node.warp.pin_hash_from(&other, &published.hash).await.unwrap(),
        published.hash
    );
    assert!(node.content.is_pinned(&published.hash).await.unwrap());
    assert_eq!(node.content.cat(&published.hash, "note").await.unwrap(), b"hello");
    assert!(!node.content.is_pinned(&root).await.unwrap());

    let _ = std::fs::remove_dir_all(other.root());
    node.cleanup();
}
