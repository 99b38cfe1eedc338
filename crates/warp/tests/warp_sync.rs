mod common;

use std::sync::Arc;

use content_store::{ContentNode, ContentStore};
use sync_service::{SyncError, WarpSyncStrategy};
use warp_core::EventName;
use warp_core::testing::{MemoryLogSource, addr};

use common::{CATEGORICAL, MARKET, Node, ORDER, fixture_chain, header};

#[tokio::test]
async fn scoped_and_full_warp_sync_agree_after_tail_replay() {
    let source = MemoryLogSource::new(fixture_chain());
    let publisher = Node::new("publisher", source.clone()).await;
    publisher.sync.sync(Some(167)).await.unwrap();
    let root = publisher
        .warp
        .create_all_checkpoints(header(&source, 167))
        .await
        .unwrap();
    publisher.sync.sync(Some(177)).await.unwrap();

    let scoped = Node::new("scoped", source.clone()).await;
    let scoped_warp = WarpSyncStrategy::new(publisher.content.clone(), scoped.store.clone());
    assert_eq!(scoped_warp.sync_market(&root, &MARKET).await.unwrap(), 5);
    assert_eq!(scoped.store.min_cursor(&EventName::ALL).unwrap(), None);
    let end = scoped_warp.snapshot_end(&root).await.unwrap();
    assert_eq!(end.number, 167);
    scoped.bulk.start(end.number + 1, 177).await.unwrap();

    let full = Node::new("full", source.clone()).await;
    let full_warp = WarpSyncStrategy::new(publisher.content.clone(), full.store.clone());
    assert_eq!(full_warp.start(&root).await.unwrap(), 167);
    assert_eq!(full.store.min_cursor(&EventName::ALL).unwrap(), Some(167));
    assert_eq!(full.sync.sync(Some(177)).await.unwrap(), Some(177));

    let expected = publisher.store.market(&MARKET).unwrap();
    assert!(expected.is_some());
    assert_eq!(scoped.store.market(&MARKET).unwrap(), expected);
    assert_eq!(full.store.market(&MARKET).unwrap(), expected);
    assert_eq!(
        scoped.store.order(&ORDER).unwrap(),
        full.store.order(&ORDER).unwrap()
    );
    assert_eq!(full.store.markets().unwrap(), publisher.store.markets().unwrap());
    assert_eq!(
        full.store.account(&addr(2)).unwrap(),
        publisher.store.account(&addr(2)).unwrap()
    );

    publisher.cleanup();
    scoped.cleanup();
    full.cleanup();
}

#[tokio::test]
async fn account_bundle_hydrates_one_account() {
    let source = MemoryLogSource::new(fixture_chain());
    let publisher = Node::new("account-publisher", source.clone()).await;
    publisher.sync.sync(Some(177)).await.unwrap();
    let root = publisher
        .warp
        .create_all_checkpoints(header(&source, 177))
        .await
        .unwrap();

    let reader = Node::new("account-reader", source.clone()).await;
    let warp = WarpSyncStrategy::new(publisher.content.clone(), reader.store.clone());
    assert_eq!(warp.sync_account(&root, &addr(0x21)).await.unwrap(), 175);
    assert_eq!(
        reader.store.account(&addr(0x21)).unwrap(),
        publisher.store.account(&addr(0x21)).unwrap()
    );
    assert!(reader.store.market(&CATEGORICAL).unwrap().is_some());
    assert!(reader.store.market(&MARKET).unwrap().is_none());

    assert!(matches!(
        warp.sync_account(&root, &addr(0x99)).await,
        Err(SyncError::Content(_))
    ));

    publisher.cleanup();
    reader.cleanup();
}

#[tokio::test]
async fn older_snapshot_does_not_move_the_sync_head_back() {
    let source = MemoryLogSource::new(fixture_chain());
    let publisher = Node::new("older-publisher", source.clone()).await;
    publisher.sync.sync(Some(167)).await.unwrap();
    let root = publisher
        .warp
        .create_all_checkpoints(header(&source, 167))
        .await
        .unwrap();

    let ahead = Node::new("older-ahead", source.clone()).await;
    ahead.sync.sync(Some(177)).await.unwrap();
    let warp = WarpSyncStrategy::new(publisher.content.clone(), ahead.store.clone());
    assert_eq!(warp.start(&root).await.unwrap(), 167);
    assert_eq!(ahead.store.sync_head().unwrap(), Some(header(&source, 177)));
    assert_eq!(ahead.store.min_cursor(&EventName::ALL).unwrap(), Some(177));

    publisher.cleanup();
    ahead.cleanup();
}

#[tokio::test]
async fn unknown_snapshot_version_is_rejected() {
    let source = MemoryLogSource::new(fixture_chain());
    let node = Node::new("version", source).await;
    let root = node
        .content
        .add(
            &ContentNode::dir()
                .with("VERSION", ContentNode::file("2"))
                .with("index", ContentNode::file("{}")),
        )
        .await
        .unwrap();

    let warp = WarpSyncStrategy::new(
        node.content.clone() as Arc<dyn ContentStore>,
        node.store.clone(),
    );
    assert!(matches!(
        warp.start(&root.hash).await,
        Err(SyncError::UnsupportedVersion(version)) if version == "2"
    ));

    node.cleanup();
}
