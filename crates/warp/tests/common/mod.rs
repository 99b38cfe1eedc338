#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, B256};
use content_store::LocalContentStore;
use derived_store::DerivedStore;
use local_db::DbConfig;
use sync_service::{BulkSyncStrategy, ControllerConfig, SyncController};
use warp::{ChunkPolicy, WarpController};
use warp_core::testing::{
    self, AUGUR, AUGUR_TRADING, MemoryLogSource, SHARE_TOKEN, TestChain, addr, test_registry,
};
use warp_core::{BlockHeader, ContractEventDecoder};

pub const MARKET: Address = Address::new([0x10; 20]);
pub const CATEGORICAL: Address = Address::new([0x11; 20]);
pub const ORDER: B256 = B256::new([0x01; 32]);

pub const POLICY: ChunkPolicy = ChunkPolicy {
    max_span: 168,
    max_events: Some(4),
};

/// Blocks 0..=177. Three events below block 168, four in 168..=175 and one at 177.
pub fn fixture_chain() -> TestChain {
    let mut chain = TestChain::new();
    chain.emit(5, AUGUR, testing::market_created(MARKET, addr(0x20), 0, &[], ""));
    chain.emit(
        40,
        AUGUR,
        testing::market_created(CATEGORICAL, addr(0x21), 1, &["red", "green", "blue"], ""),
    );
    chain.emit(100, SHARE_TOKEN, testing::transfer_single(addr(1), addr(2), 7, 3));
    chain.emit(
        170,
        AUGUR_TRADING,
        testing::order_created(MARKET, ORDER, addr(0x30), 1, 0, 40, 10),
    );
    chain.emit(
        172,
        AUGUR_TRADING,
        testing::order_filled(MARKET, ORDER, addr(0x30), addr(0x31), 1, 0, 40, 4),
    );
    chain.emit(174, SHARE_TOKEN, testing::transfer_single(addr(2), addr(3), 7, 1));
    chain.emit(
        175,
        AUGUR,
        testing::initial_report_submitted(CATEGORICAL, addr(0x21)),
    );
    chain.emit(177, AUGUR_TRADING, testing::market_volume_changed(MARKET, 4, &[0, 4, 0]));
    chain
}

pub fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("warp-{name}-{}-{nanos}", std::process::id()))
}

/// A store, its sync controller and checkpoint builder rooted in one temp directory.
pub struct Node {
    pub root: PathBuf,
    pub store: DerivedStore,
    pub content: Arc<LocalContentStore>,
    pub sync: SyncController,
    pub bulk: BulkSyncStrategy,
    pub warp: WarpController,
}

impl Node {
    pub async fn new(name: &str, source: Arc<MemoryLogSource>) -> Self {
        let root = temp_dir(name);
        let store = DerivedStore::open(DbConfig {
            root_dir: root.clone(),
        })
        .unwrap();
        let content = Arc::new(LocalContentStore::open(root.join("content")).await.unwrap());
        let registry = Arc::new(test_registry());
        let bulk = BulkSyncStrategy::new(
            source.clone(),
            Arc::new(ContractEventDecoder::new(registry.clone())),
            registry,
            store.clone(),
            50,
        )
        .unwrap();
        let sync = SyncController::new(bulk.clone(), ControllerConfig::default());
        let warp = WarpController::new(store.clone(), content.clone(), source, 0, POLICY);
        Self {
            root,
            store,
            content,
            sync,
            bulk,
            warp,
        }
    }

    pub fn cleanup(self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

pub fn header(source: &MemoryLogSource, number: u64) -> BlockHeader {
    source.with_chain(|chain| chain.header(number)).unwrap()
}
