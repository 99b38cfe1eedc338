use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{B256, U256};
use warp_core::testing::{self, AUGUR, AUGUR_TRADING, SHARE_TOKEN, addr};

use super::*;

fn temp_store(name: &str) -> (DerivedStore, PathBuf) {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let root = std::env::temp_dir().join(format!(
        "derived-store-{name}-{}-{nanos}",
        std::process::id()
    ));
    let store = DerivedStore::open(DbConfig {
        root_dir: root.clone(),
    })
    .unwrap();
    (store, root)
}

fn header(number: u64) -> BlockHeader {
    BlockHeader {
        number,
        hash: B256::repeat_byte(number as u8),
        timestamp: number * 12,
        parent_hash: B256::repeat_byte(number.saturating_sub(1) as u8),
    }
}

fn market_fixture() -> Vec<EventRecord> {
    let mut events: Vec<EventRecord> = (0..7u8)
        .map(|i| {
            let outcomes: &[&str] = if i == 3 { &["red", "green", "blue"] } else { &[] };
            let market_type = if i == 3 { 1 } else { 0 };
            testing::record(
                u64::from(i) + 1,
                0,
                AUGUR,
                testing::market_created(addr(0x10 + i), addr(0x20), market_type, outcomes, ""),
            )
        })
        .collect();
    events.push(testing::record(
        10,
        0,
        AUGUR,
        testing::initial_report_submitted(addr(0x10), addr(0x20)),
    ));
    events.push(testing::record(
        11,
        0,
        AUGUR,
        testing::initial_report_submitted(addr(0x11), addr(0x20)),
    ));
    events
}

fn dump_rollups(store: &DerivedStore) -> Vec<(String, Vec<u8>)> {
    store.db().dump(Table::Rollups, "").unwrap()
}

#[test]
fn markets_are_materialized_with_liquidity() {
    let (store, root) = temp_store("markets");
    let stats = store.merge_events(&market_fixture()).unwrap();
    assert_eq!(stats.applied, 9);

    let markets = store.markets().unwrap();
    assert_eq!(markets.len(), 7);
    for market in &markets {
        assert!(!market.liquidity.is_empty());
        assert!(market.info.is_some());
    }
    let categorical = store.market(&addr(0x13)).unwrap().unwrap();
    assert_eq!(categorical.liquidity.len(), 4);
    assert_eq!(categorical.info.unwrap().outcomes, vec!["red", "green", "blue"]);

    let reported = markets.iter().filter(|m| m.initial_report.is_some()).count();
    assert_eq!(reported, 2);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn merging_twice_changes_nothing() {
    let (store, root) = temp_store("idempotent");
    let events = market_fixture();
    store.merge_events(&events).unwrap();
    let before = dump_rollups(&store);

    let stats = store.merge_events(&events).unwrap();
    assert_eq!(stats.applied, 0);
    assert_eq!(stats.duplicates, events.len());
    assert_eq!(dump_rollups(&store), before);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn removal_restores_previous_rows() {
    let (store, root) = temp_store("removal");
    let events = market_fixture();
    store.merge_events(&events).unwrap();
    let before = dump_rollups(&store);

    let order = testing::record(
        12,
        0,
        AUGUR_TRADING,
        testing::order_created(addr(0x10), B256::repeat_byte(7), addr(0x30), 1, 0, 50, 10),
    );
    store.merge_events(std::slice::from_ref(&order)).unwrap();
    assert_ne!(dump_rollups(&store), before);
    assert!(store.order(&B256::repeat_byte(7)).unwrap().is_some());

    let stats = store.merge_events(&[order.retracted()]).unwrap();
    assert_eq!(stats.retracted, 1);
    assert_eq!(dump_rollups(&store), before);
    assert!(store.events(EventName::OrderCreated).unwrap().is_empty());

    let stats = store.merge_events(&[order.retracted()]).unwrap();
    assert_eq!(stats.ignored, 1);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn late_removal_of_orphaned_block_keeps_reincluded_log() {
    let (store, root) = temp_store("reincluded");
    let original = testing::record(
        100,
        0,
        SHARE_TOKEN,
        testing::transfer_single(addr(1), addr(2), 7, 3),
    );
    store.merge_events(std::slice::from_ref(&original)).unwrap();

    let mut reincluded = original.clone();
    reincluded.block_number = 99;
    reincluded.block_hash = B256::repeat_byte(0x99);
    let stats = store
        .merge_events(&[reincluded.clone(), original.retracted()])
        .unwrap();
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.retracted, 0);
    assert_eq!(stats.ignored, 1);

    assert_eq!(store.events(EventName::TransferSingle).unwrap(), vec![reincluded]);
    assert!(store.account(&addr(2)).unwrap().is_some());
    assert!(store.events_in_range(100, 100).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn fill_after_create_in_same_block_is_ordered_by_log_index() {
    let (store, root) = temp_store("fill");
    let order_id = B256::repeat_byte(9);
    let created = testing::record(
        5,
        0,
        AUGUR_TRADING,
        testing::order_created(addr(0x10), order_id, addr(0x30), 1, 1, 40, 10),
    );
    let filled = testing::record(
        5,
        1,
        AUGUR_TRADING,
        testing::order_filled(addr(0x10), order_id, addr(0x30), addr(0x31), 1, 1, 40, 4),
    );
    store.merge_events(&[filled, created]).unwrap();

    let order = store.order(&order_id).unwrap().unwrap();
    assert_eq!(order.state, OrderState::Open);
    assert_eq!(order.remaining(), U256::from(6));
    assert_eq!(order.fillers, vec![addr(0x31)]);

    let market = store.market(&addr(0x10)).unwrap().unwrap();
    assert_eq!(market.liquidity[1].asks, U256::from(6));
    assert_eq!(market.open_orders, 1);
    assert_eq!(store.orders(Some(&addr(0x10))).unwrap().len(), 1);
    assert!(store.orders(Some(&addr(0x11))).unwrap().is_empty());

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn cursors_advance_with_rows_and_never_move_back() {
    let (store, root) = temp_store("cursors");
    let names = [EventName::MarketCreated, EventName::InitialReportSubmitted];
    assert_eq!(store.min_cursor(&names).unwrap(), None);

    store
        .merge_events_and_advance(&market_fixture(), &names, 20, Some(&header(20)))
        .unwrap();
    assert_eq!(store.cursor(EventName::MarketCreated).unwrap(), Some(20));
    assert_eq!(store.min_cursor(&names).unwrap(), Some(20));
    assert_eq!(store.sync_head().unwrap(), Some(header(20)));

    store.set_cursors(&names, 15).unwrap();
    assert_eq!(store.min_cursor(&names).unwrap(), Some(20));

    store
        .merge_events_and_advance(&[], &names, 12, Some(&header(12)))
        .unwrap();
    assert_eq!(store.min_cursor(&names).unwrap(), Some(20));
    assert_eq!(store.sync_head().unwrap(), Some(header(20)));

    store.set_cursors(&[EventName::MarketCreated], 30).unwrap();
    assert_eq!(store.min_cursor(&names).unwrap(), Some(20));
    assert_eq!(
        store.min_cursor(&[EventName::MarketCreated, EventName::OrderFilled]).unwrap(),
        None
    );

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn rewind_retracts_events_above_the_block() {
    let (store, root) = temp_store("rewind");
    let names = [EventName::MarketCreated, EventName::InitialReportSubmitted];
    store
        .merge_events_and_advance(&market_fixture(), &names, 20, Some(&header(20)))
        .unwrap();

    let stats = store.rewind(4).unwrap();
    assert_eq!(stats.retracted, 5);
    assert_eq!(store.markets().unwrap().len(), 4);
    assert!(store.markets().unwrap().iter().all(|m| m.initial_report.is_none()));
    assert_eq!(store.min_cursor(&names).unwrap(), Some(4));
    assert_eq!(store.sync_head().unwrap(), None);
    assert_eq!(store.latest_event_block().unwrap(), Some(4));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn range_queries_follow_chain_order() {
    let (store, root) = temp_store("range");
    let transfers = vec![
        testing::record(3, 1, SHARE_TOKEN, testing::transfer_single(addr(1), addr(2), 7, 1)),
        testing::record(3, 0, SHARE_TOKEN, testing::transfer_single(addr(2), addr(3), 7, 1)),
        testing::record(8, 0, SHARE_TOKEN, testing::transfer_single(addr(3), addr(1), 7, 1)),
    ];
    store.merge_events(&transfers).unwrap();

    let in_range = store.events_in_range(3, 3).unwrap();
    assert_eq!(
        in_range.iter().map(|e| e.log_index).collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(
        store.event_block_counts(0, 100).unwrap(),
        BTreeMap::from([(3, 2), (8, 1)])
    );
    assert!(store.events_in_range(9, 2).unwrap().is_empty());

    let hits = store
        .query(
            EventName::TransferSingle,
            &["to", "from"],
            &format!("{:#x}", addr(1)),
            0,
            100,
        )
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(matches!(
        store.query(EventName::TransferSingle, &["owner"], "0x1", 0, 100),
        Err(StoreError::InvalidQuery(_))
    ));

    let account = store.account(&addr(1)).unwrap().unwrap();
    assert_eq!(account.event_counts[&EventName::TransferSingle], 2);
    assert_eq!((account.first_block, account.last_block), (3, 8));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn token_balances_track_mints_and_burns() {
    let (store, root) = temp_store("balances");
    let token = addr(0x40);
    store
        .merge_events(&[
            testing::record(
                1,
                0,
                SHARE_TOKEN,
                testing::tokens_minted(token, addr(1), 100, addr(0x10)),
            ),
            testing::record(
                2,
                0,
                SHARE_TOKEN,
                testing::tokens_burned(token, addr(1), 30, addr(0x10)),
            ),
        ])
        .unwrap();
    let balances = store.token_balances(&addr(1)).unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].balance, U256::from(70));
    assert_eq!(balances[0].market, Some(addr(0x10)));

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn checkpoints_are_replaced_atomically() {
    let (store, root) = temp_store("checkpoints");
    let meta = |id: u64, begin: u64, end: u64| CheckpointMeta {
        id,
        begin: header_meta(&header(begin)),
        end: header_meta(&header(end)),
        content: None,
        sealed: false,
        event_count: 0,
        created_at: 0,
    };
    store
        .replace_checkpoints(&[], &[meta(2, 10, 19), meta(1, 0, 9)])
        .unwrap();
    assert_eq!(
        store.checkpoints().unwrap().iter().map(|c| c.id).collect::<Vec<_>>(),
        vec![1, 2]
    );
    store.replace_checkpoints(&[2], &[meta(3, 10, 25)]).unwrap();
    let checkpoints = store.checkpoints().unwrap();
    assert_eq!(checkpoints.len(), 2);
    assert_eq!(block_header(&checkpoints[1].end), header(25));

    let _ = std::fs::remove_dir_all(root);
}
