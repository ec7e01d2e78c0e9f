//! Fill aggregation against ingested lifecycle context: grouping totals,
//! leverage inheritance, strategy attribution, and rebuild idempotency.

use marginscope::config::Config;
use marginscope::db::init_db;
use marginscope::domain::{AccountId, Decimal, Symbol, TimeMs};
use marginscope::ingest::{Aggregator, CycleIngestor};
use marginscope::venue::CycleBuilder;
use marginscope::Repository;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tempfile::TempDir;

const ACCOUNT: &str = "0x1111111111111111111111111111111111111111";

fn test_config(db_path: String) -> Config {
    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path);
    Config::from_env_map(env).unwrap()
}

async fn setup() -> (Arc<Repository>, CycleIngestor, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let ingestor = CycleIngestor::new(repo.clone(), &test_config(db_path));
    (repo, ingestor, temp_dir)
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn account() -> AccountId {
    AccountId::new(ACCOUNT.to_string())
}

fn btc() -> Symbol {
    Symbol::new("BTC".to_string())
}

/// Ingest a baseline cycle and a BTC open so later fills have a lifecycle
/// with leverage 5.0x to inherit from.
async fn seed_btc_lifecycle(ingestor: &CycleIngestor) {
    ingestor
        .ingest(CycleBuilder::new(ACCOUNT, 60_000).with_ledger("2500", "0").build())
        .await
        .unwrap();
    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 120_000)
                .with_ledger("2500", "162.22")
                .with_position("BTC", "0.5", "810.27", "1620.54")
                .build(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_worked_example_aggregation() {
    let (repo, ingestor, _temp) = setup().await;
    seed_btc_lifecycle(&ingestor).await;

    // open 0.5 @ 100, close 0.3 @ 110 (pnl 3), close 0.2 @ 108 (pnl 1.6)
    let report = ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "0.5", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "0.3", "100", "110", "3", Some(true), 2, 150_000)
                .with_fill("BTC", "0.2", "100", "108", "1.6", Some(true), 3, 160_000)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(report.fills_ingested, 3);
    assert_eq!(report.trades_aggregated, 1);

    let trades = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);

    let trade = &trades[0];
    assert_eq!(trade.total_size, dec("0.5"));
    assert_eq!(trade.avg_exit_price, dec("109.2"));
    assert_eq!(trade.total_pnl, dec("4.6"));
    assert_eq!(trade.fill_count, 3);
    assert_eq!(trade.representative_at, TimeMs::new(160_000));

    // Inherited from the snapshot covering the opening leg, not recomputed.
    assert_eq!(trade.leverage, Some(dec("5.0")));
    assert_eq!(trade.collateral_used, Some(dec("162.22")));
}

#[tokio::test]
async fn test_strategy_attribution_on_trades() {
    let (repo, ingestor, _temp) = setup().await;

    let strategy_id = repo.create_strategy("trend", None).await.unwrap();
    repo.create_assignment(&account(), &btc(), strategy_id, TimeMs::new(100_000))
        .await
        .unwrap();

    seed_btc_lifecycle(&ingestor).await;
    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "1", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "1", "100", "105", "5", Some(true), 2, 150_000)
                .build(),
        )
        .await
        .unwrap();

    let trades = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(trades[0].strategy_id, Some(strategy_id));
}

#[tokio::test]
async fn test_no_assignment_leaves_strategy_none() {
    let (repo, ingestor, _temp) = setup().await;
    seed_btc_lifecycle(&ingestor).await;

    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "1", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "1", "100", "105", "5", Some(true), 2, 150_000)
                .build(),
        )
        .await
        .unwrap();

    let trades = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(trades[0].strategy_id, None, "no attribution is not an error");
}

#[tokio::test]
async fn test_aggregation_rebuild_is_idempotent() {
    let (repo, ingestor, _temp) = setup().await;
    seed_btc_lifecycle(&ingestor).await;

    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "1", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "1", "100", "105", "5", Some(true), 2, 150_000)
                .build(),
        )
        .await
        .unwrap();

    let before = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();

    // Recomputing over the same fills replaces, never duplicates.
    let aggregator = Aggregator::new(repo.clone(), 60_000);
    aggregator
        .aggregate(&account(), &btc(), TimeMs::new(0))
        .await
        .unwrap();
    aggregator
        .aggregate(&account(), &btc(), TimeMs::new(0))
        .await
        .unwrap();

    let after = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_fills_across_cycles_merge_into_one_trade() {
    let (repo, ingestor, _temp) = setup().await;
    seed_btc_lifecycle(&ingestor).await;

    // The opening fill arrives in one cycle, the close in the next.
    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "162.22")
                .with_position("BTC", "0.5", "810.27", "1620.54")
                .with_fill("BTC", "0.5", "100", "0", "0", Some(false), 1, 121_000)
                .build(),
        )
        .await
        .unwrap();
    let report = ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 240_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "0.5", "100", "110", "5", Some(true), 2, 200_000)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(report.trades_aggregated, 1);

    let trades = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].fill_count, 2);
    assert_eq!(trades[0].total_pnl, dec("5"));
    assert_eq!(trades[0].leverage, Some(dec("5.0")));
}

#[tokio::test]
async fn test_duplicate_fills_not_double_counted() {
    let (repo, ingestor, _temp) = setup().await;
    seed_btc_lifecycle(&ingestor).await;

    ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 180_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "1", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "1", "100", "105", "5", Some(true), 2, 150_000)
                .build(),
        )
        .await
        .unwrap();

    // The venue re-reports both fills in a later cycle (overlap window).
    let report = ingestor
        .ingest(
            CycleBuilder::new(ACCOUNT, 240_000)
                .with_ledger("2500", "0")
                .with_fill("BTC", "1", "100", "0", "0", Some(false), 1, 121_000)
                .with_fill("BTC", "1", "100", "105", "5", Some(true), 2, 150_000)
                .build(),
        )
        .await
        .unwrap();
    assert_eq!(report.fills_ingested, 0, "same trade ids are absorbed");

    let trades = repo
        .query_aggregated_trades(&account(), None, TimeMs::new(0))
        .await
        .unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].total_pnl, dec("5"));
}
