// ABOUTME: End-to-end tests running templates with the built-in task kinds
// ABOUTME: Drives multi-tick evaluations over static token data and persists snapshots between ticks

use chrono::Duration;
use std::sync::Arc;
use tempfile::TempDir;

use tokenwatch::engine::{self, StageState, TaskState};
use tokenwatch::parser::{PipelineTemplate, TrackedToken};
use tokenwatch::store::{FileTokenStore, TokenStore};
use tokenwatch::tasks::{ContractInfo, HolderInfo, LiquidityInfo, StaticDataSource, TaskRegistry};

mod common;
use common::{epoch, test_clock};

const LAUNCH_TEMPLATE: &str = r#"
name: launch-screening
description: Screens a fresh token listing
pipeline:
  - stageId: screening
    taskIds: [audit]
  - stageId: monitoring
    taskIds: [liquidity, holders]
    prerequisiteTasks: [audit]
tasks:
  audit:
    kind: contract_audit
  liquidity:
    kind: liquidity_watch
    daemon: true
    repetitions:
      interval: 300
  holders:
    kind: holder_distribution
    repetitions:
      repeat: 12
      interval: 600
    delay: 1800
    config:
      contractTask: audit
"#;

const CHAIN: u64 = 1;
const ADDRESS: &str = "0xAbC";

fn launch_token() -> TrackedToken {
    PipelineTemplate::from_yaml(LAUNCH_TEMPLATE)
        .unwrap()
        .instantiate(CHAIN, ADDRESS, epoch())
}

fn verified() -> ContractInfo {
    ContractInfo {
        name: Some("Example".to_string()),
        symbol: Some("EXM".to_string()),
        verified: true,
        ownership_renounced: true,
        ..ContractInfo::default()
    }
}

fn healthy_pool() -> LiquidityInfo {
    LiquidityInfo {
        usd: 50_000.0,
        locked_ratio: 0.95,
    }
}

fn spread_holders() -> HolderInfo {
    HolderInfo {
        holder_count: 1_200,
        top10_ratio: 0.3,
    }
}

#[tokio::test]
async fn test_healthy_token_completes_in_two_ticks() {
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(CHAIN, ADDRESS, verified());
    source.set_liquidity(CHAIN, ADDRESS, healthy_pool());
    source.set_holders(CHAIN, ADDRESS, spread_holders());
    let registry = TaskRegistry::new(source.clone());
    let clock = test_clock();

    let first = engine::tick(launch_token(), &registry, clock.clone()).await.unwrap();
    assert_eq!(first.current_stage_index, 1);
    assert_eq!(first.pipeline[0].state, Some(StageState::Done));
    assert_eq!(first.pipeline[1].state, Some(StageState::Unlocked));
    assert_eq!(first.tasks["audit"].state, TaskState::Done);
    assert_eq!(first.tasks["liquidity"].state, TaskState::Activated);
    assert_eq!(first.insights["contract"]["symbol"], serde_json::json!("EXM"));
    assert!(first.tracking);

    clock.advance(Duration::seconds(60));
    let second = engine::tick(first, &registry, clock.clone()).await.unwrap();

    assert!(second.completed);
    assert!(!second.tracking);
    assert_eq!(second.pipeline[1].state, Some(StageState::Done));
    assert_eq!(second.tasks["holders"].state, TaskState::Done);
    assert_eq!(second.insights["holders"]["holderCount"], serde_json::json!(1200));
    assert_eq!(second.insights["liquidity"]["usd"], serde_json::json!(50_000.0));
    assert_eq!(second.latest_execution_time, Some(epoch() + Duration::seconds(60)));
}

#[tokio::test]
async fn test_unverified_contract_keeps_screening() {
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(
        CHAIN,
        ADDRESS,
        ContractInfo {
            verified: false,
            ..verified()
        },
    );
    let registry = TaskRegistry::new(source.clone());
    let clock = test_clock();

    let first = engine::tick(launch_token(), &registry, clock.clone()).await.unwrap();
    assert_eq!(first.current_stage_index, 0);
    assert_eq!(first.pipeline[0].state, Some(StageState::InProgress));
    assert_eq!(first.tasks["audit"].state, TaskState::InProgress);
    assert_eq!(first.pipeline[1].state, Some(StageState::Locked));

    // Verification lands before the next tick.
    source.set_contract(CHAIN, ADDRESS, verified());
    clock.advance(Duration::seconds(30));
    let second = engine::tick(first, &registry, clock).await.unwrap();

    assert_eq!(second.tasks["audit"].state, TaskState::Done);
    assert_eq!(second.tasks["audit"].repetitions.count, 2);
    assert_eq!(second.current_stage_index, 1);
}

#[tokio::test]
async fn test_honeypot_aborts_the_token() {
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(
        CHAIN,
        ADDRESS,
        ContractInfo {
            honeypot: true,
            ..verified()
        },
    );
    let registry = TaskRegistry::new(source.clone());

    let result = engine::tick(launch_token(), &registry, test_clock()).await.unwrap();

    assert!(result.aborted);
    assert!(!result.tracking);
    assert!(!result.completed);
    assert_eq!(result.current_stage_index, 0);
}

#[tokio::test]
async fn test_mintable_contract_halts_screening() {
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(
        CHAIN,
        ADDRESS,
        ContractInfo {
            mintable: true,
            ..verified()
        },
    );
    let registry = TaskRegistry::new(source.clone());

    let result = engine::tick(launch_token(), &registry, test_clock()).await.unwrap();

    assert_eq!(result.tasks["audit"].state, TaskState::Disactivated);
    assert_eq!(result.pipeline[0].state, Some(StageState::Halted));
    assert_eq!(result.pipeline[1].state, Some(StageState::Locked));
    assert_eq!(result.current_stage_index, 0);
    assert!(result.scheduled_execution_time.is_none());
}

#[tokio::test]
async fn test_liquidity_drain_aborts_during_monitoring() {
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(CHAIN, ADDRESS, verified());
    source.set_liquidity(
        CHAIN,
        ADDRESS,
        LiquidityInfo {
            usd: 40_000.0,
            locked_ratio: 0.2,
        },
    );
    source.set_holders(
        CHAIN,
        ADDRESS,
        HolderInfo {
            holder_count: 40,
            top10_ratio: 0.9,
        },
    );
    let registry = TaskRegistry::new(source.clone());
    let clock = test_clock();

    let mut token = engine::tick(launch_token(), &registry, clock.clone()).await.unwrap();
    clock.advance(Duration::seconds(10));
    token = engine::tick(token, &registry, clock.clone()).await.unwrap();

    // Thin lock and concentrated holders: both keep watching.
    assert_eq!(token.tasks["liquidity"].state, TaskState::InProgress);
    assert_eq!(token.tasks["holders"].state, TaskState::InProgress);
    assert_eq!(token.pipeline[1].state, Some(StageState::InProgress));
    assert_eq!(
        token.scheduled_execution_time,
        Some(epoch() + Duration::seconds(310))
    );
    assert_eq!(
        token.tasks["holders"].scheduled_execution_time,
        Some(epoch() + Duration::seconds(10 + 1800 + 600))
    );

    source.set_liquidity(
        CHAIN,
        ADDRESS,
        LiquidityInfo {
            usd: 4_000.0,
            locked_ratio: 0.2,
        },
    );
    clock.advance(Duration::seconds(300));
    let drained = engine::tick(token, &registry, clock).await.unwrap();

    assert!(drained.aborted);
    assert!(!drained.tracking);
    assert_eq!(drained.insights["liquidity"]["usd"], serde_json::json!(4_000.0));
    // The holder check was not due and did not run.
    assert_eq!(drained.tasks["holders"].repetitions.count, 1);
}

#[tokio::test]
async fn test_missing_data_waits_without_failing() {
    let registry = TaskRegistry::new(Arc::new(StaticDataSource::new()));

    let result = engine::tick(launch_token(), &registry, test_clock()).await.unwrap();

    assert_eq!(result.tasks["audit"].state, TaskState::InProgress);
    assert_eq!(result.tasks["audit"].repetitions.count, 1);
    assert!(!result.insights.contains_key("contract"));
    assert!(result.tracking);
}

#[tokio::test]
async fn test_snapshots_survive_the_file_store_between_ticks() {
    let dir = TempDir::new().unwrap();
    let store = FileTokenStore::new(dir.path());
    let source = Arc::new(StaticDataSource::new());
    source.set_contract(CHAIN, ADDRESS, verified());
    source.set_liquidity(CHAIN, ADDRESS, healthy_pool());
    source.set_holders(CHAIN, ADDRESS, spread_holders());
    let registry = TaskRegistry::new(source.clone());
    let clock = test_clock();

    let token = launch_token();
    let uuid = token.uuid;
    store.save(&token).await.unwrap();

    for _ in 0..2 {
        let stored = store.load(uuid).await.unwrap();
        let next = engine::tick(stored, &registry, clock.clone()).await.unwrap();
        store.save(&next).await.unwrap();
        clock.advance(Duration::seconds(60));
    }

    let finished = store.load(uuid).await.unwrap();
    assert!(finished.completed);
    assert_eq!(store.list().await.unwrap(), vec![uuid]);

    // Ticking a finished token changes nothing but the tick time.
    let again = engine::tick(finished.clone(), &registry, clock).await.unwrap();
    assert_eq!(again.tasks, finished.tasks);
    assert_eq!(again.pipeline, finished.pipeline);
    assert_eq!(again.insights, finished.insights);
}
