//! Worker pool integration tests
//!
//! Exercise the scheduler and the per-worker command queues against mock
//! game hosts: exclusive binding, one command in flight, and queues that
//! hold until the host connection is ready.

mod fixtures;

use fixtures::TestHarness;
use inhouse_conductor::lobby::LobbyState;
use inhouse_conductor::store::Store;
use inhouse_conductor::types::{GameMode, Lobby, QueueKind, QueueSlot, WorkerRecord, WorkerStatus};
use inhouse_conductor::worker::{AssignmentContext, HostLobbyOptions};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn options(harness: &TestHarness) -> HostLobbyOptions {
    HostLobbyOptions {
        league_id: harness.league.id,
        name: "test-1".to_string(),
        password: "hunter2".to_string(),
        game_mode: GameMode::CaptainsMode,
        ticket: None,
    }
}

async fn waiting_lobby(harness: &TestHarness) -> Lobby {
    let mut lobby = Lobby::new(harness.league.id, QueueSlot::new("draft", QueueKind::Draft));
    lobby.state = LobbyState::WaitingForWorker;
    harness.store.save_lobby(&lobby).await.unwrap();
    lobby
}

#[tokio::test]
async fn test_bound_worker_is_exclusive_until_released() {
    let harness = TestHarness::new().await;
    harness.add_workers(&["w1"]).await;
    let context = AssignmentContext::for_league(&harness.league);

    let mut first = waiting_lobby(&harness).await;
    let mut second = waiting_lobby(&harness).await;

    let worker = harness.scheduler.find_unassigned_worker(&context).await.unwrap().unwrap();
    harness.scheduler.assign(&mut first, &worker.id).await.unwrap();
    harness.store.save_lobby(&first).await.unwrap();

    assert!(harness.scheduler.find_unassigned_worker(&context).await.unwrap().is_none());
    assert!(harness.scheduler.assign(&mut second, "w1").await.is_err());

    harness.scheduler.release(&mut first).await.unwrap();
    harness.store.save_lobby(&first).await.unwrap();
    let freed = harness.scheduler.find_unassigned_worker(&context).await.unwrap().unwrap();
    assert_eq!(freed.id, "w1");
    assert!(harness.store.get_worker("w1").await.unwrap().unwrap().lobby_id.is_none());
}

#[tokio::test]
async fn test_ticket_requirement_filters_workers() {
    let mut harness = TestHarness::new().await;
    harness.league.ticket_id = Some(42);

    let mut ticketed = WorkerRecord::new("w2");
    ticketed.tickets = vec![42];
    harness.scheduler.register(WorkerRecord::new("w1")).await.unwrap();
    harness.scheduler.register(ticketed).await.unwrap();
    harness.scheduler.register(WorkerRecord::new("w3")).await.unwrap();
    harness.scheduler.set_status("w3", WorkerStatus::Unavailable).await.unwrap();

    let context = AssignmentContext::for_league(&harness.league);
    let found = harness.scheduler.find_unassigned_worker(&context).await.unwrap().unwrap();
    assert_eq!(found.id, "w2");
}

#[tokio::test]
async fn test_commands_execute_one_at_a_time() {
    let harness = TestHarness::new().await;
    harness.add_workers(&["w1"]).await;
    let host = harness.host("w1");
    host.set_command_delay(Duration::from_millis(10));

    let record = harness.store.get_worker("w1").await.unwrap().unwrap();
    let handle = harness.scheduler.activate(&record).await.unwrap();
    handle.create_lobby(options(&harness)).await.unwrap();

    let invites: Vec<_> = (1..=10u64)
        .map(|account| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.invite(account).await })
        })
        .collect();
    for invite in futures::future::join_all(invites).await {
        invite.unwrap().unwrap();
    }

    assert_eq!(host.max_in_flight(), 1);
    assert_eq!(host.invited().len(), 10);
    assert_eq!(host.calls().first().map(String::as_str), Some("create_lobby"));
}

#[tokio::test(start_paused = true)]
async fn test_queue_holds_until_host_connects() {
    let harness = TestHarness::new().await;
    harness.add_workers(&["w1"]).await;
    let host = harness.host("w1");
    host.fail_connects(3);

    let record = harness.store.get_worker("w1").await.unwrap().unwrap();
    let handle = harness.scheduler.activate(&record).await.unwrap();
    assert!(!handle.is_ready());

    let lobby_id = handle.create_lobby(options(&harness)).await.unwrap();
    assert_eq!(lobby_id, 1000);
    assert!(handle.is_ready());
    assert_eq!(host.connect_attempts.load(Ordering::SeqCst), 4);

    // A disconnect blocks the queue again until the host reconnects
    harness.scheduler.signal_ready("w1", false).unwrap();
    handle.invite(7).await.unwrap();
    assert_eq!(host.connect_attempts.load(Ordering::SeqCst), 5);
    assert_eq!(host.invited(), vec![7]);
}

#[tokio::test]
async fn test_eviction_removes_worker_from_live_registry() {
    let harness = TestHarness::new().await;
    harness.add_workers(&["w1"]).await;
    let record = harness.store.get_worker("w1").await.unwrap().unwrap();
    harness.scheduler.activate(&record).await.unwrap();
    assert_eq!(harness.scheduler.registry().live_count(), 1);
    assert_eq!(
        harness.store.get_worker("w1").await.unwrap().unwrap().status,
        WorkerStatus::Loading
    );

    harness.scheduler.evict("w1", "lost session").await.unwrap();
    assert_eq!(harness.scheduler.registry().live_count(), 0);
    assert!(harness.scheduler.handle("w1").unwrap().is_none());
    assert_eq!(
        harness.store.get_worker("w1").await.unwrap().unwrap().status,
        WorkerStatus::Unavailable
    );
}
