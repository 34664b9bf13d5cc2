//! End-to-end tests through the coordinator queue
//!
//! Every input is submitted as an event, the way the AMQP ingress does it,
//! and assertions run once the queue has drained.

mod fixtures;

use fixtures::{player_id, test_player, TestHarness, AUTOBALANCE};
use inhouse_conductor::coordinator::{
    Coordinator, CoordinatorHandle, CoordinatorSettings, Event, OperatorCommand, PlayerCommand,
};
use inhouse_conductor::lobby::LobbyState;
use inhouse_conductor::results::{CachedResultsFeed, FeedStatus};
use inhouse_conductor::store::Store;
use inhouse_conductor::types::{GameSide, League, Lobby, WorkerRecord, WorkerStatus};
use inhouse_conductor::worker::WorkerSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

struct Running {
    harness: TestHarness,
    results: Arc<CachedResultsFeed>,
    handle: CoordinatorHandle,
    task: JoinHandle<()>,
}

async fn start(league: impl FnOnce(&mut League)) -> Running {
    let mut harness = TestHarness::new().await;
    league(&mut harness.league);

    let results = Arc::new(CachedResultsFeed::new());
    let coordinator = Coordinator::new(harness.machine.clone(), results.clone(), CoordinatorSettings::default());
    let handle = coordinator.handle();
    let task = coordinator.spawn();

    handle
        .operator(OperatorCommand::ConfigureLeague {
            league: harness.league.clone(),
        })
        .await
        .unwrap();
    Running {
        harness,
        results,
        handle,
        task,
    }
}

impl Running {
    fn join(&self, index: usize) -> Event {
        Event::Player(PlayerCommand::JoinQueue {
            player_id: player_id(index),
            league_id: self.harness.league.id,
            slot_id: AUTOBALANCE.to_string(),
        })
    }

    async fn register_and_queue(&self, count: usize) {
        for index in 0..count {
            self.handle
                .submit(Event::Player(PlayerCommand::Register {
                    player: test_player(self.harness.league.id, index, 1500.0 + index as f64 * 10.0),
                }))
                .unwrap();
            self.handle.submit(self.join(index)).unwrap();
        }
        self.handle.wait_idle().await;
    }

    async fn lobbies_in(&self, state: LobbyState) -> Vec<Lobby> {
        self.harness
            .store
            .lobbies_for_slot(self.harness.league.id, AUTOBALANCE)
            .await
            .unwrap()
            .into_iter()
            .filter(|lobby| lobby.state == state)
            .collect()
    }
}

#[tokio::test]
async fn test_match_runs_end_to_end_through_the_queue() {
    let running = start(|_| {}).await;
    running
        .handle
        .operator(OperatorCommand::AddWorker {
            worker: WorkerRecord::new("w1"),
        })
        .await
        .unwrap();
    running
        .handle
        .operator(OperatorCommand::SetWorkerStatus {
            worker_id: "w1".to_string(),
            status: WorkerStatus::Online,
        })
        .await
        .unwrap();

    running.register_and_queue(10).await;
    let checking = running.lobbies_in(LobbyState::CheckingReady).await;
    assert_eq!(checking.len(), 1);
    let lobby_id = checking[0].id;
    // A fresh lobby keeps the slot open for the next ten
    assert_eq!(running.lobbies_in(LobbyState::WaitingForQueue).await.len(), 1);

    for index in 0..10 {
        running
            .handle
            .submit(Event::Player(PlayerCommand::Ready {
                player_id: player_id(index),
            }))
            .unwrap();
    }
    running.handle.wait_idle().await;
    assert_eq!(running.harness.state(lobby_id).await, LobbyState::WaitingForPlayers);

    running
        .handle
        .submit(Event::Worker(WorkerSignal::MatchStarted {
            worker_id: "w1".to_string(),
            match_id: 55,
        }))
        .unwrap();
    running.handle.wait_idle().await;
    assert_eq!(running.harness.state(lobby_id).await, LobbyState::MatchInProgress);

    running.results.record(55, FeedStatus::Unavailable).unwrap();
    running
        .handle
        .submit(Event::Worker(WorkerSignal::MatchEnded {
            worker_id: "w1".to_string(),
            winning_side: Some(GameSide::Primary),
        }))
        .unwrap();
    running.handle.wait_idle().await;

    let lobby = running.harness.lobby(lobby_id).await;
    assert_eq!(lobby.state, LobbyState::CompletedNoStats);
    assert!(lobby.winner.is_some());
    assert!(lobby.worker_id.is_none());
    assert_eq!(running.handle.pending(), 0);

    running.task.abort();
}

#[tokio::test]
async fn test_concurrent_joins_fill_exactly_one_lobby() {
    let running = start(|_| {}).await;
    for index in 0..10 {
        running
            .handle
            .submit(Event::Player(PlayerCommand::Register {
                player: test_player(running.harness.league.id, index, 1500.0),
            }))
            .unwrap();
    }
    running.handle.wait_idle().await;

    let submitters: Vec<_> = (0..10)
        .map(|index| {
            let handle = running.handle.clone();
            let event = running.join(index);
            tokio::spawn(async move { handle.submit(event) })
        })
        .collect();
    for submitter in futures::future::join_all(submitters).await {
        submitter.unwrap().unwrap();
    }
    running.handle.wait_idle().await;

    let checking = running.lobbies_in(LobbyState::CheckingReady).await;
    assert_eq!(checking.len(), 1);
    assert_eq!(running.harness.roster(checking[0].id).await.len(), 10);
    assert_eq!(running.lobbies_in(LobbyState::WaitingForQueue).await.len(), 1);
    assert!(running
        .harness
        .store
        .queue_members(running.harness.league.id, AUTOBALANCE)
        .await
        .unwrap()
        .is_empty());

    running.task.abort();
}

#[tokio::test(start_paused = true)]
async fn test_ready_timer_evicts_through_the_queue() {
    let running = start(|league| league.ready_check_timeout_seconds = 1).await;
    running.register_and_queue(10).await;
    let lobby_id = running.lobbies_in(LobbyState::CheckingReady).await[0].id;

    for index in 0..9 {
        running
            .handle
            .submit(Event::Player(PlayerCommand::Ready {
                player_id: player_id(index),
            }))
            .unwrap();
    }
    running.handle.wait_idle().await;
    assert_eq!(running.harness.state(lobby_id).await, LobbyState::CheckingReady);

    tokio::time::sleep(Duration::from_secs(3)).await;
    running.handle.wait_idle().await;

    assert_eq!(running.harness.state(lobby_id).await, LobbyState::WaitingForQueue);
    let queued: Vec<_> = running
        .harness
        .store
        .queue_members(running.harness.league.id, AUTOBALANCE)
        .await
        .unwrap()
        .into_iter()
        .map(|member| member.player_id)
        .collect();
    assert_eq!(queued.len(), 9);
    assert!(!queued.contains(&player_id(9)));

    running.task.abort();
}
