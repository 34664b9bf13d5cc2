//! Test fixtures for integration testing
//!
//! Wires a lobby machine over the in-memory store, the recording chat gateway
//! and scriptable game hosts, plus helpers for seeding players and driving
//! a lobby through its common phases.

#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, Utc};
use inhouse_conductor::chat::MockChatGateway;
use inhouse_conductor::config::LeagueDefaults;
use inhouse_conductor::lobby::{Effect, LobbyMachine, LobbyState, MachineSettings};
use inhouse_conductor::rating::EloTeamCalculator;
use inhouse_conductor::store::{InMemoryStore, Store};
use inhouse_conductor::types::{
    Faction, GameSide, League, LeagueId, Lobby, LobbyId, Player, PlayerId, QueueMembership, WorkerRecord,
    WorkerStatus,
};
use inhouse_conductor::worker::{MockGameHost, MockHostFactory, RunnerSettings, WorkerRegistry, WorkerScheduler};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DRAFT: &str = "draft";
pub const AUTOBALANCE: &str = "autobalance";

/// Runner settings that keep retries and timeouts short
pub fn fast_runner_settings() -> RunnerSettings {
    RunnerSettings {
        queue_capacity: 16,
        command_timeout: Duration::from_secs(5),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
    }
}

/// A complete orchestration stack without the coordinator
pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub chat: Arc<MockChatGateway>,
    pub hosts: Arc<MockHostFactory>,
    pub scheduler: Arc<WorkerScheduler>,
    pub machine: Arc<LobbyMachine>,
    pub league: League,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_seed(7).await
    }

    pub async fn with_seed(seed: u64) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let chat = Arc::new(MockChatGateway::new());
        let hosts = Arc::new(MockHostFactory::new());
        let registry = WorkerRegistry::new(hosts.clone(), fast_runner_settings());
        let scheduler = Arc::new(WorkerScheduler::new(store.clone(), registry));
        let machine = Arc::new(
            LobbyMachine::new(
                store.clone(),
                chat.clone(),
                scheduler.clone(),
                Arc::new(EloTeamCalculator::new(32.0, 1500.0)),
                MachineSettings::default(),
            )
            .with_seed(seed),
        );

        let league = LeagueDefaults::default().build_league(Uuid::new_v4(), "test");
        store.save_league(&league).await.unwrap();

        Self {
            store,
            chat,
            hosts,
            scheduler,
            machine,
            league,
        }
    }

    /// Save a player; `captain_tier` adds a matching "Tier N" badge
    pub async fn add_player(&self, index: usize, rating: f64, captain_tier: Option<u32>) -> Player {
        let mut player = test_player(self.league.id, index, rating);
        if let Some(tier) = captain_tier {
            player.badges.push(format!("Tier {}", tier));
        }
        self.store.save_player(&player).await.unwrap();
        player
    }

    /// Queue a player, each one a second later than the previous index
    pub async fn enqueue(&self, index: usize, slot: &str) {
        self.store
            .join_queue(QueueMembership {
                player_id: player_id(index),
                league_id: self.league.id,
                slot_id: slot.to_string(),
                active: true,
                joined_at: Utc::now() - ChronoDuration::seconds(1000) + ChronoDuration::seconds(index as i64),
            })
            .await
            .unwrap();
    }

    /// Save and queue a range of players; the listed indices get captain badges
    pub async fn queue_players(&self, range: std::ops::Range<usize>, slot: &str, captains: &[usize]) {
        for index in range {
            let tier = captains.contains(&index).then_some(1);
            self.add_player(index, 1400.0 + (index % 5) as f64 * 40.0, tier).await;
            self.enqueue(index, slot).await;
        }
    }

    /// Register workers and mark them online
    pub async fn add_workers(&self, ids: &[&str]) {
        for id in ids {
            self.scheduler.register(WorkerRecord::new(*id)).await.unwrap();
            self.scheduler.set_status(id, WorkerStatus::Online).await.unwrap();
        }
    }

    pub fn host(&self, worker_id: &str) -> Arc<MockGameHost> {
        self.hosts.host(worker_id)
    }

    /// Open a lobby on a slot of the test league and run it
    pub async fn open_lobby(&self, slot: &str) -> (LobbyId, Vec<Effect>) {
        let slot = self.league.slot(slot).cloned().unwrap();
        let lobby_id = self
            .machine
            .ensure_slot_lobby(self.league.id, &slot)
            .await
            .unwrap()
            .unwrap();
        let effects = self.machine.run(lobby_id).await.unwrap();
        (lobby_id, effects)
    }

    pub async fn lobby(&self, lobby_id: LobbyId) -> Lobby {
        self.store.get_lobby(lobby_id).await.unwrap().unwrap()
    }

    pub async fn state(&self, lobby_id: LobbyId) -> LobbyState {
        self.lobby(lobby_id).await.state
    }

    pub async fn roster(&self, lobby_id: LobbyId) -> Vec<PlayerId> {
        self.store
            .lobby_players(lobby_id)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.player_id)
            .collect()
    }

    /// Ready up everyone in the lobby, returning the effects of the last one
    pub async fn ready_all(&self, lobby_id: LobbyId) -> Vec<Effect> {
        let mut effects = Vec::new();
        for player in self.roster(lobby_id).await {
            effects = self.machine.record_ready(&player).await.unwrap();
        }
        effects
    }

    /// Walk a lobby in selection priority through both choices and the draft
    pub async fn complete_draft(&self, lobby_id: LobbyId) -> Vec<Effect> {
        let lobby = self.lobby(lobby_id).await;
        assert_eq!(lobby.state, LobbyState::SelectionPriority);
        let priority = lobby.selection.priority.unwrap();
        let chooser = faction_captain(&lobby, priority.opponent());
        let priority_captain = faction_captain(&lobby, priority);

        self.machine.record_draft_order_choice(&chooser, true).await.unwrap();
        self.machine.record_side_choice(&priority_captain, true).await.unwrap();
        assert_eq!(self.state(lobby_id).await, LobbyState::DraftingPlayers);

        let mut effects = Vec::new();
        while self.state(lobby_id).await == LobbyState::DraftingPlayers {
            let lobby = self.lobby(lobby_id).await;
            let rows = self.store.lobby_players(lobby_id).await.unwrap();
            let undrafted: Vec<_> = rows.iter().filter(|row| !row.faction.is_assigned()).collect();
            let turn = inhouse_conductor::matchmaking::drafting_faction(
                &self.league.draft_order,
                undrafted.len(),
                lobby.selection.first_pick.unwrap(),
            )
            .unwrap();
            let captain = faction_captain(&lobby, turn);
            effects = self
                .machine
                .record_pick(&captain, &undrafted[0].player_id)
                .await
                .unwrap();
        }
        effects
    }

    /// Seat every rostered account on its expected side in the worker's game lobby
    pub async fn seat_everyone(&self, lobby_id: LobbyId) {
        let lobby = self.lobby(lobby_id).await;
        let host = self.host(lobby.worker_id.as_deref().unwrap());
        let primary = lobby.selection.primary_side.unwrap_or(Faction::One);
        for row in self.store.lobby_players(lobby_id).await.unwrap() {
            let player = self.store.get_player(&row.player_id).await.unwrap().unwrap();
            let side = if row.faction == primary {
                GameSide::Primary
            } else {
                GameSide::Secondary
            };
            host.seat(player.account_id, side);
        }
    }
}

pub fn test_player(league_id: LeagueId, index: usize, rating: f64) -> Player {
    Player {
        id: player_id(index),
        league_id,
        nickname: format!("Player {}", index),
        account_id: 10_000 + index as u64,
        rank_tier: 50,
        rating,
        badges: vec!["Regular".to_string()],
        roles: Vec::new(),
        game_mode_preference: None,
        queue_banned_until: None,
    }
}

pub fn player_id(index: usize) -> PlayerId {
    format!("p{:02}", index)
}

pub fn faction_captain(lobby: &Lobby, faction: Faction) -> PlayerId {
    match faction {
        Faction::One => lobby.captain_1.clone().unwrap(),
        _ => lobby.captain_2.clone().unwrap(),
    }
}
