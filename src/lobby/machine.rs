//! Lobby state machine
//!
//! `LobbyMachine::step` advances one lobby by one state. Every transition is
//! persisted before the step returns; anything the caller must schedule
//! (timers, follow-up runs, worker wake-ups) is returned as an `Effect`.
//! Stepping a lobby with no pending work leaves it where it is.

use crate::chat::{ChatGateway, ChatTarget, MemberQuery, Notification, SelectionDecision};
use crate::config::OrchestrationSettings;
use crate::coordinator::locks::KeyedLock;
use crate::error::{OrchestratorError, Result};
use crate::lobby::admission::{decide_admission, Admission};
use crate::lobby::naming::unique_lobby_name;
use crate::lobby::state::LobbyState;
use crate::matchmaking::{
    balance_teams, captain_priority, compile_captain_pattern, drafting_faction, select_captain_pair,
    vote_game_mode, CaptainCandidate, NextDecision, MATCH_SIZE,
};
use crate::metrics::MetricsCollector;
use crate::rating::RatingCalculator;
use crate::store::Store;
use crate::types::{
    AccountId, Faction, GameSide, League, LeagueId, Lobby, LobbyId, Player, PlayerId, PlayerInLobby,
    QueueKind, RatingRecord, WorkerId, WorkerStatus,
};
use crate::utils::{generate_password, room_slug};
use crate::worker::{AssignmentContext, HostLobbyOptions, WorkerScheduler};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Follow-up work requested by a step
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Run another lobby (a freshly opened replacement, or this one later)
    RunLobby(LobbyId),
    StartReadyCheckTimer {
        lobby_id: LobbyId,
        deadline: DateTime<Utc>,
    },
    CancelReadyCheckTimer(LobbyId),
    /// No worker was free; retry when one becomes available
    AwaitWorker(LobbyId),
    CancelWorkerWait(LobbyId),
    /// A worker went back to the pool or came online
    WorkerAvailable(WorkerId),
}

/// A lobby after one step, with the effects it produced
#[derive(Debug)]
pub struct Step {
    pub lobby: Lobby,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone)]
pub struct MachineSettings {
    pub room_name_max_attempts: u32,
    /// Guard against a lobby bouncing between states within one run
    pub max_steps_per_run: usize,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            room_name_max_attempts: 10,
            max_steps_per_run: 32,
        }
    }
}

impl From<&OrchestrationSettings> for MachineSettings {
    fn from(settings: &OrchestrationSettings) -> Self {
        Self {
            room_name_max_attempts: settings.room_name_max_attempts,
            ..Self::default()
        }
    }
}

/// Why a pre-match roster can no longer proceed
#[derive(Debug)]
struct RosterFailure {
    reason: String,
    /// Players who are no longer community members
    departed: Vec<PlayerId>,
}

pub struct LobbyMachine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) chat: Arc<dyn ChatGateway>,
    pub(crate) scheduler: Arc<WorkerScheduler>,
    rating: Arc<dyn RatingCalculator>,
    room_locks: KeyedLock<LobbyId>,
    rng: Mutex<StdRng>,
    settings: MachineSettings,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LobbyMachine {
    pub fn new(
        store: Arc<dyn Store>,
        chat: Arc<dyn ChatGateway>,
        scheduler: Arc<WorkerScheduler>,
        rating: Arc<dyn RatingCalculator>,
        settings: MachineSettings,
    ) -> Self {
        Self {
            store,
            chat,
            scheduler,
            rating,
            room_locks: KeyedLock::new(),
            rng: Mutex::new(StdRng::from_entropy()),
            settings,
            metrics: None,
        }
    }

    /// Deterministic randomness for coin flips, captains and balancing
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> Arc<WorkerScheduler> {
        self.scheduler.clone()
    }

    pub(crate) fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    pub(crate) fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> Result<T> {
        let mut rng = self.rng.lock().map_err(|_| OrchestratorError::lock("rng"))?;
        Ok(f(&mut rng))
    }

    pub(crate) async fn load_lobby(&self, lobby_id: LobbyId) -> Result<Lobby> {
        self.store
            .get_lobby(lobby_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::LobbyNotFound {
                    lobby_id: lobby_id.to_string(),
                }
                .into()
            })
    }

    pub(crate) async fn load_league(&self, league_id: LeagueId) -> Result<League> {
        self.store
            .get_league(league_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::LeagueNotFound {
                    league_id: league_id.to_string(),
                }
                .into()
            })
    }

    /// Lobby players with their player records
    pub(crate) async fn roster(&self, lobby_id: LobbyId) -> Result<(Vec<PlayerInLobby>, HashMap<PlayerId, Player>)> {
        let rows = self.store.lobby_players(lobby_id).await?;
        let ids: Vec<PlayerId> = rows.iter().map(|row| row.player_id.clone()).collect();
        let players = self
            .store
            .get_players(&ids)
            .await?
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect();
        Ok((rows, players))
    }

    /// Post a notification; chat failures are logged and never abort a step
    pub(crate) async fn notify(&self, target: ChatTarget, notification: Notification) {
        if let Err(e) = self.chat.post(target, notification).await {
            warn!("Failed to post notification: {}", e);
        }
    }

    pub(crate) fn room_target(lobby: &Lobby) -> ChatTarget {
        match &lobby.room {
            Some(room) => ChatTarget::Room(room.clone()),
            None => ChatTarget::League(lobby.league_id),
        }
    }

    /// Persist a state change
    pub(crate) async fn transition(&self, lobby: &mut Lobby, next: LobbyState) -> Result<()> {
        let previous = lobby.state;
        lobby.state = next;
        lobby.updated_at = Utc::now();
        self.store.save_lobby(lobby).await?;

        info!("Lobby {} transitioned {} -> {}", lobby.id, previous, next);
        if let Some(metrics) = &self.metrics {
            metrics.record_transition(previous, next);
        }
        Ok(())
    }

    pub(crate) async fn save(&self, lobby: &mut Lobby) -> Result<()> {
        lobby.updated_at = Utc::now();
        self.store.save_lobby(lobby).await
    }

    /// Step a lobby until it stops changing state
    pub async fn run(&self, lobby_id: LobbyId) -> Result<Vec<Effect>> {
        let mut lobby = self.load_lobby(lobby_id).await?;
        let mut effects = Vec::new();

        for _ in 0..self.settings.max_steps_per_run {
            let before = lobby.state;
            let step = self.step(lobby).await?;
            effects.extend(step.effects);
            lobby = step.lobby;
            if lobby.state == before {
                return Ok(effects);
            }
        }

        warn!(
            "Lobby {} still changing state after {} steps, stopping in {}",
            lobby.id, self.settings.max_steps_per_run, lobby.state
        );
        effects.push(Effect::RunLobby(lobby.id));
        Ok(effects)
    }

    /// Advance a lobby by one state
    pub async fn step(&self, mut lobby: Lobby) -> Result<Step> {
        let mut effects = Vec::new();
        debug!("Stepping lobby {} in {}", lobby.id, lobby.state);

        if lobby.state.requires_full_roster() {
            if let Some(failure) = self.validate_roster(&lobby).await? {
                self.reset_to_queue(&mut lobby, failure, &mut effects).await?;
                return Ok(Step { lobby, effects });
            }
        }

        match lobby.state {
            LobbyState::New => self.transition(&mut lobby, LobbyState::WaitingForQueue).await?,
            LobbyState::WaitingForQueue => self.admit_from_queue(&mut lobby).await?,
            LobbyState::BeginReady => self.begin_ready(&mut lobby, &mut effects).await?,
            LobbyState::CheckingReady => {
                let league = self.load_league(lobby.league_id).await?;
                let expired = lobby
                    .ready_check_started_at
                    .map_or(false, |started| Utc::now() >= ready_deadline(started, &league));
                self.check_ready(&mut lobby, &league, expired, &mut effects).await?
            }
            LobbyState::AssigningCaptains => self.assign_captains_from_roster(&mut lobby).await?,
            LobbyState::SelectionPriority => self.selection_priority(&mut lobby).await?,
            LobbyState::DraftingPlayers => self.drafting_players(&mut lobby).await?,
            LobbyState::Autobalancing => self.autobalance(&mut lobby).await?,
            LobbyState::TeamsSelected => self.teams_selected(&mut lobby).await?,
            LobbyState::WaitingForWorker => self.acquire_worker(&mut lobby, &mut effects).await?,
            LobbyState::WorkerAssigned => self.provision_worker(&mut lobby, &mut effects).await?,
            LobbyState::WorkerStarted => self.invite_players(&mut lobby).await?,
            LobbyState::WaitingForPlayers => self.launch_when_seated(&mut lobby).await?,
            LobbyState::MatchStats => self.complete_with_stats(&mut lobby, &mut effects).await?,
            LobbyState::MatchNoStats => self.complete_without_stats(&mut lobby, &mut effects).await?,
            LobbyState::PendingKill => self.kill(&mut lobby, &mut effects).await?,
            LobbyState::MatchInProgress
            | LobbyState::MatchEnded
            | LobbyState::WorkerFailed
            | LobbyState::Killed
            | LobbyState::Completed
            | LobbyState::CompletedNoStats
            | LobbyState::Failed => {}
        }

        Ok(Step { lobby, effects })
    }

    async fn validate_roster(&self, lobby: &Lobby) -> Result<Option<RosterFailure>> {
        let rows = self.store.lobby_players(lobby.id).await?;

        let mut departed = Vec::new();
        for row in &rows {
            let resolved = self
                .chat
                .resolve_member(lobby.league_id, MemberQuery::Id(row.player_id.clone()))
                .await?;
            if resolved.is_none() {
                departed.push(row.player_id.clone());
            }
        }

        if !departed.is_empty() {
            return Ok(Some(RosterFailure {
                reason: format!("players left the community: {}", departed.join(", ")),
                departed,
            }));
        }
        if rows.len() != MATCH_SIZE {
            return Ok(Some(RosterFailure {
                reason: format!("expected {} players, found {}", MATCH_SIZE, rows.len()),
                departed,
            }));
        }
        Ok(None)
    }

    /// Clear everything tied to one match attempt
    fn clear_match_fields(lobby: &mut Lobby) {
        if lobby.slot.kind != QueueKind::Challenge {
            lobby.captain_1 = None;
            lobby.captain_2 = None;
        }
        lobby.selection = Default::default();
        lobby.game_mode = None;
        lobby.ready_check_started_at = None;
        lobby.launched_at = None;
        lobby.match_id = None;
        lobby.winner = None;
    }

    async fn revoke_room_access(&self, lobby: &Lobby, players: &[PlayerId]) {
        if let Some(room) = &lobby.room {
            if let Err(e) = self.chat.set_room_access(room, players, false).await {
                warn!("Failed to revoke room access for lobby {}: {}", lobby.id, e);
            }
        }
    }

    /// Release the worker, drop departed players, requeue the rest
    async fn reset_to_queue(&self, lobby: &mut Lobby, failure: RosterFailure, effects: &mut Vec<Effect>) -> Result<()> {
        warn!("Lobby {} failed validation in {}: {}", lobby.id, lobby.state, failure.reason);
        effects.push(Effect::CancelReadyCheckTimer(lobby.id));
        effects.push(Effect::CancelWorkerWait(lobby.id));

        if let Some(worker_id) = lobby.worker_id.clone() {
            if lobby.external_lobby_id.is_some() {
                if let Some(handle) = self.scheduler.handle(&worker_id)? {
                    if let Err(e) = handle.destroy_lobby().await {
                        warn!("Worker {} failed to destroy lobby: {}", worker_id, e);
                    }
                }
            }
            self.scheduler.release(lobby).await?;
            effects.push(Effect::WorkerAvailable(worker_id));
        }

        let rows = self.store.lobby_players(lobby.id).await?;
        let everyone: Vec<PlayerId> = rows.iter().map(|row| row.player_id.clone()).collect();
        self.revoke_room_access(lobby, &everyone).await;

        if !failure.departed.is_empty() {
            self.store.remove_lobby_players(lobby.id, &failure.departed).await?;
            self.store.clear_queues(&failure.departed).await?;
            if lobby.captain_1.as_ref().map_or(false, |c| failure.departed.contains(c)) {
                lobby.captain_1 = None;
            }
            if lobby.captain_2.as_ref().map_or(false, |c| failure.departed.contains(c)) {
                lobby.captain_2 = None;
            }
        }

        let remaining: Vec<PlayerId> = everyone
            .into_iter()
            .filter(|id| !failure.departed.contains(id))
            .collect();
        self.store
            .return_to_queue(lobby.id, lobby.league_id, &lobby.slot.id, &remaining)
            .await?;

        Self::clear_match_fields(lobby);
        lobby.failure_reason = Some(failure.reason.clone());
        self.transition(lobby, LobbyState::WaitingForQueue).await?;
        self.notify(
            ChatTarget::League(lobby.league_id),
            Notification::LobbyFailed {
                lobby_id: lobby.id,
                reason: failure.reason,
            },
        )
        .await;
        Ok(())
    }

    async fn admit_from_queue(&self, lobby: &mut Lobby) -> Result<()> {
        let league = self.load_league(lobby.league_id).await?;
        let members = self.store.queue_members(league.id, &lobby.slot.id).await?;
        let ids: Vec<PlayerId> = members.iter().map(|m| m.player_id.clone()).collect();
        let players: HashMap<PlayerId, Player> = self
            .store
            .get_players(&ids)
            .await?
            .into_iter()
            .map(|player| (player.id.clone(), player))
            .collect();
        let pattern = compile_captain_pattern(&league.captain_role_pattern)?;

        let admission = self.with_rng(|rng| {
            decide_admission(
                lobby.slot.kind,
                &members,
                &players,
                lobby.captains(),
                &pattern,
                &league,
                rng,
            )
        })?;

        match admission {
            Admission::Wait => {
                debug!(
                    "Lobby {} waiting on slot '{}' ({} queued)",
                    lobby.id,
                    lobby.slot.id,
                    members.len()
                );
                Ok(())
            }
            Admission::Kill { reason } => {
                warn!("Lobby {} cannot fill: {}", lobby.id, reason);
                lobby.failure_reason = Some(reason);
                self.transition(lobby, LobbyState::PendingKill).await
            }
            Admission::Admit { captains, players } => {
                self.store
                    .admit_players(lobby.id, league.id, &lobby.slot.id, &players)
                    .await?;
                if let Some((first, second)) = captains {
                    lobby.captain_1 = Some(first);
                    lobby.captain_2 = Some(second);
                }
                lobby.failure_reason = None;
                info!(
                    "Lobby {} admitted {} players from slot '{}'",
                    lobby.id,
                    players.len(),
                    lobby.slot.id
                );
                self.transition(lobby, LobbyState::BeginReady).await
            }
        }
    }

    /// Create or rename the lobby's room and grant it to players and admins
    pub(crate) async fn realize_room(&self, lobby: &mut Lobby, league: &League, players: &[PlayerId]) -> Result<()> {
        let _guard = self.room_locks.acquire(&lobby.id).await;
        let started = Instant::now();

        let name = room_slug(lobby.name.as_deref().unwrap_or_default());
        let room = match &lobby.room {
            Some(room) => {
                self.chat.rename_room(room, &name).await?;
                room.clone()
            }
            None => self.chat.ensure_room(&league.room_category, &name).await?,
        };

        let mut members = players.to_vec();
        members.extend(league.admins.iter().cloned());
        self.chat.set_room_access(&room, &members, true).await?;
        lobby.room = Some(room);

        if let Some(metrics) = &self.metrics {
            metrics.record_room_provisioning(started.elapsed());
        }
        Ok(())
    }

    async fn begin_ready(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        let league = self.load_league(lobby.league_id).await?;
        let (rows, players) = self.roster(lobby.id).await?;
        let ids: Vec<PlayerId> = rows.iter().map(|row| row.player_id.clone()).collect();

        if lobby.name.is_none() {
            let name = unique_lobby_name(
                self.store.as_ref(),
                &league,
                &lobby.slot.id,
                lobby.id,
                self.settings.room_name_max_attempts,
            )
            .await?;
            lobby.name = Some(name);
        }
        if lobby.password.is_none() {
            lobby.password = Some(self.with_rng(|rng| generate_password(rng))?);
        }
        self.realize_room(lobby, &league, &ids).await?;

        let preferences: Vec<_> = players.values().filter_map(|p| p.game_mode_preference).collect();
        lobby.game_mode = Some(vote_game_mode(&preferences, league.default_game_mode));

        let purged = self.store.delete_challenges_among(&ids).await?;
        if purged > 0 {
            debug!("Purged {} challenges among players of lobby {}", purged, lobby.id);
        }

        let started = *lobby.ready_check_started_at.get_or_insert_with(Utc::now);
        let deadline = ready_deadline(started, &league);
        effects.push(Effect::StartReadyCheckTimer {
            lobby_id: lobby.id,
            deadline,
        });
        self.transition(lobby, LobbyState::CheckingReady).await?;

        self.notify(
            ChatTarget::League(league.id),
            Notification::ReadyCheckStarted {
                lobby_id: lobby.id,
                name: lobby.name.clone().unwrap_or_default(),
                players: ids,
                deadline,
            },
        )
        .await;

        if lobby.slot.kind != QueueKind::Challenge {
            if let Some(replacement) = self.ensure_slot_lobby(league.id, &lobby.slot).await? {
                effects.push(Effect::RunLobby(replacement));
            }
        }
        Ok(())
    }

    pub(crate) async fn check_ready(
        &self,
        lobby: &mut Lobby,
        league: &League,
        expired: bool,
        effects: &mut Vec<Effect>,
    ) -> Result<()> {
        let rows = self.store.lobby_players(lobby.id).await?;
        let (ready, waiting): (Vec<_>, Vec<_>) = rows.iter().partition(|row| row.ready);
        let ready: Vec<PlayerId> = ready.into_iter().map(|row| row.player_id.clone()).collect();
        let waiting: Vec<PlayerId> = waiting.into_iter().map(|row| row.player_id.clone()).collect();

        if waiting.is_empty() {
            effects.push(Effect::CancelReadyCheckTimer(lobby.id));
            self.store.clear_queues(&ready).await?;
            let next = match lobby.slot.kind {
                QueueKind::AutoBalance => LobbyState::Autobalancing,
                QueueKind::Draft | QueueKind::Challenge => LobbyState::SelectionPriority,
            };
            self.transition(lobby, next).await?;
            self.notify(Self::room_target(lobby), Notification::PlayersReady { lobby_id: lobby.id })
                .await;
            return Ok(());
        }

        if !expired {
            let started = match lobby.ready_check_started_at {
                Some(started) => started,
                None => {
                    let now = Utc::now();
                    lobby.ready_check_started_at = Some(now);
                    self.save(lobby).await?;
                    now
                }
            };
            effects.push(Effect::StartReadyCheckTimer {
                lobby_id: lobby.id,
                deadline: ready_deadline(started, league),
            });
            return Ok(());
        }

        info!(
            "Ready check for lobby {} expired, evicting {} player(s)",
            lobby.id,
            waiting.len()
        );
        effects.push(Effect::CancelReadyCheckTimer(lobby.id));

        let everyone: Vec<PlayerId> = ready.iter().chain(waiting.iter()).cloned().collect();
        self.revoke_room_access(lobby, &everyone).await;

        self.store.remove_lobby_players(lobby.id, &waiting).await?;
        self.store.clear_queues(&waiting).await?;
        for captain in [&mut lobby.captain_1, &mut lobby.captain_2] {
            if captain.as_ref().map_or(false, |c| waiting.contains(c)) {
                *captain = None;
            }
        }
        self.store
            .return_to_queue(lobby.id, lobby.league_id, &lobby.slot.id, &ready)
            .await?;

        lobby.ready_check_started_at = None;
        lobby.game_mode = None;
        self.transition(lobby, LobbyState::WaitingForQueue).await?;

        if let Some(metrics) = &self.metrics {
            metrics.record_ready_check_timeout();
        }
        self.notify(
            ChatTarget::League(lobby.league_id),
            Notification::ReadyCheckExpired {
                lobby_id: lobby.id,
                evicted: waiting,
                returned: ready,
            },
        )
        .await;
        Ok(())
    }

    async fn assign_captains_from_roster(&self, lobby: &mut Lobby) -> Result<()> {
        if lobby.captains().is_some() {
            return self.transition(lobby, LobbyState::SelectionPriority).await;
        }

        let league = self.load_league(lobby.league_id).await?;
        let pattern = compile_captain_pattern(&league.captain_role_pattern)?;
        let (rows, players) = self.roster(lobby.id).await?;
        let candidates: Vec<CaptainCandidate> = rows
            .iter()
            .filter_map(|row| players.get(&row.player_id))
            .map(|player| CaptainCandidate {
                player_id: player.id.clone(),
                priority: captain_priority(&pattern, &player.badges),
                metric: player.metric_value(league.metric),
            })
            .collect();

        let pair = self.with_rng(|rng| select_captain_pair(&candidates, league.captain_rank_threshold, rng))?;
        match pair {
            Some((first, second)) => {
                info!("Lobby {} captains: {} and {}", lobby.id, first, second);
                lobby.captain_1 = Some(first);
                lobby.captain_2 = Some(second);
                self.transition(lobby, LobbyState::SelectionPriority).await
            }
            None => {
                info!("Lobby {} has no eligible captain pair, auto-balancing", lobby.id);
                self.transition(lobby, LobbyState::Autobalancing).await
            }
        }
    }

    /// Faction a captain drafts for
    pub(crate) fn captain_faction(lobby: &Lobby, player_id: &str) -> Option<Faction> {
        if lobby.captain_1.as_deref() == Some(player_id) {
            Some(Faction::One)
        } else if lobby.captain_2.as_deref() == Some(player_id) {
            Some(Faction::Two)
        } else {
            None
        }
    }

    pub(crate) fn faction_captain(lobby: &Lobby, faction: Faction) -> Option<PlayerId> {
        match faction {
            Faction::One => lobby.captain_1.clone(),
            Faction::Two => lobby.captain_2.clone(),
            Faction::Unassigned => None,
        }
    }

    async fn selection_priority(&self, lobby: &mut Lobby) -> Result<()> {
        let Some((first, second)) = lobby.captains().map(|(a, b)| (a.clone(), b.clone())) else {
            return self.transition(lobby, LobbyState::AssigningCaptains).await;
        };

        for mut row in self.store.lobby_players(lobby.id).await? {
            let faction = if row.player_id == first {
                Faction::One
            } else if row.player_id == second {
                Faction::Two
            } else {
                continue;
            };
            if row.faction != faction {
                row.faction = faction;
                self.store.save_lobby_player(&row).await?;
            }
        }

        match lobby.selection.next_decision() {
            NextDecision::CoinFlip => {
                let priority = self.with_rng(|rng| lobby.selection.flip_priority(rng))?;
                self.save(lobby).await?;
                info!("Lobby {}: {} won the coin flip", lobby.id, priority);
                if let Some(chooser) = Self::faction_captain(lobby, priority.opponent()) {
                    self.notify(
                        Self::room_target(lobby),
                        Notification::SelectionPrompt {
                            lobby_id: lobby.id,
                            captain: chooser,
                            decision: SelectionDecision::DraftOrder,
                        },
                    )
                    .await;
                }
                Ok(())
            }
            NextDecision::DraftOrder { .. } | NextDecision::Side { .. } => Ok(()),
            NextDecision::Complete => {
                self.transition(lobby, LobbyState::DraftingPlayers).await?;
                self.announce_draft_turn(lobby).await
            }
        }
    }

    /// Tell the captain whose turn it is to pick
    pub(crate) async fn announce_draft_turn(&self, lobby: &Lobby) -> Result<()> {
        let league = self.load_league(lobby.league_id).await?;
        let rows = self.store.lobby_players(lobby.id).await?;
        let undrafted = rows.iter().filter(|row| !row.faction.is_assigned()).count();
        let Some(first_pick) = lobby.selection.first_pick else {
            return Ok(());
        };
        if let Some(faction) = drafting_faction(&league.draft_order, undrafted, first_pick) {
            if let Some(captain) = Self::faction_captain(lobby, faction) {
                self.notify(
                    Self::room_target(lobby),
                    Notification::DraftTurn {
                        lobby_id: lobby.id,
                        captain,
                        remaining: undrafted,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    async fn drafting_players(&self, lobby: &mut Lobby) -> Result<()> {
        let rows = self.store.lobby_players(lobby.id).await?;
        let undrafted = rows.iter().filter(|row| !row.faction.is_assigned()).count();
        if undrafted == 0 {
            return self.transition(lobby, LobbyState::TeamsSelected).await;
        }

        let league = self.load_league(lobby.league_id).await?;
        let faction = lobby
            .selection
            .first_pick
            .and_then(|first| drafting_faction(&league.draft_order, undrafted, first));
        if faction.is_none() {
            let reason = format!(
                "draft order '{}' has no turn for {} undrafted players",
                league.draft_order, undrafted
            );
            lobby.failure_reason = Some(reason.clone());
            self.transition(lobby, LobbyState::Failed).await?;
            self.notify(
                ChatTarget::League(lobby.league_id),
                Notification::LobbyFailed {
                    lobby_id: lobby.id,
                    reason,
                },
            )
            .await;
        }
        Ok(())
    }

    async fn autobalance(&self, lobby: &mut Lobby) -> Result<()> {
        let league = self.load_league(lobby.league_id).await?;
        let (rows, players) = self.roster(lobby.id).await?;

        if rows.iter().any(|row| !row.faction.is_assigned()) {
            let rated: Vec<(PlayerId, f64)> = rows
                .iter()
                .map(|row| {
                    let metric = players
                        .get(&row.player_id)
                        .map_or(league.initial_rating, |p| p.metric_value(league.metric));
                    (row.player_id.clone(), metric)
                })
                .collect();
            let split = self.with_rng(|rng| balance_teams(&rated, rng))??;
            debug!("Lobby {} balanced with difference {:.1}", lobby.id, split.difference);

            for mut row in rows {
                row.faction = if split.team_a.contains(&row.player_id) {
                    Faction::One
                } else {
                    Faction::Two
                };
                self.store.save_lobby_player(&row).await?;
            }
        }

        let (first_pick, primary) = self.with_rng(|rng| (random_faction(rng), random_faction(rng)))?;
        lobby.selection.first_pick.get_or_insert(first_pick);
        lobby.selection.primary_side.get_or_insert(primary);
        self.transition(lobby, LobbyState::TeamsSelected).await
    }

    async fn teams_selected(&self, lobby: &mut Lobby) -> Result<()> {
        let rows = self.store.lobby_players(lobby.id).await?;
        let team = |faction: Faction| -> Vec<PlayerId> {
            rows.iter()
                .filter(|row| row.faction == faction)
                .map(|row| row.player_id.clone())
                .collect()
        };
        let notification = Notification::TeamsSelected {
            lobby_id: lobby.id,
            faction_one: team(Faction::One),
            faction_two: team(Faction::Two),
            game_mode: lobby.game_mode,
        };

        self.transition(lobby, LobbyState::WaitingForWorker).await?;
        self.notify(Self::room_target(lobby), notification).await;
        Ok(())
    }

    async fn acquire_worker(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        if lobby.worker_id.is_some() {
            return self.transition(lobby, LobbyState::WorkerAssigned).await;
        }

        let league = self.load_league(lobby.league_id).await?;
        let context = AssignmentContext::for_league(&league);
        match self.scheduler.find_unassigned_worker(&context).await? {
            Some(worker) => {
                self.scheduler.assign(lobby, &worker.id).await?;
                if let Some(metrics) = &self.metrics {
                    metrics.record_worker_assignment();
                }
                effects.push(Effect::CancelWorkerWait(lobby.id));
                self.transition(lobby, LobbyState::WorkerAssigned).await
            }
            None => {
                info!("No worker free for lobby {}, waiting", lobby.id);
                effects.push(Effect::AwaitWorker(lobby.id));
                Ok(())
            }
        }
    }

    async fn provision_worker(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        let Some(worker_id) = lobby.worker_id.clone() else {
            return self.transition(lobby, LobbyState::WaitingForWorker).await;
        };
        let league = self.load_league(lobby.league_id).await?;

        let checked = match self.store.get_worker(&worker_id).await? {
            None => Err("worker record is gone".to_string()),
            Some(worker) if worker.status == WorkerStatus::Unavailable => {
                Err("worker is marked unavailable".to_string())
            }
            Some(worker) if !worker.holds_ticket(league.ticket_id) => {
                Err(format!("worker lacks ticket {:?}", league.ticket_id))
            }
            Some(worker) => Ok(worker),
        };
        let record = match checked {
            Ok(record) => record,
            Err(reason) => {
                warn!("Worker {} rejected for lobby {}: {}", worker_id, lobby.id, reason);
                self.scheduler.release(lobby).await?;
                return self.transition(lobby, LobbyState::WaitingForWorker).await;
            }
        };

        if let Some(handle) = self.scheduler.handle(&worker_id)? {
            if let Some(hosting) = handle.current_lobby() {
                if Some(hosting) != lobby.external_lobby_id {
                    warn!(
                        "Worker {} is already hosting external lobby {}, releasing it from lobby {}",
                        worker_id, hosting, lobby.id
                    );
                    // Leave the stale lobby so the next assignment starts clean
                    if let Err(e) = handle.leave_lobby().await {
                        self.evict_worker(&worker_id, &format!("could not leave lobby {}: {}", hosting, e))
                            .await?;
                    }
                    self.scheduler.release(lobby).await?;
                    return self.transition(lobby, LobbyState::WaitingForWorker).await;
                }
            }
        }

        let handle = self.scheduler.activate(&record).await?;
        let password = lobby.password.clone().unwrap_or_default();
        let provisioned = match lobby.external_lobby_id {
            Some(external) => handle.join_lobby(external, &password).await.map(|_| external),
            None => {
                let options = HostLobbyOptions {
                    league_id: league.id,
                    name: lobby.name.clone().unwrap_or_default(),
                    password: password.clone(),
                    game_mode: lobby.game_mode.unwrap_or(league.default_game_mode),
                    ticket: league.ticket_id,
                };
                handle.create_lobby(options).await
            }
        };

        match provisioned {
            Ok(external) => {
                lobby.external_lobby_id = Some(external);
                self.scheduler.set_status(&worker_id, WorkerStatus::Online).await?;
                self.transition(lobby, LobbyState::WorkerStarted).await?;
                self.notify(
                    Self::room_target(lobby),
                    Notification::LobbyHosted {
                        lobby_id: lobby.id,
                        name: lobby.name.clone().unwrap_or_default(),
                        password,
                        worker_id,
                    },
                )
                .await;
                Ok(())
            }
            Err(e) => {
                let reason = format!("worker {} failed to host: {}", worker_id, e);
                self.evict_worker(&worker_id, &reason).await?;
                self.scheduler.release(lobby).await?;
                lobby.failure_reason = Some(reason.clone());
                self.transition(lobby, LobbyState::WorkerFailed).await?;
                self.notify(
                    ChatTarget::League(lobby.league_id),
                    Notification::LobbyFailed {
                        lobby_id: lobby.id,
                        reason,
                    },
                )
                .await;
                effects.push(Effect::RunLobby(lobby.id));
                Ok(())
            }
        }
    }

    pub(crate) async fn evict_worker(&self, worker_id: &str, reason: &str) -> Result<()> {
        self.scheduler.evict(worker_id, reason).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_worker_eviction();
            metrics.set_live_workers(self.scheduler.registry().live_count());
        }
        Ok(())
    }

    /// Account to side mapping the hosted lobby must reach before launch
    pub(crate) async fn expected_seats(&self, lobby: &Lobby) -> Result<HashMap<AccountId, GameSide>> {
        let (rows, players) = self.roster(lobby.id).await?;
        let primary = lobby.selection.primary_side.unwrap_or(Faction::One);
        Ok(rows
            .iter()
            .filter_map(|row| {
                let player = players.get(&row.player_id)?;
                let side = if row.faction == primary {
                    GameSide::Primary
                } else {
                    GameSide::Secondary
                };
                Some((player.account_id, side))
            })
            .collect())
    }

    async fn invite_players(&self, lobby: &mut Lobby) -> Result<()> {
        let Some(handle) = self.live_handle(lobby)? else {
            return self.transition(lobby, LobbyState::WorkerAssigned).await;
        };

        let expected = self.expected_seats(lobby).await?;
        let mut accounts: Vec<AccountId> = expected.keys().copied().collect();
        accounts.sort_unstable();
        for account in accounts {
            handle.invite(account).await?;
        }
        info!("Lobby {} invited {} players", lobby.id, expected.len());
        self.transition(lobby, LobbyState::WaitingForPlayers).await
    }

    async fn launch_when_seated(&self, lobby: &mut Lobby) -> Result<()> {
        let Some(handle) = self.live_handle(lobby)? else {
            warn!("Worker for lobby {} disappeared before launch", lobby.id);
            return self.transition(lobby, LobbyState::WorkerAssigned).await;
        };
        if lobby.launched_at.is_some() {
            return Ok(());
        }

        let expected = self.expected_seats(lobby).await?;
        let snapshot = handle.team_snapshot().await?;
        if !snapshot.matches(&expected) {
            debug!(
                "Lobby {}: {} of {} players seated",
                lobby.id,
                expected
                    .iter()
                    .filter(|(account, side)| snapshot.seats.get(*account) == Some(*side))
                    .count(),
                expected.len()
            );
            return Ok(());
        }

        handle.launch().await?;
        lobby.launched_at = Some(Utc::now());
        self.save(lobby).await?;
        info!("Lobby {} launched", lobby.id);
        Ok(())
    }

    fn live_handle(&self, lobby: &Lobby) -> Result<Option<crate::worker::WorkerHandle>> {
        match &lobby.worker_id {
            Some(worker_id) => self.scheduler.handle(worker_id),
            None => Ok(None),
        }
    }

    /// Tell the worker to leave and unbind it
    async fn dismiss_worker(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        if let Some(handle) = self.live_handle(lobby)? {
            if let Err(e) = handle.leave_lobby().await {
                warn!("Worker {} failed to leave lobby {}: {}", handle.worker_id(), lobby.id, e);
            }
        }
        if let Some(worker_id) = self.scheduler.release(lobby).await? {
            effects.push(Effect::WorkerAvailable(worker_id));
        }
        Ok(())
    }

    async fn complete_with_stats(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        let league = self.load_league(lobby.league_id).await?;
        let (rows, mut players) = self.roster(lobby.id).await?;

        let team = |faction: Faction| -> Vec<(PlayerId, f64)> {
            rows.iter()
                .filter(|row| row.faction == faction)
                .filter_map(|row| players.get(&row.player_id).map(|p| (p.id.clone(), p.rating)))
                .collect()
        };
        let (one, two) = (team(Faction::One), team(Faction::Two));

        let mut changes = Vec::new();
        if !one.is_empty() && !two.is_empty() {
            let result = self.rating.calculate_team_changes(&one, &two, lobby.winner)?;
            for change in &result.rating_changes {
                if let Some(player) = players.get_mut(&change.player_id) {
                    player.rating = change.new_rating;
                    self.store.save_player(player).await?;
                }
                if let Some(season_id) = league.current_season_id {
                    let faction = rows
                        .iter()
                        .find(|row| row.player_id == change.player_id)
                        .map(|row| row.faction);
                    let mut record = self
                        .store
                        .get_rating(&change.player_id, season_id)
                        .await?
                        .unwrap_or_else(|| RatingRecord {
                            player_id: change.player_id.clone(),
                            season_id,
                            rating: self.rating.initial_rating(),
                            wins: 0,
                            losses: 0,
                        });
                    record.rating += change.change;
                    match (lobby.winner, faction) {
                        (Some(winner), Some(faction)) if winner.is_assigned() && winner == faction => record.wins += 1,
                        (Some(winner), Some(_)) if winner.is_assigned() => record.losses += 1,
                        _ => {}
                    }
                    self.store.save_rating(&record).await?;
                }
            }
            info!(
                "Lobby {} ratings updated (match quality {:.2})",
                lobby.id, result.match_quality
            );
            changes = result.rating_changes;
        }

        self.dismiss_worker(lobby, effects).await?;
        self.transition(lobby, LobbyState::Completed).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_match_completed(true);
        }
        self.notify(
            ChatTarget::League(lobby.league_id),
            Notification::MatchCompleted {
                lobby_id: lobby.id,
                match_id: lobby.match_id,
                winner: lobby.winner,
                rating_changes: changes,
            },
        )
        .await;
        Ok(())
    }

    async fn complete_without_stats(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        self.dismiss_worker(lobby, effects).await?;
        self.transition(lobby, LobbyState::CompletedNoStats).await?;
        if let Some(metrics) = &self.metrics {
            metrics.record_match_completed(false);
        }
        self.notify(
            ChatTarget::League(lobby.league_id),
            Notification::MatchCompleted {
                lobby_id: lobby.id,
                match_id: lobby.match_id,
                winner: lobby.winner,
                rating_changes: Vec::new(),
            },
        )
        .await;
        Ok(())
    }

    async fn kill(&self, lobby: &mut Lobby, effects: &mut Vec<Effect>) -> Result<()> {
        effects.push(Effect::CancelReadyCheckTimer(lobby.id));
        effects.push(Effect::CancelWorkerWait(lobby.id));
        let started = lobby.launched_at.is_some() || lobby.match_id.is_some();

        if let Some(handle) = self.live_handle(lobby)? {
            let teardown = if started {
                handle.abandon_match().await
            } else if lobby.external_lobby_id.is_some() {
                handle.destroy_lobby().await
            } else {
                Ok(())
            };
            if let Err(e) = teardown {
                warn!("Worker {} failed to tear down lobby {}: {}", handle.worker_id(), lobby.id, e);
            }
        }
        if let Some(worker_id) = self.scheduler.release(lobby).await? {
            effects.push(Effect::WorkerAvailable(worker_id));
        }

        if let Some(room) = lobby.room.take() {
            let _guard = self.room_locks.acquire(&lobby.id).await;
            if let Err(e) = self.chat.remove_room(&room).await {
                warn!("Failed to remove room {} of lobby {}: {}", room, lobby.id, e);
            }
        }

        let players = self.store.clear_lobby_players(lobby.id).await?;
        self.store.clear_queues(&players).await?;
        if lobby.slot.kind == QueueKind::Challenge {
            let cleared = self.store.clear_slot(lobby.league_id, &lobby.slot.id).await?;
            debug!("Cleared {} members of challenge slot {}", cleared.len(), lobby.slot.id);
            if let Some(challenge_id) = lobby.challenge_id {
                self.store.delete_challenge(challenge_id).await?;
            }
        }

        self.transition(lobby, LobbyState::Killed).await?;
        self.notify(ChatTarget::League(lobby.league_id), Notification::LobbyKilled { lobby_id: lobby.id })
            .await;

        if !started && lobby.slot.kind != QueueKind::Challenge {
            if let Some(replacement) = self.ensure_slot_lobby(lobby.league_id, &lobby.slot).await? {
                effects.push(Effect::RunLobby(replacement));
            }
        }
        Ok(())
    }
}

pub(crate) fn ready_deadline(started: DateTime<Utc>, league: &League) -> DateTime<Utc> {
    started + chrono::Duration::seconds(league.ready_check_timeout_seconds as i64)
}

fn random_faction<R: Rng + ?Sized>(rng: &mut R) -> Faction {
    if rng.gen_bool(0.5) {
        Faction::One
    } else {
        Faction::Two
    }
}
