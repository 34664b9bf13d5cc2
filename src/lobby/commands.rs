//! Externally triggered lobby transitions
//!
//! Player choices, worker callbacks, feed results and operator overrides all
//! land here. Each records its input, persists it, and re-runs the lobby.

use crate::chat::{ChatTarget, Notification, SelectionDecision};
use crate::error::{OrchestratorError, Result};
use crate::lobby::machine::{Effect, LobbyMachine};
use crate::lobby::state::LobbyState;
use crate::matchmaking::drafting_faction;
use crate::results::FeedStatus;
use crate::store::challenge_slot_id;
use crate::types::{
    Challenge, Faction, GameSide, LeagueId, Lobby, LobbyId, MatchId, PlayerId, QueueKind, QueueMembership,
    QueueSlot,
};
use chrono::Utc;
use tracing::{debug, info, warn};

fn wrong_state(lobby: &Lobby, action: &str) -> anyhow::Error {
    OrchestratorError::InvalidTransition {
        lobby_id: lobby.id.to_string(),
        reason: format!("cannot {} while {}", action, lobby.state),
    }
    .into()
}

impl LobbyMachine {
    async fn lobby_of_player(&self, player_id: &str) -> Result<Lobby> {
        self.store
            .active_lobby_for_player(player_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::invalid_command(format!("{} is not in an active lobby", player_id)).into()
            })
    }

    async fn lobby_of_worker(&self, worker_id: &str) -> Result<Option<Lobby>> {
        self.store.lobby_for_worker(worker_id).await
    }

    fn require_captain(lobby: &Lobby, player_id: &str) -> Result<Faction> {
        Self::captain_faction(lobby, player_id).ok_or_else(|| {
            OrchestratorError::invalid_command(format!("{} is not a captain of lobby {}", player_id, lobby.id)).into()
        })
    }

    /// Open a lobby for a queue slot unless one is already accepting players
    pub async fn ensure_slot_lobby(&self, league_id: LeagueId, slot: &QueueSlot) -> Result<Option<LobbyId>> {
        let existing = self.store.lobbies_for_slot(league_id, &slot.id).await?;
        if existing.iter().any(|lobby| lobby.state.is_open()) {
            return Ok(None);
        }

        let lobby = Lobby::new(league_id, slot.clone());
        self.store.save_lobby(&lobby).await?;
        info!("Opened lobby {} for slot '{}'", lobby.id, slot.id);
        self.notify(
            ChatTarget::League(league_id),
            Notification::LobbyOpened {
                lobby_id: lobby.id,
                slot: slot.id.clone(),
            },
        )
        .await;
        Ok(Some(lobby.id))
    }

    /// Open the dedicated lobby for an accepted challenge, queueing both captains
    pub async fn create_challenge_lobby(&self, challenge: &Challenge) -> Result<LobbyId> {
        let slot = QueueSlot::new(challenge_slot_id(challenge.id), QueueKind::Challenge);
        let mut lobby = Lobby::new(challenge.league_id, slot.clone());
        lobby.captain_1 = Some(challenge.giver.clone());
        lobby.captain_2 = Some(challenge.recipient.clone());
        lobby.challenge_id = Some(challenge.id);
        self.store.save_lobby(&lobby).await?;

        let now = Utc::now();
        for player_id in [&challenge.giver, &challenge.recipient] {
            self.store
                .join_queue(QueueMembership {
                    player_id: player_id.clone(),
                    league_id: challenge.league_id,
                    slot_id: slot.id.clone(),
                    active: true,
                    joined_at: now,
                })
                .await?;
        }

        info!(
            "Opened challenge lobby {} for {} vs {}",
            lobby.id, challenge.giver, challenge.recipient
        );
        self.notify(
            ChatTarget::League(challenge.league_id),
            Notification::LobbyOpened {
                lobby_id: lobby.id,
                slot: slot.id,
            },
        )
        .await;
        Ok(lobby.id)
    }

    pub async fn record_ready(&self, player_id: &str) -> Result<Vec<Effect>> {
        let lobby = self.lobby_of_player(player_id).await?;
        if lobby.state != LobbyState::CheckingReady {
            return Err(wrong_state(&lobby, "ready up"));
        }

        let mut row = self
            .store
            .lobby_players(lobby.id)
            .await?
            .into_iter()
            .find(|row| row.player_id == player_id)
            .ok_or_else(|| OrchestratorError::PlayerNotFound {
                player_id: player_id.to_string(),
            })?;
        if !row.ready {
            row.ready = true;
            self.store.save_lobby_player(&row).await?;
            debug!("{} is ready in lobby {}", player_id, lobby.id);
        }
        self.run(lobby.id).await
    }

    /// The captain without priority decides whether they draft first
    pub async fn record_draft_order_choice(&self, player_id: &str, draft_first: bool) -> Result<Vec<Effect>> {
        let mut lobby = self.lobby_of_player(player_id).await?;
        if lobby.state != LobbyState::SelectionPriority {
            return Err(wrong_state(&lobby, "choose draft order"));
        }
        let faction = Self::require_captain(&lobby, player_id)?;
        let first = lobby.selection.choose_draft_order(faction, draft_first)?;
        self.save(&mut lobby).await?;
        info!("Lobby {}: {} drafts first", lobby.id, first);

        if let Some(priority) = lobby.selection.priority {
            if let Some(captain) = Self::faction_captain(&lobby, priority) {
                self.notify(
                    Self::room_target(&lobby),
                    Notification::SelectionPrompt {
                        lobby_id: lobby.id,
                        captain,
                        decision: SelectionDecision::Side,
                    },
                )
                .await;
            }
        }
        self.run(lobby.id).await
    }

    /// The priority captain decides which side their faction plays on
    pub async fn record_side_choice(&self, player_id: &str, take_primary: bool) -> Result<Vec<Effect>> {
        let mut lobby = self.lobby_of_player(player_id).await?;
        if lobby.state != LobbyState::SelectionPriority {
            return Err(wrong_state(&lobby, "choose a side"));
        }
        let faction = Self::require_captain(&lobby, player_id)?;
        let primary = lobby.selection.choose_side(faction, take_primary)?;
        self.save(&mut lobby).await?;
        info!("Lobby {}: {} plays the primary side", lobby.id, primary);
        self.run(lobby.id).await
    }

    pub async fn record_pick(&self, captain_id: &str, picked_id: &str) -> Result<Vec<Effect>> {
        let lobby = self.lobby_of_player(captain_id).await?;
        if lobby.state != LobbyState::DraftingPlayers {
            return Err(wrong_state(&lobby, "pick"));
        }
        let faction = Self::require_captain(&lobby, captain_id)?;

        let league = self.load_league(lobby.league_id).await?;
        let rows = self.store.lobby_players(lobby.id).await?;
        let undrafted = rows.iter().filter(|row| !row.faction.is_assigned()).count();
        let turn = lobby
            .selection
            .first_pick
            .and_then(|first| drafting_faction(&league.draft_order, undrafted, first));
        if turn != Some(faction) {
            return Err(OrchestratorError::invalid_command(format!(
                "it is not {}'s turn to pick (turn: {:?})",
                captain_id, turn
            ))
            .into());
        }

        let mut row = rows
            .into_iter()
            .find(|row| row.player_id == picked_id)
            .ok_or_else(|| OrchestratorError::PlayerNotFound {
                player_id: picked_id.to_string(),
            })?;
        if row.faction.is_assigned() {
            return Err(OrchestratorError::invalid_command(format!("{} was already drafted", picked_id)).into());
        }
        row.faction = faction;
        self.store.save_lobby_player(&row).await?;
        info!("Lobby {}: {} drafted {} to {}", lobby.id, captain_id, picked_id, faction);

        self.notify(
            Self::room_target(&lobby),
            Notification::PlayerDrafted {
                lobby_id: lobby.id,
                captain: captain_id.to_string(),
                player: picked_id.to_string(),
                faction,
            },
        )
        .await;
        if undrafted > 1 {
            self.announce_draft_turn(&lobby).await?;
        }
        self.run(lobby.id).await
    }

    /// The worker's game launched and was assigned a match id
    pub async fn mark_match_started(&self, worker_id: &str, match_id: MatchId) -> Result<Vec<Effect>> {
        let Some(mut lobby) = self.lobby_of_worker(worker_id).await? else {
            warn!("Worker {} reported match {} without a lobby", worker_id, match_id);
            return Ok(Vec::new());
        };
        if !matches!(lobby.state, LobbyState::WorkerStarted | LobbyState::WaitingForPlayers) {
            return Err(wrong_state(&lobby, "start a match"));
        }

        lobby.match_id = Some(match_id);
        lobby.launched_at.get_or_insert_with(Utc::now);
        self.transition(&mut lobby, LobbyState::MatchInProgress).await?;
        self.notify(
            ChatTarget::League(lobby.league_id),
            Notification::MatchStarted {
                lobby_id: lobby.id,
                match_id,
            },
        )
        .await;
        Ok(Vec::new())
    }

    /// The worker saw the game end; the feed decides between stats and no stats
    pub async fn mark_match_ended(&self, worker_id: &str, winning_side: Option<GameSide>) -> Result<Vec<Effect>> {
        let Some(mut lobby) = self.lobby_of_worker(worker_id).await? else {
            warn!("Worker {} reported a match end without a lobby", worker_id);
            return Ok(Vec::new());
        };
        if lobby.state != LobbyState::MatchInProgress {
            return Err(wrong_state(&lobby, "end a match"));
        }

        if let Some(side) = winning_side {
            lobby.winner = Some(winner_for_side(&lobby, side));
        }
        self.transition(&mut lobby, LobbyState::MatchEnded).await?;
        Ok(Vec::new())
    }

    /// Apply a statistics feed answer to a running or ended match
    pub async fn record_results(&self, lobby_id: LobbyId, status: FeedStatus) -> Result<Vec<Effect>> {
        let mut lobby = self.load_lobby(lobby_id).await?;
        if !matches!(lobby.state, LobbyState::MatchInProgress | LobbyState::MatchEnded) {
            return Err(wrong_state(&lobby, "record results"));
        }

        match status {
            FeedStatus::NotYet => {
                debug!("Results for lobby {} not ready yet", lobby.id);
                return Ok(Vec::new());
            }
            FeedStatus::Unavailable => {
                warn!("Results for lobby {} are unavailable", lobby.id);
                self.transition(&mut lobby, LobbyState::MatchNoStats).await?;
            }
            FeedStatus::Ready(stats) => {
                let (rows, players) = self.roster(lobby.id).await?;
                for mut row in rows {
                    let line = players
                        .get(&row.player_id)
                        .and_then(|player| stats.for_account(player.account_id));
                    if let Some(line) = line {
                        row.stats = Some(line.clone());
                        self.store.save_lobby_player(&row).await?;
                    }
                }
                if let Some(side) = stats.winning_side {
                    lobby.winner = Some(winner_for_side(&lobby, side));
                }
                lobby.match_id.get_or_insert(stats.match_id);
                self.transition(&mut lobby, LobbyState::MatchStats).await?;
            }
        }
        self.run(lobby.id).await
    }

    /// Operator override of a lobby's state
    pub async fn force_state(&self, lobby_id: LobbyId, state: LobbyState) -> Result<Vec<Effect>> {
        let mut lobby = self.load_lobby(lobby_id).await?;
        warn!("Forcing lobby {} from {} to {}", lobby.id, lobby.state, state);
        if lobby.state.is_terminal() && !state.is_terminal() {
            lobby.failure_reason = None;
        }
        self.transition(&mut lobby, state).await?;
        self.run(lobby.id).await
    }

    /// Operator override of the captain pair before drafting starts
    pub async fn assign_captains(&self, lobby_id: LobbyId, first: &str, second: &str) -> Result<Vec<Effect>> {
        let mut lobby = self.load_lobby(lobby_id).await?;
        if !matches!(
            lobby.state,
            LobbyState::CheckingReady | LobbyState::AssigningCaptains | LobbyState::SelectionPriority
        ) {
            return Err(wrong_state(&lobby, "assign captains"));
        }
        if first == second {
            return Err(OrchestratorError::invalid_command("captains must be two different players").into());
        }

        let rows = self.store.lobby_players(lobby.id).await?;
        for captain in [first, second] {
            if !rows.iter().any(|row| row.player_id == captain) {
                return Err(OrchestratorError::PlayerNotFound {
                    player_id: captain.to_string(),
                }
                .into());
            }
        }
        for mut row in rows {
            if row.faction.is_assigned() {
                row.faction = Faction::Unassigned;
                self.store.save_lobby_player(&row).await?;
            }
        }

        lobby.captain_1 = Some(first.to_string());
        lobby.captain_2 = Some(second.to_string());
        lobby.selection = Default::default();
        self.save(&mut lobby).await?;
        info!("Lobby {} captains set to {} and {}", lobby.id, first, second);
        self.run(lobby.id).await
    }

    /// A worker died; a lobby that has not launched goes back to acquisition
    pub async fn handle_worker_fatal(&self, worker_id: &str, reason: &str) -> Result<Vec<Effect>> {
        self.evict_worker(worker_id, reason).await?;

        let Some(mut lobby) = self.lobby_of_worker(worker_id).await? else {
            return Ok(Vec::new());
        };
        if !lobby.state.is_hosting() || lobby.launched_at.is_some() {
            warn!(
                "Worker {} failed while lobby {} is {}, leaving it for the operator",
                worker_id, lobby.id, lobby.state
            );
            return Ok(Vec::new());
        }

        self.scheduler.release(&mut lobby).await?;
        self.transition(&mut lobby, LobbyState::WaitingForWorker).await?;
        self.run(lobby.id).await
    }

    /// Drop a player who left the community from every queue
    pub async fn remove_member(&self, player_id: &str) -> Result<Vec<Effect>> {
        let ids = vec![player_id.to_string()];
        self.store.clear_queues(&ids).await?;
        for challenge in self.store.challenges_for(player_id).await? {
            if !challenge.accepted {
                self.store.delete_challenge(challenge.id).await?;
            }
        }

        match self.store.active_lobby_for_player(player_id).await? {
            Some(lobby) => {
                info!("{} departed while in lobby {}", player_id, lobby.id);
                self.run(lobby.id).await
            }
            None => Ok(Vec::new()),
        }
    }

    /// Forward a chat room message into the hosted game lobby
    pub async fn relay_to_game(&self, lobby_id: LobbyId, author: &str, text: &str) -> Result<()> {
        let lobby = self.load_lobby(lobby_id).await?;
        if !lobby.state.relays_chat() {
            debug!("Not relaying chat for lobby {} in {}", lobby.id, lobby.state);
            return Ok(());
        }
        let Some(worker_id) = &lobby.worker_id else {
            return Ok(());
        };
        if let Some(handle) = self.scheduler.handle(worker_id)? {
            handle.send_chat(&format!("{}: {}", author, text)).await?;
        }
        Ok(())
    }

    /// Post a game lobby chat line back to the lobby room
    pub async fn relay_from_game(&self, worker_id: &str, author: &str, text: &str) -> Result<()> {
        if let Some(lobby) = self.lobby_of_worker(worker_id).await? {
            if lobby.room.is_some() {
                self.notify(
                    Self::room_target(&lobby),
                    Notification::Relay {
                        author: author.to_string(),
                        text: text.to_string(),
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Re-run lobbies waiting on seat changes in the game lobby
    pub async fn lobby_members_changed(&self, worker_id: &str) -> Result<Vec<Effect>> {
        match self.lobby_of_worker(worker_id).await? {
            Some(lobby) if lobby.state == LobbyState::WaitingForPlayers => self.run(lobby.id).await,
            _ => Ok(Vec::new()),
        }
    }

    /// Ready check expiry fired by the timer, regardless of wall-clock drift
    pub async fn expire_ready_check(&self, lobby_id: LobbyId) -> Result<Vec<Effect>> {
        let mut lobby = self.load_lobby(lobby_id).await?;
        if lobby.state != LobbyState::CheckingReady {
            return self.run(lobby_id).await;
        }

        let league = self.load_league(lobby.league_id).await?;
        let mut effects = Vec::new();
        self.check_ready(&mut lobby, &league, true, &mut effects).await?;
        effects.extend(self.run(lobby_id).await?);
        Ok(effects)
    }
}

/// Faction sitting on the given side of the game
fn winner_for_side(lobby: &Lobby, side: GameSide) -> Faction {
    let primary = lobby.selection.primary_side.unwrap_or(Faction::One);
    match side {
        GameSide::Primary => primary,
        GameSide::Secondary => primary.opponent(),
    }
}
