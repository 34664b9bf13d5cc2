//! Player command handlers
//!
//! Thin handlers over the lobby machine. Each validates the command against
//! current records, persists what the player asked for, and returns the lobby
//! runs the change makes necessary.

use crate::chat::{ChatTarget, MemberQuery, Notification};
use crate::coordinator::event::PlayerCommand;
use crate::error::{OrchestratorError, Result};
use crate::lobby::{Effect, LobbyMachine};
use crate::types::{Challenge, LeagueId, Player, PlayerId, QueueMembership, SlotId};
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) async fn handle_player_command(machine: &LobbyMachine, command: PlayerCommand) -> Result<Vec<Effect>> {
    debug!("Player command from {}: {:?}", command.player_id(), command);
    match command {
        PlayerCommand::Register { player } => {
            register(machine, player).await?;
            Ok(Vec::new())
        }
        PlayerCommand::JoinQueue {
            player_id,
            league_id,
            slot_id,
        } => join_queue(machine, &player_id, league_id, slot_id).await,
        PlayerCommand::LeaveQueue {
            player_id,
            league_id,
            slot_id,
        } => leave_queue(machine, &player_id, league_id, slot_id).await,
        PlayerCommand::Ready { player_id } => machine.record_ready(&player_id).await,
        PlayerCommand::ChooseDraftOrder {
            player_id,
            draft_first,
        } => machine.record_draft_order_choice(&player_id, draft_first).await,
        PlayerCommand::ChooseSide {
            player_id,
            take_primary,
        } => machine.record_side_choice(&player_id, take_primary).await,
        PlayerCommand::Pick { captain_id, pick } => {
            let captain = load_player(machine, &captain_id).await?;
            let picked = resolve(machine, captain.league_id, pick).await?;
            machine.record_pick(&captain_id, &picked).await
        }
        PlayerCommand::IssueChallenge { giver, recipient } => {
            issue_challenge(machine, &giver, recipient).await?;
            Ok(Vec::new())
        }
        PlayerCommand::AcceptChallenge { player_id, giver } => accept_challenge(machine, &player_id, &giver).await,
        PlayerCommand::SetGameMode { player_id, mode } => {
            let mut player = load_player(machine, &player_id).await?;
            player.game_mode_preference = mode;
            machine.store.save_player(&player).await?;
            info!("{} set game mode preference to {:?}", player_id, mode);
            Ok(Vec::new())
        }
    }
}

async fn load_player(machine: &LobbyMachine, player_id: &str) -> Result<Player> {
    machine.store.get_player(player_id).await?.ok_or_else(|| {
        OrchestratorError::PlayerNotFound {
            player_id: player_id.to_string(),
        }
        .into()
    })
}

async fn resolve(machine: &LobbyMachine, league_id: LeagueId, query: MemberQuery) -> Result<PlayerId> {
    machine
        .chat
        .resolve_member(league_id, query.clone())
        .await?
        .ok_or_else(|| OrchestratorError::invalid_command(format!("No community member matches {:?}", query)).into())
}

/// Insert or refresh a player; rating and queue ban survive re-registration
async fn register(machine: &LobbyMachine, mut player: Player) -> Result<()> {
    match machine.store.get_player(&player.id).await? {
        Some(existing) => {
            player.rating = existing.rating;
            player.queue_banned_until = existing.queue_banned_until;
        }
        None if player.rating <= 0.0 => {
            let league = machine.load_league(player.league_id).await?;
            player.rating = league.initial_rating;
        }
        None => {}
    }
    machine.store.save_player(&player).await?;
    info!("Registered player {} ({})", player.id, player.nickname);
    Ok(())
}

async fn join_queue(
    machine: &LobbyMachine,
    player_id: &str,
    league_id: LeagueId,
    slot_id: SlotId,
) -> Result<Vec<Effect>> {
    let player = load_player(machine, player_id).await?;
    let now = Utc::now();
    if player.is_queue_banned(now) {
        return Err(OrchestratorError::QueueBanned {
            player_id: player.id.clone(),
            until: player
                .queue_banned_until
                .map(|until| until.to_rfc3339())
                .unwrap_or_default(),
        }
        .into());
    }
    if let Some(lobby) = machine.store.active_lobby_for_player(player_id).await? {
        return Err(OrchestratorError::invalid_command(format!(
            "{} is already playing in lobby {}",
            player_id, lobby.id
        ))
        .into());
    }

    let league = machine.load_league(league_id).await?;
    let configured = league.slot(&slot_id).cloned();
    let lobbies = machine.store.lobbies_for_slot(league_id, &slot_id).await?;
    if configured.is_none() && !lobbies.iter().any(|lobby| lobby.state.is_open()) {
        return Err(OrchestratorError::invalid_command(format!(
            "League {} has no open queue '{}'",
            league.name, slot_id
        ))
        .into());
    }

    machine
        .store
        .join_queue(QueueMembership {
            player_id: player_id.to_string(),
            league_id,
            slot_id: slot_id.clone(),
            active: true,
            joined_at: now,
        })
        .await?;
    let queued = machine.store.queue_members(league_id, &slot_id).await?.len();
    info!("{} joined queue '{}' ({} queued)", player_id, slot_id, queued);
    machine
        .notify(
            ChatTarget::League(league_id),
            Notification::QueueUpdated {
                slot: slot_id.clone(),
                queued,
            },
        )
        .await;

    let mut effects = Vec::new();
    if let Some(slot) = configured {
        if let Some(opened) = machine.ensure_slot_lobby(league_id, &slot).await? {
            effects.push(Effect::RunLobby(opened));
        }
    }
    effects.extend(open_lobby_runs(machine, league_id, &slot_id).await?);
    Ok(effects)
}

async fn leave_queue(
    machine: &LobbyMachine,
    player_id: &str,
    league_id: LeagueId,
    slot_id: Option<SlotId>,
) -> Result<Vec<Effect>> {
    let slots: Vec<SlotId> = match slot_id {
        Some(slot_id) => vec![slot_id],
        None => machine
            .store
            .memberships_for(player_id)
            .await?
            .into_iter()
            .filter(|membership| membership.league_id == league_id)
            .map(|membership| membership.slot_id)
            .collect(),
    };

    let mut left = Vec::new();
    for slot_id in slots {
        if machine.store.leave_queue(player_id, league_id, &slot_id).await? {
            info!("{} left queue '{}'", player_id, slot_id);
            left.push(slot_id);
        }
    }

    for challenge in machine.store.challenges_for(player_id).await? {
        if !challenge.accepted {
            machine.store.delete_challenge(challenge.id).await?;
            debug!("Withdrew challenge {} after {} left queue", challenge.id, player_id);
        }
    }

    let mut effects = Vec::new();
    for slot_id in &left {
        effects.extend(open_lobby_runs(machine, league_id, slot_id).await?);
    }
    Ok(effects)
}

/// Runs for every lobby of a slot that is still gathering players
pub(crate) async fn open_lobby_runs(machine: &LobbyMachine, league_id: LeagueId, slot_id: &str) -> Result<Vec<Effect>> {
    Ok(machine
        .store
        .lobbies_for_slot(league_id, slot_id)
        .await?
        .into_iter()
        .filter(|lobby| lobby.state.is_open())
        .map(|lobby| Effect::RunLobby(lobby.id))
        .collect())
}

async fn issue_challenge(machine: &LobbyMachine, giver: &str, recipient: MemberQuery) -> Result<()> {
    let challenger = load_player(machine, giver).await?;
    let recipient = resolve(machine, challenger.league_id, recipient).await?;
    if recipient == giver {
        return Err(OrchestratorError::invalid_command("Players cannot challenge themselves").into());
    }
    load_player(machine, &recipient).await?;

    let existing = match machine.store.find_challenge(giver, &recipient).await? {
        Some(challenge) => Some(challenge),
        None => machine.store.find_challenge(&recipient, giver).await?,
    };
    if existing.is_some() {
        return Err(OrchestratorError::invalid_command(format!(
            "A challenge between {} and {} already exists",
            giver, recipient
        ))
        .into());
    }

    let challenge = Challenge {
        id: Uuid::new_v4(),
        league_id: challenger.league_id,
        giver: giver.to_string(),
        recipient: recipient.clone(),
        accepted: false,
        created_at: Utc::now(),
    };
    machine.store.save_challenge(&challenge).await?;
    info!("{} challenged {} ({})", giver, recipient, challenge.id);
    machine
        .notify(
            ChatTarget::League(challenge.league_id),
            Notification::ChallengeIssued {
                giver: challenge.giver,
                recipient: challenge.recipient,
            },
        )
        .await;
    Ok(())
}

async fn accept_challenge(machine: &LobbyMachine, player_id: &str, giver: &str) -> Result<Vec<Effect>> {
    let mut challenge = machine
        .store
        .find_challenge(giver, player_id)
        .await?
        .ok_or_else(|| OrchestratorError::invalid_command(format!("{} has not challenged {}", giver, player_id)))?;
    if challenge.accepted {
        return Err(OrchestratorError::invalid_command(format!("Challenge {} was already accepted", challenge.id)).into());
    }
    for party in [giver, player_id] {
        if let Some(lobby) = machine.store.active_lobby_for_player(party).await? {
            return Err(OrchestratorError::invalid_command(format!(
                "{} is already playing in lobby {}",
                party, lobby.id
            ))
            .into());
        }
    }

    challenge.accepted = true;
    machine.store.save_challenge(&challenge).await?;
    let lobby_id = machine.create_challenge_lobby(&challenge).await?;
    info!("{} accepted challenge {} from {}", player_id, challenge.id, giver);
    Ok(vec![Effect::RunLobby(lobby_id)])
}
