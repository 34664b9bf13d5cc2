//! Operator command handlers

use crate::coordinator::event::{OperatorCommand, OperatorReply};
use crate::error::{OrchestratorError, Result};
use crate::lobby::{Effect, LobbyMachine};
use crate::matchmaking::{compile_captain_pattern, validate_draft_order};
use crate::types::{League, WorkerStatus};
use std::collections::HashSet;
use tracing::{info, warn};

pub(crate) async fn handle_operator_command(
    machine: &LobbyMachine,
    command: OperatorCommand,
) -> Result<(OperatorReply, Vec<Effect>)> {
    info!("Operator command: {:?}", command);
    match command {
        OperatorCommand::ForceState { lobby_id, state } => {
            let effects = machine.force_state(lobby_id, state).await?;
            Ok((OperatorReply::Done, effects))
        }
        OperatorCommand::AssignCaptains {
            lobby_id,
            first,
            second,
        } => {
            let effects = machine.assign_captains(lobby_id, &first, &second).await?;
            Ok((OperatorReply::Done, effects))
        }
        OperatorCommand::SetWorkerStatus { worker_id, status } => {
            let scheduler = machine.scheduler();
            scheduler.set_status(&worker_id, status).await?;
            let effects = match status {
                WorkerStatus::Online => vec![Effect::WorkerAvailable(worker_id)],
                WorkerStatus::Unavailable => {
                    // Stop the runner; a bound lobby notices at its next step
                    if scheduler.registry().evict(&worker_id)? {
                        warn!("Worker {} marked unavailable while live", worker_id);
                    }
                    Vec::new()
                }
                WorkerStatus::Loading | WorkerStatus::Offline => Vec::new(),
            };
            Ok((OperatorReply::Done, effects))
        }
        OperatorCommand::AddWorker { worker } => {
            let worker_id = worker.id.clone();
            machine.scheduler().register(worker).await?;
            Ok((OperatorReply::Done, vec![Effect::WorkerAvailable(worker_id)]))
        }
        OperatorCommand::RemoveWorker { worker_id } => {
            machine.scheduler().remove(&worker_id).await?;
            Ok((OperatorReply::Done, Vec::new()))
        }
        OperatorCommand::ListWorkers => {
            let workers = machine.scheduler().list().await?;
            Ok((OperatorReply::Workers(workers), Vec::new()))
        }
        OperatorCommand::ConfigureLeague { league } => {
            let effects = configure_league(machine, league).await?;
            Ok((OperatorReply::Done, effects))
        }
        OperatorCommand::StartSeason { league_id, name } => {
            machine.load_league(league_id).await?;
            let season = machine.store.start_season(league_id, &name).await?;
            info!("League {} started season '{}' ({})", league_id, season.name, season.id);
            Ok((OperatorReply::Season(season), Vec::new()))
        }
    }
}

/// Validate and store a league, opening a lobby for each of its slots
async fn configure_league(machine: &LobbyMachine, league: League) -> Result<Vec<Effect>> {
    compile_captain_pattern(&league.captain_role_pattern)?;
    validate_draft_order(&league.draft_order)?;

    let mut seen = HashSet::new();
    if let Some(duplicate) = league.slots.iter().find(|slot| !seen.insert(slot.id.as_str())) {
        return Err(OrchestratorError::ConfigurationError {
            message: format!("League {} declares slot '{}' twice", league.name, duplicate.id),
        }
        .into());
    }

    machine.store.save_league(&league).await?;
    info!("Configured league {} with {} slots", league.name, league.slots.len());

    let mut effects = Vec::new();
    for slot in &league.slots {
        if let Some(lobby_id) = machine.ensure_slot_lobby(league.id, slot).await? {
            effects.push(Effect::RunLobby(lobby_id));
        }
    }
    Ok(effects)
}
