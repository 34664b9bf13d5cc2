//! Unique lobby names

use crate::error::Result;
use crate::store::Store;
use crate::types::{League, LobbyId};
use crate::utils::render_name_template;
use tracing::{debug, warn};

/// Candidate name for one attempt.
///
/// Templates without `{id}` render the same text every time, so later
/// attempts get the counter appended.
fn candidate_name(league: &League, slot_id: &str, counter: u32) -> String {
    let rendered = render_name_template(&league.lobby_name_template, &league.name, slot_id, counter);
    if counter > 1 && !league.lobby_name_template.contains("{id}") {
        format!("{}-{}", rendered, counter)
    } else {
        rendered
    }
}

/// First free name for the league's template.
///
/// Each live lobby holds at most one counter, so the search covers the live
/// count plus `max_attempts`. If the store still reports every candidate as
/// taken the lobby id is appended, which never collides.
pub async fn unique_lobby_name(
    store: &dyn Store,
    league: &League,
    slot_id: &str,
    lobby_id: LobbyId,
    max_attempts: u32,
) -> Result<String> {
    let live = store
        .list_lobbies()
        .await?
        .iter()
        .filter(|lobby| lobby.league_id == league.id && lobby.id != lobby_id)
        .filter(|lobby| !lobby.state.is_terminal() && lobby.name.is_some())
        .count() as u32;

    for counter in 1..=live.saturating_add(max_attempts) {
        let candidate = candidate_name(league, slot_id, counter);
        if !store.lobby_name_taken(league.id, &candidate).await? {
            return Ok(candidate);
        }
        debug!("Lobby name '{}' is taken", candidate);
    }

    let base = render_name_template(&league.lobby_name_template, &league.name, slot_id, 0);
    warn!(
        "No free name for template '{}' in league {}, falling back to the lobby id",
        league.lobby_name_template, league.id
    );
    Ok(format!("{}-{}", base, lobby_id.simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeagueDefaults;
    use crate::lobby::LobbyState;
    use crate::store::InMemoryStore;
    use crate::types::{Lobby, QueueKind, QueueSlot};
    use uuid::Uuid;

    async fn seed_live(store: &InMemoryStore, league: &League, names: &[String]) {
        for name in names {
            let mut lobby = Lobby::new(league.id, QueueSlot::new("draft", QueueKind::Draft));
            lobby.state = LobbyState::MatchInProgress;
            lobby.name = Some(name.clone());
            store.save_lobby(&lobby).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_skips_names_held_by_live_lobbies() {
        let store = InMemoryStore::new();
        let league = LeagueDefaults::default().build_league(Uuid::new_v4(), "mid");

        let mut live = Lobby::new(league.id, QueueSlot::new("draft", QueueKind::Draft));
        live.state = LobbyState::CheckingReady;
        live.name = Some("mid-1".to_string());
        store.save_lobby(&live).await.unwrap();

        let mut finished = Lobby::new(league.id, QueueSlot::new("draft", QueueKind::Draft));
        finished.state = LobbyState::Completed;
        finished.name = Some("mid-2".to_string());
        store.save_lobby(&finished).await.unwrap();

        let name = unique_lobby_name(&store, &league, "draft", Uuid::new_v4(), 10).await.unwrap();
        assert_eq!(name, "mid-2");
    }

    #[tokio::test]
    async fn test_search_extends_past_live_lobbies() {
        let store = InMemoryStore::new();
        let league = LeagueDefaults::default().build_league(Uuid::new_v4(), "mid");
        let names: Vec<String> = (1..=3).map(|counter| format!("mid-{}", counter)).collect();
        seed_live(&store, &league, &names).await;

        let name = unique_lobby_name(&store, &league, "draft", Uuid::new_v4(), 1).await.unwrap();
        assert_eq!(name, "mid-4");
    }

    #[tokio::test]
    async fn test_template_without_counter_gets_suffix() {
        let store = InMemoryStore::new();
        let mut league = LeagueDefaults::default().build_league(Uuid::new_v4(), "mid");
        league.lobby_name_template = "{league} inhouse".to_string();
        seed_live(&store, &league, &["mid inhouse".to_string()]).await;

        let name = unique_lobby_name(&store, &league, "draft", Uuid::new_v4(), 3).await.unwrap();
        assert_eq!(name, "mid inhouse-2");
    }
}
