//! In-memory store
//!
//! Every table lives behind one `RwLock`, so each trait call observes and
//! mutates a consistent snapshot.

use crate::error::{OrchestratorError, Result};
use crate::lobby::LobbyState;
use crate::store::Store;
use crate::types::{
    Challenge, ChallengeId, League, LeagueId, Lobby, LobbyId, MatchId, Player, PlayerId,
    PlayerInLobby, QueueMembership, RatingRecord, Season, SeasonId, WorkerRecord,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    leagues: HashMap<LeagueId, League>,
    seasons: HashMap<SeasonId, Season>,
    players: HashMap<PlayerId, Player>,
    memberships: Vec<QueueMembership>,
    lobbies: HashMap<LobbyId, Lobby>,
    lobby_players: HashMap<LobbyId, Vec<PlayerInLobby>>,
    workers: HashMap<String, WorkerRecord>,
    challenges: HashMap<ChallengeId, Challenge>,
    ratings: HashMap<(PlayerId, SeasonId), RatingRecord>,
}

impl Tables {
    fn is_active_lobby(&self, lobby_id: &LobbyId) -> bool {
        self.lobbies
            .get(lobby_id)
            .map_or(false, |lobby| !lobby.state.is_terminal())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| OrchestratorError::lock("store").into())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| OrchestratorError::lock("store").into())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_league(&self, league_id: LeagueId) -> Result<Option<League>> {
        Ok(self.read()?.leagues.get(&league_id).cloned())
    }

    async fn save_league(&self, league: &League) -> Result<()> {
        self.write()?.leagues.insert(league.id, league.clone());
        Ok(())
    }

    async fn list_leagues(&self) -> Result<Vec<League>> {
        Ok(self.read()?.leagues.values().cloned().collect())
    }

    async fn get_season(&self, season_id: SeasonId) -> Result<Option<Season>> {
        Ok(self.read()?.seasons.get(&season_id).cloned())
    }

    async fn start_season(&self, league_id: LeagueId, name: &str) -> Result<Season> {
        let mut tables = self.write()?;
        if !tables.leagues.contains_key(&league_id) {
            return Err(OrchestratorError::LeagueNotFound {
                league_id: league_id.to_string(),
            }
            .into());
        }

        for season in tables.seasons.values_mut() {
            if season.league_id == league_id {
                season.active = false;
            }
        }
        let season = Season {
            id: Uuid::new_v4(),
            league_id,
            name: name.to_string(),
            active: true,
            started_at: Utc::now(),
        };
        tables.seasons.insert(season.id, season.clone());
        if let Some(league) = tables.leagues.get_mut(&league_id) {
            league.current_season_id = Some(season.id);
        }
        Ok(season)
    }

    async fn get_player(&self, player_id: &str) -> Result<Option<Player>> {
        Ok(self.read()?.players.get(player_id).cloned())
    }

    async fn get_players(&self, player_ids: &[PlayerId]) -> Result<Vec<Player>> {
        let tables = self.read()?;
        Ok(player_ids
            .iter()
            .filter_map(|id| tables.players.get(id).cloned())
            .collect())
    }

    async fn save_player(&self, player: &Player) -> Result<()> {
        self.write()?.players.insert(player.id.clone(), player.clone());
        Ok(())
    }

    async fn find_player_by_nickname(&self, league_id: LeagueId, nickname: &str) -> Result<Option<Player>> {
        let tables = self.read()?;
        Ok(tables
            .players
            .values()
            .find(|player| player.league_id == league_id && player.nickname.eq_ignore_ascii_case(nickname))
            .cloned())
    }

    async fn join_queue(&self, membership: QueueMembership) -> Result<()> {
        let mut tables = self.write()?;
        match tables.memberships.iter_mut().find(|m| {
            m.player_id == membership.player_id
                && m.league_id == membership.league_id
                && m.slot_id == membership.slot_id
        }) {
            Some(existing) => existing.active = true,
            None => tables.memberships.push(membership),
        }
        Ok(())
    }

    async fn leave_queue(&self, player_id: &str, league_id: LeagueId, slot_id: &str) -> Result<bool> {
        let mut tables = self.write()?;
        let before = tables.memberships.len();
        tables.memberships.retain(|m| {
            !(m.player_id == player_id && m.league_id == league_id && m.slot_id == slot_id)
        });
        Ok(tables.memberships.len() != before)
    }

    async fn queue_members(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<QueueMembership>> {
        let tables = self.read()?;
        let mut members: Vec<QueueMembership> = tables
            .memberships
            .iter()
            .filter(|m| m.active && m.league_id == league_id && m.slot_id == slot_id)
            .cloned()
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn memberships_for(&self, player_id: &str) -> Result<Vec<QueueMembership>> {
        let tables = self.read()?;
        Ok(tables
            .memberships
            .iter()
            .filter(|m| m.player_id == player_id)
            .cloned()
            .collect())
    }

    async fn clear_queues(&self, player_ids: &[PlayerId]) -> Result<()> {
        self.write()?
            .memberships
            .retain(|m| !player_ids.contains(&m.player_id));
        Ok(())
    }

    async fn clear_slot(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<PlayerId>> {
        let mut tables = self.write()?;
        let mut cleared = Vec::new();
        tables.memberships.retain(|m| {
            if m.league_id == league_id && m.slot_id == slot_id {
                cleared.push(m.player_id.clone());
                false
            } else {
                true
            }
        });
        Ok(cleared)
    }

    async fn get_lobby(&self, lobby_id: LobbyId) -> Result<Option<Lobby>> {
        Ok(self.read()?.lobbies.get(&lobby_id).cloned())
    }

    async fn save_lobby(&self, lobby: &Lobby) -> Result<()> {
        self.write()?.lobbies.insert(lobby.id, lobby.clone());
        Ok(())
    }

    async fn list_lobbies(&self) -> Result<Vec<Lobby>> {
        let mut lobbies: Vec<Lobby> = self.read()?.lobbies.values().cloned().collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(lobbies)
    }

    async fn lobbies_in_states(&self, states: &[LobbyState]) -> Result<Vec<Lobby>> {
        let mut lobbies: Vec<Lobby> = self
            .read()?
            .lobbies
            .values()
            .filter(|lobby| states.contains(&lobby.state))
            .cloned()
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(lobbies)
    }

    async fn lobbies_for_slot(&self, league_id: LeagueId, slot_id: &str) -> Result<Vec<Lobby>> {
        let mut lobbies: Vec<Lobby> = self
            .read()?
            .lobbies
            .values()
            .filter(|lobby| lobby.league_id == league_id && lobby.slot.id == slot_id)
            .cloned()
            .collect();
        lobbies.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(lobbies)
    }

    async fn lobby_for_worker(&self, worker_id: &str) -> Result<Option<Lobby>> {
        let tables = self.read()?;
        Ok(tables
            .lobbies
            .values()
            .find(|lobby| !lobby.state.is_terminal() && lobby.worker_id.as_deref() == Some(worker_id))
            .cloned())
    }

    async fn lobby_for_match(&self, match_id: MatchId) -> Result<Option<Lobby>> {
        let tables = self.read()?;
        Ok(tables
            .lobbies
            .values()
            .find(|lobby| lobby.match_id == Some(match_id))
            .cloned())
    }

    async fn lobby_name_taken(&self, league_id: LeagueId, name: &str) -> Result<bool> {
        let tables = self.read()?;
        Ok(tables.lobbies.values().any(|lobby| {
            lobby.league_id == league_id
                && !lobby.state.is_terminal()
                && lobby.name.as_deref() == Some(name)
        }))
    }

    async fn lobby_players(&self, lobby_id: LobbyId) -> Result<Vec<PlayerInLobby>> {
        let mut players = self
            .read()?
            .lobby_players
            .get(&lobby_id)
            .cloned()
            .unwrap_or_default();
        players.sort_by(|a, b| a.queued_at.cmp(&b.queued_at));
        Ok(players)
    }

    async fn save_lobby_player(&self, player: &PlayerInLobby) -> Result<()> {
        let mut tables = self.write()?;
        let rows = tables.lobby_players.entry(player.lobby_id).or_default();
        match rows.iter_mut().find(|row| row.player_id == player.player_id) {
            Some(row) => *row = player.clone(),
            None => rows.push(player.clone()),
        }
        Ok(())
    }

    async fn admit_players(
        &self,
        lobby_id: LobbyId,
        league_id: LeagueId,
        slot_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<Vec<PlayerInLobby>> {
        let mut tables = self.write()?;
        let now = Utc::now();
        let admitted: Vec<PlayerInLobby> = player_ids
            .iter()
            .map(|player_id| {
                let queued_at = tables
                    .memberships
                    .iter()
                    .find(|m| {
                        &m.player_id == player_id && m.league_id == league_id && m.slot_id == slot_id
                    })
                    .map_or(now, |m| m.joined_at);
                PlayerInLobby {
                    lobby_id,
                    player_id: player_id.clone(),
                    faction: Default::default(),
                    ready: false,
                    queued_at,
                    stats: None,
                }
            })
            .collect();

        tables.memberships.retain(|m| !player_ids.contains(&m.player_id));
        let rows = tables.lobby_players.entry(lobby_id).or_default();
        rows.retain(|row| !player_ids.contains(&row.player_id));
        rows.extend(admitted.iter().cloned());
        Ok(admitted)
    }

    async fn return_to_queue(
        &self,
        lobby_id: LobbyId,
        league_id: LeagueId,
        slot_id: &str,
        player_ids: &[PlayerId],
    ) -> Result<()> {
        let mut tables = self.write()?;
        let returned: Vec<QueueMembership> = tables
            .lobby_players
            .get(&lobby_id)
            .map(|rows| {
                rows.iter()
                    .filter(|row| player_ids.contains(&row.player_id))
                    .map(|row| QueueMembership {
                        player_id: row.player_id.clone(),
                        league_id,
                        slot_id: slot_id.to_string(),
                        active: true,
                        joined_at: row.queued_at,
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(rows) = tables.lobby_players.get_mut(&lobby_id) {
            rows.retain(|row| !player_ids.contains(&row.player_id));
        }
        tables.memberships.retain(|m| {
            !(player_ids.contains(&m.player_id) && m.league_id == league_id && m.slot_id == slot_id)
        });
        tables.memberships.extend(returned);
        Ok(())
    }

    async fn remove_lobby_players(&self, lobby_id: LobbyId, player_ids: &[PlayerId]) -> Result<()> {
        if let Some(rows) = self.write()?.lobby_players.get_mut(&lobby_id) {
            rows.retain(|row| !player_ids.contains(&row.player_id));
        }
        Ok(())
    }

    async fn clear_lobby_players(&self, lobby_id: LobbyId) -> Result<Vec<PlayerId>> {
        Ok(self
            .write()?
            .lobby_players
            .remove(&lobby_id)
            .unwrap_or_default()
            .into_iter()
            .map(|row| row.player_id)
            .collect())
    }

    async fn active_lobby_for_player(&self, player_id: &str) -> Result<Option<Lobby>> {
        let tables = self.read()?;
        Ok(tables
            .lobby_players
            .iter()
            .filter(|(lobby_id, _)| tables.is_active_lobby(lobby_id))
            .find(|(_, rows)| rows.iter().any(|row| row.player_id == player_id))
            .and_then(|(lobby_id, _)| tables.lobbies.get(lobby_id).cloned()))
    }

    async fn get_worker(&self, worker_id: &str) -> Result<Option<WorkerRecord>> {
        Ok(self.read()?.workers.get(worker_id).cloned())
    }

    async fn save_worker(&self, worker: &WorkerRecord) -> Result<()> {
        self.write()?.workers.insert(worker.id.clone(), worker.clone());
        Ok(())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerRecord>> {
        let mut workers: Vec<WorkerRecord> = self.read()?.workers.values().cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workers)
    }

    async fn delete_worker(&self, worker_id: &str) -> Result<bool> {
        Ok(self.write()?.workers.remove(worker_id).is_some())
    }

    async fn get_challenge(&self, challenge_id: ChallengeId) -> Result<Option<Challenge>> {
        Ok(self.read()?.challenges.get(&challenge_id).cloned())
    }

    async fn find_challenge(&self, giver: &str, recipient: &str) -> Result<Option<Challenge>> {
        Ok(self
            .read()?
            .challenges
            .values()
            .find(|c| c.giver == giver && c.recipient == recipient)
            .cloned())
    }

    async fn save_challenge(&self, challenge: &Challenge) -> Result<()> {
        self.write()?.challenges.insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn delete_challenge(&self, challenge_id: ChallengeId) -> Result<bool> {
        Ok(self.write()?.challenges.remove(&challenge_id).is_some())
    }

    async fn challenges_for(&self, player_id: &str) -> Result<Vec<Challenge>> {
        Ok(self
            .read()?
            .challenges
            .values()
            .filter(|c| c.involves(player_id))
            .cloned()
            .collect())
    }

    async fn delete_challenges_among(&self, player_ids: &[PlayerId]) -> Result<usize> {
        let mut tables = self.write()?;
        let before = tables.challenges.len();
        tables.challenges.retain(|_, c| {
            c.accepted || !(player_ids.contains(&c.giver) && player_ids.contains(&c.recipient))
        });
        Ok(before - tables.challenges.len())
    }

    async fn get_rating(&self, player_id: &str, season_id: SeasonId) -> Result<Option<RatingRecord>> {
        Ok(self
            .read()?
            .ratings
            .get(&(player_id.to_string(), season_id))
            .cloned())
    }

    async fn save_rating(&self, record: &RatingRecord) -> Result<()> {
        self.write()?
            .ratings
            .insert((record.player_id.clone(), record.season_id), record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeagueDefaults;
    use crate::types::{QueueKind, QueueSlot};
    use chrono::Duration;

    fn membership(player: &str, league_id: LeagueId, slot: &str, offset: i64) -> QueueMembership {
        QueueMembership {
            player_id: player.to_string(),
            league_id,
            slot_id: slot.to_string(),
            active: true,
            joined_at: Utc::now() - Duration::seconds(100 - offset),
        }
    }

    #[tokio::test]
    async fn test_queue_members_are_fifo() {
        let store = InMemoryStore::new();
        let league = Uuid::new_v4();
        store.join_queue(membership("late", league, "draft", 50)).await.unwrap();
        store.join_queue(membership("early", league, "draft", 1)).await.unwrap();
        store.join_queue(membership("other", league, "autobalance", 0)).await.unwrap();

        let members = store.queue_members(league, "draft").await.unwrap();
        let ids: Vec<&str> = members.iter().map(|m| m.player_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_admit_then_return_restores_join_time() {
        let store = InMemoryStore::new();
        let league = Uuid::new_v4();
        let lobby = Lobby::new(league, QueueSlot::new("draft", QueueKind::Draft));
        store.save_lobby(&lobby).await.unwrap();

        let original = membership("p1", league, "draft", 10);
        store.join_queue(original.clone()).await.unwrap();
        store.join_queue(membership("p1", league, "autobalance", 20)).await.unwrap();

        let admitted = store
            .admit_players(lobby.id, league, "draft", &["p1".to_string()])
            .await
            .unwrap();
        assert_eq!(admitted[0].queued_at, original.joined_at);
        assert!(store.memberships_for("p1").await.unwrap().is_empty());
        assert!(store.active_lobby_for_player("p1").await.unwrap().is_some());

        store
            .return_to_queue(lobby.id, league, "draft", &["p1".to_string()])
            .await
            .unwrap();
        let restored = store.memberships_for("p1").await.unwrap();
        assert_eq!(restored, vec![original]);
        assert!(store.lobby_players(lobby.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_season_moves_pointer() {
        let store = InMemoryStore::new();
        let league = LeagueDefaults::default().build_league(Uuid::new_v4(), "inhouse");
        store.save_league(&league).await.unwrap();

        let first = store.start_season(league.id, "Season 1").await.unwrap();
        let second = store.start_season(league.id, "Season 2").await.unwrap();

        let stored = store.get_league(league.id).await.unwrap().unwrap();
        assert_eq!(stored.current_season_id, Some(second.id));
        assert!(!store.get_season(first.id).await.unwrap().unwrap().active);
        assert!(store.get_season(second.id).await.unwrap().unwrap().active);
        assert!(store.start_season(Uuid::new_v4(), "nope").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_challenges_among_keeps_accepted() {
        let store = InMemoryStore::new();
        let league = Uuid::new_v4();
        let pending = Challenge {
            id: Uuid::new_v4(),
            league_id: league,
            giver: "a".to_string(),
            recipient: "b".to_string(),
            accepted: false,
            created_at: Utc::now(),
        };
        let accepted = Challenge {
            id: Uuid::new_v4(),
            accepted: true,
            giver: "c".to_string(),
            recipient: "a".to_string(),
            ..pending.clone()
        };
        store.save_challenge(&pending).await.unwrap();
        store.save_challenge(&accepted).await.unwrap();

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(store.delete_challenges_among(&ids).await.unwrap(), 1);
        assert!(store.get_challenge(accepted.id).await.unwrap().is_some());
    }
}
