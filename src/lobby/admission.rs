//! Queue admission rules
//!
//! Decides whether the members of a queue slot are enough to fill a lobby and,
//! if so, which of them are admitted. Draft and challenge slots admit the two
//! captains plus the next eight members by join time; auto-balance slots admit
//! the first ten.

use crate::matchmaking::{captain_priority, select_captain_pair, CaptainCandidate, MATCH_SIZE};
use crate::types::{League, Player, PlayerId, QueueKind, QueueMembership};
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;

/// Outcome of evaluating a queue slot
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Not enough eligible members yet
    Wait,
    Admit {
        captains: Option<(PlayerId, PlayerId)>,
        players: Vec<PlayerId>,
    },
    /// The slot can never fill; the lobby must be torn down
    Kill { reason: String },
}

/// Evaluate a slot's active members, oldest first
pub fn decide_admission<R: Rng + ?Sized>(
    kind: QueueKind,
    members: &[QueueMembership],
    players: &HashMap<PlayerId, Player>,
    designated: Option<(&PlayerId, &PlayerId)>,
    captain_pattern: &Regex,
    league: &League,
    rng: &mut R,
) -> Admission {
    let queued: Vec<&PlayerId> = members
        .iter()
        .filter(|member| member.active && players.contains_key(&member.player_id))
        .map(|member| &member.player_id)
        .collect();

    match kind {
        QueueKind::AutoBalance => {
            if queued.len() < MATCH_SIZE {
                return Admission::Wait;
            }
            Admission::Admit {
                captains: None,
                players: queued.into_iter().take(MATCH_SIZE).cloned().collect(),
            }
        }
        QueueKind::Draft => {
            if queued.len() < MATCH_SIZE {
                return Admission::Wait;
            }
            let candidates: Vec<CaptainCandidate> = queued
                .iter()
                .filter_map(|id| players.get(*id))
                .map(|player| CaptainCandidate {
                    player_id: player.id.clone(),
                    priority: captain_priority(captain_pattern, &player.badges),
                    metric: player.metric_value(league.metric),
                })
                .collect();

            match select_captain_pair(&candidates, league.captain_rank_threshold, rng) {
                Some(captains) => admit_with_captains(&queued, captains),
                None => Admission::Wait,
            }
        }
        QueueKind::Challenge => {
            let Some((first, second)) = designated else {
                return Admission::Kill {
                    reason: "challenge lobby has no designated captains".to_string(),
                };
            };
            for captain in [first, second] {
                if !queued.contains(&captain) {
                    return Admission::Kill {
                        reason: format!("captain {} left the challenge queue", captain),
                    };
                }
            }
            if queued.len() < MATCH_SIZE {
                return Admission::Wait;
            }
            admit_with_captains(&queued, (first.clone(), second.clone()))
        }
    }
}

fn admit_with_captains(queued: &[&PlayerId], captains: (PlayerId, PlayerId)) -> Admission {
    let mut players = vec![captains.0.clone(), captains.1.clone()];
    players.extend(
        queued
            .iter()
            .filter(|id| ***id != captains.0 && ***id != captains.1)
            .take(MATCH_SIZE - 2)
            .map(|id| (*id).clone()),
    );
    Admission::Admit {
        captains: Some(captains),
        players,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LeagueDefaults;
    use crate::matchmaking::compile_captain_pattern;
    use chrono::{Duration, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn setup(count: usize, captains: &[usize]) -> (League, Vec<QueueMembership>, HashMap<PlayerId, Player>) {
        let league = LeagueDefaults::default().build_league(Uuid::new_v4(), "test");
        let start = Utc::now();
        let mut members = Vec::new();
        let mut players = HashMap::new();
        for i in 0..count {
            let id = format!("p{:02}", i);
            members.push(QueueMembership {
                player_id: id.clone(),
                league_id: league.id,
                slot_id: "draft".to_string(),
                active: true,
                joined_at: start + Duration::seconds(i as i64),
            });
            let badges = if captains.contains(&i) {
                vec!["Tier 1".to_string()]
            } else {
                Vec::new()
            };
            players.insert(
                id.clone(),
                Player {
                    id,
                    league_id: league.id,
                    nickname: format!("player {}", i),
                    account_id: 100 + i as u64,
                    rank_tier: 50,
                    rating: 1500.0,
                    badges,
                    roles: Vec::new(),
                    game_mode_preference: None,
                    queue_banned_until: None,
                },
            );
        }
        (league, members, players)
    }

    #[test]
    fn test_draft_pop_takes_captains_and_eight_oldest() {
        let (league, members, players) = setup(11, &[9, 10]);
        let pattern = compile_captain_pattern(&league.captain_role_pattern).unwrap();
        let mut rng = StdRng::seed_from_u64(1);

        let admission = decide_admission(QueueKind::Draft, &members, &players, None, &pattern, &league, &mut rng);
        let Admission::Admit { captains, players } = admission else {
            panic!("expected admission");
        };
        let (first, second) = captains.unwrap();
        let mut pair = vec![first, second];
        pair.sort();
        assert_eq!(pair, vec!["p09".to_string(), "p10".to_string()]);
        assert_eq!(players.len(), 10);
        assert!(!players.contains(&"p08".to_string()));
        assert!(players.contains(&"p07".to_string()));
    }

    #[test]
    fn test_draft_waits_without_captains() {
        let (league, members, players) = setup(12, &[3]);
        let pattern = compile_captain_pattern(&league.captain_role_pattern).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            decide_admission(QueueKind::Draft, &members, &players, None, &pattern, &league, &mut rng),
            Admission::Wait
        );
    }

    #[test]
    fn test_autobalance_takes_first_ten() {
        let (league, members, players) = setup(13, &[]);
        let pattern = compile_captain_pattern(&league.captain_role_pattern).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let Admission::Admit { captains, players } =
            decide_admission(QueueKind::AutoBalance, &members, &players, None, &pattern, &league, &mut rng)
        else {
            panic!("expected admission");
        };
        assert!(captains.is_none());
        assert_eq!(players.first().map(String::as_str), Some("p00"));
        assert_eq!(players.last().map(String::as_str), Some("p09"));
    }

    #[test]
    fn test_challenge_kills_when_captain_leaves() {
        let (league, mut members, players) = setup(10, &[]);
        let pattern = compile_captain_pattern(&league.captain_role_pattern).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let giver = "p00".to_string();
        let recipient = "p05".to_string();

        let admission = decide_admission(
            QueueKind::Challenge,
            &members,
            &players,
            Some((&giver, &recipient)),
            &pattern,
            &league,
            &mut rng,
        );
        assert!(matches!(admission, Admission::Admit { .. }));

        members.retain(|m| m.player_id != recipient);
        let admission = decide_admission(
            QueueKind::Challenge,
            &members,
            &players,
            Some((&giver, &recipient)),
            &pattern,
            &league,
            &mut rng,
        );
        assert!(matches!(admission, Admission::Kill { .. }));
    }
}
