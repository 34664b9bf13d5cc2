//! Team balancing
//!
//! Exhaustive search over every 5-of-10 split. With 252 candidates there is no
//! need for a heuristic; every split with the minimal rating gap is kept and one
//! of them is picked at random.

use crate::error::{OrchestratorError, Result};
use crate::types::PlayerId;
use rand::seq::SliceRandom;
use rand::Rng;

/// Players per team
pub const TEAM_SIZE: usize = 5;

/// Players per match
pub const MATCH_SIZE: usize = TEAM_SIZE * 2;

/// Tolerance used when comparing summed ratings for ties
const TIE_EPSILON: f64 = 1e-9;

/// Two disjoint teams produced by the balancer
#[derive(Debug, Clone, PartialEq)]
pub struct TeamSplit {
    pub team_a: Vec<PlayerId>,
    pub team_b: Vec<PlayerId>,
    /// Absolute difference between the summed ratings
    pub difference: f64,
}

/// Every bitmask over `MATCH_SIZE` players with exactly `TEAM_SIZE` bits set
fn split_masks() -> impl Iterator<Item = u32> {
    (0u32..(1 << MATCH_SIZE)).filter(|mask| mask.count_ones() as usize == TEAM_SIZE)
}

fn split_difference(ratings: &[f64], mask: u32) -> f64 {
    let (a, b) = ratings
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(a, b), (i, rating)| {
            if mask & (1 << i) != 0 {
                (a + rating, b)
            } else {
                (a, b + rating)
            }
        });
    (a - b).abs()
}

/// Smallest achievable rating gap over all splits
pub fn minimum_difference(ratings: &[f64]) -> f64 {
    split_masks()
        .map(|mask| split_difference(ratings, mask))
        .fold(f64::INFINITY, f64::min)
}

/// Split exactly ten rated players into two balanced teams
pub fn balance_teams<R: Rng + ?Sized>(players: &[(PlayerId, f64)], rng: &mut R) -> Result<TeamSplit> {
    if players.len() != MATCH_SIZE {
        return Err(OrchestratorError::ValidationFailure {
            reason: format!(
                "Team balancing needs exactly {} players, got {}",
                MATCH_SIZE,
                players.len()
            ),
        }
        .into());
    }

    let ratings: Vec<f64> = players.iter().map(|(_, rating)| *rating).collect();
    let scored: Vec<(u32, f64)> = split_masks()
        .map(|mask| (mask, split_difference(&ratings, mask)))
        .collect();
    let best = scored
        .iter()
        .map(|(_, difference)| *difference)
        .fold(f64::INFINITY, f64::min);
    let ties: Vec<&(u32, f64)> = scored
        .iter()
        .filter(|(_, difference)| (difference - best).abs() <= TIE_EPSILON)
        .collect();

    let (mask, difference) = **ties.choose(rng).ok_or_else(|| OrchestratorError::InternalError {
        message: "No team split candidates".to_string(),
    })?;

    let mut team_a = Vec::with_capacity(TEAM_SIZE);
    let mut team_b = Vec::with_capacity(TEAM_SIZE);
    for (i, (player_id, _)) in players.iter().enumerate() {
        if mask & (1 << i) != 0 {
            team_a.push(player_id.clone());
        } else {
            team_b.push(player_id.clone());
        }
    }

    Ok(TeamSplit {
        team_a,
        team_b,
        difference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn rated(ratings: &[f64]) -> Vec<(PlayerId, f64)> {
        ratings
            .iter()
            .enumerate()
            .map(|(i, rating)| (format!("p{}", i), *rating))
            .collect()
    }

    #[test]
    fn test_enumerates_252_splits() {
        assert_eq!(split_masks().count(), 252);
    }

    #[test]
    fn test_perfect_split_found() {
        let players = rated(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        let mut rng = StdRng::seed_from_u64(3);
        let split = balance_teams(&players, &mut rng).unwrap();

        // 55 total cannot split evenly
        assert_eq!(split.difference, 1.0);
        assert_eq!(split.team_a.len(), TEAM_SIZE);
        assert_eq!(split.team_b.len(), TEAM_SIZE);
    }

    #[test]
    fn test_rejects_wrong_player_count() {
        let players = rated(&[1500.0; 9]);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(balance_teams(&players, &mut rng).is_err());
    }

    proptest! {
        #[test]
        fn prop_balance_is_optimal_and_disjoint(
            ratings in prop::collection::vec(0u32..5000, MATCH_SIZE),
            seed in any::<u64>(),
        ) {
            let ratings: Vec<f64> = ratings.into_iter().map(f64::from).collect();
            let players = rated(&ratings);
            let mut rng = StdRng::seed_from_u64(seed);
            let split = balance_teams(&players, &mut rng).unwrap();

            let sum = |team: &[PlayerId]| -> f64 {
                team.iter()
                    .map(|id| players.iter().find(|(p, _)| p == id).unwrap().1)
                    .sum()
            };
            let gap = (sum(&split.team_a) - sum(&split.team_b)).abs();
            prop_assert!((gap - minimum_difference(&ratings)).abs() <= 1e-6);

            let all: HashSet<&PlayerId> = split.team_a.iter().chain(split.team_b.iter()).collect();
            prop_assert_eq!(all.len(), MATCH_SIZE);
        }
    }
}
