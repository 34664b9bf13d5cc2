//! Rating calculator trait and implementations
//!
//! Teams are rated by their average rating. The Elo delta between the two
//! averages is applied to every member of a team, so teammates move together.

use crate::error::{OrchestratorError, Result};
use crate::types::{Faction, PlayerId, RatingChange};
use serde::{Deserialize, Serialize};
use skillratings::elo::{elo, expected_score, EloConfig, EloRating};
use skillratings::Outcomes;

/// Result of a rating calculation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingCalculationResult {
    /// Rating changes for all players
    pub rating_changes: Vec<RatingChange>,
    /// Quality score of the match (0.0 to 1.0, higher is better)
    pub match_quality: f64,
}

/// Trait for calculating rating changes after matches
pub trait RatingCalculator: Send + Sync {
    /// Calculate rating changes for two teams
    ///
    /// `winner` is `None` for a draw or an unknown result.
    fn calculate_team_changes(
        &self,
        faction_one: &[(PlayerId, f64)],
        faction_two: &[(PlayerId, f64)],
        winner: Option<Faction>,
    ) -> Result<RatingCalculationResult>;

    /// Get the initial rating for new players
    fn initial_rating(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct EloTeamCalculator {
    config: EloConfig,
    initial_rating: f64,
}

impl EloTeamCalculator {
    pub fn new(k: f64, initial_rating: f64) -> Self {
        Self {
            config: EloConfig { k },
            initial_rating,
        }
    }
}

impl Default for EloTeamCalculator {
    fn default() -> Self {
        Self::new(32.0, 1500.0)
    }
}

fn team_average(team: &[(PlayerId, f64)]) -> f64 {
    team.iter().map(|(_, rating)| rating).sum::<f64>() / team.len() as f64
}

fn apply_delta(team: &[(PlayerId, f64)], delta: f64) -> impl Iterator<Item = RatingChange> + '_ {
    team.iter().map(move |(player_id, rating)| RatingChange {
        player_id: player_id.clone(),
        old_rating: *rating,
        new_rating: rating + delta,
        change: delta,
    })
}

impl RatingCalculator for EloTeamCalculator {
    fn calculate_team_changes(
        &self,
        faction_one: &[(PlayerId, f64)],
        faction_two: &[(PlayerId, f64)],
        winner: Option<Faction>,
    ) -> Result<RatingCalculationResult> {
        if faction_one.is_empty() || faction_two.is_empty() {
            return Err(OrchestratorError::ValidationFailure {
                reason: "Both factions need players for a rating update".to_string(),
            }
            .into());
        }

        let one = EloRating {
            rating: team_average(faction_one),
        };
        let two = EloRating {
            rating: team_average(faction_two),
        };
        let outcome = match winner {
            Some(Faction::One) => Outcomes::WIN,
            Some(Faction::Two) => Outcomes::LOSS,
            _ => Outcomes::DRAW,
        };

        let (new_one, new_two) = elo(&one, &two, &outcome, &self.config);
        let (expected_one, expected_two) = expected_score(&one, &two);

        let rating_changes = apply_delta(faction_one, new_one.rating - one.rating)
            .chain(apply_delta(faction_two, new_two.rating - two.rating))
            .collect();

        Ok(RatingCalculationResult {
            rating_changes,
            match_quality: 1.0 - (expected_one - expected_two).abs(),
        })
    }

    fn initial_rating(&self) -> f64 {
        self.initial_rating
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team(prefix: &str, rating: f64) -> Vec<(PlayerId, f64)> {
        (0..5).map(|i| (format!("{}{}", prefix, i), rating)).collect()
    }

    #[test]
    fn test_winners_gain_losers_drop() {
        let calculator = EloTeamCalculator::default();
        let result = calculator
            .calculate_team_changes(&team("a", 1500.0), &team("b", 1500.0), Some(Faction::Two))
            .unwrap();

        assert_eq!(result.rating_changes.len(), 10);
        for change in &result.rating_changes {
            if change.player_id.starts_with('a') {
                assert!(change.change < 0.0);
            } else {
                assert!(change.change > 0.0);
            }
        }
        // Equal teams: K/2 each way
        assert!((result.rating_changes[0].change + 16.0).abs() < 1e-9);
        assert!((result.match_quality - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_draw_between_equals_is_neutral() {
        let calculator = EloTeamCalculator::default();
        let result = calculator
            .calculate_team_changes(&team("a", 1600.0), &team("b", 1600.0), None)
            .unwrap();
        assert!(result.rating_changes.iter().all(|c| c.change.abs() < 1e-9));
    }

    #[test]
    fn test_empty_team_rejected() {
        let calculator = EloTeamCalculator::default();
        assert!(calculator
            .calculate_team_changes(&[], &team("b", 1500.0), Some(Faction::One))
            .is_err());
    }
}
