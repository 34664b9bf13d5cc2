//! Captain-pair selection
//!
//! Candidates are bucketed into priority tiers derived from their badges. The
//! lowest-numbered tier with a pair inside the rating threshold supplies the
//! captains; a pair is picked uniformly at random among the valid ones.

use crate::error::{OrchestratorError, Result};
use crate::types::PlayerId;
use crate::utils::ratings_within_tolerance;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use std::collections::BTreeMap;

/// A player considered for captaincy
#[derive(Debug, Clone)]
pub struct CaptainCandidate {
    pub player_id: PlayerId,
    /// Lower is better; `None` means ineligible
    pub priority: Option<u32>,
    /// Value under the league's matchmaking metric
    pub metric: f64,
}

/// Compile a league's captain role pattern, which must have a capture group
pub fn compile_captain_pattern(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(pattern).map_err(|e| OrchestratorError::ConfigurationError {
        message: format!("Invalid captain role pattern '{}': {}", pattern, e),
    })?;
    if regex.captures_len() < 2 {
        return Err(OrchestratorError::ConfigurationError {
            message: format!("Captain role pattern '{}' has no capture group", pattern),
        }
        .into());
    }
    Ok(regex)
}

/// Best (lowest) priority among the badges matching the pattern
pub fn captain_priority(pattern: &Regex, badges: &[String]) -> Option<u32> {
    badges
        .iter()
        .filter_map(|badge| pattern.captures(badge))
        .filter_map(|captures| captures.get(1))
        .filter_map(|group| group.as_str().parse::<u32>().ok())
        .min()
}

/// Pick two captains, or `None` when no tier yields a pair within `threshold`
pub fn select_captain_pair<R: Rng + ?Sized>(
    candidates: &[CaptainCandidate],
    threshold: f64,
    rng: &mut R,
) -> Option<(PlayerId, PlayerId)> {
    let mut tiers: BTreeMap<u32, Vec<&CaptainCandidate>> = BTreeMap::new();
    for candidate in candidates {
        if let Some(priority) = candidate.priority {
            tiers.entry(priority).or_default().push(candidate);
        }
    }

    for members in tiers.values() {
        if members.len() < 2 {
            continue;
        }

        let mut pairs = Vec::new();
        for (i, first) in members.iter().enumerate() {
            for second in &members[i + 1..] {
                if ratings_within_tolerance(first.metric, second.metric, threshold) {
                    pairs.push((first, second));
                }
            }
        }

        if let Some((first, second)) = pairs.choose(rng) {
            return Some((first.player_id.clone(), second.player_id.clone()));
        }
    }

    None
}
