//! Captain selection sequence
//!
//! A coin flip grants one captain priority. The other captain then decides
//! whether they draft first or second, after which the priority captain picks
//! the side their faction plays on. Each decision is recorded once and never
//! asked again.

use crate::error::{OrchestratorError, Result};
use crate::types::Faction;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Recorded outcome of the selection sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    /// Faction whose captain won the coin flip
    pub priority: Option<Faction>,
    /// Faction that drafts with the `A` letters
    pub first_pick: Option<Faction>,
    /// Faction playing on the primary side
    pub primary_side: Option<Faction>,
}

/// The decision still outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextDecision {
    CoinFlip,
    DraftOrder { chooser: Faction },
    Side { chooser: Faction },
    Complete,
}

impl SelectionState {
    pub fn next_decision(&self) -> NextDecision {
        match (self.priority, self.first_pick, self.primary_side) {
            (None, _, _) => NextDecision::CoinFlip,
            (Some(priority), None, _) => NextDecision::DraftOrder {
                chooser: priority.opponent(),
            },
            (Some(priority), Some(_), None) => NextDecision::Side { chooser: priority },
            (Some(_), Some(_), Some(_)) => NextDecision::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_decision() == NextDecision::Complete
    }

    /// Flip for priority; a recorded flip is returned unchanged
    pub fn flip_priority<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Faction {
        *self.priority.get_or_insert_with(|| {
            if rng.gen_bool(0.5) {
                Faction::One
            } else {
                Faction::Two
            }
        })
    }

    /// Record the pick-order choice made by the captain without priority
    pub fn choose_draft_order(&mut self, chooser: Faction, draft_first: bool) -> Result<Faction> {
        match self.next_decision() {
            NextDecision::DraftOrder { chooser: expected } if expected == chooser => {
                let first = if draft_first { chooser } else { chooser.opponent() };
                self.first_pick = Some(first);
                Ok(first)
            }
            other => Err(OrchestratorError::invalid_command(format!(
                "{} cannot choose draft order now (expected {:?})",
                chooser, other
            ))
            .into()),
        }
    }

    /// Record the side choice made by the priority captain
    pub fn choose_side(&mut self, chooser: Faction, take_primary: bool) -> Result<Faction> {
        match self.next_decision() {
            NextDecision::Side { chooser: expected } if expected == chooser => {
                let primary = if take_primary { chooser } else { chooser.opponent() };
                self.primary_side = Some(primary);
                Ok(primary)
            }
            other => Err(OrchestratorError::invalid_command(format!(
                "{} cannot choose a side now (expected {:?})",
                chooser, other
            ))
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_full_sequence() {
        let mut state = SelectionState::default();
        let mut rng = StdRng::seed_from_u64(11);
        assert_eq!(state.next_decision(), NextDecision::CoinFlip);

        let priority = state.flip_priority(&mut rng);
        assert_eq!(state.flip_priority(&mut rng), priority);
        assert_eq!(
            state.next_decision(),
            NextDecision::DraftOrder {
                chooser: priority.opponent()
            }
        );

        // Priority captain cannot answer the order question
        assert!(state.choose_draft_order(priority, true).is_err());
        let first = state.choose_draft_order(priority.opponent(), false).unwrap();
        assert_eq!(first, priority);
        assert!(state.choose_draft_order(priority.opponent(), true).is_err());

        let primary = state.choose_side(priority, true).unwrap();
        assert_eq!(primary, priority);
        assert!(state.is_complete());
        assert!(state.choose_side(priority, false).is_err());
    }
}
