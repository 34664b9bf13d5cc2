//! Draft order
//!
//! The order string has one letter per non-captain pick. The letter for a turn
//! is chosen by how many players are still undrafted: with 8 left the first
//! letter applies, with 1 left the last one.

use crate::error::{OrchestratorError, Result};
use crate::types::Faction;

pub const DEFAULT_DRAFT_ORDER: &str = "ABBABAAB";

/// Which captain drafts: `A` holds first pick, `B` is the other one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSeat {
    A,
    B,
}

pub fn validate_draft_order(order: &str) -> Result<()> {
    if order.is_empty() {
        return Err(OrchestratorError::ConfigurationError {
            message: "Draft order cannot be empty".to_string(),
        }
        .into());
    }
    if let Some(bad) = order.chars().find(|c| *c != 'A' && *c != 'B') {
        return Err(OrchestratorError::ConfigurationError {
            message: format!("Draft order '{}' contains invalid letter '{}'", order, bad),
        }
        .into());
    }
    Ok(())
}

/// Seat that drafts next, `None` once nobody is left or the count is out of range
pub fn drafting_seat(order: &str, undrafted: usize) -> Option<DraftSeat> {
    if undrafted == 0 || undrafted > order.len() {
        return None;
    }
    match order.as_bytes()[order.len() - undrafted] {
        b'A' => Some(DraftSeat::A),
        b'B' => Some(DraftSeat::B),
        _ => None,
    }
}

/// Faction that drafts next given which faction holds first pick
pub fn drafting_faction(order: &str, undrafted: usize, first_pick: Faction) -> Option<Faction> {
    drafting_seat(order, undrafted).map(|seat| match seat {
        DraftSeat::A => first_pick,
        DraftSeat::B => first_pick.opponent(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_order_turns() {
        let turns: Vec<Faction> = (1..=8)
            .rev()
            .filter_map(|left| drafting_faction(DEFAULT_DRAFT_ORDER, left, Faction::Two))
            .collect();
        assert_eq!(
            turns,
            vec![
                Faction::Two,
                Faction::One,
                Faction::One,
                Faction::Two,
                Faction::One,
                Faction::Two,
                Faction::Two,
                Faction::One,
            ]
        );
        assert_eq!(drafting_faction(DEFAULT_DRAFT_ORDER, 0, Faction::One), None);
    }

    #[test]
    fn test_out_of_range_count() {
        assert_eq!(drafting_seat("AB", 3), None);
    }

    #[test]
    fn test_validate_draft_order() {
        assert!(validate_draft_order(DEFAULT_DRAFT_ORDER).is_ok());
        assert!(validate_draft_order("").is_err());
        assert!(validate_draft_order("ABC").is_err());
    }

    proptest! {
        #[test]
        fn prop_draft_exhausts_order(order in "[AB]{1,12}") {
            let mut undrafted = order.len();
            let mut picks = 0;
            while let Some(faction) = drafting_faction(&order, undrafted, Faction::One) {
                prop_assert!(faction.is_assigned());
                undrafted -= 1;
                picks += 1;
            }
            prop_assert_eq!(undrafted, 0);
            prop_assert_eq!(picks, order.len());
        }
    }
}
