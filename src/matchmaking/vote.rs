//! Default game-mode vote

use crate::types::GameMode;
use std::collections::BTreeMap;

/// Most preferred mode; the league default wins every tie
pub fn vote_game_mode(preferences: &[GameMode], default: GameMode) -> GameMode {
    let mut tally: BTreeMap<GameMode, usize> = BTreeMap::new();
    tally.insert(default, 0);
    for mode in preferences {
        *tally.entry(*mode).or_default() += 1;
    }

    let best = tally.values().copied().max().unwrap_or(0);
    let mut leaders = tally.iter().filter(|(_, count)| **count == best);
    match (leaders.next(), leaders.next()) {
        (Some((mode, _)), None) => *mode,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_wins() {
        let prefs = vec![GameMode::AllPick, GameMode::AllPick, GameMode::Turbo];
        assert_eq!(vote_game_mode(&prefs, GameMode::CaptainsMode), GameMode::AllPick);
    }

    #[test]
    fn test_tie_goes_to_default() {
        let prefs = vec![
            GameMode::AllPick,
            GameMode::AllPick,
            GameMode::CaptainsMode,
            GameMode::CaptainsMode,
        ];
        assert_eq!(vote_game_mode(&prefs, GameMode::CaptainsMode), GameMode::CaptainsMode);
    }

    #[test]
    fn test_tie_between_non_defaults_keeps_default() {
        let prefs = vec![GameMode::AllPick, GameMode::Turbo];
        assert_eq!(vote_game_mode(&prefs, GameMode::CaptainsMode), GameMode::CaptainsMode);
        assert_eq!(vote_game_mode(&[], GameMode::RandomDraft), GameMode::RandomDraft);
    }
}
