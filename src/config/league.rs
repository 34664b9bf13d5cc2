//! League defaults
//!
//! Values used when a league is configured without overriding a setting.

use crate::matchmaking::DEFAULT_DRAFT_ORDER;
use crate::types::{GameMode, League, LeagueId, MatchmakingMetric, QueueKind, QueueSlot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeagueDefaults {
    pub ready_check_timeout_seconds: u64,
    pub captain_rank_threshold: f64,
    pub captain_role_pattern: String,
    pub draft_order: String,
    pub default_game_mode: GameMode,
    pub metric: MatchmakingMetric,
    pub lobby_name_template: String,
    pub room_category: String,
    pub initial_rating: f64,
}

impl Default for LeagueDefaults {
    fn default() -> Self {
        Self {
            ready_check_timeout_seconds: 300, // 5 minutes
            captain_rank_threshold: 500.0,
            captain_role_pattern: r"^Tier (\d+)$".to_string(),
            draft_order: DEFAULT_DRAFT_ORDER.to_string(),
            default_game_mode: GameMode::CaptainsMode,
            metric: MatchmakingMetric::Rating,
            lobby_name_template: "{league}-{id}".to_string(),
            room_category: "inhouse".to_string(),
            initial_rating: 1500.0,
        }
    }
}

impl LeagueDefaults {
    /// Build a league with the standard draft and auto-balance slots
    pub fn build_league(&self, id: LeagueId, name: impl Into<String>) -> League {
        League {
            id,
            name: name.into(),
            ready_check_timeout_seconds: self.ready_check_timeout_seconds,
            captain_rank_threshold: self.captain_rank_threshold,
            captain_role_pattern: self.captain_role_pattern.clone(),
            draft_order: self.draft_order.clone(),
            default_game_mode: self.default_game_mode,
            metric: self.metric,
            lobby_name_template: self.lobby_name_template.clone(),
            ticket_id: None,
            current_season_id: None,
            slots: vec![
                QueueSlot::new("draft", QueueKind::Draft),
                QueueSlot::new("autobalance", QueueKind::AutoBalance),
            ],
            admins: Vec::new(),
            room_category: self.room_category.clone(),
            initial_rating: self.initial_rating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_build_league_uses_defaults() {
        let defaults = LeagueDefaults::default();
        let league = defaults.build_league(Uuid::new_v4(), "inhouse");

        assert_eq!(league.draft_order, "ABBABAAB");
        assert_eq!(league.ready_check_timeout_seconds, 300);
        assert_eq!(league.slots.len(), 2);
        assert!(league.slot("draft").is_some());
        assert!(league.slot("challenge").is_none());
    }
}
