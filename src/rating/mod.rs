//! Rating system integration using Elo over team averages
//!
//! This module provides post-match rating calculations built on the
//! skillratings crate.

pub mod calculator;

// Re-export commonly used types
pub use calculator::{EloTeamCalculator, RatingCalculationResult, RatingCalculator};
