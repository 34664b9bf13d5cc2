//! Utility functions for the orchestrator

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Length of generated external-lobby passwords
pub const PASSWORD_LENGTH: usize = 8;

/// Calculate the absolute difference between two ratings
pub fn rating_difference(rating1: f64, rating2: f64) -> f64 {
    (rating1 - rating2).abs()
}

/// Check if two ratings are within the given tolerance
pub fn ratings_within_tolerance(rating1: f64, rating2: f64, tolerance: f64) -> bool {
    rating_difference(rating1, rating2) <= tolerance
}

/// Render a lobby-name template.
///
/// `{league}`, `{slot}` and `{id}` are replaced; `{id}` is the attempt counter
/// used to find a free name.
pub fn render_name_template(template: &str, league: &str, slot: &str, counter: u32) -> String {
    template
        .replace("{league}", league)
        .replace("{slot}", slot)
        .replace("{id}", &counter.to_string())
}

/// Generate a lowercase alphanumeric lobby password
pub fn generate_password<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(PASSWORD_LENGTH)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Room names must be lowercase and free of whitespace on most chat platforms
pub fn room_slug(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rating_difference() {
        assert_eq!(rating_difference(1500.0, 1400.0), 100.0);
        assert_eq!(rating_difference(1400.0, 1500.0), 100.0);
        assert_eq!(rating_difference(1500.0, 1500.0), 0.0);
    }

    #[test]
    fn test_ratings_within_tolerance() {
        assert!(ratings_within_tolerance(1500.0, 1450.0, 100.0));
        assert!(!ratings_within_tolerance(1500.0, 1350.0, 100.0));
        assert!(ratings_within_tolerance(1500.0, 1500.0, 0.0));
    }

    #[test]
    fn test_render_name_template() {
        assert_eq!(
            render_name_template("{league}-{slot}-{id}", "inhouse", "draft", 3),
            "inhouse-draft-3"
        );
        assert_eq!(render_name_template("static", "a", "b", 1), "static");
    }

    #[test]
    fn test_generate_password() {
        let mut rng = StdRng::seed_from_u64(7);
        let password = generate_password(&mut rng);
        assert_eq!(password.len(), PASSWORD_LENGTH);
        assert!(password.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_room_slug() {
        assert_eq!(room_slug("  Inhouse Lobby 4 "), "inhouse-lobby-4");
    }
}
