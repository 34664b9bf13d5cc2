//! Performance benchmarks for team selection and rating calculations

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inhouse_conductor::matchmaking::{
    balance_teams, captain_priority, compile_captain_pattern, select_captain_pair, CaptainCandidate,
};
use inhouse_conductor::rating::{EloTeamCalculator, RatingCalculator};
use inhouse_conductor::types::{Faction, PlayerId};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn rated_players() -> Vec<(PlayerId, f64)> {
    (0..10)
        .map(|i| (format!("player{}", i), 1200.0 + (i as f64 * 73.0) % 600.0))
        .collect()
}

fn bench_balance_teams(c: &mut Criterion) {
    let players = rated_players();
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("balance_teams_10_players", |b| {
        b.iter(|| black_box(balance_teams(black_box(&players), &mut rng)))
    });
}

fn bench_captain_selection(c: &mut Criterion) {
    let pattern = compile_captain_pattern("^Tier (\\d+)$").unwrap();
    let candidates: Vec<CaptainCandidate> = (0..40)
        .map(|i| {
            let badges = vec![format!("Tier {}", i % 4 + 1), "Regular".to_string()];
            CaptainCandidate {
                player_id: format!("player{}", i),
                priority: captain_priority(&pattern, &badges),
                metric: 1000.0 + (i as f64 * 37.0) % 1000.0,
            }
        })
        .collect();
    let mut rng = StdRng::seed_from_u64(11);

    c.bench_function("select_captain_pair_40_candidates", |b| {
        b.iter(|| black_box(select_captain_pair(black_box(&candidates), 500.0, &mut rng)))
    });
}

fn bench_rating_calculations(c: &mut Criterion) {
    let calculator = EloTeamCalculator::new(32.0, 1500.0);
    let players = rated_players();
    let (one, two) = players.split_at(5);

    c.bench_function("rating_calculation_5v5", |b| {
        b.iter(|| black_box(calculator.calculate_team_changes(one, two, Some(Faction::One))))
    });
}

criterion_group!(
    benches,
    bench_balance_teams,
    bench_captain_selection,
    bench_rating_calculations
);
criterion_main!(benches);
