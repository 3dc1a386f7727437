//! Unit tests for the placement rule and load scoring.

use relay_control::models::worker::{load_score, Worker};
use relay_control::scheduler::placement;

fn worker(label: &str, score: u8, max_sessions: i64, active_sessions: i64) -> Worker {
    let mut worker = Worker::new(
        label.to_owned(),
        format!("http://{label}:9400"),
        4096,
        max_sessions,
        "token".to_owned(),
    );
    worker.load_score = score;
    worker.active_sessions = active_sessions;
    worker
}

#[test]
fn load_score_matches_published_formula() {
    // 50% ram, 30% cpu, 20% sessions: 0.4*50 + 0.3*30 + 0.3*20 = 35.
    assert_eq!(load_score(2048, 4096, 30.0, 2, 10), 35);
    // Fully saturated clamps to 100.
    assert_eq!(load_score(8192, 4096, 250.0, 20, 10), 100);
    // Idle worker scores zero.
    assert_eq!(load_score(0, 4096, 0.0, 0, 10), 0);
    // Zero max_sessions counts as fully session-loaded.
    assert_eq!(load_score(0, 4096, 0.0, 0, 0), 30);
}

#[test]
fn premium_takes_the_least_loaded_head() {
    // Candidates arrive sorted ascending by load score.
    let candidates = vec![worker("w1", 10, 10, 7), worker("w2", 40, 20, 10)];
    let picked = placement::select(&candidates, true).unwrap();
    assert_eq!(picked.worker_id, "w1");
}

#[test]
fn free_avoids_nearly_full_workers() {
    // w1 is least loaded but has only 3 open slots; w2 has 10.
    let candidates = vec![worker("w1", 10, 10, 7), worker("w2", 40, 20, 10)];
    let picked = placement::select(&candidates, false).unwrap();
    assert_eq!(picked.worker_id, "w2");
}

#[test]
fn free_takes_the_head_with_headroom() {
    let candidates = vec![
        worker("w1", 6, 10, 2),
        worker("w2", 9, 10, 3),
        worker("w3", 12, 10, 4),
    ];
    let picked = placement::select(&candidates, false).unwrap();
    assert_eq!(picked.worker_id, "w1");
}

#[test]
fn free_falls_back_to_head_when_everything_is_tight() {
    let candidates = vec![worker("w1", 10, 10, 8), worker("w2", 40, 10, 9)];
    let picked = placement::select(&candidates, false).unwrap();
    assert_eq!(picked.worker_id, "w1");
}

#[test]
fn empty_fleet_selects_nothing() {
    assert!(placement::select(&[], true).is_none());
    assert!(placement::select(&[], false).is_none());
}

#[test]
fn capacity_predicate_honors_ram_threshold() {
    let mut w = worker("w1", 10, 10, 2);
    assert!(w.has_capacity());
    w.used_ram = w.ram_threshold;
    assert!(!w.has_capacity());
    w.used_ram = 0;
    w.active_sessions = w.max_sessions;
    assert!(!w.has_capacity());
}
