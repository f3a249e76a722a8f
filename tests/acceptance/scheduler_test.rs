//! Run-loop scheduling acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Entries fire at their registered rate, independently of each other
//! - Removing an entry mid-run stops it without disturbing the others
//! - Registration and stop take effect without waiting out `max_wait`
//! - Callbacks receive the wake delta in seconds

use super::common::{assert_in_range, expected_range, wait_until, Counter};
use rl_common::state::RunLoopState;
use rl_runtime::run_loop::{RunLoop, RunLoopBuilder};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_two_entries_keep_their_rates() {
    let run_loop = RunLoop::new("rates").unwrap();
    let fast = Counter::new();
    let slow = Counter::new();

    let start = Instant::now();
    let fast_handle = run_loop.register(100.0, fast.tick());
    let slow_handle = run_loop.register(40.0, slow.tick());
    thread::sleep(Duration::from_millis(100));
    run_loop.unregister(fast_handle);
    run_loop.unregister(slow_handle);
    let elapsed = start.elapsed();

    assert_in_range(
        "10ms entry",
        fast.get(),
        expected_range(elapsed, Duration::from_millis(10), 2),
    );
    assert_in_range(
        "25ms entry",
        slow.get(),
        expected_range(elapsed, Duration::from_millis(25), 1),
    );

    run_loop.stop().unwrap();
}

#[test]
fn test_remove_middle_entry_mid_run() {
    let run_loop = RunLoop::new("remove-middle").unwrap();
    let first = Counter::new();
    let middle = Counter::new();
    let last = Counter::new();

    let start = Instant::now();
    let first_handle = run_loop.register(100.0, first.tick());
    let middle_handle = run_loop.register(50.0, middle.tick());
    let last_handle = run_loop.register(20.0, last.tick());

    thread::sleep(Duration::from_millis(100));
    run_loop.unregister(middle_handle);
    let middle_elapsed = start.elapsed();
    let middle_count = middle.get();
    assert_eq!(run_loop.entry_count(), 2);

    thread::sleep(Duration::from_millis(150));
    run_loop.unregister(first_handle);
    run_loop.unregister(last_handle);
    let elapsed = start.elapsed();

    assert_eq!(middle.get(), middle_count, "removed entry fired again");
    assert_in_range(
        "middle entry",
        middle_count,
        expected_range(middle_elapsed, Duration::from_millis(20), 1),
    );
    assert_in_range(
        "first entry",
        first.get(),
        expected_range(elapsed, Duration::from_millis(10), 3),
    );
    assert_in_range(
        "last entry",
        last.get(),
        expected_range(elapsed, Duration::from_millis(50), 1),
    );
    assert_eq!(run_loop.entry_count(), 0);
}

#[test]
fn test_registration_from_another_thread_is_prompt() {
    let run_loop = Arc::new(
        RunLoopBuilder::new("prompt-register")
            .max_wait(Duration::from_secs(5))
            .spawn()
            .unwrap(),
    );
    // Let the loop settle into a long idle wait.
    thread::sleep(Duration::from_millis(20));

    let counter = Counter::new();
    let registrar = {
        let run_loop = Arc::clone(&run_loop);
        let tick = counter.tick();
        thread::spawn(move || run_loop.register_with_phase(200.0, Duration::ZERO, tick))
    };
    let handle = registrar.join().unwrap();

    assert!(
        wait_until(Duration::from_millis(500), || counter.get() >= 5),
        "entry registered during an idle wait did not start firing"
    );
    run_loop.unregister(handle);
}

#[test]
fn test_stop_interrupts_idle_wait() {
    let run_loop = RunLoopBuilder::new("prompt-stop")
        .max_wait(Duration::from_secs(5))
        .spawn()
        .unwrap();
    let counter = Counter::new();
    run_loop.register_with_phase(0.1, Duration::from_secs(5), counter.tick());
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    run_loop.stop().unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(1),
        "stop took {:?}",
        start.elapsed()
    );
    assert_eq!(run_loop.state(), RunLoopState::Stopped);
    assert_eq!(run_loop.entry_count(), 0);
    assert_eq!(counter.get(), 0);
}

#[test]
fn test_callbacks_receive_wake_delta() {
    let run_loop = RunLoop::new("delta").unwrap();
    let deltas = Arc::new(Mutex::new(Vec::new()));

    let handle = {
        let deltas = Arc::clone(&deltas);
        run_loop.register(50.0, move |dt: f64| deltas.lock().unwrap().push(dt))
    };
    thread::sleep(Duration::from_millis(200));
    run_loop.unregister(handle);

    let deltas = deltas.lock().unwrap();
    assert!(deltas.len() >= 4, "only {} invocations", deltas.len());
    // The first delta runs from loop start to the random phase.
    let steady = &deltas[1..];
    let mean = steady.iter().sum::<f64>() / steady.len() as f64;
    assert!(
        (0.015..0.06).contains(&mean),
        "mean wake delta {mean}s for a 20ms entry"
    );
    assert!(steady.iter().all(|dt| *dt > 0.0));
}

#[test]
fn test_metrics_track_invocations() {
    let run_loop = RunLoop::new("metrics").unwrap();
    let counter = Counter::new();
    let handle = run_loop.register(200.0, counter.tick());
    thread::sleep(Duration::from_millis(100));
    run_loop.unregister(handle);

    let snapshot = run_loop.metrics();
    assert_eq!(snapshot.total_invocations, counter.get());
    assert!(snapshot.total_wakes >= snapshot.total_invocations);
    assert!(snapshot.sample_count > 0);
    assert!(snapshot.jitter_us().is_some());
}

#[test]
fn test_drop_stops_thread_and_releases_callbacks() {
    let token = Arc::new(());
    {
        let run_loop = RunLoop::new("drop").unwrap();
        let held = Arc::clone(&token);
        run_loop.register(100.0, move |_: f64| {
            let _ = &held;
        });
        assert_eq!(Arc::strong_count(&token), 2);
    }
    assert_eq!(Arc::strong_count(&token), 1);
}
