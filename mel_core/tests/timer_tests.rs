//! Timing tests for `Timer`. Bounds are loose so they hold on loaded CI hosts.

use mel_common::frequency::Frequency;
use mel_core::timer::{Timer, WaitMode, WaitStatus};
use std::thread;
use std::time::{Duration, Instant};

fn mean_interval(mode: WaitMode, period: Duration, cycles: u32) -> Duration {
    let mut timer = Timer::new(period, mode).unwrap();
    let start = timer.start();
    for _ in 0..cycles {
        timer.wait();
    }
    start.elapsed() / cycles
}

#[test]
fn test_mean_interval_close_to_period_in_every_mode() {
    let period = Duration::from_millis(2);
    for mode in [WaitMode::Busy, WaitMode::Sleep, WaitMode::Hybrid] {
        let mean = mean_interval(mode, period, 200);
        assert!(mean >= period, "{mode:?}: mean {mean:?} shorter than period");
        assert!(
            mean < period + Duration::from_micros(500),
            "{mode:?}: mean {mean:?} drifted"
        );
    }
}

#[test]
fn test_elapsed_never_behind_ticks() {
    let mut timer = Timer::from_frequency(Frequency::hertz(500), WaitMode::Hybrid).unwrap();
    timer.start();
    for _ in 0..50 {
        timer.wait();
        assert!(timer.time() >= timer.period() * timer.ticks() as u32);
    }
    assert_eq!(timer.ticks(), 50);
}

#[test]
fn test_slow_cycle_does_not_shift_later_boundaries() {
    let period = Duration::from_millis(5);
    let mut timer = Timer::new(period, WaitMode::Sleep).unwrap();
    let origin = timer.start();

    timer.wait();
    thread::sleep(Duration::from_millis(8));
    assert!(matches!(timer.wait(), WaitStatus::Overrun { .. }));

    // Third boundary is still origin + 3P, not "now + P".
    assert_eq!(timer.next_boundary(), origin + period * 3);
    timer.wait();
    assert!(Instant::now() >= origin + period * 3);
    assert_eq!(timer.overruns(), 1);
}

#[test]
fn test_restart_resets_counts() {
    let mut timer = Timer::new(Duration::from_millis(1), WaitMode::Busy).unwrap();
    timer.start();
    thread::sleep(Duration::from_millis(3));
    timer.wait();
    assert_eq!(timer.overruns(), 1);

    timer.start();
    assert_eq!(timer.ticks(), 0);
    assert_eq!(timer.overruns(), 0);
    assert_eq!(timer.wait(), WaitStatus::OnTime);
}
