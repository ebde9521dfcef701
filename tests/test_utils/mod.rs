use std::{
    thread,
    time::{Duration, Instant},
};

const WAIT_DEADLINE: Duration = Duration::from_secs(2);

/// Polls `predicate` until it holds, panicking with `what` when the
/// deadline passes first.
pub fn wait_for(what: &str, predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT_DEADLINE;
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("timed out waiting for {}", what);
}

/// Waits until `count()` has held still for a full `window`, i.e. the
/// background activity it measures has stopped.
pub fn assert_settles(what: &str, window: Duration, count: impl Fn() -> usize) {
    let deadline = Instant::now() + WAIT_DEADLINE;
    let mut last = count();
    let mut unchanged_since = Instant::now();
    while Instant::now() < deadline {
        thread::sleep(Duration::from_millis(2));
        let current = count();
        if current != last {
            last = current;
            unchanged_since = Instant::now();
        } else if unchanged_since.elapsed() >= window {
            return;
        }
    }
    panic!("{} kept changing past the deadline", what);
}
