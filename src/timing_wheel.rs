//! A single-level timing wheel used to reap idle connections with coarse,
//! self-rescheduling checks rather than one OS timer per connection.
//!
//! Nothing in the example corpus pulls in a timer-wheel crate, so this is
//! hand-rolled on top of the same two primitives the rest of the reactor
//! core is built from: [`SpinLock`](crate::atomic::SpinLock) guarding each
//! slot's entry list, and a dedicated ticking thread, mirroring the
//! coarse-granularity contract the reference implementation gets from its
//! own goroutine-driven reaping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::atomic::{AtomicFlag, SpinLock};

/// Returning `Some(d)` reschedules the timer `d` ahead; `None` means the
/// entry is done and is dropped.
pub type Callback = Box<dyn FnMut() -> Option<Duration> + Send>;

struct Entry {
    /// Remaining full trips around the wheel before this entry is due.
    /// A single-level wheel can only address delays up to `size * tick`
    /// directly, so longer delays wait out extra revolutions here.
    rounds: u32,
    callback: Callback,
}

pub struct TimingWheel {
    tick: Duration,
    size: usize,
    slots: Vec<SpinLock<Vec<Entry>>>,
    cursor: AtomicUsize,
    running: AtomicFlag,
}

impl TimingWheel {
    /// Starts the background ticking thread immediately.
    pub fn start(tick: Duration, size: usize) -> std::sync::Arc<TimingWheel> {
        let wheel = std::sync::Arc::new(TimingWheel {
            tick,
            size: size.max(1),
            slots: (0..size.max(1)).map(|_| SpinLock::new(Vec::new())).collect(),
            cursor: AtomicUsize::new(0),
            running: AtomicFlag::new(true),
        });

        let ticker = std::sync::Arc::clone(&wheel);
        thread::Builder::new()
            .name("ringloop-timing-wheel".into())
            .spawn(move || ticker.run())
            .expect("spawning the timing wheel thread must not fail");

        wheel
    }

    /// Schedules `callback` to first run `delay` from now.
    pub fn schedule(&self, delay: Duration, callback: Callback) {
        let ticks = self.ticks_for(delay);
        self.insert(ticks, callback);
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    fn ticks_for(&self, delay: Duration) -> usize {
        let ticks = delay.as_nanos() / self.tick.as_nanos().max(1);
        (ticks as usize).max(1)
    }

    fn insert(&self, ticks: usize, callback: Callback) {
        let cursor = self.cursor.load(Ordering::Acquire);
        let slot = (cursor + ticks) % self.size;
        let rounds = (ticks / self.size) as u32;
        self.slots[slot].with(|entries| entries.push(Entry { rounds, callback }));
    }

    fn run(&self) {
        while self.running.get() {
            thread::sleep(self.tick);
            if !self.running.get() {
                return;
            }
            let slot = self.cursor.fetch_add(1, Ordering::AcqRel) % self.size;
            let due = self.slots[slot].with(std::mem::take);

            let mut to_reinsert = Vec::new();
            for mut entry in due {
                if entry.rounds > 0 {
                    entry.rounds -= 1;
                    to_reinsert.push(entry);
                    continue;
                }
                if let Some(next) = (entry.callback)() {
                    let ticks = self.ticks_for(next);
                    self.insert(ticks, entry.callback);
                }
            }
            if !to_reinsert.is_empty() {
                self.slots[slot].with(|entries| entries.extend(to_reinsert));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as Counter, Ordering as Ord};
    use std::sync::Arc;

    #[test]
    fn fires_once_after_the_configured_delay() {
        let wheel = TimingWheel::start(Duration::from_millis(5), 50);
        let fired = Arc::new(Counter::new(0));
        let fired_cb = Arc::clone(&fired);
        wheel.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                fired_cb.fetch_add(1, Ord::SeqCst);
                None
            }),
        );

        thread::sleep(Duration::from_millis(120));
        wheel.stop();
        assert_eq!(fired.load(Ord::SeqCst), 1);
    }

    #[test]
    fn self_reschedule_keeps_firing_until_it_stops() {
        let wheel = TimingWheel::start(Duration::from_millis(5), 50);
        let fires = Arc::new(Counter::new(0));
        let fires_cb = Arc::clone(&fires);
        wheel.schedule(
            Duration::from_millis(10),
            Box::new(move || {
                let n = fires_cb.fetch_add(1, Ord::SeqCst);
                if n < 2 {
                    Some(Duration::from_millis(10))
                } else {
                    None
                }
            }),
        );

        thread::sleep(Duration::from_millis(200));
        wheel.stop();
        assert_eq!(fires.load(Ord::SeqCst), 3);
    }

    #[test]
    fn a_delay_longer_than_one_revolution_still_fires() {
        // size * tick = 50 * 5ms = 250ms, so 400ms needs a second revolution.
        let wheel = TimingWheel::start(Duration::from_millis(5), 50);
        let fired = Arc::new(Counter::new(0));
        let fired_cb = Arc::clone(&fired);
        wheel.schedule(
            Duration::from_millis(400),
            Box::new(move || {
                fired_cb.fetch_add(1, Ord::SeqCst);
                None
            }),
        );

        thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ord::SeqCst), 0, "must not fire before its delay elapses");
        thread::sleep(Duration::from_millis(450));
        wheel.stop();
        assert_eq!(fired.load(Ord::SeqCst), 1);
    }
}
