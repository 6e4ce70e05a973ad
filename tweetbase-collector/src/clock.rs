use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// Source of time and blocking waits for the network clients
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Clock that only moves when slept on or advanced explicitly.
/// Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    state: Rc<RefCell<ManualState>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.state.borrow_mut().now += by;
    }

    /// Every sleep requested so far, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state.borrow().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.state.borrow().sleeps.iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.borrow().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        state.sleeps.push(duration);
        if let Ok(step) = chrono::Duration::from_std(duration) {
            state.now += step;
        }
    }
}
