use chrono::{Local, NaiveDateTime, Timelike};

/// Source of the wall-clock time stamped on each tick.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

/// Local time, truncated to whole seconds.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}
