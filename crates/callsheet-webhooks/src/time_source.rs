use std::sync::Arc;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// Abstracts the wall clock so retry timing can be driven from tests
pub trait TimeSource: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually advanced clock
#[derive(Debug, Clone)]
pub struct FakeTimeSource {
    t: Arc<Mutex<OffsetDateTime>>,
}

impl FakeTimeSource {
    pub fn new(t: OffsetDateTime) -> Self {
        Self {
            t: Arc::new(Mutex::new(t)),
        }
    }

    pub fn set(&self, t: OffsetDateTime) {
        let mut current = self.t.lock();
        assert!(
            *current <= t,
            "The previous time [{}] is more than new time [{t}]",
            *current
        );
        *current = t;
    }

    pub fn advance(&self, quantum: Duration) {
        let mut current = self.t.lock();
        *current += quantum;
    }
}

impl TimeSource for FakeTimeSource {
    fn now(&self) -> OffsetDateTime {
        *self.t.lock()
    }
}
