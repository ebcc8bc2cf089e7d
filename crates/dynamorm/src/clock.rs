//! An explicit time seam, so `created_at`/`updated_at` stamping and deadline
//! short-circuits are unit-testable without real sleeps or wall-clock reads
//! sprinkled through the executor.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dynamorm_core::{AttrValue, Descriptor, Role};

use crate::backend::Item;

/// A source of the current wall-clock time and a monotonic instant, used
/// wherever the engine would otherwise call `Utc::now()` / `Instant::now()`
/// directly.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
    fn now_instant(&self) -> Instant;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_instant(&self) -> Instant {
        Instant::now()
    }
}

/// A test double that returns a fixed, caller-advanceable time.
#[derive(Clone)]
pub struct FixedClock {
    utc: Arc<Mutex<DateTime<Utc>>>,
    instant: Arc<Mutex<Instant>>,
}

impl FixedClock {
    pub fn new(utc: DateTime<Utc>) -> Self {
        Self {
            utc: Arc::new(Mutex::new(utc)),
            instant: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.utc.lock().expect("clock lock poisoned");
        *guard += delta;
    }

    pub fn advance_instant(&self, delta: std::time::Duration) {
        let mut guard = self.instant.lock().expect("clock lock poisoned");
        *guard += delta;
    }
}

impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.utc.lock().expect("clock lock poisoned")
    }

    fn now_instant(&self) -> Instant {
        *self.instant.lock().expect("clock lock poisoned")
    }
}

/// Stamps `created_at`/`updated_at` attributes into `attrs` (keyed by
/// dbname, matching `Model::into_attrs`'s shape), per spec §3's "lifecycle
/// timestamps populated by the core on Create and on any write":
/// `Role::CreatedAt` fields are set only `on_create`; `Role::UpdatedAt`
/// fields are set unconditionally, overwriting whatever the caller supplied.
pub(crate) fn stamp_timestamps(descriptor: &Descriptor, attrs: &mut Item, clock: &dyn Clock, on_create: bool) {
    let now = AttrValue::S(clock.now_utc().to_rfc3339());
    for field in descriptor.attributes() {
        match field.role {
            Role::CreatedAt if on_create => {
                attrs.insert(field.dbname.clone(), now.clone());
            }
            Role::UpdatedAt => {
                attrs.insert(field.dbname.clone(), now.clone());
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances_on_demand() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let clock = FixedClock::new(start);
        assert_eq!(clock.now_utc(), start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(5));
    }
}
