use std::sync::{Arc, Mutex};

use chrono::{Local, NaiveDateTime};

/// Source of "now" in the single local zone the platform runs in.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    fixed: Option<Arc<Mutex<NaiveDateTime>>>,
}

impl Clock {
    pub fn system() -> Self {
        Self { fixed: None }
    }

    /// A clock that only moves when `set` is called.
    pub fn fixed(at: NaiveDateTime) -> Self {
        Self {
            fixed: Some(Arc::new(Mutex::new(at))),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        match &self.fixed {
            Some(at) => *at.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
            None => Local::now().naive_local(),
        }
    }

    /// Move a fixed clock. No-op on the system clock.
    pub fn set(&self, at: NaiveDateTime) {
        if let Some(cell) = &self.fixed {
            *cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = at;
        }
    }
}
