//! Serialised access to a process-wide [`logtest::Logger`].

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use log::Level;
use logtest::Logger;
use rstest::fixture;

/// Handle to the global logger with exclusive access.
///
/// This guard ensures tests do not interfere with each other's log capture by
/// serialising access to a [`logtest::Logger`]. Records left over from a
/// previous holder are discarded on acquisition.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    /// Acquire the global [`Logger`] instance.
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        // A test that panicked while holding the logger leaves it usable.
        let mut guard = logger.lock().unwrap_or_else(PoisonError::into_inner);
        while guard.pop().is_some() {}

        Self { guard }
    }

    /// Drain captured records, returning true if any at `level` contains
    /// `needle`.
    pub fn contains(&mut self, level: Level, needle: &str) -> bool {
        let mut found = false;
        while let Some(record) = self.guard.pop() {
            found |= record.level() == level && record.args().contains(needle);
        }
        found
    }
}

impl Default for LoggerHandle {
    fn default() -> Self { Self::new() }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }
