//! Host time used by the link session.

use std::time::Instant;

use chrono::Utc;

/// Monotonic milliseconds for timeouts and wall-clock seconds for requests
pub trait Clock {
    /// Milliseconds since an arbitrary fixed point, never going backwards
    fn now_ms(&self) -> u64;

    /// Current Unix time in seconds
    fn epoch_seconds(&self) -> u32;
}

/// Clock backed by `std::time::Instant` and the system wall clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn epoch_seconds(&self) -> u32 {
        Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(second >= first);
    }

    #[test]
    fn test_system_clock_epoch_is_recent() {
        // Anything after 2023-11-14 is plausible
        assert!(SystemClock::default().epoch_seconds() > 1_700_000_000);
    }

    #[test]
    fn test_stepping_clock() {
        let clock = mocks::SteppingClock::new(3);
        assert_eq!(clock.now_ms(), 0);
        assert_eq!(clock.now_ms(), 3);
        assert_eq!(clock.now_ms(), 6);
        assert_eq!(clock.epoch_seconds(), 1_700_000_000);
    }
}
