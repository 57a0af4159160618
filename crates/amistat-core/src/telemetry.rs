//! Telemetry averaging window
//!
//! Keeps the last [`AVERAGE_WINDOW_SIZE`] battery samples in a ring and
//! computes moving averages over them. The averages always divide by the full
//! window size, including slots not yet rewritten since the last reset; the
//! displayed values before the first wrap depend on this.
//!
//! After [`TelemetryWindow::invalidate`], the next pushed sample is consumed
//! as a grace sample and not stored.

use serde::{Deserialize, Serialize};

/// Number of samples in the averaging window
pub const AVERAGE_WINDOW_SIZE: usize = 10;

/// Result of pushing one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Window was invalidated; this sample only cleared the sentinel
    Discarded,
    /// Sample stored. `became_valid` is set the first time the window fills.
    Stored { became_valid: bool },
}

/// Current moving averages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub percentage: f64,
    pub voltage_mv: f64,
    pub is_valid: bool,
}

/// Circular window of recent SOC and voltage samples
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    percentages: [i32; AVERAGE_WINDOW_SIZE],
    voltages: [i32; AVERAGE_WINDOW_SIZE],
    /// Next write slot; `None` after an invalidation until one sample is consumed
    cursor: Option<usize>,
    is_valid: bool,
}

impl Default for TelemetryWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryWindow {
    pub fn new() -> Self {
        Self {
            percentages: [0; AVERAGE_WINDOW_SIZE],
            voltages: [0; AVERAGE_WINDOW_SIZE],
            cursor: Some(0),
            is_valid: false,
        }
    }

    /// Mark the averages invalid and arm the one-sample grace period.
    ///
    /// Stored samples are left in place; they are overwritten before the
    /// window becomes valid again.
    pub fn invalidate(&mut self) {
        self.is_valid = false;
        self.cursor = None;
    }

    /// True while the next push will be discarded
    pub fn is_invalidated(&self) -> bool {
        self.cursor.is_none()
    }

    /// Window has wrapped at least once since the last invalidation
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Samples collected so far, for "N/10" progress displays
    pub fn sample_count(&self) -> usize {
        if self.is_valid {
            AVERAGE_WINDOW_SIZE
        } else {
            self.cursor.unwrap_or(0)
        }
    }

    /// Push one sample
    pub fn push(&mut self, percentage: i32, voltage_mv: i32) -> PushOutcome {
        let Some(slot) = self.cursor else {
            self.cursor = Some(0);
            return PushOutcome::Discarded;
        };

        self.percentages[slot] = percentage;
        self.voltages[slot] = voltage_mv;

        let mut became_valid = false;
        let mut next = slot + 1;
        if next >= AVERAGE_WINDOW_SIZE {
            if !self.is_valid {
                self.is_valid = true;
                became_valid = true;
            }
            next = 0;
        }
        self.cursor = Some(next);

        PushOutcome::Stored { became_valid }
    }

    /// Averages over every slot of the window
    pub fn averages(&self) -> Averages {
        let n = AVERAGE_WINDOW_SIZE as f64;
        let percentage = self.percentages.iter().map(|&v| v as i64).sum::<i64>() as f64 / n;
        let voltage_mv = self.voltages.iter().map(|&v| v as i64).sum::<i64>() as f64 / n;
        Averages {
            percentage,
            voltage_mv,
            is_valid: self.is_valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_window_divides_by_full_size() {
        let mut window = TelemetryWindow::new();
        window.push(50, 4000);
        window.push(50, 4000);

        let avg = window.averages();
        assert_eq!(avg.percentage, 10.0);
        assert_eq!(avg.voltage_mv, 800.0);
        assert!(!avg.is_valid);
        assert_eq!(window.sample_count(), 2);
    }

    #[test]
    fn test_became_valid_fires_once() {
        let mut window = TelemetryWindow::new();
        let mut fired = 0;
        for i in 0..25 {
            if let PushOutcome::Stored { became_valid: true } = window.push(i, 3700) {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
        assert!(window.is_valid());
        assert_eq!(window.sample_count(), AVERAGE_WINDOW_SIZE);
    }

    #[test]
    fn test_sample_count_clamped_while_invalidated() {
        let mut window = TelemetryWindow::new();
        window.push(1, 1);
        window.invalidate();
        assert!(window.is_invalidated());
        assert_eq!(window.sample_count(), 0);
    }

    #[test]
    fn test_stale_slots_survive_invalidation() {
        let mut window = TelemetryWindow::new();
        for _ in 0..AVERAGE_WINDOW_SIZE {
            window.push(100, 4200);
        }
        window.invalidate();
        assert_eq!(window.push(0, 0), PushOutcome::Discarded);
        window.push(0, 0);

        // One fresh zero, nine stale hundreds
        assert_eq!(window.averages().percentage, 90.0);
        assert!(!window.averages().is_valid);
    }
}
