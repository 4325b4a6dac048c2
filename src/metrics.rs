// src/metrics.rs
//
// Derived line statistics: throughput estimate, placeholder defect counter,
// efficiency percentage and a speed recommendation.

use crate::types::LineConfig;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedHint {
    Decrease,
    Optimal,
    Increase,
}

impl SpeedHint {
    pub fn classify(rate: f64, low_threshold: f64, high_threshold: f64) -> Self {
        if rate < low_threshold {
            SpeedHint::Decrease
        } else if rate > high_threshold {
            SpeedHint::Increase
        } else {
            SpeedHint::Optimal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeedHint::Decrease => "Decrease",
            SpeedHint::Optimal => "Optimal",
            SpeedHint::Increase => "Increase",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub elapsed_secs: f64,
    pub bottles_per_second: i64,
    pub defective: u64,
    pub efficiency: f64,
    pub speed_hint: SpeedHint,
}

/// Frame-by-frame statistics keyed to wall-clock time since stream start.
///
/// The arithmetic reproduces the established monitor behavior exactly: the
/// rate estimate truncates then adds the current frame's detections on top,
/// the defect counter only ever resets to zero, and efficiency holds its last
/// value while the filled total is zero. See DESIGN.md.
pub struct LineMetrics {
    started_at: Instant,
    low_rate_threshold: f64,
    high_rate_threshold: f64,
    defect_probability: f64,
    defective: u64,
    efficiency: f64,
}

impl LineMetrics {
    pub fn new(config: &LineConfig) -> Self {
        Self {
            started_at: Instant::now(),
            low_rate_threshold: config.low_rate_threshold,
            high_rate_threshold: config.high_rate_threshold,
            defect_probability: config.defect_probability,
            defective: 0,
            efficiency: 100.0,
        }
    }

    pub fn update(&mut self, total_detections: usize, cumulative_filled: u64) -> MetricsSnapshot {
        let elapsed_secs = self.started_at.elapsed().as_secs_f64();
        self.sample(total_detections, cumulative_filled, elapsed_secs)
    }

    fn sample(
        &mut self,
        total_detections: usize,
        cumulative_filled: u64,
        elapsed_secs: f64,
    ) -> MetricsSnapshot {
        let bottles_per_second =
            (total_detections as f64 / elapsed_secs).trunc() as i64 + total_detections as i64;

        // Placeholder defect model: an occasional reset of a counter that is
        // never incremented, so it stays at zero.
        if rand::random::<f64>() < self.defect_probability {
            self.defective = 0;
        }

        if cumulative_filled > 0 {
            let raw = (total_detections as f64 - 2.0) / cumulative_filled as f64 * 100.0;
            self.efficiency = if raw <= 100.0 { raw.trunc() } else { 100.0 };
        }

        let speed_hint = SpeedHint::classify(
            bottles_per_second as f64,
            self.low_rate_threshold,
            self.high_rate_threshold,
        );

        MetricsSnapshot {
            elapsed_secs,
            bottles_per_second,
            defective: self.defective,
            efficiency: self.efficiency,
            speed_hint,
        }
    }
}
