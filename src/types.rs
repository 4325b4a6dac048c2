// src/types.rs

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    pub video: VideoConfig,
    pub line: LineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub path: String,
    pub input_size: usize,
    pub target_class: usize,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    pub input_path: String,
    pub output_path: String,
    pub window_title: String,
    pub display: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineConfig {
    /// Fraction of the frame width where the fill boundary sits.
    pub boundary_ratio: f32,
    pub low_rate_threshold: f64,
    pub high_rate_threshold: f64,
    pub defect_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// A decoded video frame in RGB byte order.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
}
