// src/bottle_detection.rs

use crate::types::{Frame, ModelConfig};
use anyhow::{Context, Result};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const YOLO_CLASSES: usize = 80;
const YOLO_PREDICTIONS: usize = 8400;

#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // [x1, y1, x2, y2] in original image coordinates
    pub confidence: f32,
    pub class_id: usize,
}

/// Narrow seam over the pretrained model so counting and rendering can be
/// exercised with synthetic detections.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

pub struct YoloDetector {
    session: Session,
    input_size: usize,
    target_class: usize,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
}

impl YoloDetector {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        info!("Loading YOLO model: {}", config.path);

        let session = Session::builder()?
            .with_execution_providers([
                CUDAExecutionProvider::default().with_device_id(0).build(),
                CPUExecutionProvider::default().build(),
            ])?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.num_threads)?
            .commit_from_file(&config.path)
            .context("Failed to load model")?;

        info!("✓ YOLO detector initialized (target class {})", config.target_class);
        Ok(Self {
            session,
            input_size: config.input_size,
            target_class: config.target_class,
            confidence_threshold: config.confidence_threshold,
            nms_iou_threshold: config.nms_iou_threshold,
        })
    }

    fn preprocess(&self, src: &[u8], src_w: usize, src_h: usize) -> (Vec<f32>, f32, f32, f32) {
        let target_size = self.input_size;

        // Scale to fit inside the square input while keeping aspect ratio
        let scale = (target_size as f32 / src_w as f32).min(target_size as f32 / src_h as f32);
        let scaled_w = (src_w as f32 * scale) as usize;
        let scaled_h = (src_h as f32 * scale) as usize;

        let pad_x = (target_size - scaled_w) as f32 / 2.0;
        let pad_y = (target_size - scaled_h) as f32 / 2.0;

        let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);

        // Letterbox onto a gray canvas
        let mut canvas = vec![114u8; target_size * target_size * 3];
        for y in 0..scaled_h {
            for x in 0..scaled_w {
                let src_idx = (y * scaled_w + x) * 3;
                let dst_x = x + pad_x as usize;
                let dst_y = y + pad_y as usize;
                let dst_idx = (dst_y * target_size + dst_x) * 3;
                canvas[dst_idx..dst_idx + 3].copy_from_slice(&resized[src_idx..src_idx + 3]);
            }
        }

        // Normalize [0, 255] -> [0, 1] and convert HWC -> CHW
        let mut input = vec![0.0f32; 3 * target_size * target_size];
        for c in 0..3 {
            for h in 0..target_size {
                for w in 0..target_size {
                    let hwc_idx = (h * target_size + w) * 3 + c;
                    let chw_idx = c * target_size * target_size + h * target_size + w;
                    input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
                }
            }
        }

        (input, scale, pad_x, pad_y)
    }

    fn infer(&mut self, input: Vec<f32>) -> Result<Vec<f32>> {
        let shape = [1, 3, self.input_size, self.input_size];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;

        let outputs = self.session.run(ort::inputs!["images" => input_value])?;
        let output = &outputs[0];
        let (_, data) = output.try_extract_tensor::<f32>()?;

        Ok(data.to_vec())
    }
}

impl Detector for YoloDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = self.preprocess(&frame.data, frame.width, frame.height);

        let output = self.infer(input)?;

        let detections = parse_detections(
            &output,
            scale,
            pad_x,
            pad_y,
            self.confidence_threshold,
            self.target_class,
            self.nms_iou_threshold,
        );

        debug!("Detected {} bottle(s)", detections.len());
        Ok(detections)
    }
}

/// Parse the YOLOv8 detection head (84 x 8400), keep only the target class,
/// map boxes back through the letterbox transform and run NMS.
pub fn parse_detections(
    output: &[f32],
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    conf_thresh: f32,
    target_class: usize,
    iou_threshold: f32,
) -> Vec<Detection> {
    let mut detections = Vec::new();

    for i in 0..YOLO_PREDICTIONS {
        // Bbox in center format
        let cx = output[i];
        let cy = output[YOLO_PREDICTIONS + i];
        let w = output[YOLO_PREDICTIONS * 2 + i];
        let h = output[YOLO_PREDICTIONS * 3 + i];

        let mut max_conf = 0.0f32;
        let mut best_class = 0;

        for c in 0..YOLO_CLASSES {
            let conf = output[YOLO_PREDICTIONS * (4 + c) + i];
            if conf > max_conf {
                max_conf = conf;
                best_class = c;
            }
        }

        if max_conf < conf_thresh || best_class != target_class {
            continue;
        }

        // Center format -> corner format, then reverse the letterbox transform
        let x1 = (cx - w / 2.0 - pad_x) / scale;
        let y1 = (cy - h / 2.0 - pad_y) / scale;
        let x2 = (cx + w / 2.0 - pad_x) / scale;
        let y2 = (cy + h / 2.0 - pad_y) / scale;

        detections.push(Detection {
            bbox: [x1, y1, x2, y2],
            confidence: max_conf,
            class_id: best_class,
        });
    }

    nms(detections, iou_threshold)
}

fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }

    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

    let mut keep = Vec::new();

    while !detections.is_empty() {
        let current = detections.remove(0);
        keep.push(current.clone());

        detections.retain(|det| calculate_iou(&current.bbox, &det.bbox) < iou_threshold);
    }

    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = sx.floor() as usize;
            let sy0 = sy.floor() as usize;
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTTLE: usize = 39;

    fn raw_output() -> Vec<f32> {
        vec![0.0f32; (4 + YOLO_CLASSES) * YOLO_PREDICTIONS]
    }

    fn set_prediction(output: &mut [f32], i: usize, cx: f32, cy: f32, w: f32, h: f32, class: usize, conf: f32) {
        output[i] = cx;
        output[YOLO_PREDICTIONS + i] = cy;
        output[YOLO_PREDICTIONS * 2 + i] = w;
        output[YOLO_PREDICTIONS * 3 + i] = h;
        output[YOLO_PREDICTIONS * (4 + class) + i] = conf;
    }

    #[test]
    fn test_parse_keeps_only_target_class() {
        let mut output = raw_output();
        set_prediction(&mut output, 0, 100.0, 100.0, 40.0, 80.0, BOTTLE, 0.9);
        set_prediction(&mut output, 1, 300.0, 100.0, 40.0, 80.0, 0, 0.9); // person

        let detections = parse_detections(&output, 1.0, 0.0, 0.0, 0.25, BOTTLE, 0.45);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, BOTTLE);
        assert!((detections[0].bbox[0] - 80.0).abs() < 1e-3);
        assert!((detections[0].bbox[3] - 140.0).abs() < 1e-3);
    }

    #[test]
    fn test_parse_reverses_letterbox() {
        let mut output = raw_output();
        // Box at input coords (cx=320, cy=200), letterboxed with scale 0.5, pad_y 40
        set_prediction(&mut output, 0, 320.0, 200.0, 100.0, 100.0, BOTTLE, 0.8);

        let detections = parse_detections(&output, 0.5, 0.0, 40.0, 0.25, BOTTLE, 0.45);

        assert_eq!(detections.len(), 1);
        let [x1, y1, x2, y2] = detections[0].bbox;
        assert!((x1 - 540.0).abs() < 1e-3);
        assert!((y1 - 220.0).abs() < 1e-3);
        assert!((x2 - 740.0).abs() < 1e-3);
        assert!((y2 - 420.0).abs() < 1e-3);
    }

    #[test]
    fn test_nms_suppresses_overlapping_boxes() {
        let mut output = raw_output();
        set_prediction(&mut output, 0, 100.0, 100.0, 40.0, 80.0, BOTTLE, 0.9);
        set_prediction(&mut output, 1, 102.0, 101.0, 40.0, 80.0, BOTTLE, 0.6);
        set_prediction(&mut output, 2, 400.0, 100.0, 40.0, 80.0, BOTTLE, 0.7);

        let detections = parse_detections(&output, 1.0, 0.0, 0.0, 0.25, BOTTLE, 0.45);

        assert_eq!(detections.len(), 2);
        // Highest confidence of the overlapping pair survives
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = [0.0, 0.0, 10.0, 10.0];
        let b = [20.0, 20.0, 30.0, 30.0];
        assert_eq!(calculate_iou(&a, &b), 0.0);
        assert!((calculate_iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_low_confidence_filtered() {
        let mut output = raw_output();
        set_prediction(&mut output, 0, 100.0, 100.0, 40.0, 80.0, BOTTLE, 0.1);

        let detections = parse_detections(&output, 1.0, 0.0, 0.0, 0.25, BOTTLE, 0.45);
        assert!(detections.is_empty());
    }
}
