// src/overlay.rs

use crate::bottle_detection::Detection;
use crate::line_counter::FrameCounts;
use crate::metrics::MetricsSnapshot;
use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const BOUNDARY_COLOR: (f64, f64, f64) = (204.0, 0.0, 204.0);
const UNFILLED_BADGE_COLOR: (f64, f64, f64) = (204.0, 0.0, 102.0);
const FILLED_BADGE_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const BOX_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const TEXT_COLOR: (f64, f64, f64) = (255.0, 255.0, 255.0);

fn scalar((b, g, r): (f64, f64, f64)) -> core::Scalar {
    core::Scalar::new(b, g, r, 0.0)
}

/// Draws detection boxes, the fill boundary, the two count badges and the
/// metric text block onto a BGR copy of the frame.
pub struct OverlayRenderer {
    boundary_x: i32,
    width: i32,
    height: i32,
}

impl OverlayRenderer {
    pub fn new(boundary_x: i32, width: i32, height: i32) -> Self {
        Self {
            boundary_x,
            width,
            height,
        }
    }

    pub fn render(
        &self,
        frame: &Frame,
        detections: &[Detection],
        counts: &FrameCounts,
        metrics: &MetricsSnapshot,
    ) -> Result<Mat> {
        let mat = Mat::from_slice(&frame.data)?;
        let mat = mat.reshape(3, self.height)?;

        let mut bgr_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut bgr_mat, imgproc::COLOR_RGB2BGR, 0)?;
        let mut output = bgr_mat.try_clone()?;

        self.draw_detections(&mut output, detections)?;
        self.draw_boundary(&mut output)?;
        self.draw_badges(&mut output, counts)?;
        self.draw_metrics(&mut output, metrics)?;

        Ok(output)
    }

    fn draw_detections(&self, output: &mut Mat, detections: &[Detection]) -> Result<()> {
        for det in detections {
            let [x1, y1, x2, y2] = det.bbox;
            let rect = core::Rect::new(
                x1 as i32,
                y1 as i32,
                (x2 - x1).max(0.0) as i32,
                (y2 - y1).max(0.0) as i32,
            );
            imgproc::rectangle(output, rect, scalar(BOX_COLOR), 2, imgproc::LINE_8, 0)?;

            let label = format!("bottle {:.2}", det.confidence);
            imgproc::put_text(
                output,
                &label,
                core::Point::new(x1 as i32, (y1 as i32 - 6).max(12)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                scalar(BOX_COLOR),
                1,
                imgproc::LINE_8,
                false,
            )?;
        }
        Ok(())
    }

    fn draw_boundary(&self, output: &mut Mat) -> Result<()> {
        imgproc::line(
            output,
            core::Point::new(self.boundary_x, 0),
            core::Point::new(self.boundary_x, self.height),
            scalar(BOUNDARY_COLOR),
            2,
            imgproc::LINE_8,
            0,
        )?;
        Ok(())
    }

    fn draw_badges(&self, output: &mut Mat, counts: &FrameCounts) -> Result<()> {
        // Left badge: instantaneous unfilled count
        imgproc::circle(
            output,
            core::Point::new(50, 50),
            40,
            scalar(UNFILLED_BADGE_COLOR),
            -1,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            output,
            &counts.left.to_string(),
            core::Point::new(35, 60),
            imgproc::FONT_HERSHEY_SIMPLEX,
            1.0,
            scalar(TEXT_COLOR),
            2,
            imgproc::LINE_8,
            false,
        )?;
        imgproc::put_text(
            output,
            "Unfilled",
            core::Point::new(20, 100),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            scalar(TEXT_COLOR),
            2,
            imgproc::LINE_8,
            false,
        )?;

        // Right badge: cumulative filled total
        imgproc::circle(
            output,
            core::Point::new(self.width - 50, 50),
            40,
            scalar(FILLED_BADGE_COLOR),
            -1,
            imgproc::LINE_8,
            0,
        )?;
        imgproc::put_text(
            output,
            &counts.cumulative_filled.to_string(),
            core::Point::new(self.width - 65, 60),
            imgproc::FONT_HERSHEY_SIMPLEX,
            1.0,
            scalar(TEXT_COLOR),
            2,
            imgproc::LINE_8,
            false,
        )?;
        imgproc::put_text(
            output,
            "Filled",
            core::Point::new(self.width - 80, 100),
            imgproc::FONT_HERSHEY_SIMPLEX,
            0.5,
            scalar(TEXT_COLOR),
            2,
            imgproc::LINE_8,
            false,
        )?;

        Ok(())
    }

    fn draw_metrics(&self, output: &mut Mat, metrics: &MetricsSnapshot) -> Result<()> {
        let lines = [
            (
                format!("Bottles/sec: {:.2}", metrics.bottles_per_second as f64),
                self.height - 90,
            ),
            (format!("Defective: {}", metrics.defective), self.height - 70),
            (
                format!("Efficiency: {:.2}%", metrics.efficiency),
                self.height - 50,
            ),
            (
                format!("Speed: {}", metrics.speed_hint.as_str()),
                self.height - 30,
            ),
        ];

        for (text, y) in &lines {
            imgproc::put_text(
                output,
                text,
                core::Point::new(10, *y),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                scalar(TEXT_COLOR),
                2,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(())
    }
}
