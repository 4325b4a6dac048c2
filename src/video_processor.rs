// src/video_processor.rs

use crate::types::Frame;
use anyhow::Result;
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use tracing::info;

pub fn open_video(path: &str) -> Result<VideoReader> {
    info!("Opening video: {}", path);

    let cap = VideoCapture::from_file(path, videoio::CAP_ANY)?;

    if !cap.is_opened()? {
        anyhow::bail!("Failed to open video file: {}", path);
    }

    let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
    let total_frames = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_COUNT)? as i32;
    let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
    let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;

    info!(
        "Video properties: {}x{} @ {:.1} FPS, {} frames",
        width, height, fps, total_frames
    );

    Ok(VideoReader {
        cap,
        fps,
        total_frames,
        current_frame: 0,
        width,
        height,
    })
}

/// Output writer at the source's resolution and frame rate.
pub fn create_writer(path: &str, width: i32, height: i32, fps: f64) -> Result<VideoWriter> {
    info!("Output video: {}", path);

    let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
    let writer = VideoWriter::new(path, fourcc, fps, core::Size::new(width, height), true)?;

    Ok(writer)
}

pub struct VideoReader {
    pub cap: VideoCapture,
    pub fps: f64,
    pub total_frames: i32,
    pub current_frame: i32,
    pub width: i32,
    pub height: i32,
}

impl VideoReader {
    /// Returns `Ok(None)` on end of stream; a read error propagates.
    pub fn read_frame(&mut self) -> Result<Option<Frame>> {
        use opencv::videoio::VideoCaptureTrait;

        let mut mat = Mat::default();

        if !VideoCaptureTrait::read(&mut self.cap, &mut mat)? || mat.empty() {
            return Ok(None);
        }

        self.current_frame += 1;
        let timestamp_ms = (self.current_frame as f64 / self.fps) * 1000.0;

        let mut rgb_mat = Mat::default();
        imgproc::cvt_color(&mat, &mut rgb_mat, imgproc::COLOR_BGR2RGB, 0)?;

        let data = rgb_mat.data_bytes()?.to_vec();

        Ok(Some(Frame {
            data,
            width: self.width as usize,
            height: self.height as usize,
            timestamp_ms,
        }))
    }

    pub fn progress(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.current_frame as f32 / self.total_frames as f32) * 100.0
    }
}
