// src/main.rs

mod bottle_detection;
mod config;
mod line_counter;
mod metrics;
mod overlay;
mod types;
mod video_processor;

use anyhow::{Context, Result};
use bottle_detection::{Detector, YoloDetector};
use line_counter::LineCounter;
use metrics::LineMetrics;
use opencv::highgui;
use overlay::OverlayRenderer;
use std::time::Instant;
use tracing::{debug, info, warn};
use types::Config;

fn main() -> Result<()> {
    let config = Config::load("config.yaml")?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "fill_line_monitor={},ort=warn",
            config.logging.level
        ))
        .init();

    info!("🍾 Fill Line Monitor Starting");
    info!("✓ Configuration loaded");

    let mut detector = YoloDetector::new(&config.model)?;
    info!("✓ Bottle detector ready");

    let stats = process_video(&config, &mut detector)?;

    info!("\n📊 Final Report:");
    info!("  Total frames: {}", stats.total_frames);
    info!("  Total detections: {}", stats.total_detections);
    info!("  Filled total: {}", stats.final_filled);
    info!(
        "  Stopped by: {}",
        if stats.interrupted {
            "interrupt key"
        } else {
            "end of stream"
        }
    );
    info!("  Processing Speed: {:.1} FPS", stats.avg_fps);

    Ok(())
}

struct ProcessingStats {
    total_frames: u64,
    total_detections: usize,
    final_filled: u64,
    interrupted: bool,
    avg_fps: f64,
}

fn process_video(config: &Config, detector: &mut impl Detector) -> Result<ProcessingStats> {
    use opencv::videoio::{VideoCaptureTrait, VideoWriterTrait};

    let start_time = Instant::now();

    let mut reader = video_processor::open_video(&config.video.input_path)?;
    let mut writer = video_processor::create_writer(
        &config.video.output_path,
        reader.width,
        reader.height,
        reader.fps,
    )?;

    let boundary_x = (reader.width as f32 * config.line.boundary_ratio) as i32;
    info!("Fill boundary at x={}", boundary_x);

    let mut counter = LineCounter::new(boundary_x);
    let mut line_metrics = LineMetrics::new(&config.line);
    let renderer = OverlayRenderer::new(boundary_x, reader.width, reader.height);

    let mut display_enabled = config.video.display;
    if display_enabled {
        if let Err(e) = highgui::named_window(&config.video.window_title, highgui::WINDOW_AUTOSIZE)
        {
            warn!("Failed to open display window: {}. Running headless.", e);
            display_enabled = false;
        }
    }

    let mut frame_count: u64 = 0;
    let mut total_detections: usize = 0;
    let mut interrupted = false;

    while let Some(frame) = reader.read_frame()? {
        frame_count += 1;

        let detections = detector
            .detect(&frame)
            .with_context(|| format!("Detector failed on frame {}", frame_count))?;
        total_detections += detections.len();

        let counts = counter.update(&detections);
        let snapshot = line_metrics.update(detections.len(), counts.cumulative_filled);

        debug!(
            "Frame {}: left={} right={} filled={} rate={} efficiency={:.2}",
            frame_count,
            counts.left,
            counts.right,
            counts.cumulative_filled,
            snapshot.bottles_per_second,
            snapshot.efficiency
        );

        let annotated = renderer.render(&frame, &detections, &counts, &snapshot)?;
        writer.write(&annotated)?;

        if display_enabled {
            highgui::imshow(&config.video.window_title, &annotated)?;
            let key = highgui::wait_key(1)?;
            if key == 'q' as i32 {
                info!("Interrupt key pressed, stopping");
                interrupted = true;
                break;
            }
        }

        if frame_count % 50 == 0 {
            info!(
                "Progress: {:.1}% ({}/{}) | Unfilled: {} | Filled: {} | Speed: {}",
                reader.progress(),
                reader.current_frame,
                reader.total_frames,
                counts.left,
                counts.cumulative_filled,
                snapshot.speed_hint.as_str()
            );
        }
    }

    // Released on every exit path, interrupt or end of stream
    reader.cap.release()?;
    writer.release()?;
    if display_enabled {
        highgui::destroy_all_windows()?;
    }

    let duration = start_time.elapsed();
    let avg_fps = frame_count as f64 / duration.as_secs_f64().max(1e-6);

    Ok(ProcessingStats {
        total_frames: frame_count,
        total_detections,
        final_filled: counter.total_filled(),
        interrupted,
        avg_fps,
    })
}
