//! Frame pipeline tests with in-memory encoded images

use bytes::Bytes;
use camlink_core::Frame;
use camlink_media::*;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingSink {
    frames: Mutex<Vec<RasterFrame>>,
    metrics: Mutex<Vec<PipelineMetrics>>,
}

impl FrameSink for RecordingSink {
    fn on_frame(&self, frame: RasterFrame) {
        self.frames.lock().push(frame);
    }

    fn on_metrics(&self, metrics: PipelineMetrics) {
        self.metrics.lock().push(metrics);
    }
}

fn encoded(format: ImageFormat, width: u32, height: u32) -> Bytes {
    let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]));
    let mut buf = Vec::new();
    let image = match format {
        // JPEG has no alpha channel
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).into_rgb8()),
        _ => DynamicImage::ImageRgba8(img),
    };
    image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    Bytes::from(buf)
}

fn corrupt_jpeg() -> Bytes {
    // Valid JPEG signature followed by garbage
    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x13, 0x37, 0x00, 0x00])
}

fn pipeline(threshold: u32) -> (FramePipeline, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let config = PipelineConfig {
        decode_failure_threshold: threshold,
        ..Default::default()
    };
    (FramePipeline::new(config, sink.clone()), sink)
}

#[tokio::test(start_paused = true)]
async fn test_decodes_png_and_jpeg() {
    let (mut pipeline, sink) = pipeline(5);

    assert_eq!(
        pipeline.process(Frame::new(encoded(ImageFormat::Png, 4, 2), 1)),
        FrameOutcome::Rendered
    );
    assert_eq!(
        pipeline.process(Frame::new(encoded(ImageFormat::Jpeg, 16, 8), 2)),
        FrameOutcome::Rendered
    );

    let frames = sink.frames.lock();
    assert_eq!(frames.len(), 2);
    assert_eq!((frames[0].width, frames[0].height), (4, 2));
    assert_eq!(frames[0].pixels.len(), 4 * 2 * 4);
    assert_eq!(&frames[0].pixels[..4], &[200, 40, 40, 255]);
    assert_eq!(frames[1].stride(), 64);
    assert_eq!(frames[1].sequence, 2);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_frame_is_dropped_and_counted() {
    let (mut pipeline, sink) = pipeline(5);

    pipeline.process(Frame::new(encoded(ImageFormat::Png, 2, 2), 1));
    let outcome = pipeline.process(Frame::new(corrupt_jpeg(), 2));
    assert_eq!(
        outcome,
        FrameOutcome::Dropped {
            consecutive: 1,
            category: ErrorCategory::Codec,
        }
    );
    pipeline.process(Frame::new(encoded(ImageFormat::Png, 2, 2), 3));

    assert_eq!(sink.frames.lock().len(), 2);
    let metrics = pipeline.metrics();
    assert_eq!(metrics.frames_received, 2);
    assert_eq!(metrics.decode_errors, 1);
    // A good frame clears the run
    assert_eq!(pipeline.consecutive_failures(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_and_unknown_payloads() {
    assert!(matches!(
        FramePipeline::decode(&[], 7),
        Err(MediaError::EmptyPayload { sequence: 7 })
    ));
    assert!(matches!(
        FramePipeline::decode(b"definitely not an image", 1),
        Err(MediaError::UnsupportedFormat { .. })
    ));
    assert!(matches!(
        FramePipeline::decode(&corrupt_jpeg(), 1),
        Err(MediaError::DecodingFailed { .. })
    ));
    // The pipeline classifies what it drops
    let (mut pipeline, _sink) = pipeline(5);
    assert_eq!(
        pipeline.process(Frame::new(Bytes::from_static(b"definitely not an image"), 1)),
        FrameOutcome::Dropped {
            consecutive: 1,
            category: ErrorCategory::Format,
        }
    );
    assert_eq!(
        pipeline.process(Frame::new(Bytes::new(), 2)),
        FrameOutcome::Dropped {
            consecutive: 2,
            category: ErrorCategory::Data,
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_sustained_failure_at_threshold() {
    let (mut pipeline, sink) = pipeline(3);

    assert_eq!(
        pipeline.process(Frame::new(corrupt_jpeg(), 1)),
        FrameOutcome::Dropped {
            consecutive: 1,
            category: ErrorCategory::Codec,
        }
    );
    assert_eq!(
        pipeline.process(Frame::new(corrupt_jpeg(), 2)),
        FrameOutcome::Dropped {
            consecutive: 2,
            category: ErrorCategory::Codec,
        }
    );
    match pipeline.process(Frame::new(corrupt_jpeg(), 3)) {
        FrameOutcome::SustainedFailure {
            consecutive,
            last_error,
        } => {
            assert_eq!(consecutive, 3);
            assert!(last_error.contains("Jpeg"));
        }
        other => panic!("expected sustained failure, got {:?}", other),
    }
    assert!(sink.frames.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_fps_over_sliding_window() {
    let (mut pipeline, _sink) = pipeline(5);
    let png = encoded(ImageFormat::Png, 2, 2);

    for seq in 0..10 {
        pipeline.process(Frame::new(png.clone(), seq));
        tokio::time::advance(Duration::from_millis(50)).await;
    }
    // 10 frames within the last 500ms of a 1s window
    assert_eq!(pipeline.current_fps(), 10.0);

    tokio::time::advance(Duration::from_millis(700)).await;
    // Samples from t=0..=200ms have aged out at t=1200ms
    assert_eq!(pipeline.current_fps(), 5.0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(pipeline.current_fps(), 0.0);
    assert_eq!(pipeline.metrics().frames_received, 10);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_reported_once_per_interval() {
    let (mut pipeline, sink) = pipeline(5);
    let png = encoded(ImageFormat::Png, 2, 2);

    for seq in 0..25 {
        pipeline.process(Frame::new(png.clone(), seq));
        tokio::time::advance(Duration::from_millis(100)).await;
    }

    // Reports at 0ms, 1000ms and 2000ms
    let reports = sink.metrics.lock();
    assert_eq!(reports.len(), 3);
    assert_eq!(reports[0].frames_received, 1);
    assert_eq!(reports[2].frames_received, 21);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_counters() {
    let (mut pipeline, _sink) = pipeline(5);
    pipeline.process(Frame::new(encoded(ImageFormat::Png, 2, 2), 1));
    pipeline.process(Frame::new(corrupt_jpeg(), 2));

    pipeline.reset();
    assert_eq!(pipeline.metrics(), PipelineMetrics::default());
    assert_eq!(pipeline.consecutive_failures(), 0);
}

#[test]
fn test_config_defaults_and_validation() {
    let config: PipelineConfig = serde_json::from_str(r#"{"fps_window": 500}"#).unwrap();
    assert_eq!(config.decode_failure_threshold, 5);
    assert_eq!(config.fps_window, Duration::from_millis(500));
    assert_eq!(config.metrics_interval, Duration::from_secs(1));
    assert!(config.validate().is_ok());

    let bad = PipelineConfig {
        decode_failure_threshold: 0,
        ..Default::default()
    };
    assert!(matches!(
        bad.validate(),
        Err(MediaError::InvalidConfiguration { .. })
    ));
}
