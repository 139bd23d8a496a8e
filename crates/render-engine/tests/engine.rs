mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use lapse_common::{CancellationToken, MemoryLevel, RenderError};
use lapse_photo_model::{PhotoStore, QualityPreset, RenderMode, RenderSettings};
use lapse_render_engine::{RenderOutcome, TimelapseRenderEngine, STATUS_CANCELLED, STATUS_COMPLETE};
use proptest::prelude::*;
use tokio::sync::watch;

use support::*;

fn engine(
    store: Arc<dyn PhotoStore>,
    encoder: &RecordingEncoder,
) -> (TimelapseRenderEngine, Arc<RecordingProgress>) {
    let progress = Arc::new(RecordingProgress::default());
    let engine = TimelapseRenderEngine::new(store, Arc::new(encoder.clone()), test_config())
        .with_progress(progress.clone());
    (engine, progress)
}

fn settings(fps: u32, mode: RenderMode) -> RenderSettings {
    RenderSettings {
        fps,
        mode,
        ..RenderSettings::default()
    }
}

#[tokio::test]
async fn test_sequential_render_completes() {
    let (store, photos) = library(10, 640, 480);
    let encoder = RecordingEncoder::new();
    let (engine, progress) = engine(store, &encoder);
    let output = out_dir("sequential").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &settings(30, RenderMode::Sequential),
            &output,
            &CancellationToken::new(),
        )
        .await;

    let RenderOutcome::Completed(out) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(out.frames_written, 10);
    assert_eq!(out.frames_skipped, 0);
    assert_eq!((out.width, out.height), (640, 480));
    assert!((out.duration_secs - 10.0 / 30.0).abs() < 1e-9);
    assert!(output.exists());

    let recording = &encoder.recording;
    assert_eq!(recording.times(), (0..10).collect::<Vec<u64>>());
    assert!(recording.frames.lock().unwrap().iter().all(|(t, _)| t.timescale == 30));
    assert_eq!(recording.pixels()[3], [shade(3), shade(3), shade(3), 255]);
    assert!(recording.finished.load(Ordering::SeqCst));

    assert_eq!(progress.last(), Some((STATUS_COMPLETE.to_string(), 1.0)));
    let fractions = progress.fractions();
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.iter().filter(|f| **f >= 1.0).count(), 1);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}

#[tokio::test]
async fn test_morph_render_emits_steps_per_pair() {
    let (store, photos) = library(4, 64, 48);
    let encoder = RecordingEncoder::new();
    let (engine, progress) = engine(store, &encoder);
    let output = out_dir("morph").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &settings(10, RenderMode::Morph),
            &output,
            &CancellationToken::new(),
        )
        .await;

    // fps 10 -> 5 steps -> 6 frames for each of the 3 pairs.
    let out = outcome.into_result().unwrap();
    assert_eq!(out.frames_written, 18);
    assert_eq!(encoder.recording.times(), (0..18).collect::<Vec<u64>>());

    let pixels = encoder.recording.pixels();
    let gray = |i: usize| [shade(i), shade(i), shade(i), 255];
    assert_eq!(pixels[0], gray(0));
    assert_eq!(pixels[5], gray(1));
    assert_eq!(pixels[6], gray(1));
    assert_eq!(pixels[17], gray(3));
    let mid = pixels[2][0];
    assert!(mid > shade(0) && mid < shade(1));

    let encoding: Vec<f64> = progress
        .updates()
        .into_iter()
        .filter(|(status, _)| status == "Creating morph timelapse...")
        .map(|(_, f)| f)
        .collect();
    assert_eq!(encoding.last().copied(), Some(2.0 / 3.0));
}

#[tokio::test]
async fn test_cancel_midway_discards_output() {
    let (store, photos) = library(10, 64, 48);
    let token = CancellationToken::new();
    let canceller = token.clone();
    let encoder = RecordingEncoder::new().on_frame(move |index| {
        if index == 4 {
            canceller.cancel();
        }
    });
    let (engine, progress) = engine(store, &encoder);
    let output = out_dir("cancel").join("out.mp4");

    let outcome = engine
        .render(&photos, &settings(30, RenderMode::Sequential), &output, &token)
        .await;

    let RenderOutcome::Cancelled { progress: at } = outcome else {
        panic!("expected cancellation, got {outcome:?}");
    };
    assert!((at - 0.4).abs() < 1e-9);
    assert!(!output.exists());
    assert_eq!(encoder.recording.frame_count(), 5);
    assert!(encoder.recording.aborted.load(Ordering::SeqCst));
    assert!(!encoder.recording.finished.load(Ordering::SeqCst));

    assert_eq!(progress.last(), Some((STATUS_CANCELLED.to_string(), at)));
    assert!(progress.fractions().iter().all(|f| *f < 1.0));
}

#[tokio::test]
async fn test_empty_input_fails_without_opening_encoder() {
    let (store, _) = library(0, 64, 48);
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("empty").join("out.mp4");

    let outcome = engine
        .render(
            &[],
            &RenderSettings::default(),
            &output,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(outcome, RenderOutcome::Failed(RenderError::NoPhotos));
    assert!(encoder.recording.opened.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreadable_photo_is_skipped() {
    let (store, photos) = library(5, 64, 48);
    store.remove(photos[2].id).unwrap();
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("skip").join("out.mp4");

    let out = engine
        .render(
            &photos,
            &settings(24, RenderMode::Sequential),
            &output,
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();

    assert_eq!(out.frames_written, 4);
    assert_eq!(out.frames_skipped, 1);
    assert_eq!(encoder.recording.times(), vec![0, 1, 2, 3]);
    assert_eq!(encoder.recording.pixels()[2][0], shade(3));
    // The skipped photo never held a buffer, so one buffer served every frame.
    assert_eq!(out.buffers.allocations, 1);
    assert_eq!(out.buffers.reuses, 3);
}

#[tokio::test]
async fn test_each_photo_is_decoded_once() {
    let (store, photos) = library(6, 64, 48);
    let store = Arc::new(CountingStore::new(store));
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store.clone(), &encoder);

    let out = engine
        .render(
            &photos,
            &settings(24, RenderMode::Sequential),
            &out_dir("decode-once").join("out.mp4"),
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(out.frames_written, 6);
    assert_eq!(store.loads.load(Ordering::SeqCst), 6);

    store.loads.store(0, Ordering::SeqCst);
    engine
        .render(
            &photos,
            &settings(10, RenderMode::Morph),
            &out_dir("decode-once-morph").join("out.mp4"),
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(store.loads.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_morph_skips_pairs_with_unreadable_photo() {
    let (store, photos) = library(4, 32, 24);
    store.remove(photos[2].id).unwrap();
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("morph-skip").join("out.mp4");

    let out = engine
        .render(
            &photos,
            &settings(10, RenderMode::Morph),
            &output,
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();

    assert_eq!(out.frames_written, 6);
    assert_eq!(out.frames_skipped, 12);
}

#[tokio::test]
async fn test_unreadable_first_photo_fails_setup() {
    let (store, photos) = library(3, 64, 48);
    store.remove(photos[0].id).unwrap();
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("first").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &RenderSettings::default(),
            &output,
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(
        outcome,
        RenderOutcome::Failed(RenderError::SetupFailed { .. })
    ));
}

#[tokio::test]
async fn test_encoder_open_failure_is_setup_failure() {
    let (store, photos) = library(2, 64, 48);
    let encoder = RecordingEncoder::new().failing_open();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("open").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &RenderSettings::default(),
            &output,
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(
        outcome,
        RenderOutcome::Failed(RenderError::SetupFailed { .. })
    ));
}

#[tokio::test]
async fn test_finish_failure_removes_output() {
    let (store, photos) = library(3, 64, 48);
    let encoder = RecordingEncoder::new().failing_finish();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("finish").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &RenderSettings::default(),
            &output,
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(
        outcome,
        RenderOutcome::Failed(RenderError::ExportFailed { .. })
    ));
    assert!(!output.exists());
}

#[tokio::test]
async fn test_invalid_fps_is_rejected() {
    let (store, photos) = library(2, 64, 48);
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("fps").join("out.mp4");

    let outcome = engine
        .render(
            &photos,
            &settings(0, RenderMode::Sequential),
            &output,
            &CancellationToken::new(),
        )
        .await;
    assert!(matches!(
        outcome,
        RenderOutcome::Failed(RenderError::SetupFailed { .. })
    ));
}

#[tokio::test]
async fn test_existing_output_is_replaced() {
    let (store, photos) = library(2, 64, 48);
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let dir = out_dir("replace");
    std::fs::create_dir_all(&dir).unwrap();
    let output = dir.join("out.mp4");
    std::fs::write(&output, b"stale contents").unwrap();

    engine
        .render(
            &photos,
            &RenderSettings::default(),
            &output,
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(std::fs::metadata(&output).unwrap().len(), 0);
}

#[tokio::test]
async fn test_working_resolution_follows_preset() {
    let (store, photos) = library(1, 2000, 1500);
    let encoder = RecordingEncoder::new();
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("preset").join("out.mp4");
    let settings = RenderSettings {
        quality: QualityPreset::Low,
        ..RenderSettings::default()
    };

    let out = engine
        .render(&photos, &settings, &output, &CancellationToken::new())
        .await
        .into_result()
        .unwrap();
    assert_eq!((out.width, out.height), (720, 540));

    let opened = encoder.recording.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 1);
    assert_eq!((opened[0].width, opened[0].height), (720, 540));
    assert_eq!(opened[0].bitrate_bps, 8_000_000);
    assert_eq!(opened[0].keyframe_interval, 30);
}

#[tokio::test]
async fn test_backpressure_keeps_times_contiguous() {
    let (store, photos) = library(6, 32, 24);
    let encoder = RecordingEncoder::new().busy(3);
    let (engine, _) = engine(store, &encoder);
    let output = out_dir("busy").join("out.mp4");

    let out = engine
        .render(
            &photos,
            &settings(12, RenderMode::Sequential),
            &output,
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();

    assert_eq!(out.frames_written, 6);
    assert_eq!(encoder.recording.times(), (0..6).collect::<Vec<u64>>());
    assert_eq!(encoder.recording.not_ready_polls.load(Ordering::SeqCst), 15);
}

#[tokio::test]
async fn test_critical_memory_still_renders() {
    let (store, photos) = library(4, 32, 24);
    let encoder = RecordingEncoder::new();
    let (_level, memory) = watch::channel(MemoryLevel::Critical);
    let engine = TimelapseRenderEngine::new(store, Arc::new(encoder.clone()), test_config())
        .with_memory(memory);
    let output = out_dir("critical").join("out.mp4");

    let out = engine
        .render(
            &photos,
            &settings(4, RenderMode::Morph),
            &output,
            &CancellationToken::new(),
        )
        .await
        .into_result()
        .unwrap();
    assert_eq!(out.frames_written, 9);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn morph_frame_count_matches_steps(n in 2usize..6, fps in 1u32..=30) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (store, photos) = library(n, 8, 6);
        let encoder = RecordingEncoder::new();
        let (engine, _) = engine(store, &encoder);
        let output = out_dir(&format!("prop-{n}-{fps}")).join("out.mp4");

        let out = runtime
            .block_on(engine.render(
                &photos,
                &settings(fps, RenderMode::Morph),
                &output,
                &CancellationToken::new(),
            ))
            .into_result()
            .unwrap();

        let steps = (fps / 2).min(8) as u64;
        prop_assert_eq!(out.frames_written, (n as u64 - 1) * (steps + 1));
        prop_assert_eq!(encoder.recording.times(), (0..out.frames_written).collect::<Vec<u64>>());
    }
}
