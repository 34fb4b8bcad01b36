use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tunnistin::hunt_capture::{frame_feed, Frame, FrameFeed, FrameSource};
use tunnistin::hunt_detector::{ObjectDetector, RecordedDetector};
use tunnistin::hunt_pipeline::{Pipeline, PipelineHandle};
use tunnistin::hunt_replay::{Recording, RecordedFrame, RecordingSource};
use tunnistin::{Detection, HuntConfig, HuntError, HuntSnapshot, Rect};

const WAIT: Duration = Duration::from_secs(5);

fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

fn at(ms: i64) -> DateTime<Utc> {
    t0() + ChronoDuration::milliseconds(ms)
}

fn cup() -> Detection {
    Detection::new("cup", 0.9, Rect::new(0.4, 0.3, 0.2, 0.2))
}

fn book() -> Detection {
    Detection::new("book", 0.9, Rect::new(0.7, 0.6, 0.2, 0.2))
}

fn cfg(award_secs: f64) -> HuntConfig {
    let mut cfg = HuntConfig::default();
    cfg.game.target_objects = vec!["cup".into(), "book".into()];
    cfg.game.award_display_time = award_secs;
    // keep real-time decay out of the way of frame-time dwell
    cfg.game.progress_decay_delay = 30.0;
    cfg
}

fn start(cfg: HuntConfig) -> (FrameFeed, PipelineHandle) {
    let (feed, source) = frame_feed(Duration::from_millis(5));
    let handle = Pipeline::new(cfg).start(source, RecordedDetector).unwrap();
    (feed, handle)
}

async fn wait_for(
    rx: &mut watch::Receiver<HuntSnapshot>,
    what: &str,
    pred: impl FnMut(&HuntSnapshot) -> bool,
) -> HuntSnapshot {
    match timeout(WAIT, rx.wait_for(pred)).await {
        Ok(Ok(snap)) => snap.clone(),
        Ok(Err(_)) => panic!("pipeline closed while waiting for {}", what),
        Err(_) => panic!("timed out waiting for {}", what),
    }
}

/// Push one frame and wait until its result is published, so the next push
/// never collides with an inference in flight.
async fn feed_frame(
    feed: &FrameFeed,
    rx: &mut watch::Receiver<HuntSnapshot>,
    seq: u64,
    ms: i64,
    dets: &[Detection],
) -> HuntSnapshot {
    assert!(feed.push_detections(seq, at(ms), dets).unwrap(), "frame #{} rejected", seq);
    wait_for(rx, "frame result", |s| s.frame_timestamp == Some(at(ms))).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_tracks_progress_to_completion() {
    let (feed, handle) = start(cfg(60.0));
    let mut rx = handle.subscribe();

    let snap = feed_frame(&feed, &mut rx, 1, 0, &[cup(), book()]).await;
    assert_eq!(snap.progress("cup"), Some(0.0));
    assert_eq!(snap.objects.len(), 2);

    let snap = feed_frame(&feed, &mut rx, 2, 1000, &[cup(), book()]).await;
    assert_eq!(snap.progress("cup"), Some(0.5));
    assert!(!snap.mission_complete());

    let snap = feed_frame(&feed, &mut rx, 3, 2100, &[cup(), book()]).await;
    assert!(snap.mission_complete());
    assert_eq!(snap.progress.found_classes.len(), 2);

    handle.stop();
    let last = timeout(WAIT, handle.join()).await.unwrap().unwrap();
    assert!(last.mission_complete());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pipeline_skips_frames_while_mission_complete() {
    let (feed, handle) = start(cfg(60.0));
    let mut rx = handle.subscribe();

    feed_frame(&feed, &mut rx, 1, 0, &[cup(), book()]).await;
    feed_frame(&feed, &mut rx, 2, 2500, &[cup(), book()]).await;

    feed.push_detections(3, at(2600), &[cup()]).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snap = handle.snapshot();
    assert!(snap.mission_complete());
    assert_eq!(snap.frame_timestamp, Some(at(2500)));

    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_reset_starts_a_new_hunt() {
    let (feed, handle) = start(cfg(60.0));
    let mut rx = handle.subscribe();

    feed_frame(&feed, &mut rx, 1, 0, &[cup(), book()]).await;
    feed_frame(&feed, &mut rx, 2, 2500, &[cup(), book()]).await;

    handle.reset().await.unwrap();
    let snap = wait_for(&mut rx, "reset", |s| !s.mission_complete()).await;
    assert!(snap.progress.targets.iter().all(|t| t.progress == 0.0 && !t.found));
    assert_eq!(snap.frame_timestamp, None);

    // frames flow again and tracking starts from scratch
    let snap = feed_frame(&feed, &mut rx, 3, 2600, &[cup()]).await;
    assert_eq!(snap.objects[0].age_secs, 0.0);
    assert_eq!(snap.progress("cup"), Some(0.0));

    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_award_display_triggers_automatic_reset() {
    let (feed, handle) = start(cfg(0.2));
    let mut rx = handle.subscribe();

    feed_frame(&feed, &mut rx, 1, 0, &[cup(), book()]).await;
    let snap = feed_frame(&feed, &mut rx, 2, 2500, &[cup(), book()]).await;
    assert!(snap.mission_complete());

    let snap = wait_for(&mut rx, "automatic reset", |s| !s.mission_complete()).await;
    assert!(snap.progress.found_classes.is_empty());

    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrefreshed_progress_decays_in_real_time() {
    let mut cfg = cfg(60.0);
    cfg.game.progress_decay_delay = 0.3;
    let (feed, handle) = start(cfg);
    let mut rx = handle.subscribe();

    feed_frame(&feed, &mut rx, 1, 0, &[cup()]).await;
    let snap = feed_frame(&feed, &mut rx, 2, 1000, &[cup()]).await;
    assert_eq!(snap.progress("cup"), Some(0.5));

    let snap = wait_for(&mut rx, "decay", |s| s.progress("cup") == Some(0.0)).await;
    assert!(!snap.is_found("cup"));

    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detector_errors_skip_the_frame() {
    let (feed, source) = frame_feed(Duration::from_millis(5));
    let handle = Pipeline::new(cfg(60.0)).start(source, RecordedDetector).unwrap();
    let mut rx = handle.subscribe();

    // payload RecordedDetector cannot decode
    assert!(feed.push(Frame::new(1, at(0), b"garbage".to_vec())));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.snapshot().frame_timestamp, None);

    // the in-flight slot was released, the next frame goes through
    let snap = feed_frame(&feed, &mut rx, 2, 50, &[cup()]).await;
    assert_eq!(snap.objects.len(), 1);

    handle.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frames_arriving_during_inference_are_dropped() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let detector = {
        let calls = calls.clone();
        let seen = seen.clone();
        move |frame: &Frame| -> anyhow::Result<Vec<Detection>> {
            seen.lock().unwrap().push(frame.sequence);
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(400));
            }
            RecordedDetector.detect(frame)
        }
    };
    let (feed, source) = frame_feed(Duration::from_millis(5));
    let handle = Pipeline::new(cfg(60.0)).start(source, detector).unwrap();
    let mut rx = handle.subscribe();

    assert!(feed.push_detections(1, at(0), &[cup()]).unwrap());
    timeout(WAIT, async {
        while calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();

    // the first inference is still sleeping; capture takes these and drops them
    for seq in 2..=6u64 {
        while !feed.push_detections(seq, at(seq as i64 * 10), &[cup()]).unwrap() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    wait_for(&mut rx, "first frame result", |s| s.frame_timestamp.is_some()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // only the newest frame can slip in once the slot frees up
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0], 1);
    assert!(seen.len() <= 2, "detector saw {:?}", seen);
    assert!(seen.iter().all(|seq| *seq == 1 || *seq == 6), "detector saw {:?}", seen);
    assert!(matches!(handle.snapshot().frame_timestamp, Some(t) if t == at(0) || t == at(60)));

    handle.stop();
}

/// Source that never has a frame ready and counts how often it is asked.
struct IdleSource {
    polls: Arc<AtomicUsize>,
    fail:  bool,
}

impl FrameSource for IdleSource {
    fn next_frame(&mut self) -> anyhow::Result<Option<Frame>> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            anyhow::bail!("camera unplugged");
        }
        Ok(None)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_source_is_not_polled_in_a_tight_loop() {
    for fail in [false, true] {
        let polls = Arc::new(AtomicUsize::new(0));
        let source = IdleSource { polls: polls.clone(), fail };
        let handle = Pipeline::new(cfg(60.0)).start(source, RecordedDetector).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.stop();
        timeout(WAIT, async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // with a 2 ms backoff roughly a hundred polls fit in 200 ms
        let polls = polls.load(Ordering::Relaxed);
        assert!(polls > 0);
        assert!(polls < 1_000, "source polled {} times (fail = {})", polls, fail);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recording_source_runs_to_the_end() {
    let frames: Vec<RecordedFrame> = (0..=25)
        .map(|i| RecordedFrame {
            timestamp: at(i * 100),
            detections: vec![cup(), book()],
        })
        .collect();
    let source = RecordingSource::new(Recording { frames }, false);
    let handle = Pipeline::new(cfg(60.0)).start(source, RecordedDetector).unwrap();

    let last = timeout(WAIT, handle.join()).await.unwrap().unwrap();
    // frames may be dropped while inference is in flight, but the first one
    // always goes through and starts the tracks
    assert!(last.frame_timestamp.is_some());
    assert_eq!(last.progress.targets.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_after_stop_reports_closed_pipeline() {
    let (_feed, handle) = start(cfg(60.0));
    handle.stop();
    timeout(WAIT, async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(matches!(handle.reset().await, Err(HuntError::PipelineClosed)));
}

#[tokio::test]
async fn test_invalid_config_is_rejected_at_start() {
    let mut bad = HuntConfig::default();
    bad.layout.results_view_width = 2.0;
    let (_feed, source) = frame_feed(Duration::from_millis(5));
    let result = Pipeline::new(bad).start(source, RecordedDetector);
    assert!(matches!(result, Err(HuntError::InvalidConfig(_))));
}
