use chrono::{Duration as ChronoDuration, Utc};
use std::time::Instant;
use tunnistin::hunt_replay::{replay, RecordedFrame, Recording};
use tunnistin::hunt_tracker::TrackMatcher;
use tunnistin::{Detection, HuntConfig, Rect};

const CLASSES: [&str; 5] = ["cell phone", "bag", "toothbrush", "cup", "book"];

fn frame_detections(frame: usize, per_frame: usize) -> Vec<Detection> {
    (0..per_frame)
        .map(|i| {
            // slow drift so most boxes keep matching their previous track
            let jitter = ((frame + i) % 7) as f64 * 0.001;
            let x = 0.15 + (i % 8) as f64 * 0.1 + jitter;
            let y = 0.05 + (i / 8 % 8) as f64 * 0.1;
            Detection::new(CLASSES[i % CLASSES.len()], 0.9, Rect::new(x, y, 0.08, 0.08))
        })
        .collect()
}

fn bench_matcher(per_frame: usize, frames: usize) {
    let mut matcher = TrackMatcher::new(0.9);
    let start = Utc::now();
    let inputs: Vec<Vec<Detection>> = (0..frames).map(|f| frame_detections(f, per_frame)).collect();

    let timer = Instant::now();
    let mut continued = 0usize;
    for (f, dets) in inputs.iter().enumerate() {
        let now = start + ChronoDuration::milliseconds(f as i64 * 33);
        continued += matcher.advance(now, dets).iter().filter(|m| m.continued).count();
    }
    let elapsed = timer.elapsed();

    println!(
        "  matcher  {:>3} dets/frame × {} frames: {:>8.2}ms total, {:>6.2}µs/frame, {} continued",
        per_frame,
        frames,
        elapsed.as_secs_f64() * 1000.0,
        elapsed.as_secs_f64() * 1e6 / frames as f64,
        continued
    );
}

fn bench_replay(per_frame: usize, frames: usize) {
    let start = Utc::now();
    let recording = Recording {
        frames: (0..frames)
            .map(|f| RecordedFrame {
                timestamp: start + ChronoDuration::milliseconds(f as i64 * 33),
                detections: frame_detections(f, per_frame),
            })
            .collect(),
    };

    let timer = Instant::now();
    match replay(&HuntConfig::default(), &recording) {
        Ok(report) => println!(
            "  replay   {:>3} dets/frame × {} frames: {:>8.2}ms total, {} completions",
            per_frame,
            frames,
            timer.elapsed().as_secs_f64() * 1000.0,
            report.completions
        ),
        Err(e) => println!("  replay failed: {}", e),
    }
}

fn main() {
    println!("=== Tracker benchmarks ===");
    for &per_frame in &[5, 20, 64] {
        bench_matcher(per_frame, 1_000);
    }
    for &per_frame in &[5, 20, 64] {
        bench_replay(per_frame, 1_000);
    }
}
