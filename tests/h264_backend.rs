//! H.264/MP4 backend tests.
//!
//! Run with: cargo test --test h264_backend --features recording

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use trialcam::queue::FrameQueue;
use trialcam::recording::{EncoderBackend, EncoderConfig, H264Backend, WriterController};
use trialcam::testing::gradient_frame;
use trialcam::types::{Codec, FrameSample};

#[test]
fn encodes_gray_frames_to_mp4() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.mp4");
    let config = EncoderConfig::new(Codec::H264, 320, 240, 30.0);

    let mut encoder = H264Backend.open(&path, &config).expect("encoder opens");
    for n in 0..30u64 {
        encoder
            .write(&gradient_frame(n, 320, 240))
            .expect("frame encodes");
    }
    assert_eq!(encoder.frames_written(), 30);
    encoder.finish().expect("container finalizes");

    let meta = std::fs::metadata(&path).expect("file exists");
    assert!(meta.len() > 0, "mp4 has content");
}

#[test]
fn rejects_wrong_codec_and_odd_dimensions() {
    let dir = tempfile::tempdir().unwrap();

    let raw = EncoderConfig::new(Codec::Raw, 320, 240, 30.0);
    assert!(H264Backend.open(&dir.path().join("a.mp4"), &raw).is_err());

    let odd = EncoderConfig::new(Codec::H264, 321, 240, 30.0);
    assert!(H264Backend.open(&dir.path().join("b.mp4"), &odd).is_err());
}

#[test]
fn full_trial_through_h264_writer() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FrameQueue::new());
    let mut controller = WriterController::new(
        Arc::new(H264Backend),
        queue.clone(),
        dir.path().to_path_buf(),
        30.0,
        Arc::new(AtomicU64::new(0)),
    );

    let (width, height) = (320u32, 240u32);
    controller.prepare(Codec::H264, width, height);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !controller.has_prewarmed() {
        assert!(Instant::now() < deadline, "prewarm timed out");
        std::thread::sleep(Duration::from_millis(5));
    }
    controller.promote().unwrap();

    let mut ts = 0u64;
    for n in 0..25u64 {
        controller.log_frame(ts);
        queue.push(FrameSample {
            data: gradient_frame(n, width, height),
            width,
            height,
            timestamp_us: ts,
            reconstructed: false,
        });
        ts += 33_333;
    }

    let stats = controller.stop().expect("active trial");
    controller.discard_prewarmed();

    assert_eq!(stats.frames_written, 25);
    assert!(stats.video_path.ends_with(".mp4"));
    let meta = std::fs::metadata(&stats.video_path).expect("mp4 exists");
    assert!(meta.len() > 0);
}
