// TrialCam CLI
// Drives the trial-recording pipeline end to end against a synthetic frame
// source, so the writer lifecycle can be exercised without a camera attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use trialcam::recording::DefaultBackend;
use trialcam::testing::SyntheticSource;
use trialcam::{AcquisitionSession, RecordingMode, TrialCamConfig};

fn main() -> anyhow::Result<()> {
    trialcam::init_logging();

    println!("📷 TrialCam synthetic acquisition demo");
    println!("======================================");

    let config_path = TrialCamConfig::default_path();
    let config = if config_path.exists() {
        println!("Loading configuration from {}", config_path.display());
        TrialCamConfig::load_from_file(&config_path).context("loading configuration")?
    } else {
        TrialCamConfig::default()
    };

    let source = Box::new(
        SyntheticSource::new(640, 480).with_frame_delay(Duration::from_millis(33)),
    );
    let session = AcquisitionSession::open(source, Arc::new(DefaultBackend), config)
        .context("opening session")?;
    session.set_mode(RecordingMode::Continuous);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .context("installing ctrl-c handler")?;
    }

    println!("▶️  Starting acquisition (ctrl-c to stop)...");
    session.start().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Record two short trials, then idle until interrupted.
    for trial in 0..2u32 {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        println!("⏺  Recording trial {trial}...");
        session.set_recording_enabled(true);
        std::thread::sleep(Duration::from_secs(2));
        session.set_recording_enabled(false);
        std::thread::sleep(Duration::from_millis(200));

        if let Some(stats) = session.last_trial_stats() {
            println!(
                "   trial {}: {} frames -> {}",
                stats.trial_index, stats.frames_written, stats.video_path
            );
        }
    }

    if let Some(fault) = session.fault() {
        eprintln!("❌ acquisition fault: {fault}");
    }

    println!("⏹  Stopping acquisition...");
    if let Err(e) = session.stop(Duration::from_secs(10)) {
        eprintln!("Warning: stop did not complete cleanly: {e}");
    }
    session
        .close(Duration::from_secs(5))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("✅ Done. {} frames acquired.", session.frames_acquired());
    Ok(())
}
