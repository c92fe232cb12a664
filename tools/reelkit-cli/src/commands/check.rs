//! Check system capabilities.

use std::time::Instant;

use reelkit_capture_engine::{CapturePlatform, StrategySelector, SystemPlatform};
use reelkit_codec_engine::EngineSession;
use reelkit_common::config::AppConfig;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("ReelKit System Check");
    println!("{}", "=".repeat(50));

    let platform = SystemPlatform::detect(&config.engine.primary, &config.capture);
    let caps = platform.capabilities();
    println!(
        "[{}] Live capture: {}",
        if caps.live_capture { "OK" } else { "WARN" },
        if caps.live_capture { "available" } else { "unavailable" }
    );
    println!(
        "[{}] Clip playback: {}",
        if caps.clip_playback { "OK" } else { "WARN" },
        if caps.clip_playback { "available" } else { "unavailable" }
    );

    let plan: Vec<&str> = StrategySelector::new(&platform)
        .plan()
        .into_iter()
        .map(|s| s.as_str())
        .collect();
    println!("     Scene reel strategies: {}", plan.join(" -> "));

    let session = EngineSession::from_config(&config.engine);
    println!("     Engine locations: {}", session.locations().join(", "));
    let started = Instant::now();
    let engine_ok = match session.load().await {
        Ok(runtime) => {
            println!(
                "[OK] Codec engine: {} (loaded in {:.2}s)",
                runtime.describe(),
                started.elapsed().as_secs_f64()
            );
            true
        }
        Err(e) => {
            println!("[FAIL] Codec engine: {e}");
            false
        }
    };

    println!();
    match (engine_ok, caps.clip_playback) {
        (true, _) => println!("All strategies are available. ReelKit is ready."),
        (false, true) => {
            println!("Engine unavailable: multi-clip reels will use frame recapture.")
        }
        (false, false) => println!("No encoder is available. Install ffmpeg or fix engine.primary."),
    }

    Ok(())
}
