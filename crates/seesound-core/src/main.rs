//! SeeSound replay CLI: plays a recorded perception script through the announcement pipeline.
//!
//! Usage:
//!   cargo run -p seesound-core -- session.jsonl --dry-run
//!   cargo run -p seesound-core -- session.jsonl --voice en-US-GuyNeural --min-gap-ms 500
//!
//! Real speech needs AZURE_SPEECH_KEY (and optionally AZURE_SPEECH_REGION) and an audio device.
//! Preferences come from SEESOUND_CONFIG / config/seesound.toml and SEESOUND__* variables.

use anyhow::Context;
use clap::Parser;
use seesound_core::{load_script, run_script, PerceptionRouter, UserPreferences};
use seesound_voice::{
    AnnouncementScheduler, AzureSpeechTts, SpeakerPlayer, SpeechCredential, TranscriptPlayer,
    UtterancePlayer,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "seesound", version, about = "Replay perception events as prioritized speech")]
struct Args {
    /// JSON-lines event script
    script: PathBuf,

    /// Log utterances instead of synthesizing them
    #[arg(long)]
    dry_run: bool,

    /// Preferences file (overrides SEESOUND_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Azure neural voice name
    #[arg(long)]
    voice: Option<String>,

    /// Silence between utterances, overrides preferences
    #[arg(long)]
    min_gap_ms: Option<u64>,

    /// Let waiting low-priority announcements gain one level per interval
    #[arg(long)]
    aging_ms: Option<u64>,

    /// Per-marker cooldown for navigation instructions
    #[arg(long)]
    marker_cooldown_ms: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let prefs = match &args.config {
        Some(path) => UserPreferences::load_from(path),
        None => UserPreferences::load(),
    }
    .context("loading preferences")?;
    let events = load_script(&args.script)
        .with_context(|| format!("reading script {}", args.script.display()))?;

    // Built outside the runtime: the blocking HTTP client must not be dropped inside it.
    let (player, credential): (Arc<dyn UtterancePlayer>, SpeechCredential) = if args.dry_run {
        let credential = SpeechCredential::from_env()
            .unwrap_or_else(|_| SpeechCredential::new("dry-run", "local"));
        let player: Arc<dyn UtterancePlayer> = Arc::new(TranscriptPlayer::new());
        (player, credential)
    } else {
        let credential = SpeechCredential::from_env()
            .context("AZURE_SPEECH_KEY is required for spoken output (or pass --dry-run)")?;
        let mut tts = AzureSpeechTts::new()?;
        if let Some(voice) = &args.voice {
            tts = tts.with_voice(voice.clone());
        }
        let player: Arc<dyn UtterancePlayer> = Arc::new(SpeakerPlayer::new(Arc::new(tts))?);
        (player, credential)
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async {
        let mut config = prefs.scheduler_config(Some(credential));
        if let Some(gap) = args.min_gap_ms {
            config.minimum_gap = Duration::from_millis(gap);
        }
        config.starvation_aging = args.aging_ms.map(Duration::from_millis);

        let scheduler = AnnouncementScheduler::spawn(player, config.clone())?;
        let mut router = PerceptionRouter::new(scheduler.clone(), config, &prefs);
        if let Some(cooldown) = args.marker_cooldown_ms {
            router.set_marker_interval(Duration::from_millis(cooldown));
        }

        info!("Replaying {} events from {}", events.len(), args.script.display());
        let summary = run_script(&mut router, &events).await?;
        let status = scheduler.status();
        info!(
            "Done: {} spoken, {} cut off, {} failed, {} duplicates dropped ({} announcements from {} events)",
            status.spoken,
            status.cancelled,
            status.failed,
            status.deduplicated,
            summary.detections_announced
                + summary.instructions_announced
                + summary.answers
                + summary.scenes,
            summary.events
        );
        anyhow::Ok(())
    });
    drop(runtime);
    result
}
