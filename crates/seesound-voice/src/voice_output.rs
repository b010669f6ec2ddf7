//! **SpeakerPlayer**: TTS synthesis plus rodio playback with a kill-switch.
//!
//! Text goes through a [`TtsBackend`] on a blocking worker, the resulting audio is
//! appended to a fresh `rodio::Sink`, and `cancel()` stops that sink immediately.
//! The `OutputStream` lives on a dedicated thread because it is not `Send`.

use crate::error::{AnnounceError, AnnounceResult};
use crate::player::{ActiveUtterance, PlaybackOutcome, TranscriptPlayer, Utterance, UtterancePlayer};
use async_trait::async_trait;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

const SINK_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Backend that turns an utterance into audio bytes (WAV/MP3).
pub trait TtsBackend: Send + Sync {
    /// Synthesize to audio bytes. Return an empty vec to play silence of the estimated length.
    fn synthesize(&self, utterance: &Utterance) -> AnnounceResult<Vec<u8>>;
}

/// Placeholder TTS: returns empty audio so the speaker plays silence.
#[derive(Debug, Default)]
pub struct PlaceholderTts;

impl TtsBackend for PlaceholderTts {
    fn synthesize(&self, _utterance: &Utterance) -> AnnounceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Azure Speech REST synthesis. Region and key come from the utterance's credential.
#[derive(Debug, Clone)]
pub struct AzureSpeechTts {
    /// Neural voice name, e.g. `en-US-JennyNeural`.
    pub voice: String,
    /// Value for `X-Microsoft-OutputFormat`; must be something rodio can decode.
    pub output_format: String,
    client: reqwest::blocking::Client,
}

impl AzureSpeechTts {
    pub fn new() -> AnnounceResult<Self> {
        let voice = std::env::var("AZURE_SPEECH_VOICE")
            .unwrap_or_else(|_| "en-US-JennyNeural".to_string());
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            voice,
            output_format: "riff-24khz-16bit-mono-pcm".to_string(),
            client,
        })
    }

    /// Set a fixed voice instead of `AZURE_SPEECH_VOICE`.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    fn endpoint(region: &str) -> String {
        format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            region.trim()
        )
    }

    fn ssml(&self, utterance: &Utterance) -> String {
        format!(
            "<speak version='1.0' xml:lang='en-US'><voice name='{}'><prosody rate='{}'>{}</prosody></voice></speak>",
            self.voice,
            prosody_rate(utterance.rate),
            escape_xml(&utterance.text)
        )
    }
}

impl TtsBackend for AzureSpeechTts {
    fn synthesize(&self, utterance: &Utterance) -> AnnounceResult<Vec<u8>> {
        if utterance.text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let res = self
            .client
            .post(Self::endpoint(&utterance.credential.region))
            .header("Ocp-Apim-Subscription-Key", &utterance.credential.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", &self.output_format)
            .header("User-Agent", "seesound")
            .body(self.ssml(utterance))
            .send()?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(AnnounceError::Tts(format!("Azure TTS error {}: {}", status, body)));
        }
        Ok(res.bytes()?.to_vec())
    }
}

/// Relative SSML prosody rate, 1.0 -> "+0%", 1.5 -> "+50%", 0.75 -> "-25%".
fn prosody_rate(rate: f32) -> String {
    let percent = ((rate - 1.0) * 100.0).round() as i32;
    format!("{:+}%", percent)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Speaks through the default output device.
pub struct SpeakerPlayer {
    handle: OutputStreamHandle,
    tts: Arc<dyn TtsBackend>,
    active: ActiveUtterance,
    // Dropping the sender ends the output thread and closes the stream.
    _shutdown: mpsc::Sender<()>,
}

impl SpeakerPlayer {
    /// Open the default output device (fails without one, e.g. in CI).
    pub fn new(tts: Arc<dyn TtsBackend>) -> AnnounceResult<Self> {
        let (handle_tx, handle_rx) = mpsc::channel::<AnnounceResult<OutputStreamHandle>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("utterance-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // Blocks until the player is dropped.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(e.into()));
                }
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|e| AnnounceError::Playback(e.to_string()))??;
        info!("SpeakerPlayer: output stream ready");

        Ok(Self {
            handle,
            tts,
            active: ActiveUtterance::default(),
            _shutdown: shutdown_tx,
        })
    }

    fn start_sink(&self, bytes: Vec<u8>, utterance: &Utterance) -> AnnounceResult<Sink> {
        let sink = Sink::try_new(&self.handle)?;
        if bytes.is_empty() {
            let silence = rodio::source::Zero::<f32>::new(1, 24000).take_duration(
                TranscriptPlayer::estimated_duration(&utterance.text, utterance.rate),
            );
            sink.append(silence);
        } else {
            let source = rodio::Decoder::new(Cursor::new(bytes))?;
            sink.append(source.convert_samples::<f32>());
        }
        Ok(sink)
    }
}

#[async_trait]
impl UtterancePlayer for SpeakerPlayer {
    async fn speak(&self, utterance: Utterance) -> PlaybackOutcome {
        let token = self.active.begin();

        let tts = Arc::clone(&self.tts);
        let request = utterance.clone();
        let synthesis = tokio::task::spawn_blocking(move || tts.synthesize(&request));
        let bytes = tokio::select! {
            joined = synthesis => match joined {
                Ok(Ok(bytes)) => bytes,
                Ok(Err(e)) => return PlaybackOutcome::Failed(e.to_string()),
                Err(e) => return PlaybackOutcome::Failed(format!("synthesis worker failed: {}", e)),
            },
            _ = token.cancelled() => return PlaybackOutcome::Cancelled,
        };
        debug!("SpeakerPlayer: {} bytes for \"{}\"", bytes.len(), utterance.text);

        let sink = match self.start_sink(bytes, &utterance) {
            Ok(sink) => sink,
            Err(e) => return PlaybackOutcome::Failed(e.to_string()),
        };

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    sink.stop();
                    info!("SpeakerPlayer: stopped \"{}\"", utterance.text);
                    return PlaybackOutcome::Cancelled;
                }
                _ = tokio::time::sleep(SINK_POLL_INTERVAL) => {
                    if sink.empty() {
                        return PlaybackOutcome::Completed;
                    }
                }
            }
        }
    }

    fn cancel(&self) {
        self.active.cancel();
    }
}
