//! **AnnouncementScheduler**: decides what gets spoken next and when to cut it off.
//!
//! A single control task owns the queue, the in-flight slot, the last-spoken record and
//! the pacing clock. Handles talk to it over a channel, so enqueue/configure/clear are
//! serialized no matter which producer calls them.
//!
//! ```text
//!  producers ──enqueue──▶ ┌──────────────┐  spawn slot  ┌───────────────┐
//!                         │ control loop │ ───────────▶ │ gap wait      │
//!  configure / clear ───▶ │  (queue,     │              │ player.speak  │
//!                         │   in-flight) │ ◀─────────── │ (cancellable) │
//!                         └──────────────┘  Started /   └───────────────┘
//!                                           Finished
//! ```
//!
//! A slot is only released once its task reports back, so cancellation is always
//! observed before the next utterance starts and two `speak` calls never overlap.

use crate::error::{AnnounceError, AnnounceResult};
use crate::player::{PlaybackOutcome, SpeechCredential, Utterance, UtterancePlayer};
use crate::request::{AnnouncementRequest, Priority};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shortest accepted starvation aging interval.
pub const MIN_AGING_STEP: Duration = Duration::from_millis(1);

/// Scheduler options. Changes apply to the next drain, never to the utterance in flight.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Passed through to the player. Without it every enqueue is refused.
    pub credential: Option<SpeechCredential>,
    /// Rate multiplier for every utterance without its own override (default 1.0).
    pub speaking_rate: f32,
    /// Silence enforced between the end of one utterance and the start of the next (default 0).
    pub minimum_gap: Duration,
    /// Identical text is dropped if it was spoken less than this long ago (default 10s).
    pub dedup_cooldown: Duration,
    /// When set, a queued request below warning level gains one level per interval
    /// waited, never rising above [`Priority::AGING_CEILING`]. Off by default.
    pub starvation_aging: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            credential: None,
            speaking_rate: 1.0,
            minimum_gap: Duration::ZERO,
            dedup_cooldown: Duration::from_secs(10),
            starvation_aging: None,
        }
    }
}

impl SchedulerConfig {
    pub fn with_credential(mut self, credential: SpeechCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    fn validate(&self) -> AnnounceResult<()> {
        if !self.speaking_rate.is_finite() || self.speaking_rate <= 0.0 {
            return Err(AnnounceError::Config(format!(
                "speaking rate {} must be positive",
                self.speaking_rate
            )));
        }
        if let Some(step) = self.starvation_aging {
            if step < MIN_AGING_STEP {
                return Err(AnnounceError::Config(format!(
                    "starvation aging interval {:?} is below {:?}",
                    step, MIN_AGING_STEP
                )));
            }
        }
        Ok(())
    }
}

/// Read-only mirror of the scheduler state, refreshed after every control step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub queue_len: usize,
    /// Priority of the slot in flight (waiting out the gap or speaking).
    pub current_priority: Option<Priority>,
    pub playing: bool,
    /// Requests that reached the control loop, including deduplicated ones.
    pub received: u64,
    pub spoken: u64,
    pub cancelled: u64,
    pub failed: u64,
    pub deduplicated: u64,
}

impl SchedulerStatus {
    pub fn is_idle(&self) -> bool {
        !self.playing && self.queue_len == 0
    }
}

enum Command {
    Submit(AnnouncementRequest),
    Configure(SchedulerConfig),
    Clear,
}

enum SlotEvent {
    Started { ticket: u64, at: Instant },
    Finished { ticket: u64, result: SlotResult },
}

enum SlotResult {
    Played(PlaybackOutcome),
    /// Cancelled during the gap wait, before the player was invoked.
    WaitAborted,
}

/// Cloneable handle to the control loop.
#[derive(Clone)]
pub struct AnnouncementScheduler {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SchedulerStatus>,
    credential_ready: Arc<AtomicBool>,
    submitted: Arc<AtomicU64>,
}

impl AnnouncementScheduler {
    /// Start the control loop on the current tokio runtime.
    ///
    /// The loop runs until every handle is dropped; anything still in flight is then cancelled.
    pub fn spawn(player: Arc<dyn UtterancePlayer>, config: SchedulerConfig) -> AnnounceResult<Self> {
        config.validate()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SchedulerStatus::default());
        let credential_ready = Arc::new(AtomicBool::new(config.credential.is_some()));

        let control = ControlLoop::new(player, config, commands_rx, status_tx);
        tokio::spawn(control.run());
        info!("📣 Announcement scheduler started");

        Ok(Self {
            commands: commands_tx,
            status: status_rx,
            credential_ready,
            submitted: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Queue `text` at `priority`. Drops silently if the same text was spoken within the
    /// dedup cooldown; a priority of 1 or 2 cuts off whatever is playing.
    pub fn enqueue(&self, text: impl Into<String>, priority: Priority) -> AnnounceResult<()> {
        self.submit(AnnouncementRequest::new(text, priority)?)
    }

    /// Queue `text` at the default (info) priority.
    pub fn announce(&self, text: impl Into<String>) -> AnnounceResult<()> {
        self.enqueue(text, Priority::default())
    }

    pub fn submit(&self, request: AnnouncementRequest) -> AnnounceResult<()> {
        if !self.credential_ready.load(Ordering::SeqCst) {
            return Err(AnnounceError::ConfigurationMissing);
        }
        self.send(Command::Submit(request))?;
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn configure(&self, config: SchedulerConfig) -> AnnounceResult<()> {
        config.validate()?;
        self.credential_ready
            .store(config.credential.is_some(), Ordering::SeqCst);
        self.send(Command::Configure(config))
    }

    /// Empty the queue and cut off the utterance in flight.
    pub fn clear(&self) -> AnnounceResult<()> {
        self.send(Command::Clear)
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    /// Resolve once every request submitted so far has been handled and nothing is playing.
    pub async fn wait_until_idle(&self) -> AnnounceResult<()> {
        let submitted = self.submitted.load(Ordering::SeqCst);
        let mut status = self.status.clone();
        status
            .wait_for(|s| s.received >= submitted && s.is_idle())
            .await
            .map(|_| ())
            .map_err(|_| AnnounceError::SchedulerClosed)
    }

    fn send(&self, command: Command) -> AnnounceResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AnnounceError::SchedulerClosed)
    }
}

#[derive(Debug, Clone)]
struct SpokenRecord {
    text: String,
    at: Instant,
}

struct InFlight {
    ticket: u64,
    request: AnnouncementRequest,
    token: CancellationToken,
    /// The player has been (or is about to be) invoked; `last_spoken` names this request.
    speaking: bool,
    /// Set by `clear()`: an aborted gap wait must not put the request back.
    discard: bool,
    /// Last-spoken record to restore if this utterance never finishes.
    spoken_before: Option<SpokenRecord>,
}

struct ControlLoop {
    config: SchedulerConfig,
    player: Arc<dyn UtterancePlayer>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<SlotEvent>,
    events_rx: mpsc::UnboundedReceiver<SlotEvent>,
    status_tx: watch::Sender<SchedulerStatus>,

    queue: Vec<AnnouncementRequest>,
    in_flight: Option<InFlight>,
    last_spoken: Option<SpokenRecord>,
    last_completed: Option<Instant>,
    next_sequence: u64,
    next_ticket: u64,

    received: u64,
    spoken: u64,
    cancelled: u64,
    failed: u64,
    deduplicated: u64,
}

impl ControlLoop {
    fn new(
        player: Arc<dyn UtterancePlayer>,
        config: SchedulerConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        status_tx: watch::Sender<SchedulerStatus>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            player,
            commands,
            events_tx,
            events_rx,
            status_tx,
            queue: Vec::new(),
            in_flight: None,
            last_spoken: None,
            last_completed: None,
            next_sequence: 0,
            next_ticket: 0,
            received: 0,
            spoken: 0,
            cancelled: 0,
            failed: 0,
            deduplicated: 0,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
            self.drain();
            self.publish();
        }

        if let Some(slot) = self.in_flight.take() {
            slot.token.cancel();
        }
        info!("📣 Announcement scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit(request) => self.accept(request),
            Command::Configure(config) => {
                info!(
                    "Scheduler configured: rate {:.2}, gap {:?}, dedup {:?}, aging {:?}",
                    config.speaking_rate,
                    config.minimum_gap,
                    config.dedup_cooldown,
                    config.starvation_aging
                );
                self.config = config;
            }
            Command::Clear => {
                let dropped = self.queue.len();
                self.queue.clear();
                if let Some(slot) = self.in_flight.as_mut() {
                    slot.discard = true;
                    slot.token.cancel();
                }
                info!("🧹 Scheduler cleared ({} queued dropped)", dropped);
            }
        }
    }

    fn accept(&mut self, mut request: AnnouncementRequest) {
        self.received += 1;
        let now = Instant::now();

        if self.recently_spoken(&request.text, now) {
            debug!("Dropping duplicate \"{}\" ({})", request.text, request.priority);
            self.deduplicated += 1;
            return;
        }

        if request.priority.preempts() {
            if let Some(slot) = self.in_flight.as_ref() {
                if !slot.token.is_cancelled() {
                    info!(
                        "⚡ {} \"{}\" preempts {} \"{}\" [{}]",
                        request.priority,
                        request.text,
                        slot.request.priority,
                        slot.request.text,
                        slot.request.id
                    );
                    slot.token.cancel();
                }
            }
        }

        request.sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!("Queued {} \"{}\" [{}]", request.priority, request.text, request.id);
        self.queue.push(request);
    }

    fn recently_spoken(&self, text: &str, now: Instant) -> bool {
        self.last_spoken.as_ref().is_some_and(|last| {
            last.text == text && now.saturating_duration_since(last.at) < self.config.dedup_cooldown
        })
    }

    fn handle_event(&mut self, event: SlotEvent) {
        match event {
            SlotEvent::Started { ticket, at } => {
                // Slots dispatched without a gap were recorded in `drain` already.
                if let Some(slot) = self
                    .in_flight
                    .as_mut()
                    .filter(|s| s.ticket == ticket && !s.speaking)
                {
                    slot.speaking = true;
                    slot.spoken_before = self.last_spoken.replace(SpokenRecord {
                        text: slot.request.text.clone(),
                        at,
                    });
                }
            }
            SlotEvent::Finished { ticket, result } => {
                let slot = match self.in_flight.take() {
                    Some(slot) if slot.ticket == ticket => slot,
                    other => {
                        self.in_flight = other;
                        return;
                    }
                };
                self.finish(slot, result);
            }
        }
    }

    fn finish(&mut self, slot: InFlight, result: SlotResult) {
        match result {
            SlotResult::WaitAborted => {
                if slot.speaking {
                    self.last_spoken = slot.spoken_before;
                }
                if slot.discard {
                    debug!("Dropped pending \"{}\"", slot.request.text);
                } else {
                    debug!("Gap wait interrupted; \"{}\" back in queue", slot.request.text);
                    self.queue.push(slot.request);
                }
            }
            SlotResult::Played(PlaybackOutcome::Completed) => {
                self.last_completed = Some(Instant::now());
                self.spoken += 1;
            }
            SlotResult::Played(PlaybackOutcome::Cancelled) => {
                debug!(
                    "Cut off {} \"{}\" [{}]",
                    slot.request.priority, slot.request.text, slot.request.id
                );
                self.last_spoken = slot.spoken_before;
                self.cancelled += 1;
            }
            SlotResult::Played(PlaybackOutcome::Failed(reason)) => {
                warn!(
                    "Playback failed for {} \"{}\": {}",
                    slot.request.priority, slot.request.text, reason
                );
                self.last_spoken = slot.spoken_before;
                self.failed += 1;
            }
        }
    }

    fn drain(&mut self) {
        if self.in_flight.is_some() || self.queue.is_empty() {
            return;
        }
        let Some(credential) = self.config.credential.clone() else {
            debug!("No speech credential; holding {} queued", self.queue.len());
            return;
        };

        let now = Instant::now();
        let aging = self.config.starvation_aging;
        self.queue
            .sort_by_key(|r| (effective_priority(r, now, aging), r.sequence));
        let request = self.queue.remove(0);
        let delay = self.pacing_delay(now);

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let token = CancellationToken::new();
        let utterance = Utterance {
            text: request.text.clone(),
            rate: request.speed.unwrap_or(self.config.speaking_rate),
            credential,
        };
        info!("🔊 {} \"{}\" (wait {:?})", request.priority, request.text, delay);

        // Without a gap the player is invoked right away, so the text counts as spoken
        // from dispatch on and an identical enqueue arriving meanwhile is dropped.
        let speaking = delay.is_zero();
        let spoken_before = if speaking {
            self.last_spoken.replace(SpokenRecord {
                text: request.text.clone(),
                at: now,
            })
        } else {
            None
        };

        tokio::spawn(run_slot(
            ticket,
            delay,
            utterance,
            Arc::clone(&self.player),
            token.clone(),
            self.events_tx.clone(),
        ));

        self.in_flight = Some(InFlight {
            ticket,
            request,
            token,
            speaking,
            discard: false,
            spoken_before,
        });
    }

    fn pacing_delay(&self, now: Instant) -> Duration {
        match self.last_completed {
            Some(done) => self
                .config
                .minimum_gap
                .saturating_sub(now.saturating_duration_since(done)),
            None => Duration::ZERO,
        }
    }

    fn publish(&self) {
        let status = SchedulerStatus {
            queue_len: self.queue.len(),
            current_priority: self.in_flight.as_ref().map(|s| s.request.priority),
            playing: self.in_flight.is_some(),
            received: self.received,
            spoken: self.spoken,
            cancelled: self.cancelled,
            failed: self.failed,
            deduplicated: self.deduplicated,
        };
        self.status_tx.send_replace(status);
    }
}

/// One slot: optional gap wait, then the player call. Always reports `Finished`.
async fn run_slot(
    ticket: u64,
    delay: Duration,
    utterance: Utterance,
    player: Arc<dyn UtterancePlayer>,
    token: CancellationToken,
    events: mpsc::UnboundedSender<SlotEvent>,
) {
    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = token.cancelled() => {}
        }
    }
    if token.is_cancelled() {
        let _ = events.send(SlotEvent::Finished {
            ticket,
            result: SlotResult::WaitAborted,
        });
        return;
    }

    let _ = events.send(SlotEvent::Started {
        ticket,
        at: Instant::now(),
    });

    let speaking = player.speak(utterance);
    tokio::pin!(speaking);
    // Poll `speak` first so the player has registered the utterance before any cancel.
    let outcome = tokio::select! {
        biased;
        outcome = &mut speaking => outcome,
        _ = token.cancelled() => {
            player.cancel();
            speaking.await
        }
    };

    let _ = events.send(SlotEvent::Finished {
        ticket,
        result: SlotResult::Played(outcome),
    });
}

/// Queue rank of `request` at `now`, with optional aging applied.
fn effective_priority(
    request: &AnnouncementRequest,
    now: Instant,
    aging: Option<Duration>,
) -> Priority {
    let Some(step) = aging.filter(|s| !s.is_zero()) else {
        return request.priority;
    };
    if request.priority <= Priority::AGING_CEILING {
        return request.priority;
    }
    let waited = now.saturating_duration_since(request.queued_since);
    let steps = (waited.as_nanos() / step.as_nanos().max(1)) as u64;
    let level = u64::from(request.priority.level())
        .saturating_sub(steps)
        .max(u64::from(Priority::AGING_CEILING.level()));
    Priority::new(level as u8).unwrap_or(request.priority)
}
