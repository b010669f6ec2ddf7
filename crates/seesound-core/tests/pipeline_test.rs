//! End-to-end routing: perception events in, spoken text out, on paused time.

use async_trait::async_trait;
use seesound_core::{
    parse_script, run_script, BoundingBox, Detection, DetectionFrame, MarkerSighting,
    PerceptionRouter, PriorityMode, UserPreferences,
};
use seesound_voice::{
    AnnouncementScheduler, PlaybackOutcome, SchedulerConfig, SpeechCredential, Utterance,
    UtterancePlayer,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Speaks for one second, records what it was asked to say and whether it finished.
#[derive(Default)]
struct RecordingPlayer {
    spoken: Mutex<Vec<(String, bool)>>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl RecordingPlayer {
    fn texts(&self) -> Vec<String> {
        self.spoken.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    fn completed(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, done)| *done)
            .map(|(t, _)| t.clone())
            .collect()
    }
}

#[async_trait]
impl UtterancePlayer for RecordingPlayer {
    async fn speak(&self, utterance: Utterance) -> PlaybackOutcome {
        let (tx, rx) = oneshot::channel();
        *self.stop.lock().unwrap() = Some(tx);
        let index = {
            let mut spoken = self.spoken.lock().unwrap();
            spoken.push((utterance.text.clone(), false));
            spoken.len() - 1
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                self.spoken.lock().unwrap()[index].1 = true;
                PlaybackOutcome::Completed
            }
            _ = rx => PlaybackOutcome::Cancelled,
        }
    }

    fn cancel(&self) {
        if let Some(tx) = self.stop.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

fn router_with(prefs: UserPreferences) -> (PerceptionRouter, Arc<RecordingPlayer>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let player = Arc::new(RecordingPlayer::default());
    let config = prefs.scheduler_config(Some(SpeechCredential::new("test-key", "eastus")));
    let scheduler = AnnouncementScheduler::spawn(player.clone(), config.clone()).unwrap();
    (PerceptionRouter::new(scheduler, config, &prefs), player)
}

fn frame(detections: Vec<(&str, f32, f32, f32)>) -> DetectionFrame {
    DetectionFrame {
        width: 1280,
        height: 720,
        detections: detections
            .into_iter()
            .map(|(class, x, width, height)| Detection {
                bbox: BoundingBox {
                    x,
                    y: 50.0,
                    width,
                    height,
                },
                class_name: class.to_string(),
                confidence: 0.87,
            })
            .collect(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_person_interrupts_scene_description() {
    let (mut router, player) = router_with(UserPreferences::default());

    router
        .on_scene_description("A bright room with a long table.")
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let announced = router
        .on_detections(&frame(vec![("person", 320.0, 640.0, 648.0)]), Instant::now())
        .unwrap();
    assert_eq!(announced.len(), 1);
    router.scheduler().wait_until_idle().await.unwrap();

    assert_eq!(
        player.texts(),
        vec![
            "A bright room with a long table.".to_string(),
            "STOP! person very close in front!".to_string(),
        ]
    );
    assert_eq!(player.completed(), vec!["STOP! person very close in front!"]);
}

#[tokio::test(start_paused = true)]
async fn test_approaching_object_escalates_through_gate() {
    let (mut router, player) = router_with(UserPreferences::default());
    let t0 = Instant::now();

    let first = router
        .on_detections(&frame(vec![("car", 615.0, 50.0, 20.0)]), t0)
        .unwrap();
    assert_eq!(first[0].text, "car on your center");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Growth of 40% escalates past the gate; 1.4% growth a second later is held back.
    let second = router
        .on_detections(&frame(vec![("car", 605.0, 70.0, 20.0)]), t0 + Duration::from_millis(500))
        .unwrap();
    assert_eq!(second[0].text, "Warning! car getting closer on your center");
    let third = router
        .on_detections(&frame(vec![("car", 604.5, 71.0, 20.0)]), t0 + Duration::from_secs(1))
        .unwrap();
    assert!(third.is_empty());

    router.scheduler().wait_until_idle().await.unwrap();
    // The urgent warning cuts off the first announcement.
    assert_eq!(
        player.texts(),
        vec!["car on your center", "Warning! car getting closer on your center"]
    );
    assert_eq!(
        player.completed(),
        vec!["Warning! car getting closer on your center"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_small_objects_are_rate_limited_per_region() {
    let (mut router, player) = router_with(UserPreferences::default());
    let t0 = Instant::now();
    let cups = frame(vec![("cup", 10.0, 30.0, 30.0), ("cup", 1200.0, 30.0, 30.0)]);

    assert_eq!(router.on_detections(&cups, t0).unwrap().len(), 2);
    assert!(router
        .on_detections(&cups, t0 + Duration::from_secs(3))
        .unwrap()
        .is_empty());
    router.scheduler().wait_until_idle().await.unwrap();

    assert_eq!(player.texts(), vec!["cup on your left", "cup on your right"]);
}

#[tokio::test(start_paused = true)]
async fn test_markers_and_answers_share_the_queue() {
    let (mut router, player) = router_with(UserPreferences::default());
    router.guide_mut().enable();

    router.on_answer("That is a coffee mug.").unwrap();
    let sightings = [
        MarkerSighting {
            id: 7,
            corners: [(0.0, 0.0); 4],
            center: (640.0, 360.0),
            distance_m: 5.0,
            angle_deg: 0.0,
        },
        MarkerSighting {
            id: 2,
            corners: [(0.0, 0.0); 4],
            center: (100.0, 360.0),
            distance_m: 1.0,
            angle_deg: -75.0,
        },
    ];
    let instructions = router.on_markers(&sightings, 1280, Instant::now()).unwrap();
    assert_eq!(instructions.len(), 2);
    router.scheduler().wait_until_idle().await.unwrap();

    assert_eq!(
        player.texts(),
        vec![
            "That is a coffee mug.",
            "Marker 2 on your left. Adjust left.",
            "Marker 7 detected 5m away on center.",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_static_mode_preference_applies() {
    let (mut router, player) = router_with(UserPreferences::default());
    router
        .apply_preferences(&UserPreferences {
            priority_mode: PriorityMode::Static,
            tts_speed: 1.25,
            ..UserPreferences::default()
        })
        .unwrap();

    let announced = router
        .on_detections(&frame(vec![("person", 320.0, 640.0, 648.0)]), Instant::now())
        .unwrap();
    assert_eq!(announced[0].text, "person on your center");
    router.scheduler().wait_until_idle().await.unwrap();
    assert_eq!(player.texts(), vec!["person on your center"]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credential_surfaces_from_router() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let player = Arc::new(RecordingPlayer::default());
    let config = SchedulerConfig::default();
    let scheduler = AnnouncementScheduler::spawn(player, config.clone()).unwrap();
    let router = PerceptionRouter::new(scheduler, config, &UserPreferences::default());

    let err = router.on_answer("hello").unwrap_err();
    assert!(err.to_string().contains("No speech credential"));
}

#[tokio::test(start_paused = true)]
async fn test_refused_announcements_do_not_close_the_gate() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let player = Arc::new(RecordingPlayer::default());
    let config = SchedulerConfig::default();
    let scheduler = AnnouncementScheduler::spawn(player.clone(), config.clone()).unwrap();
    let mut router = PerceptionRouter::new(scheduler, config, &UserPreferences::default());
    router.guide_mut().enable();
    let t0 = Instant::now();
    let person = frame(vec![("person", 320.0, 640.0, 648.0), ("cup", 10.0, 30.0, 30.0)]);
    let marker = [MarkerSighting {
        id: 4,
        corners: [(0.0, 0.0); 4],
        center: (640.0, 360.0),
        distance_m: 0.3,
        angle_deg: 0.0,
    }];

    assert!(router.on_detections(&person, t0).is_err());
    assert!(router.on_markers(&marker, 1280, t0).is_err());

    router
        .scheduler()
        .configure(SchedulerConfig::default().with_credential(SpeechCredential::new("test-key", "eastus")))
        .unwrap();
    let later = t0 + Duration::from_secs(1);
    let announced = router.on_detections(&person, later).unwrap();
    assert_eq!(announced.len(), 2);
    let instructions = router.on_markers(&marker, 1280, later).unwrap();
    assert_eq!(instructions.len(), 1);
    router.scheduler().wait_until_idle().await.unwrap();

    assert_eq!(
        player.texts(),
        vec![
            "STOP! person very close in front!",
            "Marker 4 directly ahead. Stop here.",
            "cup on your left",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_marker_cooldown_follows_announcement_interval() {
    let (mut router, _player) = router_with(UserPreferences::default());
    assert_eq!(router.marker_interval(), Duration::from_secs(10));

    router
        .apply_preferences(&UserPreferences {
            announcement_interval_secs: 20,
            ..UserPreferences::default()
        })
        .unwrap();
    assert_eq!(router.marker_interval(), Duration::from_secs(20));

    router.set_marker_interval(Duration::from_secs(5));
    router.apply_preferences(&UserPreferences::default()).unwrap();
    assert_eq!(router.marker_interval(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_replay_script_end_to_end() {
    let (mut router, player) = router_with(UserPreferences::default());
    let script = r#"
{"at_ms": 0, "type": "navigation", "enabled": true, "target": 3}
{"at_ms": 0, "type": "scene", "text": "A quiet corridor."}
{"at_ms": 300, "type": "detections", "width": 1280, "height": 720, "detections": [{"bbox": {"x": 320, "y": 40, "width": 640, "height": 648}, "class_name": "person", "confidence": 0.93}]}
{"at_ms": 2000, "type": "markers", "width": 1280, "sightings": [{"id": 3, "center": [640, 360], "distance_m": 0.3}, {"id": 5, "center": [640, 360], "distance_m": 0.3}]}
{"at_ms": 2500, "type": "answer", "text": "The exit is ahead."}
"#;
    let events = parse_script(script).unwrap();
    let summary = run_script(&mut router, &events).await.unwrap();

    assert_eq!(summary.events, 5);
    assert_eq!(summary.detections_announced, 1);
    assert_eq!(summary.instructions_announced, 1);
    assert_eq!(
        player.texts(),
        vec![
            "A quiet corridor.",
            "STOP! person very close in front!",
            "Marker 3 directly ahead. Stop here.",
            "The exit is ahead.",
        ]
    );
    assert_eq!(
        player.completed(),
        vec![
            "STOP! person very close in front!",
            "Marker 3 directly ahead. Stop here.",
            "The exit is ahead.",
        ]
    );
    assert!(router.scheduler().status().is_idle());
}
