//! Pipeline orchestrator tests against mock engines

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dann_voice::pipeline::{Engines, PipelineOrchestrator, StageTimeouts};
use dann_voice::voice::{GateHandle, Transcriber, Utterance, WakeEvent};
use dann_voice::{Error, PipelineState, Result, SessionOutcome};
use tokio::sync::{mpsc, watch};

mod common;
use common::{Harness, MockPlayer, MockRecorder, MockResponder, MockTranscriber, spoken_utterance};

fn short_timeouts() -> StageTimeouts {
    StageTimeouts {
        transcribe: Duration::from_secs(5),
        generate: Duration::from_millis(100),
        synthesize: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn test_happy_path_plays_synthesized_reply() {
    let harness = Harness::conversational();
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    let outcome = orchestrator.run_session().await;
    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");

    assert_eq!(harness.recorder.calls(), 1);
    assert_eq!(harness.transcriber.calls(), 1);
    assert_eq!(harness.responder.prompts(), vec!["What time is it?".to_string()]);
    assert_eq!(harness.synthesizer.calls(), 1);
    assert_eq!(harness.player.calls(), 1);

    let synthesized = harness.synthesizer.paths();
    let played = harness.player.played();
    assert_eq!(played.len(), 1);
    assert_eq!(played[0].0, synthesized[0]);
    assert!(played[0].1, "reply file should exist while playing");

    assert_eq!(harness.gate.pauses(), 1);
    assert_eq!(harness.gate.resumes(), 1);
    assert_eq!(orchestrator.state(), PipelineState::Listening);
}

#[tokio::test]
async fn test_staging_files_removed_after_session() {
    let harness = Harness::conversational();
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    orchestrator.run_session().await;

    let (utterance_path, size) = harness.transcriber.seen().unwrap();
    assert!(size > 44, "utterance WAV should hold audio beyond the header");
    assert!(!utterance_path.exists());
    assert!(!harness.synthesizer.paths()[0].exists());
}

#[tokio::test]
async fn test_empty_recording_is_no_audio() {
    let harness = Harness::new(
        Utterance::default(),
        MockTranscriber::replying("unused"),
        MockResponder::replying("unused"),
    );
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    let outcome = orchestrator.run_session().await;
    assert!(matches!(outcome, SessionOutcome::NoAudio));

    assert_eq!(harness.transcriber.calls(), 0);
    assert_eq!(harness.responder.calls(), 0);
    assert_eq!(harness.synthesizer.calls(), 0);
    assert_eq!(harness.player.calls(), 0);
    assert_eq!(harness.gate.pauses(), 1);
    assert_eq!(harness.gate.resumes(), 1);
}

#[tokio::test]
async fn test_blank_transcript_is_not_understood() {
    let harness = Harness::new(
        spoken_utterance(),
        MockTranscriber::replying("   \n"),
        MockResponder::replying("unused"),
    );
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    let outcome = orchestrator.run_session().await;
    assert!(matches!(outcome, SessionOutcome::NotUnderstood));
    assert_eq!(harness.responder.calls(), 0);
    assert_eq!(harness.gate.resumes(), 1);
}

#[tokio::test]
async fn test_empty_reply_is_no_response() {
    let harness = Harness::new(
        spoken_utterance(),
        MockTranscriber::replying("tell me a joke"),
        MockResponder::replying(""),
    );
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    let outcome = orchestrator.run_session().await;
    assert!(matches!(outcome, SessionOutcome::NoResponse));
    assert_eq!(harness.responder.calls(), 1);
    assert_eq!(harness.synthesizer.calls(), 0);
    assert_eq!(harness.player.calls(), 0);
    assert_eq!(harness.gate.resumes(), 1);
}

#[tokio::test]
async fn test_responder_timeout_fails_generating() {
    let harness = Harness::new(
        spoken_utterance(),
        MockTranscriber::replying("what is the weather"),
        MockResponder::slow("sunny", Duration::from_secs(10)),
    );
    let orchestrator = harness.orchestrator(short_timeouts());

    let started = Instant::now();
    let outcome = orchestrator.run_session().await;
    assert!(started.elapsed() < Duration::from_secs(5));

    match outcome {
        SessionOutcome::Failed { stage, error } => {
            assert_eq!(stage, PipelineState::Generating);
            assert!(matches!(error, Error::Timeout { .. }));
            assert_eq!(error.to_string(), "generating timed out after 100ms");
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(harness.synthesizer.calls(), 0);
    assert_eq!(harness.player.calls(), 0);
    assert_eq!(harness.gate.pauses(), 1);
    assert_eq!(harness.gate.resumes(), 1);
    assert_eq!(orchestrator.state(), PipelineState::Listening);
}

#[tokio::test]
async fn test_transcriber_error_abandons_session() {
    let harness = Harness::new(
        spoken_utterance(),
        MockTranscriber::failing(),
        MockResponder::replying("unused"),
    );
    let orchestrator = harness.orchestrator(StageTimeouts::default());

    let outcome = orchestrator.run_session().await;
    match outcome {
        SessionOutcome::Failed { stage, error } => {
            assert_eq!(stage, PipelineState::Transcribing);
            assert!(matches!(error, Error::Stt(_)));
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert_eq!(harness.responder.calls(), 0);
    assert_eq!(harness.gate.resumes(), 1);
    let (path, _) = harness.transcriber.seen().unwrap();
    assert!(!path.exists());
}

/// Transcriber asserting the real gate is paused while it runs
struct PausedProbe {
    gate: GateHandle,
}

#[async_trait]
impl Transcriber for PausedProbe {
    async fn transcribe(&self, _wav: &std::path::Path) -> Result<String> {
        assert!(self.gate.is_paused());
        Ok("hello".to_string())
    }
}

#[tokio::test]
async fn test_real_gate_paused_during_session() {
    let harness = Harness::conversational();
    let gate = GateHandle::default();
    let orchestrator = PipelineOrchestrator::new(
        Arc::new(gate.clone()),
        Arc::new(MockRecorder::new(spoken_utterance())),
        Engines {
            transcriber: Arc::new(PausedProbe { gate: gate.clone() }),
            responder: harness.responder.clone(),
            synthesizer: harness.synthesizer.clone(),
            player: harness.player.clone(),
        },
        StageTimeouts::default(),
    );

    let outcome = orchestrator.run_session().await;
    assert!(outcome.is_completed());
    assert!(!gate.is_paused());
    assert_eq!(gate.snapshot().consecutive_hits, 0);
}

#[tokio::test]
async fn test_run_loop_handles_wake_and_shutdown() {
    let harness = Harness::conversational();
    let orchestrator = Arc::new(harness.orchestrator(StageTimeouts::default()));
    let mut states = orchestrator.subscribe();

    let (wake_tx, wake_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run(wake_rx, shutdown_rx).await }
    });

    states
        .wait_for(|s| *s == PipelineState::Listening)
        .await
        .unwrap();

    wake_tx
        .send(WakeEvent {
            sequence: 7,
            at: Instant::now(),
        })
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.player.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.recorder.calls(), 1);
    assert_eq!(harness.gate.pauses(), 1);
    assert_eq!(harness.gate.resumes(), 1);
    assert_eq!(orchestrator.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_shutdown_mid_session_resumes_gate() {
    let harness = Harness::new(
        spoken_utterance(),
        MockTranscriber::replying("slow question"),
        MockResponder::slow("slow answer", Duration::from_secs(30)),
    );
    let orchestrator = Arc::new(harness.orchestrator(StageTimeouts::default()));

    let (wake_tx, wake_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run(wake_rx, shutdown_rx).await }
    });

    wake_tx
        .send(WakeEvent {
            sequence: 1,
            at: Instant::now(),
        })
        .await
        .unwrap();

    let mut states = orchestrator.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == PipelineState::Generating),
    )
    .await
    .unwrap()
    .unwrap();

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.gate.pauses(), 1);
    assert_eq!(harness.gate.resumes(), 1);
    assert_eq!(harness.synthesizer.calls(), 0);
    assert_eq!(orchestrator.state(), PipelineState::Idle);
}

#[tokio::test]
async fn test_device_error_in_session_keeps_listening() {
    let harness = Harness::conversational().with_player(MockPlayer::device_lost());
    let orchestrator = Arc::new(harness.orchestrator(StageTimeouts::default()));

    let (wake_tx, wake_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.run(wake_rx, shutdown_rx).await }
    });

    for (sequence, played) in [(1, 1), (2, 2)] {
        wake_tx
            .send(WakeEvent {
                sequence,
                at: Instant::now(),
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while harness.gate.resumes() < played {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    assert!(!task.is_finished());
    assert_eq!(harness.player.calls(), 2);
    assert_eq!(orchestrator.state(), PipelineState::Listening);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(orchestrator.state(), PipelineState::Idle);
}
