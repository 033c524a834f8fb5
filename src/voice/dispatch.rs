//! Frame fan-out from the capture channel to the wake gate and recorder
//!
//! One dispatcher thread receives frames in arrival order. Every frame goes
//! to the wake gate (which ignores it while paused); while a recording is
//! active a copy is also forwarded to the recorder's tap.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use super::frame::AudioFrame;
use super::wake_word::WakeWordGate;
use crate::Result;

/// Optional secondary consumer of captured frames
#[derive(Debug, Clone, Default)]
pub struct FrameTap {
    slot: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

impl FrameTap {
    fn lock(&self) -> MutexGuard<'_, Option<mpsc::Sender<AudioFrame>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start receiving frames, replacing any previous subscriber
    ///
    /// The subscription ends when the returned receiver is dropped.
    #[must_use]
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<AudioFrame> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        *self.lock() = Some(tx);
        rx
    }

    /// Whether a subscriber is attached
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Forward a copy of `frame` to the subscriber, if any
    pub fn forward(&self, frame: &AudioFrame) {
        let mut slot = self.lock();
        let Some(tx) = slot.as_ref() else {
            return;
        };

        match tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(frame)) => {
                tracing::warn!(sequence = frame.sequence(), "recorder lagging, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                *slot = None;
            }
        }
    }
}

/// Feed frames to the gate and the tap until the channel closes
pub fn dispatch_frames(
    frames: &mut mpsc::Receiver<AudioFrame>,
    gate: &mut WakeWordGate,
    tap: &FrameTap,
) {
    while let Some(frame) = frames.blocking_recv() {
        gate.process(&frame);
        tap.forward(&frame);
    }
    tracing::debug!("frame stream closed");
}

/// Run [`dispatch_frames`] on a dedicated thread
///
/// # Errors
///
/// Returns error if the thread cannot be spawned
pub fn spawn_dispatcher(
    mut frames: mpsc::Receiver<AudioFrame>,
    mut gate: WakeWordGate,
    tap: FrameTap,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("frame-dispatch".to_string())
        .spawn(move || dispatch_frames(&mut frames, &mut gate, &tap))?;
    Ok(handle)
}
