// THEORY:
// A `OverlaySession` is one viewer's engine running on its own tokio task. It exists
// to enforce the delivery policy around the synchronous engine:
//
// 1.  **Latest wins**: frames are handed over through a single-slot `watch` channel.
//     Publishing overwrites whatever has not been picked up yet, so a slow viewer
//     never builds a backlog; superseded frames are counted as dropped.
// 2.  **Control first**: `Enable`, `Disable`, `Reset` and `Configure` are drained
//     before the next frame is looked at.
// 3.  **Exclusive state**: the engine is moved into the task. No other session can
//     reach its buffers, and when the task ends (handle dropped, viewer gone, fatal
//     error) the buffers are dropped with it.

use crate::config::OverlayConfig;
use crate::core_modules::frame::Frame;
use crate::core_modules::overlay::Overlay;
use crate::engine::MotionOverlayEngine;
use crate::error::SessionError;
use futures::Stream;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type SessionId = u64;

/// A frame waiting in a session's input slot.
#[derive(Debug, Clone)]
pub struct TimedFrame {
    pub seq: u64,
    pub arrived: Instant,
    pub frame: Arc<Frame>,
}

/// Control signals a viewer can send to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionControl {
    Enable,
    Disable,
    Reset,
    Configure(OverlayConfig),
}

/// One rendered overlay, tagged with the sequence number of its input frame.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    pub session: SessionId,
    pub seq: u64,
    pub overlay: Overlay,
}

/// What a session did over its lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// Frames that produced an overlay (seeds included).
    pub rendered: u64,
    /// Frames overwritten in the slot before the task got to them.
    pub dropped: u64,
    /// Frames that arrived while detection was disabled.
    pub ignored: u64,
    /// Frames the engine refused (malformed, incomparable).
    pub rejected: u64,
    /// Set when the session ended because of a fatal error.
    pub failure: Option<SessionError>,
}

/// Handle to a running overlay session.
pub struct OverlaySession {
    id: SessionId,
    next_seq: AtomicU64,
    frames: watch::Sender<Option<TimedFrame>>,
    control: mpsc::UnboundedSender<SessionControl>,
    task: JoinHandle<SessionReport>,
}

impl OverlaySession {
    /// Moves `engine` onto a new task. Overlays are delivered to `sink`; the task
    /// waits for the sink, and frames published meanwhile replace each other.
    pub fn spawn(
        id: SessionId,
        engine: MotionOverlayEngine,
        sink: mpsc::Sender<SessionOutput>,
    ) -> Self {
        let (frames, frame_rx) = watch::channel(None);
        let (control, control_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(id, engine, frame_rx, control_rx, sink));
        Self {
            id,
            next_seq: AtomicU64::new(1),
            frames,
            control,
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Offers a frame to the session, replacing any frame still waiting. Returns the
    /// frame's sequence number.
    pub fn push(&self, frame: Arc<Frame>) -> Result<u64, SessionError> {
        if self.frames.is_closed() {
            return Err(SessionError::Closed);
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.frames.send_replace(Some(TimedFrame {
            seq,
            arrived: Instant::now(),
            frame,
        }));
        Ok(seq)
    }

    pub fn control(&self, signal: SessionControl) -> Result<(), SessionError> {
        self.control.send(signal).map_err(|_| SessionError::Closed)
    }

    pub fn enable(&self) -> Result<(), SessionError> {
        self.control(SessionControl::Enable)
    }

    pub fn disable(&self) -> Result<(), SessionError> {
        self.control(SessionControl::Disable)
    }

    pub fn reset(&self) -> Result<(), SessionError> {
        self.control(SessionControl::Reset)
    }

    /// Stops the session once the signals and the frame already sent are handled, and
    /// returns its report.
    pub async fn close(self) -> Result<SessionReport, SessionError> {
        let Self {
            frames,
            control,
            task,
            ..
        } = self;
        drop(frames);
        drop(control);
        task.await.map_err(|e| SessionError::Aborted(e.to_string()))
    }
}

fn apply(engine: &mut MotionOverlayEngine, signal: SessionControl) {
    debug!(?signal, "session control");
    match signal {
        SessionControl::Enable => engine.enable(),
        SessionControl::Disable => engine.disable(),
        SessionControl::Reset => engine.reset(),
        SessionControl::Configure(config) => engine.set_config(config),
    }
}

async fn run(
    id: SessionId,
    mut engine: MotionOverlayEngine,
    mut frames: watch::Receiver<Option<TimedFrame>>,
    mut control: mpsc::UnboundedReceiver<SessionControl>,
    sink: mpsc::Sender<SessionOutput>,
) -> SessionReport {
    let mut report = SessionReport::default();
    let mut last_seq = 0;
    let mut controls_open = true;

    // Ends once the frame slot is closed and drained.
    loop {
        tokio::select! {
            biased;
            signal = control.recv(), if controls_open => match signal {
                Some(signal) => apply(&mut engine, signal),
                None => controls_open = false,
            },
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(timed) = frames.borrow_and_update().clone() else {
                    continue;
                };
                report.dropped += timed.seq.saturating_sub(last_seq + 1);
                last_seq = timed.seq;

                if !engine.is_enabled() {
                    report.ignored += 1;
                    continue;
                }

                match engine.process_frame_at(&timed.frame, timed.arrived) {
                    Ok(overlay) => {
                        report.rendered += 1;
                        let output = SessionOutput { session: id, seq: timed.seq, overlay };
                        if sink.send(output).await.is_err() {
                            break;
                        }
                    }
                    Err(error) if error.is_fatal() => {
                        warn!(session = id, %error, "overlay session failed");
                        report.failure = Some(error.into());
                        break;
                    }
                    Err(error) => {
                        debug!(session = id, seq = timed.seq, %error, "frame rejected");
                        report.rejected += 1;
                    }
                }
            }
        }
    }

    info!(
        session = id,
        rendered = report.rendered,
        dropped = report.dropped,
        ignored = report.ignored,
        rejected = report.rejected,
        "overlay session closed"
    );
    report
}

/// Adapts a session's output channel into a `Stream` of overlays.
pub fn overlay_stream(
    outputs: mpsc::Receiver<SessionOutput>,
) -> impl Stream<Item = SessionOutput> {
    futures::stream::unfold(outputs, |mut outputs| async move {
        let output = outputs.recv().await?;
        Some((output, outputs))
    })
}
