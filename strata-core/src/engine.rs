use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::blocks::{BlockId, SegmenterEvent, TerminalBlock};
use crate::config::Config;
use crate::error::{ResizeError, SpawnError};
use crate::grid::BufferSnapshot;
use crate::pipeline::{FeedOutcome, Pipeline};
use crate::pty::{PtySession, PtyWriter, SessionEvent, SessionState};

/// How often the fallback segmenter checks for quiet output.
const TICK_INTERVAL: Duration = Duration::from_millis(100);

const CHANNEL_CAPACITY: usize = 256;

/// How long `shutdown` waits for the pipeline task before aborting it.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Notifications for the host. Redraws are driven by the snapshot watch.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Block(SegmenterEvent),
    Bell,
    TitleChanged(String),
    Closed { exit_code: Option<i32> },
    Error(String),
}

#[derive(Debug)]
enum EngineCommand {
    Resize { cols: u16, rows: u16 },
    Submitted(String),
    Annotate { id: BlockId, summary: String },
}

/// The main entry point for the core.
/// The host holds one instance of this per terminal session.
#[derive(Debug)]
pub struct TerminalEngine {
    session: PtySession,
    commands: mpsc::UnboundedSender<EngineCommand>,
    snapshots: watch::Receiver<Arc<BufferSnapshot>>,
    blocks: watch::Receiver<Arc<Vec<TerminalBlock>>>,
    dropped_events: Arc<AtomicU64>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TerminalEngine {
    /// Spawn the shell and the task that drives its pipeline.
    /// Must be called inside a tokio runtime.
    pub fn start(config: &Config) -> Result<(Self, mpsc::Receiver<EngineEvent>), SpawnError> {
        let (session_tx, session_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let session = PtySession::start(&config.pty_config(), session_tx)?;

        let pipeline = Pipeline::new(config);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(pipeline.snapshot()));
        let (blocks_tx, blocks_rx) = watch::channel(Arc::new(Vec::new()));
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let dropped_events = Arc::new(AtomicU64::new(0));

        let task = EngineTask {
            pipeline,
            writer: session.writer(),
            snapshots: snapshot_tx,
            blocks: blocks_tx,
            events: event_tx,
            dropped_events: Arc::clone(&dropped_events),
        };
        let handle = tokio::spawn(task.run(session_rx, command_rx, stop_rx));

        let engine = Self {
            session,
            commands: command_tx,
            snapshots: snapshot_rx,
            blocks: blocks_rx,
            dropped_events,
            stop: Some(stop_tx),
            task: Some(handle),
        };
        Ok((engine, event_rx))
    }

    /// Raw keystrokes / paste for the shell.
    pub fn write(&self, bytes: impl Into<bytes::Bytes>) -> bool {
        self.session.write(bytes)
    }

    /// Send a line followed by Enter, and tell the segmenter about it.
    pub fn submit(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        let _ = self.commands.send(EngineCommand::Submitted(line.to_string()));
        self.session.write(format!("{line}\r"))
    }

    /// Resize the PTY, then the grid (between two event applications).
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), ResizeError> {
        let result = self.session.resize(cols, rows);
        let _ = self.commands.send(EngineCommand::Resize { cols, rows });
        result
    }

    pub fn snapshot(&self) -> Arc<BufferSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Arc<BufferSnapshot>> {
        self.snapshots.clone()
    }

    /// Block list as of the last opened/finalized/annotated block.
    pub fn blocks(&self) -> Arc<Vec<TerminalBlock>> {
        self.blocks.borrow().clone()
    }

    pub fn subscribe_blocks(&self) -> watch::Receiver<Arc<Vec<TerminalBlock>>> {
        self.blocks.clone()
    }

    pub fn annotate(&self, id: BlockId, summary: impl Into<String>) {
        let _ = self.commands.send(EngineCommand::Annotate {
            id,
            summary: summary.into(),
        });
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn pid(&self) -> u32 {
        self.session.pid()
    }

    /// Notifications discarded because the event receiver was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Stop the shell and the pipeline task. Returns the shell's exit code.
    /// Never waits on the host draining its event receiver.
    pub async fn shutdown(mut self) -> Option<i32> {
        let exit_code = self.session.shutdown().await;
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(TASK_STOP_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "engine task ended abnormally"),
                Err(_) => {
                    warn!("engine task did not stop in time; aborting");
                    task.abort();
                }
            }
        }
        exit_code
    }
}

impl Drop for TerminalEngine {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct EngineTask {
    pipeline: Pipeline,
    writer: PtyWriter,
    snapshots: watch::Sender<Arc<BufferSnapshot>>,
    blocks: watch::Sender<Arc<Vec<TerminalBlock>>>,
    events: mpsc::Sender<EngineEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl EngineTask {
    async fn run(
        mut self,
        mut session_rx: mpsc::Receiver<SessionEvent>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
        mut stop: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = &mut stop => break,

                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    self.on_command(cmd);
                }

                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    let SessionEvent::DataReceived(bytes) = event else {
                        if self.on_session_event(event) {
                            continue;
                        }
                        break;
                    };

                    let mut blocks_changed = self.apply_bytes(&bytes);
                    let mut keep_running = true;

                    // Coalesce whatever is already queued before publishing.
                    while let Ok(next) = session_rx.try_recv() {
                        match next {
                            SessionEvent::DataReceived(more) => {
                                blocks_changed |= self.apply_bytes(&more);
                            }
                            other => {
                                keep_running = self.on_session_event(other);
                                break;
                            }
                        }
                    }

                    self.publish_snapshot();
                    if blocks_changed {
                        self.publish_blocks();
                    }
                    if !keep_running {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let events = self.pipeline.tick(Instant::now());
                    if self.emit_block_events(events) {
                        self.publish_blocks();
                    }
                }
            }
        }

        debug!("engine task stopped");
    }

    fn on_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::Resize { cols, rows } => {
                self.pipeline.resize(cols, rows);
                self.publish_snapshot();
            }
            EngineCommand::Submitted(line) => {
                let events = self.pipeline.submit(&line);
                if self.emit_block_events(events) {
                    self.publish_blocks();
                }
            }
            EngineCommand::Annotate { id, summary } => {
                if self.pipeline.blocks_mut().annotate(id, summary) {
                    self.publish_blocks();
                } else {
                    debug!(%id, "annotate: no such block");
                }
            }
        }
    }

    /// Non-data session events. Returns `false` when the session is over.
    fn on_session_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::DataReceived(bytes) => {
                if self.apply_bytes(&bytes) {
                    self.publish_blocks();
                }
                self.publish_snapshot();
                true
            }
            SessionEvent::Error(e) => {
                self.notify(EngineEvent::Error(e.to_string()));
                true
            }
            SessionEvent::Closed { exit_code } => {
                let events = self.pipeline.close();
                self.emit_block_events(events);
                self.publish_snapshot();
                self.publish_blocks();
                self.notify(EngineEvent::Closed { exit_code });
                false
            }
        }
    }

    /// Feed one read. Returns whether the block list changed shape.
    fn apply_bytes(&mut self, bytes: &[u8]) -> bool {
        let FeedOutcome {
            block_events,
            replies,
            bells,
            title,
        } = self.pipeline.feed(bytes);

        for reply in replies {
            self.writer.write(reply);
        }
        if bells > 0 {
            self.notify(EngineEvent::Bell);
        }
        if let Some(title) = title {
            self.notify(EngineEvent::TitleChanged(title));
        }
        self.emit_block_events(block_events)
    }

    fn emit_block_events(&mut self, events: Vec<SegmenterEvent>) -> bool {
        let mut changed = false;
        for event in events {
            changed |= matches!(
                event,
                SegmenterEvent::BlockOpened(_) | SegmenterEvent::BlockFinalized(_)
            );
            self.notify(EngineEvent::Block(event));
        }
        changed
    }

    /// Hand an event to the host without waiting. A full receiver loses the
    /// event rather than stalling the pipeline.
    fn notify(&self, event: EngineEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped_events.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "engine event receiver full; dropping events");
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    fn publish_snapshot(&self) {
        self.snapshots
            .send_replace(Arc::new(self.pipeline.snapshot()));
    }

    fn publish_blocks(&self) {
        self.blocks
            .send_replace(Arc::new(self.pipeline.blocks().to_vec()));
    }
}
