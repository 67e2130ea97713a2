//! PTY session: one shell on a pseudo-terminal, with a non-blocking read
//! task and a serialized write queue.
//!
//! Lifecycle: `Starting -> Connected -> Closing -> Closed`. EOF or a fatal
//! read error moves `Connected` straight to `Closed`.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use crate::config::PtyConfig;
use crate::error::{ReadError, ResizeError, SpawnError};

const REAP_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Starting = 1,
    Connected = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SessionState::Uninitialized,
            1 => SessionState::Starting,
            2 => SessionState::Connected,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// State cell shared with the read task and writer handles.
#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: SessionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        let prev = SessionState::from_u8(self.0.swap(state as u8, Ordering::AcqRel));
        if prev != state {
            debug!(from = ?prev, to = ?state, "pty session state");
        }
    }

    /// Move `from -> to` only if the session is still in `from`.
    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(from = ?from, to = ?to, "pty session state");
        }
        moved
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    DataReceived(Bytes),
    Closed { exit_code: Option<i32> },
    Error(ReadError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub columns: u16,
    pub rows: u16,
}

/// Cloneable handle onto the session's write queue.
#[derive(Debug, Clone)]
pub struct PtyWriter {
    tx: mpsc::UnboundedSender<Bytes>,
    state: SharedState,
}

impl PtyWriter {
    /// Queue bytes for the shell. `false` once the session is closing.
    pub fn write(&self, bytes: impl Into<Bytes>) -> bool {
        if self.state.get() != SessionState::Connected {
            return false;
        }
        self.tx.send(bytes.into()).is_ok()
    }
}

pub struct PtySession {
    master: Option<Arc<AsyncFd<OwnedFd>>>,
    child: Arc<Mutex<Child>>,
    pid: u32,
    geometry: Geometry,
    state: SharedState,
    writer: PtyWriter,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl std::fmt::Debug for PtySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtySession")
            .field("pid", &self.pid)
            .field("geometry", &self.geometry)
            .field("state", &self.state.get())
            .finish()
    }
}

impl PtySession {
    /// Open a PTY, spawn the shell on it and start the read/write tasks.
    pub fn start(
        config: &PtyConfig,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Self, SpawnError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| SpawnError::NoRuntime)?;
        let state = SharedState::new(SessionState::Starting);
        debug!(shell = %config.shell, cols = config.columns, rows = config.rows, "starting pty session");

        let winsize = Winsize {
            ws_row: config.rows,
            ws_col: config.columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).map_err(|e| SpawnError::OpenPty(e.into()))?;

        configure_fd(&pty.master, true).map_err(SpawnError::Configure)?;
        configure_fd(&pty.slave, false).map_err(SpawnError::Configure)?;

        let child = spawn_shell(config, pty.slave).map_err(|source| {
            state.set(SessionState::Closed);
            SpawnError::Spawn {
                shell: config.shell.clone(),
                source,
            }
        })?;
        let pid = child.id();

        let master = {
            let _guard = runtime.enter();
            AsyncFd::new(pty.master).map_err(SpawnError::Configure)?
        };
        let master = Arc::new(master);
        let child = Arc::new(Mutex::new(child));

        state.set(SessionState::Connected);

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let writer_task = runtime.spawn(write_loop(Arc::clone(&master), write_rx));
        let reader_task = runtime.spawn(read_loop(
            Arc::clone(&master),
            config.read_chunk_size.max(1),
            events,
            state.clone(),
            Arc::clone(&child),
            config.shutdown_grace,
        ));

        debug!(pid, "pty session connected");

        Ok(Self {
            master: Some(master),
            child,
            pid,
            geometry: Geometry {
                columns: config.columns,
                rows: config.rows,
            },
            writer: PtyWriter {
                tx: write_tx,
                state: state.clone(),
            },
            state,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
            shutdown_grace: config.shutdown_grace,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Queue bytes for the shell. Never blocks.
    pub fn write(&self, bytes: impl Into<Bytes>) -> bool {
        self.writer.write(bytes)
    }

    pub fn writer(&self) -> PtyWriter {
        self.writer.clone()
    }

    /// Record the new geometry, then tell the kernel (and so the shell).
    pub fn resize(&mut self, columns: u16, rows: u16) -> Result<(), ResizeError> {
        self.geometry = Geometry { columns, rows };
        let Some(master) = self.master.as_ref() else {
            return Err(ResizeError::Closed);
        };

        let ws = libc::winsize {
            ws_row: rows,
            ws_col: columns,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: the master fd is open for the lifetime of `master`; `ws` outlives the call.
        let rc = unsafe { libc::ioctl(master.get_ref().as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if rc == -1 {
            let source = io::Error::last_os_error();
            warn!(columns, rows, error = %source, "pty resize failed");
            return Err(ResizeError::Ioctl {
                cols: columns,
                rows,
                source,
            });
        }
        debug!(columns, rows, "pty resized");
        Ok(())
    }

    /// Stop the session: cancel the read task, drop queued input, terminate
    /// the shell (SIGTERM, then SIGKILL after the grace period), close the
    /// master. Returns the shell's exit code when known.
    pub async fn shutdown(&mut self) -> Option<i32> {
        if self.master.is_none() {
            return None;
        }
        self.state.set(SessionState::Closing);

        if let Some(reader) = self.reader_task.take() {
            reader.abort();
            let _ = reader.await;
        }
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
            let _ = writer.await;
        }

        let exit_code = terminate_child(&self.child, self.pid, self.shutdown_grace).await;

        // Both tasks are gone, so this is the last reference: closes the fd.
        self.master = None;
        self.state.set(SessionState::Closed);
        debug!(pid = self.pid, ?exit_code, "pty session shut down");
        exit_code
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader_task.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer_task.take() {
            writer.abort();
        }
        if self.master.take().is_some() {
            let mut child = lock_child(&self.child);
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
                let _ = child.wait();
            }
            self.state.set(SessionState::Closed);
        }
    }
}

/// Set close-on-exec, and O_NONBLOCK on the master.
fn configure_fd(fd: &OwnedFd, nonblocking: bool) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` stays open for the duration of these calls.
    unsafe {
        if nonblocking {
            let flags = libc::fcntl(raw, libc::F_GETFL);
            if flags == -1 || libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
                return Err(io::Error::last_os_error());
            }
        }
        let fd_flags = libc::fcntl(raw, libc::F_GETFD);
        if fd_flags == -1 || libc::fcntl(raw, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Spawn the shell with `slave` as its controlling terminal and stdio.
/// The slave is closed in this process before returning.
fn spawn_shell(config: &PtyConfig, slave: OwnedFd) -> io::Result<Child> {
    let mut cmd = Command::new(&config.shell);
    cmd.args(&config.args)
        .env("TERM", &config.term)
        .envs(config.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave));
    if let Some(dir) = &config.working_directory {
        cmd.current_dir(dir);
    }

    // SAFETY: only async-signal-safe calls between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            if libc::ioctl(0, libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = cmd.spawn();
    // `cmd` owns the parent's copies of the slave; drop them so EOF can arrive.
    drop(cmd);
    child
}

async fn read_loop(
    master: Arc<AsyncFd<OwnedFd>>,
    chunk_size: usize,
    events: mpsc::Sender<SessionEvent>,
    state: SharedState,
    child: Arc<Mutex<Child>>,
    reap_grace: Duration,
) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        let mut guard = match master.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "pty readiness failed");
                let _ = events.send(SessionEvent::Error(ReadError(e))).await;
                break;
            }
        };

        match guard.try_io(|fd| read_fd(fd.get_ref(), &mut buf)) {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let data = Bytes::copy_from_slice(&buf[..n]);
                if events.send(SessionEvent::DataReceived(data)).await.is_err() {
                    debug!("session event receiver dropped; stopping reader");
                    return;
                }
            }
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the slave side is gone.
            Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => break,
            Ok(Err(e)) => {
                warn!(error = %e, "pty read failed");
                let _ = events.send(SessionEvent::Error(ReadError(e))).await;
                break;
            }
            // Would block: readiness already cleared, wait again.
            Err(_would_block) => continue,
        }
    }

    if !state.transition(SessionState::Connected, SessionState::Closed) {
        return;
    }
    let exit_code = reap_child(&child, reap_grace).await;
    debug!(?exit_code, "pty reached EOF");
    let _ = events.send(SessionEvent::Closed { exit_code }).await;
}

async fn write_loop(master: Arc<AsyncFd<OwnedFd>>, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(data) = rx.recv().await {
        let mut written = 0;
        while written < data.len() {
            let mut guard = match master.writable().await {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, "pty writability failed");
                    return;
                }
            };
            match guard.try_io(|fd| write_fd(fd.get_ref(), &data[written..])) {
                Ok(Ok(0)) => {
                    warn!("pty accepted no bytes; dropping write queue");
                    return;
                }
                Ok(Ok(n)) => written += n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "pty write failed");
                    return;
                }
                Err(_would_block) => continue,
            }
        }
    }
}

fn read_fd(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` bytes of writes and `fd` is open.
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn write_fd(fd: &OwnedFd, data: &[u8]) -> io::Result<usize> {
    // SAFETY: `data` is valid for `data.len()` bytes of reads and `fd` is open.
    let n = unsafe { libc::write(fd.as_raw_fd(), data.as_ptr().cast(), data.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn lock_child(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Exit code, or 128 + signal number for a signalled child.
fn exit_code(status: ExitStatus) -> Option<i32> {
    status.code().or_else(|| status.signal().map(|sig| 128 + sig))
}

fn try_reap(child: &Mutex<Child>) -> Option<ExitStatus> {
    lock_child(child).try_wait().ok().flatten()
}

/// Poll for the child's exit for up to `grace`.
async fn reap_child(child: &Mutex<Child>, grace: Duration) -> Option<i32> {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if let Some(status) = try_reap(child) {
            return exit_code(status);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(REAP_POLL).await;
    }
}

async fn terminate_child(child: &Mutex<Child>, pid: u32, grace: Duration) -> Option<i32> {
    if let Some(status) = try_reap(child) {
        return exit_code(status);
    }

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
    if let Some(code) = reap_child(child, grace).await {
        return Some(code);
    }

    warn!(pid, "shell ignored SIGTERM; sending SIGKILL");
    let mut child = lock_child(child);
    if let Err(e) = child.kill() {
        debug!(pid, error = %e, "SIGKILL failed");
    }
    child.wait().ok().and_then(exit_code)
}
