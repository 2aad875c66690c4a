use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, BufReader, PipeReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use world_keeper_core::{Error, Result};

use crate::locate::{diagnose, locate};

const RECENT_LINES: usize = 50;

// Changes into "$1" and replaces itself with "$2"; lets sh handle
// executables the direct spawn refused.
const WRAPPER_SCRIPT: &str = r#"cd "$1" && exec "$2""#;

/// Receives the server's merged output, one line at a time.
pub trait LineSink {
    fn line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LineSink for F {
    fn line(&mut self, line: &str) {
        self(line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    Starting,
    Running { pid: u32 },
    Exited { code: Option<i32> },
    NotFound { attempted: Vec<PathBuf> },
    SpawnFailed { reason: String },
}

impl ServerState {
    pub fn label(&self) -> &'static str {
        match self {
            ServerState::Starting => "Starting",
            ServerState::Running { .. } => "Running",
            ServerState::Exited { .. } => "Stopped",
            ServerState::NotFound { .. } => "Not installed",
            ServerState::SpawnFailed { .. } => "Failed to start",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub state: ServerState,
    pub executable: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub started_at: Option<OffsetDateTime>,
    pub finished_at: Option<OffsetDateTime>,
    pub recent_output: Vec<String>,
}

#[derive(Debug)]
struct Shared {
    state: ServerState,
    executable: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    started_at: Option<OffsetDateTime>,
    finished_at: Option<OffsetDateTime>,
    output: VecDeque<String>,
}

/// Read-only view of the supervised server. Only the supervisor thread
/// writes through it.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    shared: Arc<Mutex<Shared>>,
}

impl SupervisorHandle {
    fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: ServerState::Starting,
                executable: None,
                working_dir: None,
                started_at: None,
                finished_at: None,
                output: VecDeque::with_capacity(RECENT_LINES),
            })),
        }
    }

    pub fn status(&self) -> ServerStatus {
        let shared = self.lock();
        ServerStatus {
            state: shared.state.clone(),
            executable: shared.executable.clone(),
            working_dir: shared.working_dir.clone(),
            started_at: shared.started_at,
            finished_at: shared.finished_at,
            recent_output: shared.output.iter().cloned().collect(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock().state, ServerState::Running { .. })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServerState) {
        self.lock().state = state;
    }

    fn record_launch(&self, executable: &Path, working_dir: &Path, pid: u32) {
        let mut shared = self.lock();
        shared.executable = Some(executable.to_path_buf());
        shared.working_dir = Some(working_dir.to_path_buf());
        shared.started_at = Some(OffsetDateTime::now_utc());
        shared.state = ServerState::Running { pid };
    }

    fn push_output(&self, line: &str) {
        let mut shared = self.lock();
        if shared.output.len() == RECENT_LINES {
            shared.output.pop_front();
        }
        shared.output.push_back(line.to_string());
    }

    fn finish(&self, code: Option<i32>) {
        let mut shared = self.lock();
        shared.finished_at = Some(OffsetDateTime::now_utc());
        shared.state = ServerState::Exited { code };
    }
}

pub struct Supervisor;

impl Supervisor {
    /// Starts the background thread that owns the server process for the
    /// rest of the program. The thread is detached.
    pub fn start(candidates: Vec<PathBuf>, working_dir: Option<PathBuf>) -> Result<SupervisorHandle> {
        let handle = SupervisorHandle::new();
        let writer = handle.clone();
        thread::Builder::new()
            .name("server-supervisor".to_string())
            .spawn(move || lifecycle(&candidates, working_dir, &writer))
            .map_err(|source| Error::SpawnFailed {
                path: PathBuf::from("server-supervisor"),
                source,
            })?;
        Ok(handle)
    }
}

fn lifecycle(candidates: &[PathBuf], working_dir: Option<PathBuf>, handle: &SupervisorHandle) {
    let executable = match locate(candidates) {
        Ok(path) => path,
        Err(err) => {
            warn!(error = %err, "game server not started");
            diagnose(candidates);
            handle.set_state(ServerState::NotFound {
                attempted: candidates.to_vec(),
            });
            return;
        }
    };
    let dir = working_dir
        .or_else(|| executable.parent().map(Path::to_path_buf))
        .filter(|d| !d.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));

    info!(executable = %executable.display(), dir = %dir.display(), "starting game server");
    let process = match spawn(&executable, &dir) {
        Ok(process) => process,
        Err(err) => {
            error!(error = %err, "game server failed to start");
            handle.set_state(ServerState::SpawnFailed {
                reason: err.to_string(),
            });
            return;
        }
    };
    handle.record_launch(&executable, &dir, process.id());

    let mut sink = |line: &str| {
        info!(target: "server", "{line}");
        handle.push_output(line);
    };
    match supervise(process, &mut sink) {
        Ok(status) => {
            info!(code = ?status.code(), "game server stopped");
            handle.finish(status.code());
        }
        Err(err) => {
            error!(error = %err, "lost track of game server");
            handle.finish(None);
        }
    }
}

/// A launched server. stdout and stderr share one pipe, so `output`
/// yields lines in the order the process wrote them.
#[derive(Debug)]
pub struct ServerProcess {
    child: Child,
    output: PipeReader,
}

impl ServerProcess {
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

/// Spawns, streams every output line to `sink`, and waits for exit.
pub fn run(executable: &Path, working_dir: &Path, sink: &mut dyn LineSink) -> Result<ExitStatus> {
    let process = spawn(executable, working_dir)?;
    supervise(process, sink)
}

/// Launches `executable` with no arguments inside `working_dir`. A spawn
/// error other than a missing file is retried once through `sh`.
pub fn spawn(executable: &Path, working_dir: &Path) -> Result<ServerProcess> {
    let executable = fs::canonicalize(executable).unwrap_or_else(|_| executable.to_path_buf());
    let mut direct = Command::new(&executable);
    direct.current_dir(working_dir);

    match launch(direct) {
        Ok(process) => Ok(process),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::SpawnFailed {
            path: executable,
            source: err,
        }),
        Err(err) => {
            warn!(error = %err, "direct spawn failed, retrying through shell wrapper");
            let mut wrapped = Command::new("sh");
            wrapped
                .arg("-c")
                .arg(WRAPPER_SCRIPT)
                .arg("sh")
                .arg(working_dir)
                .arg(&executable);
            launch(wrapped).map_err(|source| Error::SpawnFailed {
                path: executable,
                source,
            })
        }
    }
}

// Takes the command by value: its copies of the pipe writer must be gone
// before the reader can see end of file.
fn launch(mut cmd: Command) -> io::Result<ServerProcess> {
    let (output, writer) = io::pipe()?;
    let stderr = writer.try_clone()?;
    let child = cmd
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr)
        .spawn()?;
    drop(cmd);
    Ok(ServerProcess { child, output })
}

/// Feeds the merged output to `sink` until the pipe closes, then waits for
/// the process to exit.
pub fn supervise(process: ServerProcess, sink: &mut dyn LineSink) -> Result<ExitStatus> {
    let ServerProcess { mut child, output } = process;
    for chunk in BufReader::new(output).split(b'\n') {
        match chunk {
            Ok(bytes) => {
                let line = String::from_utf8_lossy(&bytes);
                sink.line(line.trim_end_matches('\r'));
            }
            Err(err) => {
                debug!(error = %err, "server output closed");
                break;
            }
        }
    }

    child
        .wait()
        .map_err(|e| Error::read("wait for server process", e))
}
