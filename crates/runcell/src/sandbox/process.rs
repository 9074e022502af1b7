//! Process spawning and supervision
//!
//! Runs one external command with a hard wall-clock deadline, captures
//! stdout and stderr into bounded buffers, and makes sure nothing the command
//! started outlives the call.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::sandbox::{BuiltCommand, SandboxError};

/// How long to wait for the output readers once the process is gone
const READER_GRACE: Duration = Duration::from_millis(500);

/// Read chunk size for the output pipes
const READ_CHUNK: usize = 8 * 1024;

/// Parameters for a single supervised run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Working directory (also used as HOME)
    pub cwd: PathBuf,

    /// Data written to the child's stdin, which is then closed
    pub stdin: Option<Vec<u8>>,

    /// Wall-clock deadline
    pub timeout: Duration,

    /// Capture ceiling per output stream in bytes
    pub output_limit: usize,

    /// PATH for the child
    pub path: String,
}

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with this code
    Code(i32),
    /// Killed by this signal
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Code(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    pub fn signal(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(_) => None,
            ExitStatus::Signal(signal) => Some(*signal),
        }
    }

    fn from_std(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }
        ExitStatus::Code(status.code().unwrap_or(-1))
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "exit code {code}"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Bytes captured from one output stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// The stream produced more than the capture ceiling
    pub truncated: bool,
}

impl Captured {
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Result of a process that ended before its deadline
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The process was killed because an output stream hit the ceiling
    pub stopped_for_output: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Exit code zero and no stream cut short
    pub fn is_success(&self) -> bool {
        self.status.success() && !self.truncated()
    }

    /// Either stream hit the capture ceiling
    pub fn truncated(&self) -> bool {
        self.stdout.truncated || self.stderr.truncated
    }
}

/// Exactly one of normal completion or deadline expiry
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    Completed(ProcessOutput),
    TimedOut { elapsed: Duration },
}

/// Why the supervisor stopped waiting
enum Ended {
    Exited(std::process::ExitStatus),
    Overflowed(std::process::ExitStatus),
    TimedOut,
}

/// Run `command` to completion or until its deadline
///
/// The child is placed in its own process group. On deadline or output
/// overflow the whole group is killed; after a normal exit the group is
/// killed as well so that background helpers do not linger. If the returned
/// future is dropped early the group is killed on drop.
#[instrument(skip(command, options), fields(program = %command.program, timeout_ms = options.timeout.as_millis() as u64))]
pub async fn run(
    command: &BuiltCommand,
    options: RunOptions,
) -> Result<ProcessOutcome, SandboxError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&options.cwd)
        .env_clear()
        .env("PATH", &options.path)
        .env("HOME", &options.cwd)
        .envs(command.env.iter().map(|(k, v)| (k, v)))
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| SandboxError::SpawnFailed {
        program: command.program.clone(),
        source,
    })?;
    let mut group = GroupGuard::new(child.id());

    debug!(pid = ?child.id(), "spawned process");

    let overflow = Arc::new(Notify::new());
    let stdout = spawn_reader(child.stdout.take(), options.output_limit, overflow.clone());
    let stderr = spawn_reader(child.stderr.take(), options.output_limit, overflow.clone());
    let stdin_writer = child
        .stdin
        .take()
        .zip(options.stdin)
        .map(|(mut pipe, data)| {
            tokio::spawn(async move {
                // The program may exit without reading its input
                if let Err(e) = pipe.write_all(&data).await {
                    debug!(error = %e, "stdin not fully consumed");
                }
                drop(pipe);
            })
        });

    let ended = tokio::select! {
        status = child.wait() => Ended::Exited(status.map_err(SandboxError::WaitFailed)?),
        _ = overflow.notified() => {
            group.kill(&mut child);
            Ended::Overflowed(child.wait().await.map_err(SandboxError::WaitFailed)?)
        }
        _ = tokio::time::sleep(options.timeout) => {
            group.kill(&mut child);
            child.wait().await.map_err(SandboxError::WaitFailed)?;
            Ended::TimedOut
        }
    };
    let elapsed = started.elapsed();

    // Take down anything the command left running in its group
    group.kill(&mut child);
    group.disarm();

    if let Some(writer) = stdin_writer {
        writer.abort();
    }
    let (stdout, stderr) = tokio::join!(join_reader(stdout), join_reader(stderr));

    let stopped_for_output = matches!(ended, Ended::Overflowed(_));
    match ended {
        Ended::TimedOut => {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "process timed out");
            Ok(ProcessOutcome::TimedOut { elapsed })
        }
        Ended::Exited(status) | Ended::Overflowed(status) => {
            let status = ExitStatus::from_std(status);
            debug!(
                %status,
                elapsed_ms = elapsed.as_millis() as u64,
                stdout_len = stdout.bytes.len(),
                stderr_len = stderr.bytes.len(),
                truncated = stdout.truncated || stderr.truncated,
                stopped_for_output,
                "process finished"
            );
            Ok(ProcessOutcome::Completed(ProcessOutput {
                status,
                stdout,
                stderr,
                stopped_for_output,
                elapsed,
            }))
        }
    }
}

/// Process group of a spawned child, killed when dropped while armed
struct GroupGuard {
    pgid: Option<u32>,
    armed: bool,
}

impl GroupGuard {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid, armed: true }
    }

    /// Kill the group, falling back to the direct child
    fn kill(&self, child: &mut Child) {
        if !kill_group(self.pgid) {
            let _ = child.start_kill();
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(pgid = ?self.pgid, "run abandoned, killing process group");
            kill_group(self.pgid);
        }
    }
}

/// Send SIGKILL to a process group; false when the group could not be signalled
#[cfg(unix)]
fn kill_group(pgid: Option<u32>) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|id| i32::try_from(id).ok()) else {
        return false;
    };

    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => true,
        Err(e) => {
            warn!(pgid, error = %e, "failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) -> bool {
    false
}

/// Capture buffer shared between a reader task and the supervisor
type SharedCapture = Arc<Mutex<Captured>>;

/// A running output reader
struct Reader {
    task: JoinHandle<std::io::Result<()>>,
    captured: SharedCapture,
}

fn spawn_reader<R>(pipe: Option<R>, limit: usize, overflow: Arc<Notify>) -> Option<Reader>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|pipe| {
        let captured = SharedCapture::default();
        let task = tokio::spawn(capture(pipe, limit, captured.clone(), overflow));
        Reader { task, captured }
    })
}

fn lock(captured: &SharedCapture) -> MutexGuard<'_, Captured> {
    captured.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read a stream into `captured`, keeping at most `limit` bytes
///
/// Once the stream goes past the ceiling, the prefix is kept, reading stops
/// and `overflow` is notified.
async fn capture<R>(
    mut pipe: R,
    limit: usize,
    captured: SharedCapture,
    overflow: Arc<Notify>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }

        let mut buffer = lock(&captured);
        let room = limit - buffer.bytes.len();
        if n > room {
            buffer.bytes.extend_from_slice(&chunk[..room]);
            buffer.truncated = true;
            drop(buffer);
            overflow.notify_one();
            return Ok(());
        }
        buffer.bytes.extend_from_slice(&chunk[..n]);
    }
}

/// Wait briefly for a reader, then return whatever it captured
async fn join_reader(reader: Option<Reader>) -> Captured {
    let Some(Reader { mut task, captured }) = reader else {
        return Captured::default();
    };

    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "failed to read process output"),
        Ok(Err(e)) => warn!(error = %e, "output reader task failed"),
        Err(_) => {
            // A descendant left the process group and still holds the pipe
            warn!("output pipe still open after process exit");
            task.abort();
        }
    }

    std::mem::take(&mut *lock(&captured))
}
