//! Tiling: run gdal2tiles on one encoded page image.
//!
//! The tiler is an external program, so this stage is plain process
//! management: build the argument list, launch, poll until exit, and kill the
//! child if it overruns its timeout or the run is interrupted. Only the exit
//! status decides success; gdal2tiles writes partial trees on failure and
//! those are left where they are.
//!
//! [`ProcessRunner`] is the seam the orchestrator calls through, so tests can
//! substitute a fake tiler without spawning anything.

use crate::config::ZoomRange;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bytes of tiler stderr kept for error reports.
const STDERR_TAIL_BYTES: usize = 4096;

/// How long to wait for the stderr pipe to close once the child is gone.
const STDERR_DRAIN: Duration = Duration::from_secs(2);

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Running tilers are killed at the next poll.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One tiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileInvocation {
    pub program: PathBuf,
    pub zoom: ZoomRange,
    pub input: PathBuf,
    pub output_dir: PathBuf,
}

impl TileInvocation {
    /// gdal2tiles in raster profile. `input` is made absolute because the
    /// tiler's working directory is not ours to assume.
    pub fn gdal2tiles(
        program: impl Into<PathBuf>,
        zoom: ZoomRange,
        input: &Path,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        let input = std::path::absolute(input).unwrap_or_else(|_| input.to_path_buf());
        Self {
            program: program.into(),
            zoom,
            input,
            output_dir: output_dir.into(),
        }
    }

    /// `-p raster -z <from>-<to> <input> <output_dir>`
    pub fn args(&self) -> Vec<OsString> {
        vec![
            "-p".into(),
            "raster".into(),
            "-z".into(),
            self.zoom.to_string().into(),
            self.input.clone().into_os_string(),
            self.output_dir.clone().into_os_string(),
        ]
    }
}

/// How a tiler process ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code; `None` when killed by a signal.
    pub code: Option<i32>,
    pub timed_out: bool,
    /// Tail of the process's stderr.
    pub stderr: String,
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Reasons a tiler could not be run to completion.
#[derive(Debug)]
pub enum RunError {
    /// The program could not be started.
    Launch(std::io::Error),
    /// Polling or killing the child failed.
    Wait(std::io::Error),
    /// The interrupt flag was raised; the child, if any, was killed.
    Interrupted,
}

/// Runs tiler invocations to completion.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        invocation: &TileInvocation,
        interrupt: &InterruptFlag,
    ) -> Result<ExitOutcome, RunError>;
}

/// [`ProcessRunner`] that spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Option<Duration>,
    poll_interval: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self {
            timeout: None,
            poll_interval: Duration::from_millis(25),
        }
    }
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        invocation: &TileInvocation,
        interrupt: &InterruptFlag,
    ) -> Result<ExitOutcome, RunError> {
        if interrupt.is_interrupted() {
            return Err(RunError::Interrupted);
        }

        debug!(
            "Launching {} {:?}",
            invocation.program.display(),
            invocation.args()
        );
        let mut command = Command::new(&invocation.program);
        command
            .args(invocation.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // Own process group: the terminal's Ctrl-C reaches us, not the
        // tiler, and a kill also takes down any helpers it spawned.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(RunError::Launch)?;

        let stderr_reader = child.stderr.take().map(|mut stderr| {
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                let _ = tx.send(tail_lossy(&buf, STDERR_TAIL_BYTES));
            });
            rx
        });

        let start = Instant::now();
        let waited = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    // A tiler that died while the flag was up was most
                    // likely taken down by the same interrupt.
                    if !status.success() && interrupt.is_interrupted() {
                        break Err(RunError::Interrupted);
                    }
                    break Ok((status.code(), false));
                }
                Ok(None) => {}
                Err(e) => break Err(RunError::Wait(e)),
            }
            if interrupt.is_interrupted() {
                kill_and_reap(&mut child);
                break Err(RunError::Interrupted);
            }
            if let Some(limit) = self.timeout {
                if start.elapsed() >= limit {
                    warn!(
                        "Tiler exceeded {:?} on {}; killing it",
                        limit,
                        invocation.input.display()
                    );
                    kill_and_reap(&mut child);
                    break Ok((None, true));
                }
            }
            thread::sleep(self.poll_interval);
        };

        // A stray process outside the group can hold the pipe open forever.
        let stderr = stderr_reader
            .and_then(|rx| match rx.recv_timeout(STDERR_DRAIN) {
                Ok(tail) => Some(tail),
                Err(_) => {
                    debug!("Tiler stderr still open after exit; not waiting for it");
                    None
                }
            })
            .unwrap_or_default();
        let (code, timed_out) = waited?;
        debug!(
            "Tiler finished in {:?} with code {:?}",
            start.elapsed(),
            code
        );
        Ok(ExitOutcome {
            code,
            timed_out,
            stderr,
        })
    }
}

/// Kill the child's process group, then the child itself, and reap it.
fn kill_and_reap(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: plain syscall; a negative pid addresses the group the child
        // leads, which was created at spawn and has not been reaped yet.
        if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
            debug!(
                "killing process group {} failed: {}",
                pgid,
                std::io::Error::last_os_error()
            );
        }
    }
    if let Err(e) = child.kill() {
        debug!("kill failed (process probably exited): {}", e);
    }
    let _ = child.wait();
}

fn tail_lossy(buf: &[u8], max: usize) -> String {
    let start = buf.len().saturating_sub(max);
    String::from_utf8_lossy(&buf[start..]).into_owned()
}
