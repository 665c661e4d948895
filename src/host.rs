//! Host integration: supervisor commands, log streams, privileges, and process
//! start times.
//!
//! Backends talk to the operating system exclusively through [`SystemHost`], so
//! their state handling can be exercised against a scripted host in tests.
use chrono::{DateTime, Utc};
use std::{
    fmt,
    io::{self, BufRead, BufReader, Read},
    process::{Child, Command, Stdio},
    sync::{Arc, Mutex},
};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

/// Captured result of a finished supervisor command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited successfully.
    pub success: bool,
    /// Exit code, if the command was not killed by a signal.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output carrying `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Best human-readable explanation of a failure.
    pub fn failure_detail(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// A line-oriented log source, optionally backed by a follower process that is
/// killed when the stream is dropped.
pub struct LogStream {
    reader: Box<dyn BufRead + Send>,
    child: Option<Arc<Mutex<Child>>>,
}

/// Kills the follower process behind a [`LogStream`] from another thread, for
/// example a signal handler, while the stream itself is blocked in a read.
#[derive(Clone)]
pub struct StreamTerminator {
    child: Arc<Mutex<Child>>,
}

impl StreamTerminator {
    /// Process id of the follower.
    pub fn id(&self) -> u32 {
        self.child.lock().unwrap_or_else(|p| p.into_inner()).id()
    }

    /// Kills and reaps the follower. The stream then reads end-of-file.
    pub fn terminate(&self) {
        let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl fmt::Debug for StreamTerminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTerminator")
            .field("child", &self.id())
            .finish()
    }
}

impl LogStream {
    /// Wraps an in-memory or file reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            child: None,
        }
    }

    /// Spawns `program` and streams its standard output.
    pub fn spawn(program: &str, args: &[&str]) -> io::Result<Self> {
        debug!("streaming output of {program} {}", args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            io::Error::other(format!("{program} did not expose a stdout pipe"))
        })?;

        Ok(Self {
            reader: Box::new(BufReader::new(stdout)),
            child: Some(Arc::new(Mutex::new(child))),
        })
    }

    /// Handle that kills the follower process, if this stream has one.
    pub fn terminator(&self) -> Option<StreamTerminator> {
        self.child.as_ref().map(|child| StreamTerminator {
            child: Arc::clone(child),
        })
    }
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("follower", &self.terminator())
            .finish_non_exhaustive()
    }
}

impl Read for LogStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for LogStream {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(terminator) = self.terminator() {
            terminator.terminate();
        }
    }
}

/// Operating-system facilities a service backend depends on.
pub trait SystemHost {
    /// Runs a command to completion and captures its output.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Starts a long-running command and streams its standard output.
    fn stream(&self, program: &str, args: &[&str]) -> io::Result<LogStream>;

    /// Whether the current process runs as root / Administrator.
    fn is_elevated(&self) -> bool;

    /// Start time of a live process, queried natively.
    fn process_started_at(&self, pid: u32) -> Option<DateTime<Utc>>;
}

/// The real host: spawns processes and queries the process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeHost;

impl NativeHost {
    /// Creates a new `NativeHost`.
    pub fn new() -> Self {
        NativeHost
    }
}

impl SystemHost for NativeHost {
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        debug!("running {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn stream(&self, program: &str, args: &[&str]) -> io::Result<LogStream> {
        LogStream::spawn(program, args)
    }

    #[cfg(unix)]
    fn is_elevated(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    #[cfg(windows)]
    fn is_elevated(&self) -> bool {
        use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

        ServiceManager::local_computer(
            None::<&str>,
            ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE,
        )
        .is_ok()
    }

    fn process_started_at(&self, pid: u32) -> Option<DateTime<Utc>> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        let started = system.process(target)?.start_time();
        if started == 0 {
            return None;
        }
        DateTime::from_timestamp(i64::try_from(started).ok()?, 0)
    }
}
