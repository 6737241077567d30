//! Collaborator interfaces the validation engine consumes.
//!
//! The engine never touches the operating system directly; everything it
//! observes arrives through the [`Platform`] trait. `SystemPlatform` is
//! the real Linux implementation, `MockPlatform` an in-memory double for
//! tests, mirroring the split between real and mock data sources used by
//! the collectors this engine grew out of.

mod mock;
#[cfg(unix)]
mod system;

pub use mock::{ConnectScript, ExecScript, MockConduit, MockPlatform};
#[cfg(unix)]
pub use system::{ServiceController, SystemPlatform};

use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{AdminAction, HashKind, PortTarget};

/// Kind of a filesystem object, from stat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Fifo,
    Symlink,
    Other,
}

/// Stat result in the fields the checkers consume.
#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub kind: FileKind,
    /// Full `st_mode` including the file-type bits.
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub inode: u64,
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileStat {
    /// `max(mtime, ctime)`, the timestamp the rules observe.
    pub fn timestamp(&self) -> i64 {
        self.mtime.max(self.ctime)
    }
}

/// statvfs-level usage of a mounted filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemUsage {
    pub blocks: i64,
    /// Blocks available to unprivileged users (`f_bavail`).
    pub blocks_free: i64,
    /// All free blocks including the reserved portion (`f_bfree`).
    pub blocks_free_total: i64,
    pub inodes: i64,
    pub inodes_free: i64,
    pub flags: u64,
}

/// System-wide sensors sampled once per cycle, before any checker runs.
/// Percentages are scaled by 10; cpu percentages are `None` until a
/// second sample exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInfo {
    pub loadavg: [f64; 3],
    pub cpu_user_percent: Option<i64>,
    pub cpu_system_percent: Option<i64>,
    pub cpu_wait_percent: Option<i64>,
    pub mem_percent: i64,
    pub mem_kbyte: i64,
    pub swap_percent: i64,
    pub swap_kbyte: i64,
}

/// One process's sample from the per-cycle process-tree snapshot.
/// `total_*` aggregates the process and all its descendants.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessSample {
    pub pid: i32,
    pub ppid: i32,
    pub uptime_secs: i64,
    pub cpu_percent: Option<i64>,
    pub total_cpu_percent: Option<i64>,
    pub mem_percent: i64,
    pub mem_kbyte: i64,
    pub total_mem_percent: i64,
    pub total_mem_kbyte: i64,
    pub children: i64,
    pub zombie: bool,
}

/// Outcome of an ICMP echo probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpOutcome {
    /// Round-trip time of the first reply.
    Response(Duration),
    /// No reply within the budget.
    Unreachable,
    /// The raw/dgram ICMP socket could not be opened; the probe is
    /// inconclusive, not a failure of the target.
    PermissionDenied,
}

/// Seekable byte stream over a monitored file, for the content matcher.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// An open connection to a probe target.
pub trait Conduit: Read + Write {
    /// Poll the connection for readability/writability, the way the
    /// probe verifies a freshly opened socket before the protocol test.
    fn ready(&mut self) -> io::Result<()>;

    /// True for datagram (UDP) transports.
    fn is_datagram(&self) -> bool;
}

/// Protocol verification plugin run over an open conduit.
///
/// The no-op [`DefaultProtocol`] stands in when a port has no protocol
/// test configured; probes identify it by name.
pub trait Protocol {
    fn name(&self) -> &'static str;

    /// Verify the protocol; `Err` carries the report text.
    fn check(&self, conduit: &mut dyn Conduit) -> Result<(), String>;
}

/// "No protocol": the connection itself is the test.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProtocol;

impl DefaultProtocol {
    pub const NAME: &'static str = "DEFAULT";
}

impl Protocol for DefaultProtocol {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn check(&self, _conduit: &mut dyn Conduit) -> Result<(), String> {
        Ok(())
    }
}

/// Handle on a spawned program run.
pub trait ProgramHandle {
    /// Exit status if the run has finished, `None` while it is running.
    fn exit_status(&mut self) -> Option<i32>;

    /// Kill the run and wait for it, returning the exit status.
    fn kill_and_wait(&mut self) -> io::Result<i32>;

    /// Captured output, stderr preferred over stdout, at most `cap`
    /// bytes. Only meaningful after the run finished.
    fn read_output(&mut self, cap: usize) -> String;

    fn pid(&self) -> i32;
}

/// Everything the engine needs from the host.
///
/// One implementation per environment; the validator is generic over it.
pub trait Platform {
    /// Refresh the system-wide sensors and rebuild the process-tree
    /// snapshot. Called exactly once per cycle, before any checker.
    fn refresh(&mut self) -> SystemInfo;

    /// Current wall-clock time, epoch seconds.
    fn now(&self) -> i64;

    /// stat following symlinks.
    fn stat(&self, path: &Path) -> io::Result<FileStat>;

    /// stat without following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<FileStat>;

    fn realpath(&self, path: &Path) -> io::Result<PathBuf>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>>;

    fn filesystem_usage(&self, path: &Path) -> io::Result<FilesystemUsage>;

    /// Digest of the file's content as lowercase hex.
    fn checksum(&self, path: &Path, kind: HashKind) -> io::Result<String>;

    /// Pid of the service's process per its pidfile, when it is alive.
    fn find_process(&self, pidfile: &Path) -> Option<i32>;

    /// Sample for one pid from the current process-tree snapshot.
    fn process_sample(&self, pid: i32) -> Option<ProcessSample>;

    fn icmp_echo(&self, host: &str, timeout: Duration, count: u32) -> IcmpOutcome;

    fn connect(&self, target: &PortTarget, timeout: Duration) -> io::Result<Box<dyn Conduit>>;

    fn execute(&self, command: &[String]) -> io::Result<Box<dyn ProgramHandle>>;

    /// Ask the control surface to run an administrative action; returns
    /// true when the action was carried out.
    fn control_service(&mut self, name: &str, action: AdminAction) -> bool;
}
