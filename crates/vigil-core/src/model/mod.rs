//! Data model of the validation engine: services, their rule sets and the
//! per-service observation state carried across cycles.
//!
//! Rule lists are plain `Vec`s owned by the service. Values that the
//! original daemon encoded with sentinels (pid `-1`, unset limits,
//! unseeded hashes) are explicit `Option`s here; change-detection rules
//! are uninitialized while their stored value is `None` and seed silently
//! on first observation.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bitflags::bitflags;
use serde::Serialize;

use crate::event::EventSet;
use crate::platform::ProgramHandle;
use crate::predicate::Operator;

/// Longest line considered by the content match rule, in bytes. Longer
/// lines are truncated to this length and the remainder up to the next
/// newline is consumed but ignored.
pub const MATCH_LINE_LENGTH: usize = 512;

/// Cap on captured program output, in bytes.
pub const STATUS_OUTPUT_MAX: usize = 256;

// ============================================================
// Actions
// ============================================================

/// Effect dispatched by the external alert/action subsystem when an
/// event changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Ignore,
    Alert,
    Restart,
    Stop,
    Exec,
    Unmonitor,
    Start,
    Monitor,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Ignore => "ignore",
            ActionKind::Alert => "alert",
            ActionKind::Restart => "restart",
            ActionKind::Stop => "stop",
            ActionKind::Exec => "exec",
            ActionKind::Unmonitor => "unmonitor",
            ActionKind::Start => "start",
            ActionKind::Monitor => "monitor",
        };
        f.write_str(name)
    }
}

/// Administrative action requested for a service through the control
/// surface, executed by the scheduler at the start of the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Start,
    Stop,
    Restart,
    Monitor,
    Unmonitor,
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminAction::Start => "start",
            AdminAction::Stop => "stop",
            AdminAction::Restart => "restart",
            AdminAction::Monitor => "monitor",
            AdminAction::Unmonitor => "unmonitor",
        };
        f.write_str(name)
    }
}

/// Per-event action references of a service (`on nonexist restart`, ...).
#[derive(Debug, Clone, Copy)]
pub struct EventActions {
    pub nonexist: ActionKind,
    pub invalid: ActionKind,
    pub data: ActionKind,
    pub exec: ActionKind,
    pub pid: ActionKind,
    pub ppid: ActionKind,
    pub fsflag: ActionKind,
    pub admin: ActionKind,
}

impl Default for EventActions {
    fn default() -> Self {
        Self {
            nonexist: ActionKind::Alert,
            invalid: ActionKind::Alert,
            data: ActionKind::Alert,
            exec: ActionKind::Alert,
            pid: ActionKind::Alert,
            ppid: ActionKind::Alert,
            fsflag: ActionKind::Alert,
            admin: ActionKind::Alert,
        }
    }
}

// ============================================================
// Monitor mode & process status flags
// ============================================================

bitflags! {
    /// Monitoring mode of a service. The empty set means monitoring is
    /// off ("not monitored"); `INIT` marks the warm-up period in which
    /// differential measurements are not yet trustworthy; `WAITING` is
    /// ORed in while the `every` policy skips cycles.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Monitor: u8 {
        const YES = 0b001;
        const INIT = 0b010;
        const WAITING = 0b100;
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Monitor::INIT
    }
}

bitflags! {
    /// Process status flags sampled from the process table.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ProcessStatus: u16 {
        const ZOMBIE = 0b1;
    }
}

// ============================================================
// Scheduling policy
// ============================================================

/// Cron mask compiled once at configuration time.
///
/// Specs use the classic five fields (minute, hour, day-of-month, month,
/// day-of-week); seconds are pinned to zero so a mask matches the whole
/// minute it names.
#[derive(Debug, Clone)]
pub struct CronMask {
    spec: String,
    schedule: cron::Schedule,
}

impl CronMask {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let full = format!("0 {}", spec.trim());
        let schedule = full
            .parse::<cron::Schedule>()
            .map_err(|e| format!("invalid cron spec '{}': {}", spec, e))?;
        Ok(Self {
            spec: spec.trim().to_string(),
            schedule,
        })
    }

    /// True when the instant (seconds since epoch, local time) falls in
    /// the mask's minute.
    pub fn matches_epoch(&self, epoch: i64) -> bool {
        use chrono::TimeZone;
        match chrono::Local.timestamp_opt(epoch - epoch.rem_euclid(60), 0) {
            chrono::LocalResult::Single(minute) => self.schedule.includes(minute),
            _ => false,
        }
    }

    pub fn spec(&self) -> &str {
        &self.spec
    }
}

/// Which cycles actually evaluate a service.
#[derive(Debug, Clone, Default)]
pub enum Every {
    /// Every cycle.
    #[default]
    Cycle,
    /// Every n-th cycle; `counter` advances once per cycle.
    SkipCycles { number: u32, counter: u32 },
    /// Only in cycles whose wall-clock time matches the mask.
    Cron(CronMask),
    /// Only in cycles whose wall-clock time does NOT match the mask.
    NotInCron(CronMask),
}

// ============================================================
// Rules
// ============================================================

/// Match pattern; a regex normally, plain substring containment when a
/// rule was declared with `fixed = true`.
#[derive(Debug, Clone)]
pub enum Pattern {
    Regex(regex::Regex),
    Substring(String),
}

impl Pattern {
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(line),
            Pattern::Substring(s) => line.contains(s.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Pattern::Regex(re) => re.as_str(),
            Pattern::Substring(s) => s,
        }
    }
}

/// Checksum algorithm of a checksum rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HashKind {
    Md5,
    Sha1,
}

impl HashKind {
    /// Hex digest length: 32 for MD5, 40 for SHA-1.
    pub fn hex_len(self) -> usize {
        match self {
            HashKind::Md5 => 32,
            HashKind::Sha1 => 40,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PermRule {
    /// Expected permission bits, compared against `mode & 0o7777`.
    pub expected: u32,
    pub action: ActionKind,
}

#[derive(Debug, Clone)]
pub struct UidRule {
    pub expected: u32,
    pub action: ActionKind,
}

#[derive(Debug, Clone)]
pub struct GidRule {
    pub expected: u32,
    pub action: ActionKind,
}

/// File checksum rule. `expected == None` means not yet initialized: the
/// first successfully computed digest seeds it without posting a
/// checksum event.
#[derive(Debug, Clone)]
pub struct ChecksumRule {
    pub kind: HashKind,
    pub expected: Option<String>,
    pub test_changes: bool,
    pub action: ActionKind,
}

/// File size rule. In change-detection mode `last` carries the size seen
/// last cycle; only the first change-detection rule in a service's list
/// is ever processed.
#[derive(Debug, Clone)]
pub struct SizeRule {
    pub operator: Operator,
    pub limit: u64,
    pub test_changes: bool,
    pub last: Option<u64>,
    pub action: ActionKind,
}

/// Timestamp rule over `max(mtime, ctime)`. Constant-value rules compare
/// the age (`now - observed`) in seconds against the limit.
#[derive(Debug, Clone)]
pub struct TimestampRule {
    pub operator: Operator,
    pub limit_secs: i64,
    pub test_changes: bool,
    pub last: Option<i64>,
    pub action: ActionKind,
}

#[derive(Debug, Clone)]
pub struct UptimeRule {
    pub operator: Operator,
    pub limit_secs: i64,
    pub action: ActionKind,
}

/// Content match rule (or ignore rule when on the ignore list). `not`
/// inverts the match before it is applied.
#[derive(Debug, Clone)]
pub struct MatchRule {
    pub pattern: Pattern,
    pub not: bool,
    pub action: ActionKind,
}

/// Process/system resource families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceId {
    CpuPercent,
    TotalCpuPercent,
    CpuUser,
    CpuSystem,
    CpuWait,
    MemPercent,
    MemKbyte,
    SwapPercent,
    SwapKbyte,
    LoadAvg1,
    LoadAvg5,
    LoadAvg15,
    Children,
    TotalMemKbyte,
    TotalMemPercent,
}

/// Process/system resource rule. Percent limits are scaled by 10.
#[derive(Debug, Clone)]
pub struct ResourceRule {
    pub resource: ResourceId,
    pub operator: Operator,
    pub limit: i64,
    pub action: ActionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FsResource {
    Inode,
    Space,
}

/// Filesystem usage rule. Exactly one of `limit_percent` (scaled by 10)
/// and `limit_absolute` must be set; misconfigured rules are logged and
/// skipped at evaluation time.
#[derive(Debug, Clone)]
pub struct FilesystemRule {
    pub resource: FsResource,
    pub operator: Operator,
    pub limit_percent: Option<i64>,
    pub limit_absolute: Option<i64>,
    pub action: ActionKind,
}

/// Exit-status rule of a program service.
#[derive(Debug, Clone)]
pub struct StatusRule {
    pub operator: Operator,
    pub exit_value: i64,
    pub action: ActionKind,
}

/// Restart-rate rule: fire when the service was started `count` times
/// within `cycles` monitoring cycles.
#[derive(Debug, Clone, Copy)]
pub struct ActionRate {
    pub count: u32,
    pub cycles: u32,
    pub action: ActionKind,
}

// ============================================================
// Probes
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketKind {
    Tcp,
    Udp,
}

/// Where a connection probe dials.
#[derive(Debug, Clone)]
pub enum PortTarget {
    Inet {
        host: String,
        port: u16,
        kind: SocketKind,
    },
    Unix {
        path: PathBuf,
    },
}

impl fmt::Display for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortTarget::Inet { host, port, kind } => {
                let proto = match kind {
                    SocketKind::Tcp => "TCP",
                    SocketKind::Udp => "UDP",
                };
                write!(f, "INET[{}:{}] via {}", host, port, proto)
            }
            PortTarget::Unix { path } => write!(f, "UNIX[{}]", path.display()),
        }
    }
}

/// A probe target on a service: one host:port (or unix socket) plus the
/// protocol to verify over it.
pub struct Port {
    pub target: PortTarget,
    pub timeout: Duration,
    pub retry: u32,
    pub protocol: Box<dyn crate::platform::Protocol>,
    pub action: ActionKind,
    /// Response time of the last successful probe.
    pub response: Option<Duration>,
    pub is_available: bool,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("protocol", &self.protocol.name())
            .field("action", &self.action)
            .field("response", &self.response)
            .field("is_available", &self.is_available)
            .finish()
    }
}

/// One ICMP echo entry on a remote-host service.
#[derive(Debug, Clone)]
pub struct Icmp {
    pub timeout: Duration,
    pub count: u32,
    pub action: ActionKind,
    pub response: Option<Duration>,
    pub is_available: bool,
}

/// Execution state of a program service.
pub struct Program {
    pub command: Vec<String>,
    pub timeout_secs: i64,
    /// Epoch seconds of the last launch.
    pub started: Option<i64>,
    pub handle: Option<Box<dyn ProgramHandle>>,
    /// Exit status of the last finished run, kept for display.
    pub last_exit: Option<i32>,
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("command", &self.command)
            .field("timeout_secs", &self.timeout_secs)
            .field("started", &self.started)
            .field("handle", &self.handle.is_some())
            .field("last_exit", &self.last_exit)
            .finish()
    }
}

impl Program {
    pub fn new(command: Vec<String>, timeout_secs: i64) -> Self {
        Self {
            command,
            timeout_secs,
            started: None,
            handle: None,
            last_exit: None,
        }
    }
}

// ============================================================
// Observation
// ============================================================

/// File-specific observation state.
#[derive(Debug, Clone, Default)]
pub struct FileObservation {
    pub size: u64,
    pub inode: Option<u64>,
    pub prev_inode: Option<u64>,
    /// Content-match read cursor, in bytes from file start.
    pub read_pos: u64,
    /// Last computed digest, lowercase hex.
    pub digest: Option<String>,
}

/// Process-specific observation state. Percentages are scaled by 10;
/// `cpu_percent` is `None` until a second sample exists.
#[derive(Debug, Clone, Default)]
pub struct ProcessObservation {
    pub pid: Option<i32>,
    pub prev_pid: Option<i32>,
    pub ppid: Option<i32>,
    pub prev_ppid: Option<i32>,
    pub uptime_secs: i64,
    pub cpu_percent: Option<i64>,
    pub total_cpu_percent: Option<i64>,
    pub mem_percent: i64,
    pub mem_kbyte: i64,
    pub total_mem_percent: i64,
    pub total_mem_kbyte: i64,
    pub children: i64,
    pub status: ProcessStatus,
}

/// Filesystem-specific observation state. Percentages are scaled by 10;
/// zero-denominator percentages are reported as 0.
#[derive(Debug, Clone, Default)]
pub struct FilesystemObservation {
    pub blocks: i64,
    /// Blocks free for unprivileged users.
    pub blocks_free: i64,
    /// Total free blocks (including the reserved portion).
    pub blocks_free_total: i64,
    pub inodes: i64,
    pub inodes_free: i64,
    pub flags: Option<u64>,
    pub prev_flags: Option<u64>,
    pub inode_percent: i64,
    pub space_percent: i64,
    pub inode_used: i64,
    pub space_used: i64,
}

/// Last observed state of a service, refreshed by its checker.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// `max(mtime, ctime)` in epoch seconds.
    pub timestamp: Option<i64>,
    pub file: FileObservation,
    pub process: ProcessObservation,
    pub filesystem: FilesystemObservation,
}

// ============================================================
// Service
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Process,
    File,
    Directory,
    Fifo,
    Filesystem,
    Program,
    RemoteHost,
    System,
}

/// The unit of monitoring: one declared entity plus its rule lists and
/// cross-cycle state. Created at configuration load; mutated only by the
/// scheduler and by its own checker during evaluation.
#[derive(Debug)]
pub struct Service {
    pub name: String,
    pub kind: ServiceType,
    /// Filesystem path, pidfile path or host address, by type.
    pub path: PathBuf,
    pub monitor: Monitor,
    pub every: Every,
    /// Set when a dependency chain already handled this service in the
    /// current cycle.
    pub visited: bool,
    pub pending_action: Option<AdminAction>,
    /// Starts since the restart-rate window opened.
    pub nstart: u32,
    /// Monitoring cycles since the restart-rate window opened.
    pub ncycle: u32,
    /// Event kinds currently in failed state.
    pub errors: EventSet,
    /// Epoch seconds of the last completed evaluation.
    pub collected: Option<i64>,
    pub inf: Observation,
    pub actions: EventActions,

    pub perm: Option<PermRule>,
    pub uid: Option<UidRule>,
    pub gid: Option<GidRule>,
    pub checksum: Option<ChecksumRule>,
    pub sizes: Vec<SizeRule>,
    pub timestamps: Vec<TimestampRule>,
    pub uptimes: Vec<UptimeRule>,
    pub matches: Vec<MatchRule>,
    pub match_ignores: Vec<MatchRule>,
    pub ports: Vec<Port>,
    pub icmps: Vec<Icmp>,
    pub resources: Vec<ResourceRule>,
    pub filesystems: Vec<FilesystemRule>,
    pub statuses: Vec<StatusRule>,
    pub action_rates: Vec<ActionRate>,
    pub program: Option<Program>,
}

impl Service {
    pub fn new(name: impl Into<String>, kind: ServiceType, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
            monitor: Monitor::default(),
            every: Every::default(),
            visited: false,
            pending_action: None,
            nstart: 0,
            ncycle: 0,
            errors: EventSet::default(),
            collected: None,
            inf: Observation::default(),
            actions: EventActions::default(),
            perm: None,
            uid: None,
            gid: None,
            checksum: None,
            sizes: Vec::new(),
            timestamps: Vec::new(),
            uptimes: Vec::new(),
            matches: Vec::new(),
            match_ignores: Vec::new(),
            ports: Vec::new(),
            icmps: Vec::new(),
            resources: Vec::new(),
            filesystems: Vec::new(),
            statuses: Vec::new(),
            action_rates: Vec::new(),
            program: None,
        }
    }

    /// True while monitoring is off.
    pub fn is_unmonitored(&self) -> bool {
        self.monitor.is_empty()
    }
}
