//! TOML service declarations.
//!
//! The file is a list of `[[service]]` tables; each maps onto one
//! `vigil_core::model::Service`. Parsing is strict: unknown service
//! types, bad operators, bad cron masks and uncompilable patterns abort
//! startup with a typed error instead of being carried into the cycle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use vigil_core::model::{
    ActionKind, ActionRate, ChecksumRule, CronMask, Every, FilesystemRule, FsResource, GidRule,
    HashKind, Icmp, MatchRule, Pattern, PermRule, Port, PortTarget, Program, ResourceId,
    ResourceRule, Service, ServiceType, SizeRule, SocketKind, StatusRule, TimestampRule, UidRule,
    UptimeRule,
};
use vigil_core::platform::DefaultProtocol;
use vigil_core::predicate::Operator;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("service '{service}': {reason}")]
    Invalid { service: String, reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default, rename = "service")]
    pub services: Vec<RawService>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawService {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RawServiceType,
    /// Filesystem path, pidfile or host address, depending on the type.
    pub path: String,
    #[serde(default)]
    pub every: Option<RawEvery>,
    #[serde(default)]
    pub permission: Option<RawPermission>,
    #[serde(default)]
    pub owner: Option<RawOwner>,
    #[serde(default)]
    pub checksum: Option<RawChecksum>,
    #[serde(default, rename = "size")]
    pub sizes: Vec<RawSize>,
    #[serde(default, rename = "timestamp")]
    pub timestamps: Vec<RawTimestamp>,
    #[serde(default, rename = "uptime")]
    pub uptimes: Vec<RawUptime>,
    #[serde(default, rename = "match")]
    pub matches: Vec<RawMatch>,
    #[serde(default, rename = "match_ignore")]
    pub match_ignores: Vec<RawMatch>,
    #[serde(default, rename = "port")]
    pub ports: Vec<RawPort>,
    #[serde(default, rename = "icmp")]
    pub icmps: Vec<RawIcmp>,
    #[serde(default, rename = "resource")]
    pub resources: Vec<RawResource>,
    #[serde(default, rename = "filesystem")]
    pub filesystems: Vec<RawFilesystem>,
    #[serde(default, rename = "status")]
    pub statuses: Vec<RawStatus>,
    #[serde(default, rename = "action_rate")]
    pub action_rates: Vec<RawActionRate>,
    #[serde(default)]
    pub program: Option<RawProgram>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawServiceType {
    Process,
    File,
    Directory,
    Fifo,
    Filesystem,
    Program,
    RemoteHost,
    System,
}

impl From<RawServiceType> for ServiceType {
    fn from(raw: RawServiceType) -> Self {
        match raw {
            RawServiceType::Process => ServiceType::Process,
            RawServiceType::File => ServiceType::File,
            RawServiceType::Directory => ServiceType::Directory,
            RawServiceType::Fifo => ServiceType::Fifo,
            RawServiceType::Filesystem => ServiceType::Filesystem,
            RawServiceType::Program => ServiceType::Program,
            RawServiceType::RemoteHost => ServiceType::RemoteHost,
            RawServiceType::System => ServiceType::System,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEvery {
    pub cycles: Option<u32>,
    pub cron: Option<String>,
    pub not_cron: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPermission {
    /// Octal string, e.g. "0644".
    pub mode: String,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawOwner {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawChecksum {
    pub algorithm: RawHash,
    pub expected: Option<String>,
    #[serde(default)]
    pub test_changes: bool,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawHash {
    Md5,
    Sha1,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSize {
    pub operator: Option<String>,
    pub bytes: Option<u64>,
    #[serde(default)]
    pub test_changes: bool,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTimestamp {
    pub operator: Option<String>,
    pub seconds: Option<i64>,
    #[serde(default)]
    pub test_changes: bool,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawUptime {
    pub operator: String,
    pub seconds: i64,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawMatch {
    pub pattern: String,
    #[serde(default)]
    pub not: bool,
    /// Plain substring containment instead of a regex.
    #[serde(default)]
    pub fixed: bool,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPort {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// "tcp" or "udp"; tcp when omitted.
    pub protocol: Option<String>,
    /// Unix socket path, mutually exclusive with host/port.
    pub socket: Option<PathBuf>,
    #[serde(default = "default_port_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default)]
    pub action: Option<RawAction>,
}

fn default_port_timeout() -> u64 {
    5
}

fn default_retry() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawIcmp {
    #[serde(default = "default_icmp_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_icmp_count")]
    pub count: u32,
    #[serde(default)]
    pub action: Option<RawAction>,
}

fn default_icmp_timeout() -> u64 {
    5
}

fn default_icmp_count() -> u32 {
    3
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawResource {
    pub resource: RawResourceId,
    pub operator: String,
    pub limit: f64,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawResourceId {
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

impl RawResourceId {
    fn to_model(self) -> ResourceId {
        match self {
            RawResourceId::CpuPercent => ResourceId::CpuPercent,
            RawResourceId::TotalCpuPercent => ResourceId::TotalCpuPercent,
            RawResourceId::CpuUser => ResourceId::CpuUser,
            RawResourceId::CpuSystem => ResourceId::CpuSystem,
            RawResourceId::CpuWait => ResourceId::CpuWait,
            RawResourceId::MemPercent => ResourceId::MemPercent,
            RawResourceId::MemKbyte => ResourceId::MemKbyte,
            RawResourceId::SwapPercent => ResourceId::SwapPercent,
            RawResourceId::SwapKbyte => ResourceId::SwapKbyte,
            RawResourceId::LoadAvg1 => ResourceId::LoadAvg1,
            RawResourceId::LoadAvg5 => ResourceId::LoadAvg5,
            RawResourceId::LoadAvg15 => ResourceId::LoadAvg15,
            RawResourceId::Children => ResourceId::Children,
            RawResourceId::TotalMemKbyte => ResourceId::TotalMemKbyte,
            RawResourceId::TotalMemPercent => ResourceId::TotalMemPercent,
        }
    }

    /// Percent and load-average limits are compared in the ×10 scaled
    /// integer space.
    fn is_scaled(self) -> bool {
        matches!(
            self,
            RawResourceId::CpuPercent
                | RawResourceId::TotalCpuPercent
                | RawResourceId::CpuUser
                | RawResourceId::CpuSystem
                | RawResourceId::CpuWait
                | RawResourceId::MemPercent
                | RawResourceId::SwapPercent
                | RawResourceId::LoadAvg1
                | RawResourceId::LoadAvg5
                | RawResourceId::LoadAvg15
                | RawResourceId::TotalMemPercent
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawFilesystem {
    pub resource: RawFsResource,
    pub operator: String,
    pub percent: Option<f64>,
    pub absolute: Option<i64>,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawFsResource {
    Inode,
    Space,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStatus {
    pub operator: String,
    pub value: i64,
    #[serde(default)]
    pub action: Option<RawAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawActionRate {
    pub count: u32,
    pub cycles: u32,
    pub action: RawAction,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawProgram {
    pub command: Vec<String>,
    #[serde(default = "default_program_timeout")]
    pub timeout_secs: i64,
}

fn default_program_timeout() -> i64 {
    300
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawAction {
    Ignore,
    Alert,
    Restart,
    Stop,
    Exec,
    Unmonitor,
    Start,
    Monitor,
}

impl From<RawAction> for ActionKind {
    fn from(raw: RawAction) -> Self {
        match raw {
            RawAction::Ignore => ActionKind::Ignore,
            RawAction::Alert => ActionKind::Alert,
            RawAction::Restart => ActionKind::Restart,
            RawAction::Stop => ActionKind::Stop,
            RawAction::Exec => ActionKind::Exec,
            RawAction::Unmonitor => ActionKind::Unmonitor,
            RawAction::Start => ActionKind::Start,
            RawAction::Monitor => ActionKind::Monitor,
        }
    }
}

fn action(raw: &Option<RawAction>) -> ActionKind {
    raw.map(ActionKind::from).unwrap_or(ActionKind::Alert)
}

/// Loads and converts the config file into services ready for the
/// validator.
pub fn load(path: &Path) -> Result<Vec<Service>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.services.into_iter().map(convert).collect()
}

fn invalid(service: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        service: service.to_string(),
        reason: reason.into(),
    }
}

fn parse_operator(service: &str, op: &str) -> Result<Operator, ConfigError> {
    op.parse().map_err(|e: String| invalid(service, e))
}

fn compile_pattern(service: &str, raw: &RawMatch) -> Result<MatchRule, ConfigError> {
    let pattern = if raw.fixed {
        Pattern::Substring(raw.pattern.clone())
    } else {
        let regex = regex::Regex::new(&raw.pattern)
            .map_err(|e| invalid(service, format!("bad pattern '{}': {}", raw.pattern, e)))?;
        Pattern::Regex(regex)
    };
    Ok(MatchRule {
        pattern,
        not: raw.not,
        action: action(&raw.action),
    })
}

fn convert(raw: RawService) -> Result<Service, ConfigError> {
    let name = raw.name.clone();
    let mut service = Service::new(raw.name, ServiceType::from(raw.kind), &raw.path);

    if let Some(every) = raw.every {
        service.every = match (every.cycles, every.cron, every.not_cron) {
            (Some(number), None, None) => {
                if number < 2 {
                    return Err(invalid(&name, "every.cycles must be at least 2"));
                }
                Every::SkipCycles { number, counter: 0 }
            }
            (None, Some(spec), None) => {
                Every::Cron(CronMask::parse(&spec).map_err(|e| invalid(&name, e))?)
            }
            (None, None, Some(spec)) => {
                Every::NotInCron(CronMask::parse(&spec).map_err(|e| invalid(&name, e))?)
            }
            (None, None, None) => Every::Cycle,
            _ => {
                return Err(invalid(
                    &name,
                    "every takes exactly one of cycles, cron or not_cron",
                ))
            }
        };
    }

    if let Some(perm) = raw.permission {
        let mode = u32::from_str_radix(perm.mode.trim_start_matches("0o"), 8)
            .map_err(|_| invalid(&name, format!("bad permission mode '{}'", perm.mode)))?;
        service.perm = Some(PermRule {
            expected: mode & 0o7777,
            action: action(&perm.action),
        });
    }

    if let Some(owner) = raw.owner {
        if owner.uid.is_none() && owner.gid.is_none() {
            return Err(invalid(&name, "owner needs a uid or a gid"));
        }
        if let Some(uid) = owner.uid {
            service.uid = Some(UidRule {
                expected: uid,
                action: action(&owner.action),
            });
        }
        if let Some(gid) = owner.gid {
            service.gid = Some(GidRule {
                expected: gid,
                action: action(&owner.action),
            });
        }
    }

    if let Some(checksum) = raw.checksum {
        let kind = match checksum.algorithm {
            RawHash::Md5 => HashKind::Md5,
            RawHash::Sha1 => HashKind::Sha1,
        };
        if let Some(expected) = &checksum.expected {
            if expected.len() != kind.hex_len() {
                return Err(invalid(
                    &name,
                    format!(
                        "expected checksum must be {} hex chars",
                        kind.hex_len()
                    ),
                ));
            }
        }
        service.checksum = Some(ChecksumRule {
            kind,
            expected: checksum.expected.map(|s| s.to_lowercase()),
            test_changes: checksum.test_changes,
            action: action(&checksum.action),
        });
    }

    for size in &raw.sizes {
        let rule = if size.test_changes {
            SizeRule {
                operator: Operator::NotEqual,
                limit: 0,
                test_changes: true,
                last: None,
                action: action(&size.action),
            }
        } else {
            let (Some(op), Some(bytes)) = (&size.operator, size.bytes) else {
                return Err(invalid(&name, "size rule needs operator and bytes"));
            };
            SizeRule {
                operator: parse_operator(&name, op)?,
                limit: bytes,
                test_changes: false,
                last: None,
                action: action(&size.action),
            }
        };
        service.sizes.push(rule);
    }

    for ts in &raw.timestamps {
        let rule = if ts.test_changes {
            TimestampRule {
                operator: Operator::NotEqual,
                limit_secs: 0,
                test_changes: true,
                last: None,
                action: action(&ts.action),
            }
        } else {
            let (Some(op), Some(seconds)) = (&ts.operator, ts.seconds) else {
                return Err(invalid(&name, "timestamp rule needs operator and seconds"));
            };
            TimestampRule {
                operator: parse_operator(&name, op)?,
                limit_secs: seconds,
                test_changes: false,
                last: None,
                action: action(&ts.action),
            }
        };
        service.timestamps.push(rule);
    }

    for uptime in &raw.uptimes {
        service.uptimes.push(UptimeRule {
            operator: parse_operator(&name, &uptime.operator)?,
            limit_secs: uptime.seconds,
            action: action(&uptime.action),
        });
    }

    for m in &raw.matches {
        service.matches.push(compile_pattern(&name, m)?);
    }
    for m in &raw.match_ignores {
        service.match_ignores.push(compile_pattern(&name, m)?);
    }

    for port in &raw.ports {
        let target = match (&port.socket, &port.host, port.port) {
            (Some(path), None, None) => PortTarget::Unix { path: path.clone() },
            (None, Some(host), Some(number)) => {
                let kind = match port.protocol.as_deref() {
                    None | Some("tcp") => SocketKind::Tcp,
                    Some("udp") => SocketKind::Udp,
                    Some(other) => {
                        return Err(invalid(&name, format!("unknown protocol '{}'", other)))
                    }
                };
                PortTarget::Inet {
                    host: host.clone(),
                    port: number,
                    kind,
                }
            }
            _ => {
                return Err(invalid(
                    &name,
                    "port needs either socket, or host and port",
                ))
            }
        };
        service.ports.push(Port {
            target,
            timeout: Duration::from_secs(port.timeout_secs),
            retry: port.retry.max(1),
            protocol: Box::new(DefaultProtocol),
            action: action(&port.action),
            response: None,
            is_available: false,
        });
    }

    for icmp in &raw.icmps {
        service.icmps.push(Icmp {
            timeout: Duration::from_secs(icmp.timeout_secs),
            count: icmp.count.max(1),
            action: action(&icmp.action),
            response: None,
            is_available: false,
        });
    }

    for resource in &raw.resources {
        let limit = if resource.resource.is_scaled() {
            (resource.limit * 10.0) as i64
        } else {
            resource.limit as i64
        };
        service.resources.push(ResourceRule {
            resource: resource.resource.to_model(),
            operator: parse_operator(&name, &resource.operator)?,
            limit,
            action: action(&resource.action),
        });
    }

    for fs in &raw.filesystems {
        if fs.percent.is_some() == fs.absolute.is_some() {
            return Err(invalid(
                &name,
                "filesystem rule needs exactly one of percent or absolute",
            ));
        }
        service.filesystems.push(FilesystemRule {
            resource: match fs.resource {
                RawFsResource::Inode => FsResource::Inode,
                RawFsResource::Space => FsResource::Space,
            },
            operator: parse_operator(&name, &fs.operator)?,
            limit_percent: fs.percent.map(|p| (p * 10.0) as i64),
            limit_absolute: fs.absolute,
            action: action(&fs.action),
        });
    }

    for status in &raw.statuses {
        service.statuses.push(StatusRule {
            operator: parse_operator(&name, &status.operator)?,
            exit_value: status.value,
            action: action(&status.action),
        });
    }

    for rate in &raw.action_rates {
        service.action_rates.push(ActionRate {
            count: rate.count,
            cycles: rate.cycles,
            action: rate.action.into(),
        });
    }

    if let Some(program) = raw.program {
        if program.command.is_empty() {
            return Err(invalid(&name, "program command must not be empty"));
        }
        service.program = Some(Program::new(program.command, program.timeout_secs));
    } else if service.kind == ServiceType::Program {
        return Err(invalid(&name, "program service needs a [service.program]"));
    }

    Ok(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load_str(content: &str) -> Result<Vec<Service>, ConfigError> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        load(file.path())
    }

    #[test]
    fn test_minimal_process_service() {
        let services = load_str(
            r#"
            [[service]]
            name = "nginx"
            type = "process"
            path = "/run/nginx.pid"
            "#,
        )
        .unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name, "nginx");
        assert_eq!(services[0].kind, ServiceType::Process);
    }

    #[test]
    fn test_full_file_service() {
        let services = load_str(
            r#"
            [[service]]
            name = "syslog"
            type = "file"
            path = "/var/log/syslog"
            every = { cycles = 2 }

            [service.permission]
            mode = "0640"
            action = "alert"

            [service.owner]
            uid = 0
            gid = 4

            [service.checksum]
            algorithm = "sha1"
            test_changes = true

            [[service.size]]
            operator = ">"
            bytes = 1073741824
            action = "exec"

            [[service.timestamp]]
            test_changes = true

            [[service.match]]
            pattern = "panic"

            [[service.match_ignore]]
            pattern = "debug"
            fixed = true
            "#,
        )
        .unwrap();
        let s = &services[0];
        assert_eq!(s.perm.as_ref().unwrap().expected, 0o640);
        assert_eq!(s.uid.as_ref().unwrap().expected, 0);
        assert_eq!(s.gid.as_ref().unwrap().expected, 4);
        assert!(s.checksum.as_ref().unwrap().test_changes);
        assert_eq!(s.sizes.len(), 1);
        assert_eq!(s.sizes[0].action, ActionKind::Exec);
        assert!(s.timestamps[0].test_changes);
        assert_eq!(s.matches.len(), 1);
        assert_eq!(s.match_ignores.len(), 1);
        assert!(matches!(s.every, Every::SkipCycles { number: 2, .. }));
    }

    #[test]
    fn test_resource_limits_scaled_by_family() {
        let services = load_str(
            r#"
            [[service]]
            name = "host"
            type = "system"
            path = "localhost"

            [[service.resource]]
            resource = "cpu_user"
            operator = ">"
            limit = 90.0

            [[service.resource]]
            resource = "mem_kbyte"
            operator = ">"
            limit = 1048576
            "#,
        )
        .unwrap();
        let s = &services[0];
        assert_eq!(s.resources[0].limit, 900);
        assert_eq!(s.resources[1].limit, 1048576);
    }

    #[test]
    fn test_remote_host_with_ports_and_icmp() {
        let services = load_str(
            r#"
            [[service]]
            name = "mirror"
            type = "remote_host"
            path = "mirror.example.net"

            [[service.icmp]]
            timeout_secs = 3
            count = 2

            [[service.port]]
            host = "mirror.example.net"
            port = 443
            retry = 3

            [[service.port]]
            socket = "/run/proxy.sock"
            "#,
        )
        .unwrap();
        let s = &services[0];
        assert_eq!(s.icmps.len(), 1);
        assert_eq!(s.ports.len(), 2);
        assert_eq!(s.ports[0].retry, 3);
        assert!(matches!(s.ports[1].target, PortTarget::Unix { .. }));
    }

    #[test]
    fn test_program_service_requires_command() {
        let err = load_str(
            r#"
            [[service]]
            name = "check"
            type = "program"
            path = "/usr/local/bin/check.sh"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let services = load_str(
            r#"
            [[service]]
            name = "check"
            type = "program"
            path = "/usr/local/bin/check.sh"

            [service.program]
            command = ["/usr/local/bin/check.sh", "--fast"]
            timeout_secs = 60

            [[service.status]]
            operator = "!="
            value = 0
            action = "restart"
            "#,
        )
        .unwrap();
        let program = services[0].program.as_ref().unwrap();
        assert_eq!(program.timeout_secs, 60);
        assert_eq!(services[0].statuses[0].action, ActionKind::Restart);
    }

    #[test]
    fn test_bad_operator_rejected() {
        let err = load_str(
            r#"
            [[service]]
            name = "f"
            type = "file"
            path = "/tmp/x"

            [[service.size]]
            operator = "~"
            bytes = 10
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown operator"));
    }

    #[test]
    fn test_bad_regex_rejected() {
        let err = load_str(
            r#"
            [[service]]
            name = "f"
            type = "file"
            path = "/tmp/x"

            [[service.match]]
            pattern = "[unclosed"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad pattern"));
    }

    #[test]
    fn test_filesystem_rule_exactly_one_limit() {
        let err = load_str(
            r#"
            [[service]]
            name = "data"
            type = "filesystem"
            path = "/data"

            [[service.filesystem]]
            resource = "space"
            operator = ">"
            percent = 80.0
            absolute = 1000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_bad_cron_rejected() {
        let err = load_str(
            r#"
            [[service]]
            name = "f"
            type = "file"
            path = "/tmp/x"
            every = { cron = "bogus" }
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("invalid cron spec"));
    }
}
