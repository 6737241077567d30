//! Real Linux platform: `/proc` sampling, statvfs, digests, sockets and
//! program execution.
//!
//! The process table is rebuilt once per cycle from `/proc/[pid]/stat`;
//! per-process cpu percentages are deltas against the previous cycle's
//! ticks, so they are `None` on the first cycle after start (and for
//! processes first seen in this cycle).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use sha1::Sha1;
use tracing::{debug, warn};

use super::{
    Conduit, FileKind, FileStat, FilesystemUsage, IcmpOutcome, Platform, ProcessSample,
    ProgramHandle, ReadSeek, SystemInfo,
};
use crate::model::{AdminAction, HashKind, PortTarget, SocketKind};

/// Clock ticks per second (USER_HZ). Standard value for Linux.
const CLK_TCK: i64 = 100;

/// How long the UDP readiness test waits for an ICMP port-unreachable
/// error before assuming the port is open.
const UDP_READY_WAIT: Duration = Duration::from_secs(2);

/// Callback the embedding daemon attaches to receive administrative
/// actions (start/stop/restart/...) for a named service.
pub type ServiceController = Box<dyn FnMut(&str, AdminAction) -> bool>;

#[derive(Debug, Clone, Copy)]
struct ProcEntry {
    ppid: i32,
    zombie: bool,
    total_ticks: u64,
    starttime_ticks: u64,
    rss_kbyte: i64,
    cpu_percent: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
struct CpuTicks {
    user: u64,
    nice: u64,
    system: u64,
    idle: u64,
    iowait: u64,
    irq: u64,
    softirq: u64,
    steal: u64,
}

impl CpuTicks {
    fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// Real platform backed by the Linux `/proc` filesystem and the usual
/// socket/process primitives.
pub struct SystemPlatform {
    proc_path: String,
    page_kbyte: i64,
    table: HashMap<i32, ProcEntry>,
    prev_ticks: HashMap<i32, u64>,
    prev_cpu: Option<CpuTicks>,
    prev_refresh: Option<Instant>,
    uptime_secs: i64,
    mem_total_kbyte: i64,
    controller: Option<ServiceController>,
}

impl SystemPlatform {
    /// Creates a platform reading from `proc_path` (usually "/proc").
    pub fn new(proc_path: impl Into<String>) -> Self {
        Self {
            proc_path: proc_path.into(),
            page_kbyte: 4,
            table: HashMap::new(),
            prev_ticks: HashMap::new(),
            prev_cpu: None,
            prev_refresh: None,
            uptime_secs: 0,
            mem_total_kbyte: 0,
            controller: None,
        }
    }

    /// Attaches the control-surface callback invoked for administrative
    /// actions. Without one, scheduled actions are logged and dropped.
    pub fn with_controller(mut self, controller: ServiceController) -> Self {
        self.controller = Some(controller);
        self
    }

    fn read_proc(&self, rel: &str) -> io::Result<String> {
        fs::read_to_string(format!("{}/{}", self.proc_path, rel))
    }

    fn load_average(&self) -> [f64; 3] {
        let mut loadavg = [0.0; 3];
        if let Ok(content) = self.read_proc("loadavg") {
            for (i, field) in content.split_whitespace().take(3).enumerate() {
                loadavg[i] = field.parse().unwrap_or(0.0);
            }
        }
        loadavg
    }

    fn cpu_ticks(&self) -> Option<CpuTicks> {
        let content = self.read_proc("stat").ok()?;
        let line = content.lines().find(|l| l.starts_with("cpu "))?;
        let mut fields = line.split_whitespace().skip(1);
        let mut next = || fields.next().and_then(|f| f.parse::<u64>().ok());
        Some(CpuTicks {
            user: next()?,
            nice: next()?,
            system: next()?,
            idle: next()?,
            iowait: next().unwrap_or(0),
            irq: next().unwrap_or(0),
            softirq: next().unwrap_or(0),
            steal: next().unwrap_or(0),
        })
    }

    fn meminfo_kbyte(&self) -> HashMap<String, i64> {
        let mut values = HashMap::new();
        if let Ok(content) = self.read_proc("meminfo") {
            for line in content.lines() {
                if let Some((key, rest)) = line.split_once(':') {
                    if let Some(kb) = rest.split_whitespace().next().and_then(|v| v.parse().ok()) {
                        values.insert(key.to_string(), kb);
                    }
                }
            }
        }
        values
    }

    /// Parses one `/proc/[pid]/stat` line. The comm field is
    /// parenthesized and may contain spaces, so fields are taken after
    /// the closing parenthesis.
    fn parse_pid_stat(content: &str) -> Option<(i32, ProcEntry)> {
        let open = content.find('(')?;
        let close = content.rfind(')')?;
        let pid: i32 = content[..open].trim().parse().ok()?;
        let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
        // rest[0] = state, rest[1] = ppid, rest[11] = utime, rest[12] = stime,
        // rest[19] = starttime, rest[21] = rss
        let state = rest.first()?.chars().next()?;
        let ppid: i32 = rest.get(1)?.parse().ok()?;
        let utime: u64 = rest.get(11)?.parse().ok()?;
        let stime: u64 = rest.get(12)?.parse().ok()?;
        let starttime: u64 = rest.get(19)?.parse().ok()?;
        let rss_pages: i64 = rest.get(21)?.parse().ok()?;
        Some((
            pid,
            ProcEntry {
                ppid,
                zombie: state == 'Z',
                total_ticks: utime + stime,
                starttime_ticks: starttime,
                rss_kbyte: 0.max(rss_pages), // scaled to kB by the caller
                cpu_percent: None,
            },
        ))
    }

    fn rebuild_process_table(&mut self, dt: Option<f64>) {
        let mut table = HashMap::new();
        let entries = match fs::read_dir(&self.proc_path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, proc_path = %self.proc_path, "cannot list process table");
                self.table = table;
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path().join("stat")) else {
                // Process exited between readdir and read; not an error.
                continue;
            };
            if let Some((pid, mut proc_entry)) = Self::parse_pid_stat(&content) {
                proc_entry.rss_kbyte *= self.page_kbyte;
                if let (Some(dt), Some(prev)) = (dt, self.prev_ticks.get(&pid)) {
                    if dt > 0.0 {
                        let dticks = proc_entry.total_ticks.saturating_sub(*prev) as f64;
                        let pct10 = dticks / CLK_TCK as f64 / dt * 100.0 * 10.0;
                        proc_entry.cpu_percent = Some(pct10 as i64);
                    }
                }
                table.insert(pid, proc_entry);
            }
        }
        self.prev_ticks = table.iter().map(|(pid, e)| (*pid, e.total_ticks)).collect();
        self.table = table;
    }

    fn subtree(&self, pid: i32) -> Vec<i32> {
        let mut pids = vec![pid];
        let mut stack = vec![pid];
        while let Some(parent) = stack.pop() {
            for (child, entry) in &self.table {
                if entry.ppid == parent {
                    pids.push(*child);
                    stack.push(*child);
                }
            }
        }
        pids
    }
}

impl Platform for SystemPlatform {
    fn refresh(&mut self) -> SystemInfo {
        let now = Instant::now();
        let dt = self.prev_refresh.map(|t| now.duration_since(t).as_secs_f64());

        self.uptime_secs = self
            .read_proc("uptime")
            .ok()
            .and_then(|c| c.split_whitespace().next().map(str::to_string))
            .and_then(|f| f.parse::<f64>().ok())
            .map(|u| u as i64)
            .unwrap_or(0);

        let mem = self.meminfo_kbyte();
        let mem_total = mem.get("MemTotal").copied().unwrap_or(0);
        let mem_avail = mem.get("MemAvailable").copied().unwrap_or(0);
        let swap_total = mem.get("SwapTotal").copied().unwrap_or(0);
        let swap_free = mem.get("SwapFree").copied().unwrap_or(0);
        self.mem_total_kbyte = mem_total;

        let mem_used = (mem_total - mem_avail).max(0);
        let swap_used = (swap_total - swap_free).max(0);

        let cpu = self.cpu_ticks();
        let mut cpu_user = None;
        let mut cpu_system = None;
        let mut cpu_wait = None;
        if let (Some(cur), Some(prev)) = (cpu, self.prev_cpu) {
            let dtotal = cur.total().saturating_sub(prev.total());
            if dtotal > 0 {
                let pct10 = |d: u64| (d * 1000 / dtotal) as i64;
                cpu_user = Some(pct10(
                    (cur.user + cur.nice).saturating_sub(prev.user + prev.nice),
                ));
                cpu_system = Some(pct10(
                    (cur.system + cur.irq + cur.softirq)
                        .saturating_sub(prev.system + prev.irq + prev.softirq),
                ));
                cpu_wait = Some(pct10(cur.iowait.saturating_sub(prev.iowait)));
            }
        }
        self.prev_cpu = cpu;

        self.rebuild_process_table(dt);
        self.prev_refresh = Some(now);

        SystemInfo {
            loadavg: self.load_average(),
            cpu_user_percent: cpu_user,
            cpu_system_percent: cpu_system,
            cpu_wait_percent: cpu_wait,
            mem_percent: if mem_total > 0 {
                mem_used * 1000 / mem_total
            } else {
                0
            },
            mem_kbyte: mem_used,
            swap_percent: if swap_total > 0 {
                swap_used * 1000 / swap_total
            } else {
                0
            },
            swap_kbyte: swap_used,
        }
    }

    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        fs::metadata(path).map(|m| metadata_to_stat(&m, false))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        fs::symlink_metadata(path).map(|m| metadata_to_stat(&m, m.file_type().is_symlink()))
    }

    fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(File::open(path)?))
    }

    fn filesystem_usage(&self, path: &Path) -> io::Result<FilesystemUsage> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
        Ok(FilesystemUsage {
            blocks: stat.blocks() as i64,
            blocks_free: stat.blocks_available() as i64,
            blocks_free_total: stat.blocks_free() as i64,
            inodes: stat.files() as i64,
            inodes_free: stat.files_free() as i64,
            flags: stat.flags().bits() as u64,
        })
    }

    fn checksum(&self, path: &Path, kind: HashKind) -> io::Result<String> {
        let mut file = File::open(path)?;
        match kind {
            HashKind::Md5 => digest_stream::<Md5>(&mut file),
            HashKind::Sha1 => digest_stream::<Sha1>(&mut file),
        }
    }

    fn find_process(&self, pidfile: &Path) -> Option<i32> {
        let content = fs::read_to_string(pidfile).ok()?;
        let pid: i32 = content.trim().parse().ok()?;
        if pid <= 0 {
            return None;
        }
        let alive = Path::new(&format!("{}/{}", self.proc_path, pid)).exists();
        alive.then_some(pid)
    }

    fn process_sample(&self, pid: i32) -> Option<ProcessSample> {
        let entry = self.table.get(&pid)?;
        let children = self
            .table
            .values()
            .filter(|e| e.ppid == pid)
            .count() as i64;

        let mut total_mem_kbyte = 0;
        let mut total_cpu = entry.cpu_percent;
        for member in self.subtree(pid) {
            if let Some(e) = self.table.get(&member) {
                total_mem_kbyte += e.rss_kbyte;
                if member != pid {
                    if let (Some(total), Some(cpu)) = (total_cpu, e.cpu_percent) {
                        total_cpu = Some(total + cpu);
                    }
                }
            }
        }

        let mem_percent = if self.mem_total_kbyte > 0 {
            entry.rss_kbyte * 1000 / self.mem_total_kbyte
        } else {
            0
        };
        let total_mem_percent = if self.mem_total_kbyte > 0 {
            total_mem_kbyte * 1000 / self.mem_total_kbyte
        } else {
            0
        };

        Some(ProcessSample {
            pid,
            ppid: entry.ppid,
            uptime_secs: (self.uptime_secs - entry.starttime_ticks as i64 / CLK_TCK).max(0),
            cpu_percent: entry.cpu_percent,
            total_cpu_percent: total_cpu,
            mem_percent,
            mem_kbyte: entry.rss_kbyte,
            total_mem_percent,
            total_mem_kbyte,
            children,
            zombie: entry.zombie,
        })
    }

    fn icmp_echo(&self, host: &str, timeout: Duration, count: u32) -> IcmpOutcome {
        icmp_echo_v4(host, timeout, count)
    }

    fn connect(&self, target: &PortTarget, timeout: Duration) -> io::Result<Box<dyn Conduit>> {
        match target {
            PortTarget::Inet { host, port, kind } => {
                let addr = resolve(host, *port)?;
                match kind {
                    SocketKind::Tcp => {
                        let stream = TcpStream::connect_timeout(&addr, timeout)?;
                        stream.set_read_timeout(Some(timeout))?;
                        stream.set_write_timeout(Some(timeout))?;
                        Ok(Box::new(TcpConduit { stream }))
                    }
                    SocketKind::Udp => {
                        let socket = UdpSocket::bind("0.0.0.0:0")?;
                        socket.set_read_timeout(Some(timeout))?;
                        socket.set_write_timeout(Some(timeout))?;
                        socket.connect(addr)?;
                        Ok(Box::new(UdpConduit { socket }))
                    }
                }
            }
            PortTarget::Unix { path } => {
                let stream = UnixStream::connect(path)?;
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))?;
                Ok(Box::new(UnixConduit { stream }))
            }
        }
    }

    fn execute(&self, command: &[String]) -> io::Result<Box<dyn ProgramHandle>> {
        let (prog, args) = command
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let child = Command::new(prog)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        Ok(Box::new(SystemProgram { child, exit: None }))
    }

    fn control_service(&mut self, name: &str, action: AdminAction) -> bool {
        match self.controller.as_mut() {
            Some(controller) => controller(name, action),
            None => {
                warn!(service = name, %action, "no control surface attached, action dropped");
                false
            }
        }
    }
}

fn metadata_to_stat(m: &fs::Metadata, is_symlink: bool) -> FileStat {
    let file_type = m.file_type();
    let kind = if is_symlink {
        FileKind::Symlink
    } else if file_type.is_file() {
        FileKind::Regular
    } else if file_type.is_dir() {
        FileKind::Directory
    } else if file_type.is_fifo() {
        FileKind::Fifo
    } else {
        FileKind::Other
    };
    FileStat {
        kind,
        mode: m.mode(),
        uid: m.uid(),
        gid: m.gid(),
        inode: m.ino(),
        size: m.len(),
        mtime: m.mtime(),
        ctime: m.ctime(),
    }
}

fn digest_stream<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("cannot resolve {}", host)))
}

// ============================================================
// Conduits
// ============================================================

struct TcpConduit {
    stream: TcpStream,
}

impl Read for TcpConduit {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl io::Write for TcpConduit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Conduit for TcpConduit {
    fn ready(&mut self) -> io::Result<()> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        poll_rw(self.stream.as_fd().as_raw_fd())
    }

    fn is_datagram(&self) -> bool {
        false
    }
}

struct UdpConduit {
    socket: UdpSocket,
}

impl Read for UdpConduit {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl io::Write for UdpConduit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Conduit for UdpConduit {
    /// Connectionless readiness: send an empty datagram and wait briefly
    /// for an ICMP port-unreachable error. Silence counts as ready.
    fn ready(&mut self) -> io::Result<()> {
        self.socket.send(&[])?;
        let saved = self.socket.read_timeout()?;
        self.socket.set_read_timeout(Some(UDP_READY_WAIT))?;
        let mut buf = [0u8; 16];
        let outcome = match self.socket.recv(&mut buf) {
            Ok(_) => Ok(()),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(())
            }
            Err(e) => Err(e),
        };
        self.socket.set_read_timeout(saved)?;
        outcome
    }

    fn is_datagram(&self) -> bool {
        true
    }
}

struct UnixConduit {
    stream: UnixStream,
}

impl Read for UnixConduit {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl io::Write for UnixConduit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Conduit for UnixConduit {
    fn ready(&mut self) -> io::Result<()> {
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        poll_rw(self.stream.as_fd().as_raw_fd())
    }

    fn is_datagram(&self) -> bool {
        false
    }
}

/// Polls a stream socket for read/write readiness.
fn poll_rw(fd: std::os::fd::RawFd) -> io::Result<()> {
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use std::os::fd::BorrowedFd;

    // The fd stays owned by the calling conduit for the whole call.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN | PollFlags::POLLOUT)];
    let n = poll(&mut fds, PollTimeout::from(500u16)).map_err(io::Error::from)?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "socket not ready for i|o",
        ));
    }
    if let Some(revents) = fds[0].revents() {
        if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "socket reported error condition",
            ));
        }
    }
    Ok(())
}

// ============================================================
// ICMP echo
// ============================================================

/// RFC 1071 internet checksum.
fn inet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum = sum.wrapping_add(word as u32);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn build_echo_request(seq: u16) -> [u8; 24] {
    let mut packet = [0u8; 24];
    packet[0] = 8; // echo request
    packet[6..8].copy_from_slice(&seq.to_be_bytes());
    for (i, byte) in packet.iter_mut().enumerate().skip(8) {
        *byte = i as u8;
    }
    let checksum = inet_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// Unprivileged (datagram) ICMP echo. Requires `net.ipv4.ping_group_range`
/// to cover the daemon's group; EPERM maps to the inconclusive outcome.
fn icmp_echo_v4(host: &str, timeout: Duration, count: u32) -> IcmpOutcome {
    use nix::errno::Errno;
    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::socket::{
        recvfrom, sendto, socket, AddressFamily, MsgFlags, SockFlag, SockProtocol, SockType,
        SockaddrIn,
    };

    let addr = match (host, 0u16).to_socket_addrs() {
        Ok(mut addrs) => addrs.find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            _ => None,
        }),
        Err(_) => None,
    };
    let Some(addr) = addr else {
        debug!(host, "icmp: cannot resolve host to an IPv4 address");
        return IcmpOutcome::Unreachable;
    };

    let fd = match socket(
        AddressFamily::Inet,
        SockType::Datagram,
        SockFlag::empty(),
        SockProtocol::Icmp,
    ) {
        Ok(fd) => fd,
        Err(Errno::EPERM) | Err(Errno::EACCES) => return IcmpOutcome::PermissionDenied,
        Err(e) => {
            debug!(host, error = %e, "icmp: cannot open socket");
            return IcmpOutcome::Unreachable;
        }
    };
    let dest = SockaddrIn::from(addr);

    for seq in 0..count.max(1) as u16 {
        let packet = build_echo_request(seq);
        let started = Instant::now();
        if sendto(fd.as_raw_fd(), &packet, &dest, MsgFlags::empty()).is_err() {
            continue;
        }
        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                break;
            }
            let remaining_ms = (timeout - elapsed).as_millis().min(u16::MAX as u128) as u16;
            let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(remaining_ms)) {
                Ok(n) if n > 0 => {
                    let mut buf = [0u8; 192];
                    if let Ok((n, _)) = recvfrom::<SockaddrIn>(fd.as_raw_fd(), &mut buf) {
                        // Datagram ICMP delivers the ICMP header first;
                        // type 0 is echo reply.
                        if n >= 8 && buf[0] == 0 {
                            let reply_seq = u16::from_be_bytes([buf[6], buf[7]]);
                            if reply_seq == seq {
                                return IcmpOutcome::Response(started.elapsed());
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }
    IcmpOutcome::Unreachable
}

// ============================================================
// Program handle
// ============================================================

struct SystemProgram {
    child: Child,
    exit: Option<i32>,
}

impl SystemProgram {
    fn status_code(status: std::process::ExitStatus) -> i32 {
        use std::os::unix::process::ExitStatusExt;
        status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(-1)
    }
}

impl ProgramHandle for SystemProgram {
    fn exit_status(&mut self) -> Option<i32> {
        if self.exit.is_some() {
            return self.exit;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.exit = Some(Self::status_code(status));
                self.exit
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "cannot query program status");
                None
            }
        }
    }

    fn kill_and_wait(&mut self) -> io::Result<i32> {
        self.child.kill()?;
        let status = self.child.wait()?;
        let code = Self::status_code(status);
        self.exit = Some(code);
        Ok(code)
    }

    fn read_output(&mut self, cap: usize) -> String {
        let mut buf = Vec::with_capacity(cap);
        if let Some(stderr) = self.child.stderr.take() {
            let _ = stderr.take(cap as u64).read_to_end(&mut buf);
        }
        if buf.is_empty() {
            if let Some(stdout) = self.child.stdout.take() {
                let _ = stdout.take(cap as u64).read_to_end(&mut buf);
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn pid(&self) -> i32 {
        self.child.id() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_stat_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"hello").unwrap();

        let platform = SystemPlatform::new("/proc");
        let stat = platform.stat(&path).unwrap();
        assert_eq!(stat.kind, FileKind::Regular);
        assert_eq!(stat.size, 5);
        assert!(stat.timestamp() > 0);
    }

    #[test]
    fn test_checksum_known_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, b"a\n").unwrap();

        let platform = SystemPlatform::new("/proc");
        assert_eq!(
            platform.checksum(&path, HashKind::Md5).unwrap(),
            "60b725f10c9c85c70d97880dfe8191b3"
        );
        assert_eq!(
            platform.checksum(&path, HashKind::Sha1).unwrap(),
            "3f786850e387550fdab836ed7e6dc881de23001b"
        );
    }

    #[test]
    fn test_find_process_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("self.pid");
        let mut f = std::fs::File::create(&pidfile).unwrap();
        writeln!(f, "{}", std::process::id()).unwrap();
        drop(f);

        let platform = SystemPlatform::new("/proc");
        assert_eq!(
            platform.find_process(&pidfile),
            Some(std::process::id() as i32)
        );
    }

    #[test]
    fn test_find_process_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("stale.pid");
        // Pid way above pid_max on any reasonable configuration.
        std::fs::write(&pidfile, "999999999\n").unwrap();

        let platform = SystemPlatform::new("/proc");
        assert_eq!(platform.find_process(&pidfile), None);
    }

    #[test]
    fn test_parse_pid_stat_with_spaces_in_comm() {
        let line = "42 (tmux: server) S 1 42 42 0 -1 4194304 500 0 0 0 7 3 0 0 20 0 1 0 12345 1000000 250 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        let (pid, entry) = SystemPlatform::parse_pid_stat(line).unwrap();
        assert_eq!(pid, 42);
        assert_eq!(entry.ppid, 1);
        assert!(!entry.zombie);
        assert_eq!(entry.total_ticks, 10);
        assert_eq!(entry.starttime_ticks, 12345);
        assert_eq!(entry.rss_kbyte, 250); // pages, caller scales
    }

    #[test]
    fn test_execute_captures_exit_and_output() {
        let platform = SystemPlatform::new("/proc");
        let mut handle = platform
            .execute(&[
                "/bin/sh".to_string(),
                "-c".to_string(),
                "echo out; echo err >&2; exit 3".to_string(),
            ])
            .unwrap();
        // Wait for the short-lived child to finish.
        let mut status = None;
        for _ in 0..100 {
            status = handle.exit_status();
            if status.is_some() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(status, Some(3));
        let output = handle.read_output(crate::model::STATUS_OUTPUT_MAX);
        assert_eq!(output.trim(), "err");
    }

    #[test]
    fn test_inet_checksum_verifies() {
        let packet = build_echo_request(7);
        // Recomputing over a packet that embeds its checksum yields zero.
        assert_eq!(inet_checksum(&packet), 0);
    }
}
