//! In-memory platform double for testing the validation engine without a
//! real host: files, processes, filesystems, probe outcomes and program
//! runs are all scripted.
//!
//! Scripted queues (connections, programs, pings) are popped in call
//! order; when a queue runs dry the mock answers with the conservative
//! default (refused / unreachable / unsupported).

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use md5::{Digest, Md5};
use sha1::Sha1;

use super::{
    Conduit, FileKind, FileStat, FilesystemUsage, IcmpOutcome, Platform, ProcessSample,
    ProgramHandle, ReadSeek, SystemInfo,
};
use crate::model::{AdminAction, HashKind, PortTarget};

#[derive(Debug, Clone)]
struct MockEntry {
    kind: FileKind,
    perm: u32,
    uid: u32,
    gid: u32,
    inode: u64,
    mtime: i64,
    ctime: i64,
    content: Vec<u8>,
}

impl MockEntry {
    fn to_stat(&self) -> FileStat {
        let type_bits = match self.kind {
            FileKind::Regular => 0o100000,
            FileKind::Directory => 0o040000,
            FileKind::Fifo => 0o010000,
            FileKind::Symlink => 0o120000,
            FileKind::Other => 0,
        };
        FileStat {
            kind: self.kind,
            mode: type_bits | self.perm,
            uid: self.uid,
            gid: self.gid,
            inode: self.inode,
            size: self.content.len() as u64,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }
}

/// One scripted answer for `connect()`.
#[derive(Debug, Clone)]
pub struct ConnectScript {
    /// Refuse the connection outright.
    pub refuse: bool,
    /// Whether the readiness poll succeeds.
    pub ready: bool,
    pub datagram: bool,
    /// Bytes the far end serves to the protocol test.
    pub data: Vec<u8>,
}

impl ConnectScript {
    pub fn ok() -> Self {
        Self {
            refuse: false,
            ready: true,
            datagram: false,
            data: Vec::new(),
        }
    }

    pub fn refused() -> Self {
        Self {
            refuse: true,
            ready: false,
            datagram: false,
            data: Vec::new(),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            refuse: false,
            ready: false,
            datagram: false,
            data: Vec::new(),
        }
    }

    pub fn serving(data: impl Into<Vec<u8>>) -> Self {
        Self {
            refuse: false,
            ready: true,
            datagram: false,
            data: data.into(),
        }
    }

    pub fn datagram(mut self) -> Self {
        self.datagram = true;
        self
    }
}

/// One scripted answer for `execute()`.
#[derive(Debug, Clone)]
pub struct ExecScript {
    /// Fail the spawn itself.
    pub spawn_fail: bool,
    /// How many `exit_status()` polls report "still running" first.
    pub running_polls: u32,
    pub exit: i32,
    pub output: String,
    pub pid: i32,
}

impl ExecScript {
    pub fn exits(exit: i32, output: impl Into<String>) -> Self {
        Self {
            spawn_fail: false,
            running_polls: 0,
            exit,
            output: output.into(),
            pid: 4242,
        }
    }

    pub fn running() -> Self {
        Self {
            spawn_fail: false,
            running_polls: u32::MAX,
            exit: 0,
            output: String::new(),
            pid: 4242,
        }
    }

    pub fn spawn_failure() -> Self {
        Self {
            spawn_fail: true,
            running_polls: 0,
            exit: -1,
            output: String::new(),
            pid: -1,
        }
    }
}

/// Scriptable in-memory platform.
#[derive(Default)]
pub struct MockPlatform {
    now: Cell<i64>,
    next_inode: Cell<u64>,
    entries: HashMap<PathBuf, MockEntry>,
    symlinks: HashMap<PathBuf, PathBuf>,
    filesystems: HashMap<PathBuf, FilesystemUsage>,
    checksum_failures: Vec<PathBuf>,
    pidfiles: HashMap<PathBuf, i32>,
    processes: HashMap<i32, ProcessSample>,
    system: SystemInfo,
    icmp_script: RefCell<VecDeque<IcmpOutcome>>,
    connect_script: RefCell<VecDeque<ConnectScript>>,
    exec_script: RefCell<VecDeque<ExecScript>>,
    /// Administrative actions received through `control_service`.
    pub control_log: Vec<(String, AdminAction)>,
    pub refresh_count: u32,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            now: Cell::new(1_700_000_000),
            next_inode: Cell::new(100),
            ..Self::default()
        }
    }

    // ---------------------------------------------------------------
    // Clock
    // ---------------------------------------------------------------

    pub fn set_now(&mut self, epoch: i64) {
        self.now.set(epoch);
    }

    pub fn advance(&mut self, secs: i64) {
        self.now.set(self.now.get() + secs);
    }

    // ---------------------------------------------------------------
    // Filesystem scripting
    // ---------------------------------------------------------------

    fn alloc_inode(&self) -> u64 {
        let inode = self.next_inode.get();
        self.next_inode.set(inode + 1);
        inode
    }

    fn insert(&mut self, path: impl AsRef<Path>, kind: FileKind, content: Vec<u8>) {
        let now = self.now.get();
        let entry = MockEntry {
            kind,
            perm: match kind {
                FileKind::Directory => 0o755,
                _ => 0o644,
            },
            uid: 0,
            gid: 0,
            inode: self.alloc_inode(),
            mtime: now,
            ctime: now,
            content,
        };
        self.entries.insert(path.as_ref().to_path_buf(), entry);
    }

    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.insert(path, FileKind::Regular, content.into());
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        self.insert(path, FileKind::Directory, Vec::new());
    }

    pub fn add_fifo(&mut self, path: impl AsRef<Path>) {
        self.insert(path, FileKind::Fifo, Vec::new());
    }

    pub fn add_symlink(&mut self, link: impl AsRef<Path>, target: impl AsRef<Path>) {
        self.symlinks
            .insert(link.as_ref().to_path_buf(), target.as_ref().to_path_buf());
    }

    /// Appends to an existing file in place: same inode, new mtime.
    pub fn append_file(&mut self, path: impl AsRef<Path>, content: impl AsRef<[u8]>) {
        let now = self.now.get();
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.content.extend_from_slice(content.as_ref());
            entry.mtime = now;
        }
    }

    /// Replaces a file the way log rotation does: fresh inode, fresh
    /// content.
    pub fn replace_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let inode = self.alloc_inode();
        let now = self.now.get();
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.content = content.into();
            entry.inode = inode;
            entry.mtime = now;
            entry.ctime = now;
        }
    }

    /// Truncates a file in place: same inode, shorter content.
    pub fn truncate_file(&mut self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        let now = self.now.get();
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.content = content.into();
            entry.mtime = now;
        }
    }

    pub fn remove(&mut self, path: impl AsRef<Path>) {
        self.entries.remove(path.as_ref());
        self.symlinks.remove(path.as_ref());
    }

    pub fn set_perm(&mut self, path: impl AsRef<Path>, perm: u32) {
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.perm = perm;
        }
    }

    pub fn set_owner(&mut self, path: impl AsRef<Path>, uid: u32, gid: u32) {
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.uid = uid;
            entry.gid = gid;
        }
    }

    pub fn set_times(&mut self, path: impl AsRef<Path>, mtime: i64, ctime: i64) {
        if let Some(entry) = self.entries.get_mut(path.as_ref()) {
            entry.mtime = mtime;
            entry.ctime = ctime;
        }
    }

    pub fn fail_checksum(&mut self, path: impl AsRef<Path>) {
        self.checksum_failures.push(path.as_ref().to_path_buf());
    }

    pub fn add_filesystem(&mut self, path: impl AsRef<Path>, usage: FilesystemUsage) {
        self.filesystems
            .insert(path.as_ref().to_path_buf(), usage);
    }

    // ---------------------------------------------------------------
    // Process scripting
    // ---------------------------------------------------------------

    pub fn add_process(&mut self, sample: ProcessSample) {
        self.processes.insert(sample.pid, sample);
    }

    pub fn remove_process(&mut self, pid: i32) {
        self.processes.remove(&pid);
    }

    pub fn set_pidfile(&mut self, path: impl AsRef<Path>, pid: i32) {
        self.pidfiles.insert(path.as_ref().to_path_buf(), pid);
    }

    pub fn set_system(&mut self, system: SystemInfo) {
        self.system = system;
    }

    // ---------------------------------------------------------------
    // Probe / program scripting
    // ---------------------------------------------------------------

    pub fn script_icmp(&mut self, outcomes: impl IntoIterator<Item = IcmpOutcome>) {
        self.icmp_script.borrow_mut().extend(outcomes);
    }

    pub fn script_connect(&mut self, scripts: impl IntoIterator<Item = ConnectScript>) {
        self.connect_script.borrow_mut().extend(scripts);
    }

    pub fn script_exec(&mut self, scripts: impl IntoIterator<Item = ExecScript>) {
        self.exec_script.borrow_mut().extend(scripts);
    }

    fn lookup(&self, path: &Path) -> io::Result<&MockEntry> {
        let resolved = self.symlinks.get(path).map(PathBuf::as_path).unwrap_or(path);
        self.entries
            .get(resolved)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file or directory"))
    }
}

impl Platform for MockPlatform {
    fn refresh(&mut self) -> SystemInfo {
        self.refresh_count += 1;
        self.system
    }

    fn now(&self) -> i64 {
        self.now.get()
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        self.lookup(path).map(MockEntry::to_stat)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileStat> {
        if let Some(target) = self.symlinks.get(path) {
            // Report the link itself; size/ownership come from the target
            // for simplicity.
            let mut stat = self.lookup(target)?.to_stat();
            stat.kind = FileKind::Symlink;
            return Ok(stat);
        }
        self.lookup(path).map(MockEntry::to_stat)
    }

    fn realpath(&self, path: &Path) -> io::Result<PathBuf> {
        match self.symlinks.get(path) {
            Some(target) => Ok(target.clone()),
            None if self.entries.contains_key(path) => Ok(path.to_path_buf()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "dangling link")),
        }
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn ReadSeek>> {
        let entry = self.lookup(path)?;
        Ok(Box::new(Cursor::new(entry.content.clone())))
    }

    fn filesystem_usage(&self, path: &Path) -> io::Result<FilesystemUsage> {
        self.filesystems
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "not a mount point"))
    }

    fn checksum(&self, path: &Path, kind: HashKind) -> io::Result<String> {
        if self.checksum_failures.iter().any(|p| p == path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "scripted"));
        }
        let entry = self.lookup(path)?;
        Ok(match kind {
            HashKind::Md5 => hex::encode(Md5::digest(&entry.content)),
            HashKind::Sha1 => hex::encode(Sha1::digest(&entry.content)),
        })
    }

    fn find_process(&self, pidfile: &Path) -> Option<i32> {
        let pid = *self.pidfiles.get(pidfile)?;
        self.processes.contains_key(&pid).then_some(pid)
    }

    fn process_sample(&self, pid: i32) -> Option<ProcessSample> {
        self.processes.get(&pid).copied()
    }

    fn icmp_echo(&self, _host: &str, _timeout: Duration, _count: u32) -> IcmpOutcome {
        self.icmp_script
            .borrow_mut()
            .pop_front()
            .unwrap_or(IcmpOutcome::Unreachable)
    }

    fn connect(&self, _target: &PortTarget, _timeout: Duration) -> io::Result<Box<dyn Conduit>> {
        let script = self
            .connect_script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(ConnectScript::refused);
        if script.refuse {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        Ok(Box::new(MockConduit {
            data: Cursor::new(script.data),
            written: Vec::new(),
            ready: script.ready,
            datagram: script.datagram,
        }))
    }

    fn execute(&self, _command: &[String]) -> io::Result<Box<dyn ProgramHandle>> {
        let script = self
            .exec_script
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Unsupported, "no scripted program"))?;
        if script.spawn_fail {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file or directory",
            ));
        }
        Ok(Box::new(MockProgram {
            script,
            polls: 0,
            killed: false,
        }))
    }

    fn control_service(&mut self, name: &str, action: AdminAction) -> bool {
        self.control_log.push((name.to_string(), action));
        true
    }
}

/// Conduit served by a [`ConnectScript`].
pub struct MockConduit {
    data: Cursor<Vec<u8>>,
    pub written: Vec<u8>,
    ready: bool,
    datagram: bool,
}

impl Read for MockConduit {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.data.read(buf)
    }
}

impl Write for MockConduit {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Conduit for MockConduit {
    fn ready(&mut self) -> io::Result<()> {
        if self.ready {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "socket not ready for i|o",
            ))
        }
    }

    fn is_datagram(&self) -> bool {
        self.datagram
    }
}

struct MockProgram {
    script: ExecScript,
    polls: u32,
    killed: bool,
}

impl ProgramHandle for MockProgram {
    fn exit_status(&mut self) -> Option<i32> {
        if self.killed {
            return Some(self.script.exit);
        }
        if self.polls < self.script.running_polls {
            self.polls += 1;
            return None;
        }
        Some(self.script.exit)
    }

    fn kill_and_wait(&mut self) -> io::Result<i32> {
        self.killed = true;
        Ok(self.script.exit)
    }

    fn read_output(&mut self, cap: usize) -> String {
        let mut out = self.script.output.clone();
        out.truncate(cap);
        out
    }

    fn pid(&self) -> i32 {
        self.script.pid
    }
}
