//! Filesystem service checker: existence (through symlinks), usage
//! statistics, mount-flag changes and inode/space resource rules.

use tracing::{debug, error};

use crate::event::{EventKind, EventSink, EventState};
use crate::model::{FsResource, Service};
use crate::platform::{FileKind, Platform};

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_filesystem(&mut self, service: &mut Service) -> bool {
        let mut path = service.path.clone();

        // A symlink is resolved first so the mount point can be found.
        let stat = match self.platform.lstat(&path) {
            Ok(stat) => stat,
            Err(_) => {
                let action = service.actions.nonexist;
                self.post(
                    service,
                    EventKind::Nonexist,
                    EventState::Failed,
                    action,
                    "filesystem doesn't exist".to_string(),
                );
                return false;
            }
        };
        let stat = if stat.kind == FileKind::Symlink {
            let resolved = match self.platform.realpath(&path) {
                Ok(resolved) => resolved,
                Err(e) => {
                    let action = service.actions.nonexist;
                    let message = format!("filesystem symbolic link error -- {}", e);
                    self.post(service, EventKind::Nonexist, EventState::Failed, action, message);
                    return false;
                }
            };
            let action = service.actions.nonexist;
            let message = format!(
                "filesystem symbolic link {} -> {}",
                path.display(),
                resolved.display()
            );
            self.post(
                service,
                EventKind::Nonexist,
                EventState::Succeeded,
                action,
                message,
            );
            path = resolved;
            match self.platform.stat(&path) {
                Ok(stat) => stat,
                Err(_) => {
                    let action = service.actions.nonexist;
                    self.post(
                        service,
                        EventKind::Nonexist,
                        EventState::Failed,
                        action,
                        "filesystem doesn't exist".to_string(),
                    );
                    return false;
                }
            }
        } else {
            stat
        };
        let action = service.actions.nonexist;
        self.post(
            service,
            EventKind::Nonexist,
            EventState::Succeeded,
            action,
            "filesystem exists".to_string(),
        );

        service.inf.mode = Some(stat.mode);
        service.inf.uid = Some(stat.uid);
        service.inf.gid = Some(stat.gid);

        let usage = match self.platform.filesystem_usage(&path) {
            Ok(usage) => usage,
            Err(_) => {
                let action = service.actions.data;
                let message = format!("unable to read filesystem {} state", path.display());
                self.post(service, EventKind::Data, EventState::Failed, action, message);
                return false;
            }
        };

        let fs = &mut service.inf.filesystem;
        fs.prev_flags = fs.flags;
        fs.flags = Some(usage.flags);
        fs.blocks = usage.blocks;
        fs.blocks_free = usage.blocks_free;
        fs.blocks_free_total = usage.blocks_free_total;
        fs.inodes = usage.inodes;
        fs.inodes_free = usage.inodes_free;
        fs.inode_percent = if usage.inodes > 0 {
            (1000.0 * (usage.inodes - usage.inodes_free) as f64 / usage.inodes as f64) as i64
        } else {
            0
        };
        fs.space_percent = if usage.blocks > 0 {
            (1000.0 * (usage.blocks - usage.blocks_free) as f64 / usage.blocks as f64) as i64
        } else {
            0
        };
        fs.inode_used = usage.inodes - usage.inodes_free;
        fs.space_used = usage.blocks - usage.blocks_free_total;

        let action = service.actions.data;
        let message = format!("succeeded getting filesystem statistic for {}", path.display());
        self.post(service, EventKind::Data, EventState::Succeeded, action, message);

        if service.perm.is_some() {
            self.check_perm(service);
        }
        if service.uid.is_some() {
            self.check_uid(service);
        }
        if service.gid.is_some() {
            self.check_gid(service);
        }

        self.check_filesystem_flags(service);

        for i in 0..service.filesystems.len() {
            self.check_filesystem_resource(service, i);
        }

        true
    }

    /// Mount-flag change detector. Nothing is posted until a previous
    /// flag set exists, and there is no not-changed counterpart.
    fn check_filesystem_flags(&mut self, service: &mut Service) {
        let fs = &service.inf.filesystem;
        let (Some(prev), Some(current)) = (fs.prev_flags, fs.flags) else {
            return;
        };
        if prev != current {
            let action = service.actions.fsflag;
            let message = format!("filesystem flags changed to {:#x}", current);
            self.post(service, EventKind::Fsflag, EventState::Changed, action, message);
        }
    }

    fn check_filesystem_resource(&mut self, service: &mut Service, index: usize) {
        let rule = service.filesystems[index].clone();
        match (rule.limit_percent, rule.limit_absolute) {
            (None, None) => {
                error!(service = %service.name, "filesystem limit not set");
                return;
            }
            (Some(_), Some(_)) => {
                error!(service = %service.name, "filesystem limit ambiguous, both percent and absolute set");
                return;
            }
            _ => {}
        }

        let fs = service.inf.filesystem.clone();
        let (noun, unit, percent, used) = match rule.resource {
            FsResource::Inode => {
                if fs.inodes <= 0 {
                    debug!(service = %service.name, "filesystem doesn't support inodes");
                    return;
                }
                ("inode usage", "", fs.inode_percent, fs.inode_used)
            }
            FsResource::Space => ("space usage", " blocks", fs.space_percent, fs.space_used),
        };

        if let Some(limit) = rule.limit_percent {
            if rule.operator.matches(percent, limit) {
                let message = format!(
                    "{} {:.1}% matches resource limit [{}{}{:.1}%]",
                    noun,
                    percent as f64 / 10.0,
                    noun,
                    rule.operator,
                    limit as f64 / 10.0
                );
                self.post(service, EventKind::Resource, EventState::Failed, rule.action, message);
                return;
            }
        } else if let Some(limit) = rule.limit_absolute {
            if rule.operator.matches(used, limit) {
                let message = format!(
                    "{} {}{} matches resource limit [{}{}{}{}]",
                    noun, used, unit, noun, rule.operator, limit, unit
                );
                self.post(service, EventKind::Resource, EventState::Failed, rule.action, message);
                return;
            }
        }

        debug!(
            service = %service.name,
            usage = %format_args!("{:.1}%", percent as f64 / 10.0),
            "{} check succeeded", noun
        );
        self.post(
            service,
            EventKind::Resource,
            EventState::Succeeded,
            rule.action,
            "filesystem resources succeeded".to_string(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;
    use crate::model::{ActionKind, FilesystemRule, Service, ServiceType};
    use crate::platform::{FilesystemUsage, MockPlatform};
    use crate::predicate::Operator;

    fn validator() -> Validator<MockPlatform, RecordingSink> {
        Validator::new(MockPlatform::new(), RecordingSink::new())
    }

    fn usage() -> FilesystemUsage {
        FilesystemUsage {
            blocks: 1000,
            blocks_free: 200,
            blocks_free_total: 250,
            inodes: 10_000,
            inodes_free: 9_000,
            flags: 0x1,
        }
    }

    fn fs_service() -> Service {
        Service::new("data", ServiceType::Filesystem, "/data")
    }

    #[test]
    fn test_missing_mount_is_fatal() {
        let mut v = validator();
        let mut s = fs_service();
        assert!(!v.check_filesystem(&mut s));
        assert!(v.sink.has(EventKind::Nonexist, EventState::Failed));
    }

    #[test]
    fn test_usage_populates_scaled_percentages() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem("/data", usage());
        let mut s = fs_service();

        assert!(v.check_filesystem(&mut s));
        assert!(v.sink.has(EventKind::Data, EventState::Succeeded));
        // 800 of 1000 blocks used -> 80.0% -> 800; 1000 of 10000 inodes -> 100
        assert_eq!(s.inf.filesystem.space_percent, 800);
        assert_eq!(s.inf.filesystem.inode_percent, 100);
        assert_eq!(s.inf.filesystem.space_used, 750);
        assert_eq!(s.inf.filesystem.inode_used, 1000);
    }

    #[test]
    fn test_usage_read_failure_is_data_event() {
        let mut v = validator();
        v.platform.add_dir("/data");
        let mut s = fs_service();
        assert!(!v.check_filesystem(&mut s));
        assert!(v.sink.has(EventKind::Data, EventState::Failed));
    }

    #[test]
    fn test_symlink_resolved_before_usage() {
        let mut v = validator();
        v.platform.add_dir("/mnt/real");
        v.platform.add_symlink("/data", "/mnt/real");
        v.platform.add_filesystem("/mnt/real", usage());
        let mut s = fs_service();

        assert!(v.check_filesystem(&mut s));
        let nonexist = v.sink.of_kind(EventKind::Nonexist);
        assert!(nonexist
            .iter()
            .any(|e| e.message.contains("/data -> /mnt/real")));
    }

    #[test]
    fn test_flags_change_detector() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem("/data", usage());
        let mut s = fs_service();

        // First cycle: no previous flags, no event.
        v.check_filesystem(&mut s);
        assert!(v.sink.of_kind(EventKind::Fsflag).is_empty());

        // Remounted read-only: flags differ.
        v.sink.clear();
        v.platform.add_filesystem(
            "/data",
            FilesystemUsage {
                flags: 0x3,
                ..usage()
            },
        );
        v.check_filesystem(&mut s);
        let events = v.sink.of_kind(EventKind::Fsflag);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Changed);
        assert!(events[0].message.contains("0x3"));

        // Stable flags: silent again.
        v.sink.clear();
        v.check_filesystem(&mut s);
        assert!(v.sink.of_kind(EventKind::Fsflag).is_empty());
    }

    #[test]
    fn test_space_percent_rule_fires() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem("/data", usage());
        let mut s = fs_service();
        s.filesystems = vec![FilesystemRule {
            resource: FsResource::Space,
            operator: Operator::Greater,
            limit_percent: Some(750), // 75.0% < observed 80.0%
            limit_absolute: None,
            action: ActionKind::Alert,
        }];

        v.check_filesystem(&mut s);
        let events = v.sink.of_kind(EventKind::Resource);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0].message.contains("80.0%"));
        assert!(events[0].message.contains("75.0%"));
    }

    #[test]
    fn test_inode_absolute_rule_and_success_event() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem("/data", usage());
        let mut s = fs_service();
        s.filesystems = vec![FilesystemRule {
            resource: FsResource::Inode,
            operator: Operator::Greater,
            limit_percent: None,
            limit_absolute: Some(5_000),
            action: ActionKind::Alert,
        }];

        v.check_filesystem(&mut s);
        // 1000 used inodes is below the limit: one SUCCEEDED covers the rule.
        assert!(v.sink.has(EventKind::Resource, EventState::Succeeded));
    }

    #[test]
    fn test_inode_rule_skipped_without_inodes() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem(
            "/data",
            FilesystemUsage {
                inodes: 0,
                inodes_free: 0,
                ..usage()
            },
        );
        let mut s = fs_service();
        s.filesystems = vec![FilesystemRule {
            resource: FsResource::Inode,
            operator: Operator::Greater,
            limit_percent: Some(900),
            limit_absolute: None,
            action: ActionKind::Alert,
        }];

        v.check_filesystem(&mut s);
        assert!(v.sink.of_kind(EventKind::Resource).is_empty());
    }

    #[test]
    fn test_misconfigured_limit_logged_and_skipped() {
        let mut v = validator();
        v.platform.add_dir("/data");
        v.platform.add_filesystem("/data", usage());
        let mut s = fs_service();
        s.filesystems = vec![FilesystemRule {
            resource: FsResource::Space,
            operator: Operator::Greater,
            limit_percent: None,
            limit_absolute: None,
            action: ActionKind::Alert,
        }];

        assert!(v.check_filesystem(&mut s));
        assert!(v.sink.of_kind(EventKind::Resource).is_empty());
    }
}
