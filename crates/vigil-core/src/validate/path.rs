//! Checkers for path-backed services: files, directories and fifos.
//!
//! A missing path or a wrong file type short-circuits the rest of the
//! service's rules for the cycle and counts as a fatal error.

use tracing::debug;

use crate::event::{EventKind, EventSink, EventState};
use crate::model::Service;
use crate::platform::{FileKind, Platform};

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_file(&mut self, service: &mut Service) -> bool {
        let path = service.path.clone();
        let stat = match self.platform.stat(&path) {
            Ok(stat) => stat,
            Err(_) => {
                let action = service.actions.nonexist;
                self.post(
                    service,
                    EventKind::Nonexist,
                    EventState::Failed,
                    action,
                    "file doesn't exist".to_string(),
                );
                return false;
            }
        };

        service.inf.mode = Some(stat.mode);
        if service.inf.file.inode.is_some() {
            service.inf.file.prev_inode = service.inf.file.inode;
        }
        service.inf.file.inode = Some(stat.inode);
        service.inf.uid = Some(stat.uid);
        service.inf.gid = Some(stat.gid);
        service.inf.file.size = stat.size;
        service.inf.timestamp = Some(stat.timestamp());
        debug!(service = %service.name, "file exists check succeeded");
        let action = service.actions.nonexist;
        self.post(
            service,
            EventKind::Nonexist,
            EventState::Succeeded,
            action,
            "file exist".to_string(),
        );

        if stat.kind != FileKind::Regular {
            let action = service.actions.invalid;
            self.post(
                service,
                EventKind::Invalid,
                EventState::Failed,
                action,
                "is not a regular file".to_string(),
            );
            return false;
        }
        debug!(service = %service.name, "is a regular file");
        let action = service.actions.invalid;
        self.post(
            service,
            EventKind::Invalid,
            EventState::Succeeded,
            action,
            "is a regular file".to_string(),
        );

        if service.checksum.is_some() {
            self.check_checksum(service);
        }
        if service.perm.is_some() {
            self.check_perm(service);
        }
        if service.uid.is_some() {
            self.check_uid(service);
        }
        if service.gid.is_some() {
            self.check_gid(service);
        }
        if !service.sizes.is_empty() {
            self.check_size(service);
        }
        if !service.timestamps.is_empty() {
            self.check_timestamp(service);
        }
        if !service.matches.is_empty() {
            self.check_match(service);
        }

        true
    }

    pub(crate) fn check_directory(&mut self, service: &mut Service) -> bool {
        let path = service.path.clone();
        let stat = match self.platform.stat(&path) {
            Ok(stat) => stat,
            Err(_) => {
                let action = service.actions.nonexist;
                self.post(
                    service,
                    EventKind::Nonexist,
                    EventState::Failed,
                    action,
                    "directory doesn't exist".to_string(),
                );
                return false;
            }
        };

        service.inf.mode = Some(stat.mode);
        service.inf.uid = Some(stat.uid);
        service.inf.gid = Some(stat.gid);
        service.inf.timestamp = Some(stat.timestamp());
        debug!(service = %service.name, "directory exists check succeeded");
        let action = service.actions.nonexist;
        self.post(
            service,
            EventKind::Nonexist,
            EventState::Succeeded,
            action,
            "directory exist".to_string(),
        );

        if stat.kind != FileKind::Directory {
            let action = service.actions.invalid;
            self.post(
                service,
                EventKind::Invalid,
                EventState::Failed,
                action,
                "is not directory".to_string(),
            );
            return false;
        }
        debug!(service = %service.name, "is directory");
        let action = service.actions.invalid;
        self.post(
            service,
            EventKind::Invalid,
            EventState::Succeeded,
            action,
            "is directory".to_string(),
        );

        if service.perm.is_some() {
            self.check_perm(service);
        }
        if service.uid.is_some() {
            self.check_uid(service);
        }
        if service.gid.is_some() {
            self.check_gid(service);
        }
        if !service.timestamps.is_empty() {
            self.check_timestamp(service);
        }

        true
    }

    pub(crate) fn check_fifo(&mut self, service: &mut Service) -> bool {
        let path = service.path.clone();
        let stat = match self.platform.stat(&path) {
            Ok(stat) => stat,
            Err(_) => {
                let action = service.actions.nonexist;
                self.post(
                    service,
                    EventKind::Nonexist,
                    EventState::Failed,
                    action,
                    "fifo doesn't exist".to_string(),
                );
                return false;
            }
        };

        service.inf.mode = Some(stat.mode);
        service.inf.uid = Some(stat.uid);
        service.inf.gid = Some(stat.gid);
        service.inf.timestamp = Some(stat.timestamp());
        debug!(service = %service.name, "fifo exists check succeeded");
        let action = service.actions.nonexist;
        self.post(
            service,
            EventKind::Nonexist,
            EventState::Succeeded,
            action,
            "fifo exist".to_string(),
        );

        if stat.kind != FileKind::Fifo {
            let action = service.actions.invalid;
            self.post(
                service,
                EventKind::Invalid,
                EventState::Failed,
                action,
                "is not fifo".to_string(),
            );
            return false;
        }
        debug!(service = %service.name, "is fifo");
        let action = service.actions.invalid;
        self.post(
            service,
            EventKind::Invalid,
            EventState::Succeeded,
            action,
            "is fifo".to_string(),
        );

        if service.perm.is_some() {
            self.check_perm(service);
        }
        if service.uid.is_some() {
            self.check_uid(service);
        }
        if service.gid.is_some() {
            self.check_gid(service);
        }
        if !service.timestamps.is_empty() {
            self.check_timestamp(service);
        }

        true
    }
}
