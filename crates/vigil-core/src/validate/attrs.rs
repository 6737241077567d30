//! Attribute rule checkers: permission, ownership, checksum, size,
//! timestamp and uptime.
//!
//! All of them follow the same shape: skip while uninitialized where
//! applicable, evaluate, post exactly one event describing the outcome.
//! Change-detection variants seed their stored value silently on the
//! first observation and report transitions from then on.

use tracing::debug;

use crate::event::{EventKind, EventSink, EventState};
use crate::model::Service;
use crate::platform::Platform;

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_perm(&mut self, service: &mut Service) {
        let Some(rule) = service.perm.clone() else {
            return;
        };
        let Some(mode) = service.inf.mode else {
            return;
        };
        let current = mode & 0o7777;
        if current != rule.expected {
            let message = format!(
                "permission test failed for {} -- current permission is {:04o}",
                service.path.display(),
                current
            );
            self.post(
                service,
                EventKind::Permission,
                EventState::Failed,
                rule.action,
                message,
            );
        } else {
            debug!(service = %service.name, permission = %format_args!("{:04o}", current), "permission check succeeded");
            self.post(
                service,
                EventKind::Permission,
                EventState::Succeeded,
                rule.action,
                "permission succeeded".to_string(),
            );
        }
    }

    pub(crate) fn check_uid(&mut self, service: &mut Service) {
        let Some(rule) = service.uid.clone() else {
            return;
        };
        let Some(uid) = service.inf.uid else {
            return;
        };
        if uid != rule.expected {
            let message = format!(
                "uid test failed for {} -- current uid is {}",
                service.path.display(),
                uid
            );
            self.post(service, EventKind::Uid, EventState::Failed, rule.action, message);
        } else {
            debug!(service = %service.name, uid, "uid check succeeded");
            self.post(
                service,
                EventKind::Uid,
                EventState::Succeeded,
                rule.action,
                "uid succeeded".to_string(),
            );
        }
    }

    pub(crate) fn check_gid(&mut self, service: &mut Service) {
        let Some(rule) = service.gid.clone() else {
            return;
        };
        let Some(gid) = service.inf.gid else {
            return;
        };
        if gid != rule.expected {
            let message = format!(
                "gid test failed for {} -- current gid is {}",
                service.path.display(),
                gid
            );
            self.post(service, EventKind::Gid, EventState::Failed, rule.action, message);
        } else {
            debug!(service = %service.name, gid, "gid check succeeded");
            self.post(
                service,
                EventKind::Gid,
                EventState::Succeeded,
                rule.action,
                "gid succeeded".to_string(),
            );
        }
    }

    /// Checksum test. A failure to compute the digest is a data-plane
    /// event, not a checksum event; the first successfully computed
    /// digest seeds an unseeded rule without posting.
    pub(crate) fn check_checksum(&mut self, service: &mut Service) {
        let Some(rule) = service.checksum.clone() else {
            return;
        };
        let path = service.path.clone();
        let data_action = service.actions.data;

        let digest = match self.platform.checksum(&path, rule.kind) {
            Ok(digest) => digest,
            Err(_) => {
                let message = format!("cannot compute checksum for {}", path.display());
                self.post(service, EventKind::Data, EventState::Failed, data_action, message);
                return;
            }
        };
        self.post(
            service,
            EventKind::Data,
            EventState::Succeeded,
            data_action,
            format!("checksum computed for {}", path.display()),
        );
        service.inf.file.digest = Some(digest.clone());

        let Some(expected) = rule.expected else {
            if let Some(r) = service.checksum.as_mut() {
                r.expected = Some(digest);
            }
            return;
        };

        // MD5 compares 32 hex chars, SHA-1 40.
        let n = rule.kind.hex_len();
        let changed = expected.as_bytes().get(..n) != digest.as_bytes().get(..n);

        if changed {
            if rule.test_changes {
                let message = format!("checksum was changed for {}", path.display());
                self.post(
                    service,
                    EventKind::Checksum,
                    EventState::Changed,
                    rule.action,
                    message,
                );
                // Rotate the expected value for the next cycle.
                if let Some(r) = service.checksum.as_mut() {
                    r.expected = Some(digest);
                }
            } else {
                let message = format!("checksum test failed for {}", path.display());
                self.post(
                    service,
                    EventKind::Checksum,
                    EventState::Failed,
                    rule.action,
                    message,
                );
            }
        } else if rule.test_changes {
            debug!(service = %service.name, "checksum has not changed");
            self.post(
                service,
                EventKind::Checksum,
                EventState::ChangedNot,
                rule.action,
                "checksum has not changed".to_string(),
            );
        } else {
            debug!(service = %service.name, "checksum is valid");
            self.post(
                service,
                EventKind::Checksum,
                EventState::Succeeded,
                rule.action,
                "checksum succeeded".to_string(),
            );
        }
    }

    /// Size test. Constant-value rules are all evaluated; the first
    /// change-detection rule ends the walk.
    pub(crate) fn check_size(&mut self, service: &mut Service) {
        let size = service.inf.file.size;
        for i in 0..service.sizes.len() {
            if service.sizes[i].test_changes {
                match service.sizes[i].last {
                    None => {
                        // Not seen before monitoring started; seed now and
                        // test changes from the next cycle on.
                        service.sizes[i].last = Some(size);
                    }
                    Some(last) if last != size => {
                        service.sizes[i].last = Some(size);
                        let action = service.sizes[i].action;
                        let message = format!("size was changed for {}", service.path.display());
                        self.post(service, EventKind::Size, EventState::Changed, action, message);
                    }
                    Some(_) => {
                        debug!(service = %service.name, size, "size has not changed");
                        let action = service.sizes[i].action;
                        self.post(
                            service,
                            EventKind::Size,
                            EventState::ChangedNot,
                            action,
                            "size was not changed".to_string(),
                        );
                    }
                }
                break;
            }

            let rule = service.sizes[i].clone();
            if rule.operator.matches(size as i64, rule.limit as i64) {
                let message = format!(
                    "size test failed for {} -- current size is {} B",
                    service.path.display(),
                    size
                );
                self.post(service, EventKind::Size, EventState::Failed, rule.action, message);
            } else {
                debug!(service = %service.name, size, "size check succeeded");
                self.post(
                    service,
                    EventKind::Size,
                    EventState::Succeeded,
                    rule.action,
                    "size succeeded".to_string(),
                );
            }
        }
    }

    /// Timestamp test over `max(mtime, ctime)`. Constant-value rules
    /// compare the age in seconds against the limit.
    pub(crate) fn check_timestamp(&mut self, service: &mut Service) {
        if service.timestamps.is_empty() {
            return;
        }
        let Some(observed) = service.inf.timestamp else {
            return;
        };
        let now = self.platform.now();
        let data_action = service.actions.data;
        self.post(
            service,
            EventKind::Data,
            EventState::Succeeded,
            data_action,
            "actual system time obtained".to_string(),
        );

        for i in 0..service.timestamps.len() {
            if service.timestamps[i].test_changes {
                match service.timestamps[i].last {
                    None => {
                        service.timestamps[i].last = Some(observed);
                    }
                    Some(last) if last != observed => {
                        service.timestamps[i].last = Some(observed);
                        let action = service.timestamps[i].action;
                        let message =
                            format!("timestamp was changed for {}", service.path.display());
                        self.post(
                            service,
                            EventKind::Timestamp,
                            EventState::Changed,
                            action,
                            message,
                        );
                    }
                    Some(_) => {
                        debug!(service = %service.name, "timestamp was not changed");
                        let action = service.timestamps[i].action;
                        let message =
                            format!("timestamp was not changed for {}", service.path.display());
                        self.post(
                            service,
                            EventKind::Timestamp,
                            EventState::ChangedNot,
                            action,
                            message,
                        );
                    }
                }
                break;
            }

            let rule = service.timestamps[i].clone();
            if rule.operator.matches(now - observed, rule.limit_secs) {
                let message = format!("timestamp test failed for {}", service.path.display());
                self.post(
                    service,
                    EventKind::Timestamp,
                    EventState::Failed,
                    rule.action,
                    message,
                );
            } else {
                debug!(service = %service.name, "timestamp test succeeded");
                self.post(
                    service,
                    EventKind::Timestamp,
                    EventState::Succeeded,
                    rule.action,
                    "timestamp succeeded".to_string(),
                );
            }
        }
    }

    pub(crate) fn check_uptime(&mut self, service: &mut Service) {
        let uptime = service.inf.process.uptime_secs;
        for i in 0..service.uptimes.len() {
            let rule = service.uptimes[i].clone();
            if rule.operator.matches(uptime, rule.limit_secs) {
                let message = format!(
                    "uptime test failed for {} -- current uptime is {} seconds",
                    service.path.display(),
                    uptime
                );
                self.post(service, EventKind::Uptime, EventState::Failed, rule.action, message);
            } else {
                debug!(service = %service.name, uptime, "uptime check succeeded");
                self.post(
                    service,
                    EventKind::Uptime,
                    EventState::Succeeded,
                    rule.action,
                    "uptime succeeded".to_string(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;
    use crate::model::{
        ActionKind, ChecksumRule, GidRule, HashKind, PermRule, Service, ServiceType, SizeRule,
        TimestampRule, UidRule, UptimeRule,
    };
    use crate::platform::MockPlatform;
    use crate::predicate::Operator;

    fn validator() -> Validator<MockPlatform, RecordingSink> {
        Validator::new(MockPlatform::new(), RecordingSink::new())
    }

    fn file_service() -> Service {
        Service::new("f", ServiceType::File, "/tmp/x")
    }

    #[test]
    fn test_perm_mismatch_fails_with_octal_report() {
        let mut v = validator();
        let mut s = file_service();
        s.perm = Some(PermRule {
            expected: 0o644,
            action: ActionKind::Alert,
        });
        s.inf.mode = Some(0o100600);

        v.check_perm(&mut s);
        let events = v.sink.of_kind(EventKind::Permission);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0].message.contains("0600"));
    }

    #[test]
    fn test_perm_match_succeeds() {
        let mut v = validator();
        let mut s = file_service();
        s.perm = Some(PermRule {
            expected: 0o644,
            action: ActionKind::Alert,
        });
        s.inf.mode = Some(0o100644);

        v.check_perm(&mut s);
        assert!(v.sink.has(EventKind::Permission, EventState::Succeeded));
    }

    #[test]
    fn test_uid_gid_numeric_inequality() {
        let mut v = validator();
        let mut s = file_service();
        s.uid = Some(UidRule {
            expected: 0,
            action: ActionKind::Alert,
        });
        s.gid = Some(GidRule {
            expected: 0,
            action: ActionKind::Alert,
        });
        s.inf.uid = Some(1000);
        s.inf.gid = Some(0);

        v.check_uid(&mut s);
        v.check_gid(&mut s);
        assert!(v.sink.has(EventKind::Uid, EventState::Failed));
        assert!(v.sink.has(EventKind::Gid, EventState::Succeeded));
    }

    #[test]
    fn test_checksum_seeds_then_tracks_changes() {
        let mut v = validator();
        v.platform.add_file("/tmp/x", "a\n");
        let mut s = file_service();
        s.checksum = Some(ChecksumRule {
            kind: HashKind::Md5,
            expected: None,
            test_changes: true,
            action: ActionKind::Alert,
        });

        // Cycle 1: digest seeds the rule, no checksum event.
        v.check_checksum(&mut s);
        assert!(v.sink.of_kind(EventKind::Checksum).is_empty());
        assert!(v.sink.has(EventKind::Data, EventState::Succeeded));
        assert_eq!(
            s.checksum.as_ref().unwrap().expected.as_deref(),
            Some("60b725f10c9c85c70d97880dfe8191b3")
        );

        // Cycle 2: unchanged content.
        v.sink.clear();
        v.check_checksum(&mut s);
        assert!(v.sink.has(EventKind::Checksum, EventState::ChangedNot));

        // Cycle 3: content changed; the expected hash rotates.
        v.sink.clear();
        v.platform.truncate_file("/tmp/x", "b\n");
        v.check_checksum(&mut s);
        assert!(v.sink.has(EventKind::Checksum, EventState::Changed));
        assert_eq!(
            s.checksum.as_ref().unwrap().expected.as_deref(),
            Some(s.inf.file.digest.as_deref().unwrap())
        );
    }

    #[test]
    fn test_checksum_constant_value_fails_on_mismatch() {
        let mut v = validator();
        v.platform.add_file("/tmp/x", "b\n");
        let mut s = file_service();
        s.checksum = Some(ChecksumRule {
            kind: HashKind::Md5,
            expected: Some("60b725f10c9c85c70d97880dfe8191b3".to_string()),
            test_changes: false,
            action: ActionKind::Alert,
        });

        v.check_checksum(&mut s);
        assert!(v.sink.has(EventKind::Checksum, EventState::Failed));
        // A constant rule never rotates its expected value.
        assert_eq!(
            s.checksum.as_ref().unwrap().expected.as_deref(),
            Some("60b725f10c9c85c70d97880dfe8191b3")
        );
    }

    #[test]
    fn test_checksum_compute_failure_is_data_event() {
        let mut v = validator();
        v.platform.add_file("/tmp/x", "a\n");
        v.platform.fail_checksum("/tmp/x");
        let mut s = file_service();
        s.checksum = Some(ChecksumRule {
            kind: HashKind::Md5,
            expected: None,
            test_changes: false,
            action: ActionKind::Alert,
        });

        v.check_checksum(&mut s);
        assert!(v.sink.has(EventKind::Data, EventState::Failed));
        assert!(v.sink.of_kind(EventKind::Checksum).is_empty());
        // The rule stays unseeded.
        assert!(s.checksum.as_ref().unwrap().expected.is_none());
    }

    #[test]
    fn test_size_change_detection_seeds_silently() {
        let mut v = validator();
        let mut s = file_service();
        s.sizes = vec![SizeRule {
            operator: Operator::Equal,
            limit: 0,
            test_changes: true,
            last: None,
            action: ActionKind::Alert,
        }];
        s.inf.file.size = 100;

        v.check_size(&mut s);
        assert!(v.sink.events.is_empty());
        assert_eq!(s.sizes[0].last, Some(100));

        // Unchanged
        v.check_size(&mut s);
        assert!(v.sink.has(EventKind::Size, EventState::ChangedNot));

        // Changed
        v.sink.clear();
        s.inf.file.size = 150;
        v.check_size(&mut s);
        assert!(v.sink.has(EventKind::Size, EventState::Changed));
        assert_eq!(s.sizes[0].last, Some(150));
    }

    #[test]
    fn test_size_constant_rules_all_evaluated_until_change_rule() {
        let mut v = validator();
        let mut s = file_service();
        s.sizes = vec![
            SizeRule {
                operator: Operator::Greater,
                limit: 50,
                test_changes: false,
                last: None,
                action: ActionKind::Alert,
            },
            SizeRule {
                operator: Operator::Equal,
                limit: 0,
                test_changes: true,
                last: None,
                action: ActionKind::Alert,
            },
            // Unreachable: sits after the change-detection rule.
            SizeRule {
                operator: Operator::Less,
                limit: 10,
                test_changes: false,
                last: None,
                action: ActionKind::Alert,
            },
        ];
        s.inf.file.size = 100;

        v.check_size(&mut s);
        // First rule fired (100 > 50), change rule seeded, third never ran.
        assert!(v.sink.has(EventKind::Size, EventState::Failed));
        assert_eq!(v.sink.of_kind(EventKind::Size).len(), 1);
        assert_eq!(s.sizes[1].last, Some(100));
    }

    #[test]
    fn test_timestamp_age_rule() {
        let mut v = validator();
        let now = v.platform.now();
        let mut s = file_service();
        s.inf.timestamp = Some(now - 120);
        s.timestamps = vec![TimestampRule {
            operator: Operator::Greater,
            limit_secs: 60,
            test_changes: false,
            last: None,
            action: ActionKind::Alert,
        }];

        v.check_timestamp(&mut s);
        assert!(v.sink.has(EventKind::Data, EventState::Succeeded));
        assert!(v.sink.has(EventKind::Timestamp, EventState::Failed));
    }

    #[test]
    fn test_timestamp_change_detection() {
        let mut v = validator();
        let now = v.platform.now();
        let mut s = file_service();
        s.inf.timestamp = Some(now);
        s.timestamps = vec![TimestampRule {
            operator: Operator::Equal,
            limit_secs: 0,
            test_changes: true,
            last: None,
            action: ActionKind::Alert,
        }];

        // Seeds silently.
        v.check_timestamp(&mut s);
        assert!(v.sink.of_kind(EventKind::Timestamp).is_empty());

        // Same timestamp: not changed.
        v.check_timestamp(&mut s);
        assert!(v.sink.has(EventKind::Timestamp, EventState::ChangedNot));

        // Touched: changed.
        v.sink.clear();
        s.inf.timestamp = Some(now + 5);
        v.check_timestamp(&mut s);
        assert!(v.sink.has(EventKind::Timestamp, EventState::Changed));
    }

    #[test]
    fn test_uptime_rule() {
        let mut v = validator();
        let mut s = Service::new("p", ServiceType::Process, "/run/p.pid");
        s.inf.process.uptime_secs = 30;
        s.uptimes = vec![UptimeRule {
            operator: Operator::Less,
            limit_secs: 60,
            action: ActionKind::Alert,
        }];

        v.check_uptime(&mut s);
        assert!(v.sink.has(EventKind::Uptime, EventState::Failed));

        v.sink.clear();
        s.inf.process.uptime_secs = 3600;
        v.check_uptime(&mut s);
        assert!(v.sink.has(EventKind::Uptime, EventState::Succeeded));
    }
}
