//! Process service checker: liveness via pidfile, recovery of sticky
//! exec/timeout errors, state/pid/ppid change detection, uptime and
//! resource rules, then port probes.

use tracing::{debug, error};

use crate::event::{EventKind, EventSink, EventState};
use crate::model::{ProcessStatus, Service};
use crate::platform::Platform;

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_process(&mut self, service: &mut Service) -> bool {
        let pidfile = service.path.clone();
        let Some(pid) = self.platform.find_process(&pidfile) else {
            let action = service.actions.nonexist;
            self.post(
                service,
                EventKind::Nonexist,
                EventState::Failed,
                action,
                "process is not running".to_string(),
            );
            return false;
        };
        let action = service.actions.nonexist;
        self.post(
            service,
            EventKind::Nonexist,
            EventState::Succeeded,
            action,
            format!("process is running with pid {}", pid),
        );

        // The process runs again, most probably after manual intervention:
        // clear sticky exec and restart-timeout errors.
        if service.errors.contains(EventKind::Exec) {
            let action = service.actions.exec;
            self.post(
                service,
                EventKind::Exec,
                EventState::Succeeded,
                action,
                "process is running after previous exec error (slow starting or manually recovered?)"
                    .to_string(),
            );
        }
        if service.errors.contains(EventKind::Timeout) {
            let rate_actions: Vec<_> = service.action_rates.iter().map(|r| r.action).collect();
            for action in rate_actions {
                self.post(
                    service,
                    EventKind::Timeout,
                    EventState::Succeeded,
                    action,
                    "process is running after previous restart timeout (manually recovered?)"
                        .to_string(),
                );
            }
        }

        if self.collect_process_data {
            if let Some(sample) = self.platform.process_sample(pid) {
                let proc = &mut service.inf.process;
                proc.prev_pid = proc.pid;
                proc.pid = Some(sample.pid);
                proc.prev_ppid = proc.ppid;
                proc.ppid = Some(sample.ppid);
                proc.uptime_secs = sample.uptime_secs;
                proc.cpu_percent = sample.cpu_percent;
                proc.total_cpu_percent = sample.total_cpu_percent;
                proc.mem_percent = sample.mem_percent;
                proc.mem_kbyte = sample.mem_kbyte;
                proc.total_mem_percent = sample.total_mem_percent;
                proc.total_mem_kbyte = sample.total_mem_kbyte;
                proc.children = sample.children;
                proc.status = if sample.zombie {
                    ProcessStatus::ZOMBIE
                } else {
                    ProcessStatus::empty()
                };

                self.check_process_state(service);
                self.check_process_pid(service);
                self.check_process_ppid(service);
                if !service.uptimes.is_empty() {
                    self.check_uptime(service);
                }
                for i in 0..service.resources.len() {
                    self.check_process_resource(service, i);
                }
            } else {
                error!(service = %service.name, "failed to get service data");
            }
        }

        for i in 0..service.ports.len() {
            self.check_connection(service, i);
        }

        true
    }

    /// Zombie test.
    fn check_process_state(&mut self, service: &mut Service) {
        let action = service.actions.data;
        if service.inf.process.status.contains(ProcessStatus::ZOMBIE) {
            let message = format!(
                "process with pid {} is a zombie",
                service.inf.process.pid.unwrap_or_default()
            );
            self.post(service, EventKind::Data, EventState::Failed, action, message);
        } else {
            debug!(
                service = %service.name,
                status = %format_args!("{:04x}", service.inf.process.status.bits()),
                "zombie check succeeded"
            );
            self.post(
                service,
                EventKind::Data,
                EventState::Succeeded,
                action,
                "check process state succeeded".to_string(),
            );
        }
    }

    /// Pure change detector over the pid; silent until a previous pid
    /// exists.
    fn check_process_pid(&mut self, service: &mut Service) {
        let (Some(prev), Some(current)) = (service.inf.process.prev_pid, service.inf.process.pid)
        else {
            return;
        };
        let action = service.actions.pid;
        if prev != current {
            let message = format!("process PID changed from {} to {}", prev, current);
            self.post(service, EventKind::Pid, EventState::Changed, action, message);
        } else {
            self.post(
                service,
                EventKind::Pid,
                EventState::ChangedNot,
                action,
                "process PID has not changed since last cycle".to_string(),
            );
        }
    }

    /// Pure change detector over the ppid; silent until a previous ppid
    /// exists.
    fn check_process_ppid(&mut self, service: &mut Service) {
        let (Some(prev), Some(current)) = (service.inf.process.prev_ppid, service.inf.process.ppid)
        else {
            return;
        };
        let action = service.actions.ppid;
        if prev != current {
            let message = format!("process PPID changed from {} to {}", prev, current);
            self.post(service, EventKind::PPid, EventState::Changed, action, message);
        } else {
            self.post(
                service,
                EventKind::PPid,
                EventState::ChangedNot,
                action,
                "process PPID has not changed since last cycle".to_string(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;
    use crate::model::{ActionKind, ActionRate, Service, ServiceType};
    use crate::platform::{MockPlatform, ProcessSample};

    fn validator() -> Validator<MockPlatform, RecordingSink> {
        Validator::new(MockPlatform::new(), RecordingSink::new())
    }

    fn sample(pid: i32) -> ProcessSample {
        ProcessSample {
            pid,
            ppid: 1,
            uptime_secs: 3600,
            ..ProcessSample::default()
        }
    }

    fn process_service() -> Service {
        Service::new("worker", ServiceType::Process, "/run/worker.pid")
    }

    fn running(v: &mut Validator<MockPlatform, RecordingSink>, pid: i32) {
        v.platform.set_pidfile("/run/worker.pid", pid);
        v.platform.add_process(sample(pid));
    }

    #[test]
    fn test_missing_process_is_fatal() {
        let mut v = validator();
        let mut s = process_service();
        assert!(!v.check_process(&mut s));
        assert!(v.sink.has(EventKind::Nonexist, EventState::Failed));
        assert_eq!(v.sink.events.len(), 1);
    }

    #[test]
    fn test_running_process_posts_liveness_and_state() {
        let mut v = validator();
        running(&mut v, 100);
        let mut s = process_service();

        assert!(v.check_process(&mut s));
        assert!(v.sink.has(EventKind::Nonexist, EventState::Succeeded));
        assert!(v.sink.has(EventKind::Data, EventState::Succeeded));
        // First cycle: no previous pid, change detectors silent.
        assert!(v.sink.of_kind(EventKind::Pid).is_empty());
        assert!(v.sink.of_kind(EventKind::PPid).is_empty());
    }

    #[test]
    fn test_pid_change_detected_across_cycles() {
        let mut v = validator();
        running(&mut v, 100);
        let mut s = process_service();
        v.check_process(&mut s);
        v.sink.clear();

        // Same pid next cycle.
        v.check_process(&mut s);
        assert!(v.sink.has(EventKind::Pid, EventState::ChangedNot));

        // The daemon respawned under a new pid.
        v.sink.clear();
        v.platform.remove_process(100);
        running(&mut v, 200);
        v.check_process(&mut s);
        let events = v.sink.of_kind(EventKind::Pid);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Changed);
        assert!(events[0].message.contains("from 100 to 200"));
    }

    #[test]
    fn test_zombie_is_data_failure() {
        let mut v = validator();
        v.platform.set_pidfile("/run/worker.pid", 100);
        v.platform.add_process(ProcessSample {
            zombie: true,
            ..sample(100)
        });
        let mut s = process_service();

        assert!(v.check_process(&mut s));
        let events = v.sink.of_kind(EventKind::Data);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0].message.contains("zombie"));
    }

    #[test]
    fn test_sticky_exec_error_recovers() {
        let mut v = validator();
        running(&mut v, 100);
        let mut s = process_service();
        s.errors.set(EventKind::Exec);

        v.check_process(&mut s);
        assert!(v.sink.has(EventKind::Exec, EventState::Succeeded));
        assert!(!s.errors.contains(EventKind::Exec));
    }

    #[test]
    fn test_sticky_timeout_recovers_per_rate_rule() {
        let mut v = validator();
        running(&mut v, 100);
        let mut s = process_service();
        s.errors.set(EventKind::Timeout);
        s.action_rates = vec![
            ActionRate {
                count: 3,
                cycles: 5,
                action: ActionKind::Unmonitor,
            },
            ActionRate {
                count: 5,
                cycles: 10,
                action: ActionKind::Alert,
            },
        ];

        v.check_process(&mut s);
        let events = v.sink.of_kind(EventKind::Timeout);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| e.state == EventState::Succeeded));
    }

    #[test]
    fn test_process_data_collection_can_be_disabled() {
        let mut v = validator();
        v.collect_process_data = false;
        running(&mut v, 100);
        let mut s = process_service();

        assert!(v.check_process(&mut s));
        assert!(v.sink.has(EventKind::Nonexist, EventState::Succeeded));
        // No state/pid checks ran.
        assert!(v.sink.of_kind(EventKind::Data).is_empty());
        assert_eq!(s.inf.process.pid, None);
    }

}
