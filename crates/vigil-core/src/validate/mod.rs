//! The per-cycle validator.
//!
//! One [`Validator::cycle`] call walks the service list in order: pending
//! administrative actions run first, then each service that is monitored
//! and not skipped by its `every` policy gets restart-rate bookkeeping
//! and its type-specific checker. Checkers post events through the sink
//! and may disable monitoring, so the monitor mode is re-read after every
//! stage.

mod attrs;
mod connection;
mod content;
mod filesystem;
mod path;
mod process;
mod program;
mod remote;
mod resource;

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::event::{Event, EventKind, EventSink, EventState};
use crate::model::{ActionKind, Every, Monitor, Service, ServiceType};
use crate::platform::{Platform, SystemInfo};

/// Walks the service list once per cycle and validates every service
/// against its rules. Owns the services, the platform and the event sink;
/// nothing here is shared across threads.
pub struct Validator<P: Platform, S: EventSink> {
    pub platform: P,
    pub sink: S,
    services: Vec<Service>,
    /// When false, process data collection (state/pid/ppid/uptime/
    /// resources) is skipped; liveness and port tests still run.
    pub collect_process_data: bool,
    stopped: Arc<AtomicBool>,
    /// Set when the control surface queued at least one administrative
    /// action; triggers a dedicated action sweep at the next cycle start.
    pending_sweep: bool,
    system: SystemInfo,
}

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub fn new(platform: P, sink: S) -> Self {
        Self {
            platform,
            sink,
            services: Vec::new(),
            collect_process_data: true,
            stopped: Arc::new(AtomicBool::new(false)),
            pending_sweep: false,
            system: SystemInfo::default(),
        }
    }

    pub fn add_service(&mut self, service: Service) {
        self.services.push(service);
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut [Service] {
        &mut self.services
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name == name)
    }

    /// Flag checked between services; set it from a signal handler to
    /// stop the walk cooperatively.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stopped)
    }

    /// Queue an administrative action for a named service. It runs in a
    /// dedicated sweep at the start of the next cycle.
    pub fn request_action(&mut self, name: &str, action: crate::model::AdminAction) -> bool {
        match self.service_mut(name) {
            Some(service) => {
                service.pending_action = Some(action);
                self.pending_sweep = true;
                true
            }
            None => false,
        }
    }

    /// Record a service (re)start for restart-rate accounting. Called by
    /// the control surface whenever it starts the service.
    pub fn note_start(&mut self, name: &str) {
        if let Some(service) = self.service_mut(name) {
            service.nstart += 1;
        }
    }

    /// System-wide sensors sampled at the current cycle's start.
    pub(crate) fn system(&self) -> &SystemInfo {
        &self.system
    }

    /// Runs one full validation cycle over the service list. Returns the
    /// number of services whose checker reported a fatal error.
    pub fn cycle(&mut self) -> usize {
        let mut errors = 0;

        self.sink.process_pending();
        self.system = self.platform.refresh();
        let now = self.platform.now();

        let mut services = mem::take(&mut self.services);

        // At least one action pending: quick dedicated sweep so actions
        // run before any monitoring.
        if self.pending_sweep {
            self.pending_sweep = false;
            for service in services.iter_mut() {
                self.do_scheduled_action(service);
            }
        }

        for service in services.iter_mut() {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            if self.do_scheduled_action(service) {
                continue;
            }
            if service.is_unmonitored() || self.check_skip(service, now) {
                continue;
            }
            // Restart-rate bookkeeping can disable monitoring through its
            // actions, so monitor is read again afterwards.
            self.check_timeout(service);
            if !service.is_unmonitored() {
                if !self.dispatch(service) {
                    errors += 1;
                }
                // The checker may have disabled monitoring as well.
                if !service.is_unmonitored() {
                    service.monitor = Monitor::YES;
                }
            }
            service.collected = Some(now);
        }

        for service in services.iter_mut() {
            service.visited = false;
        }

        self.services = services;
        errors
    }

    fn dispatch(&mut self, service: &mut Service) -> bool {
        match service.kind {
            ServiceType::Process => self.check_process(service),
            ServiceType::File => self.check_file(service),
            ServiceType::Directory => self.check_directory(service),
            ServiceType::Fifo => self.check_fifo(service),
            ServiceType::Filesystem => self.check_filesystem(service),
            ServiceType::Program => self.check_program(service),
            ServiceType::RemoteHost => self.check_remote_host(service),
            ServiceType::System => self.check_system(service),
        }
    }

    /// Validate the general system indicators: resource rules only.
    fn check_system(&mut self, service: &mut Service) -> bool {
        for i in 0..service.resources.len() {
            self.check_process_resource(service, i);
        }
        true
    }

    /// Posts one event and keeps the service's sticky-error set current:
    /// FAILED sets the kind's bit, SUCCEEDED clears it.
    pub(crate) fn post(
        &mut self,
        service: &mut Service,
        kind: EventKind,
        state: EventState,
        action: ActionKind,
        message: String,
    ) {
        match state {
            EventState::Failed => service.errors.set(kind),
            EventState::Succeeded => service.errors.clear(kind),
            EventState::Changed | EventState::ChangedNot => {}
        }
        self.sink.post(Event {
            service: service.name.clone(),
            kind,
            state,
            action,
            message,
        });
    }

    /// True if validation of this service is skipped this cycle, either
    /// because a dependency chain already handled it or because of its
    /// `every` policy. Skipped services carry the WAITING mode bit.
    fn check_skip(&mut self, service: &mut Service, now: i64) -> bool {
        if service.visited {
            debug!(
                service = %service.name,
                "check skipped, service already handled in a dependency chain"
            );
            return true;
        }
        match &mut service.every {
            Every::Cycle => {}
            Every::SkipCycles { number, counter } => {
                *counter += 1;
                if *counter < *number {
                    debug!(
                        service = %service.name,
                        cycle = *counter,
                        every = *number,
                        "test skipped by cycle policy"
                    );
                    service.monitor |= Monitor::WAITING;
                    return true;
                }
                *counter = 0;
            }
            Every::Cron(mask) => {
                if !mask.matches_epoch(now) {
                    debug!(
                        service = %service.name,
                        spec = mask.spec(),
                        "test skipped, time does not match cron spec"
                    );
                    service.monitor |= Monitor::WAITING;
                    return true;
                }
            }
            Every::NotInCron(mask) => {
                if mask.matches_epoch(now) {
                    debug!(
                        service = %service.name,
                        spec = mask.spec(),
                        "test skipped, time matches cron spec in 'not' mode"
                    );
                    service.monitor |= Monitor::WAITING;
                    return true;
                }
            }
        }
        service.monitor -= Monitor::WAITING;
        false
    }

    /// Restart-rate accounting: when the service started `count` times
    /// within `cycles` monitoring cycles, the matching rules fire. Both
    /// counters reset once the largest window has passed.
    fn check_timeout(&mut self, service: &mut Service) {
        if service.action_rates.is_empty() {
            return;
        }
        if service.nstart > 0 {
            service.ncycle += 1;
        }

        let mut max_cycles = 0;
        let mut fired = Vec::new();
        for rate in &service.action_rates {
            max_cycles = max_cycles.max(rate.cycles);
            if service.nstart >= rate.count && service.ncycle <= rate.cycles {
                fired.push(rate.action);
            }
        }
        for action in fired {
            let message = format!(
                "service restarted {} times within {} cycle(s) - {}",
                service.nstart, service.ncycle, action
            );
            self.post(service, EventKind::Timeout, EventState::Failed, action, message);
        }

        if service.ncycle > max_cycles {
            service.ncycle = 0;
            service.nstart = 0;
        }
    }

    /// Runs the pending administrative action, if any. Returns true when
    /// an action was carried out (the service is then left alone for the
    /// rest of the cycle).
    fn do_scheduled_action(&mut self, service: &mut Service) -> bool {
        let Some(action) = service.pending_action.take() else {
            return false;
        };
        let done = self.platform.control_service(&service.name, action);
        let message = format!("{} action done", action);
        let admin_action = service.actions.admin;
        self.post(
            service,
            EventKind::Action,
            EventState::Changed,
            admin_action,
            message,
        );
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;
    use crate::model::{ActionRate, AdminAction, CronMask, Service, ServiceType};
    use crate::platform::MockPlatform;

    fn validator() -> Validator<MockPlatform, RecordingSink> {
        Validator::new(MockPlatform::new(), RecordingSink::new())
    }

    fn system_service(name: &str) -> Service {
        Service::new(name, ServiceType::System, "localhost")
    }

    #[test]
    fn test_cycle_refreshes_sensors_and_drains_queue() {
        let mut v = validator();
        v.add_service(system_service("host"));
        v.cycle();
        assert_eq!(v.platform.refresh_count, 1);
        assert_eq!(v.sink.drained, 1);
    }

    #[test]
    fn test_monitor_promoted_to_yes_after_check() {
        let mut v = validator();
        v.add_service(system_service("host"));
        assert_eq!(v.services()[0].monitor, Monitor::INIT);
        v.cycle();
        assert_eq!(v.services()[0].monitor, Monitor::YES);
        assert!(v.services()[0].collected.is_some());
    }

    #[test]
    fn test_unmonitored_service_is_left_alone() {
        let mut v = validator();
        let mut s = system_service("off");
        s.monitor = Monitor::empty();
        v.add_service(s);
        v.cycle();
        assert!(v.sink.events.is_empty());
        assert!(v.services()[0].monitor.is_empty());
        assert!(v.services()[0].collected.is_none());
    }

    #[test]
    fn test_every_skip_cycles_waits_then_runs() {
        let mut v = validator();
        let mut s = system_service("slow");
        s.every = Every::SkipCycles {
            number: 3,
            counter: 0,
        };
        v.add_service(s);

        // Cycles 1 and 2: skipped, WAITING set, no collection timestamp.
        v.cycle();
        assert!(v.services()[0].monitor.contains(Monitor::WAITING));
        assert!(v.services()[0].collected.is_none());
        v.cycle();
        assert!(v.services()[0].collected.is_none());

        // Cycle 3: runs, WAITING cleared.
        v.cycle();
        assert!(!v.services()[0].monitor.contains(Monitor::WAITING));
        assert!(v.services()[0].collected.is_some());
    }

    #[test]
    fn test_every_cron_outside_mask_sets_waiting() {
        use chrono::{Local, TimeZone};

        let mut v = validator();
        // 12:45 local; the mask only matches minute 30.
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 45, 0).unwrap();
        v.platform.set_now(at.timestamp());
        let mut s = system_service("cronned");
        s.every = Every::Cron(CronMask::parse("30 * * * *").unwrap());
        v.add_service(s);

        v.cycle();
        assert!(v.services()[0].monitor.contains(Monitor::WAITING));
        assert!(v.sink.events.is_empty());
        assert!(v.services()[0].collected.is_none());
    }

    #[test]
    fn test_every_not_in_cron_skips_inside_mask() {
        use chrono::{Local, TimeZone};

        let mut v = validator();
        let at = Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 10).unwrap();
        v.platform.set_now(at.timestamp());
        let mut s = system_service("maintenance");
        s.every = Every::NotInCron(CronMask::parse("30 * * * *").unwrap());
        v.add_service(s);

        v.cycle();
        assert!(v.services()[0].monitor.contains(Monitor::WAITING));
    }

    #[test]
    fn test_visited_dependency_marker_skips_and_resets() {
        let mut v = validator();
        let mut s = system_service("dep");
        s.visited = true;
        v.add_service(s);

        v.cycle();
        assert!(v.services()[0].collected.is_none());
        // Markers reset at cycle end.
        assert!(!v.services()[0].visited);
    }

    #[test]
    fn test_restart_flap_fires_and_resets() {
        let mut v = validator();
        let mut s = system_service("flappy");
        s.action_rates = vec![ActionRate {
            count: 3,
            cycles: 5,
            action: ActionKind::Unmonitor,
        }];
        v.add_service(s);

        // Three starts within the window.
        for _ in 0..3 {
            v.note_start("flappy");
        }
        v.cycle();
        assert!(v.sink.has(EventKind::Timeout, EventState::Failed));

        // Quiet cycles: after ncycle exceeds the window, counters reset.
        v.sink.clear();
        for _ in 0..6 {
            v.cycle();
        }
        assert_eq!(v.services()[0].nstart, 0);
        assert_eq!(v.services()[0].ncycle, 0);
    }

    #[test]
    fn test_scheduled_action_runs_and_skips_service() {
        let mut v = validator();
        v.add_service(system_service("ctl"));
        assert!(v.request_action("ctl", AdminAction::Restart));

        v.cycle();
        assert_eq!(
            v.platform.control_log,
            vec![("ctl".to_string(), AdminAction::Restart)]
        );
        assert!(v.sink.has(EventKind::Action, EventState::Changed));
        assert!(v.services()[0].pending_action.is_none());
        // The action sweep handled the service; no collection happened.
        assert!(v.services()[0].collected.is_none());
    }

    #[test]
    fn test_stopped_flag_halts_walk() {
        let mut v = validator();
        v.add_service(system_service("one"));
        v.add_service(system_service("two"));
        v.stop_flag().store(true, Ordering::SeqCst);

        v.cycle();
        assert!(v.services()[0].collected.is_none());
        assert!(v.services()[1].collected.is_none());
    }

    #[test]
    fn test_request_action_unknown_service() {
        let mut v = validator();
        assert!(!v.request_action("ghost", AdminAction::Stop));
    }

    #[test]
    fn test_steady_state_cycles_post_no_failures() {
        use crate::model::{ChecksumRule, HashKind, ServiceType, SizeRule};
        use crate::predicate::Operator;

        let mut v = validator();
        v.platform.add_file("/var/lib/app/state", "stable content\n");
        let mut s = Service::new("state", ServiceType::File, "/var/lib/app/state");
        s.checksum = Some(ChecksumRule {
            kind: HashKind::Md5,
            expected: None,
            test_changes: true,
            action: ActionKind::Alert,
        });
        s.sizes = vec![SizeRule {
            operator: Operator::Equal,
            limit: 0,
            test_changes: true,
            last: None,
            action: ActionKind::Alert,
        }];
        v.add_service(s);

        // First cycle seeds the change-detection rules.
        assert_eq!(v.cycle(), 0);
        v.sink.clear();

        // On an unchanged system, further cycles report only
        // SUCCEEDED and CHANGEDNOT.
        for _ in 0..2 {
            assert_eq!(v.cycle(), 0);
        }
        assert!(v.sink.events.iter().all(|e| matches!(
            e.state,
            EventState::Succeeded | EventState::ChangedNot
        )));
        assert!(v.sink.has(EventKind::Checksum, EventState::ChangedNot));
        assert!(v.sink.has(EventKind::Size, EventState::ChangedNot));
    }
}
