//! Program service checker: launches the configured command, defers the
//! verdict until the run exits or overstays its timeout, evaluates the
//! exit status against the status rules, and immediately starts a fresh
//! run in the same cycle.

use tracing::{debug, error};

use crate::event::{EventKind, EventSink, EventState};
use crate::model::{Service, STATUS_OUTPUT_MAX};
use crate::platform::Platform;

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_program(&mut self, service: &mut Service) -> bool {
        let Some(mut program) = service.program.take() else {
            error!(service = %service.name, "program service has no command configured");
            return false;
        };
        let now = self.platform.now();

        if let Some(mut handle) = program.handle.take() {
            let exit = match handle.exit_status() {
                Some(exit) => exit,
                None => {
                    let elapsed = now - program.started.unwrap_or(now);
                    if elapsed <= program.timeout_secs {
                        // Defer the verdict until the program exits.
                        debug!(
                            service = %service.name,
                            "status check deferred - waiting on program to exit"
                        );
                        program.handle = Some(handle);
                        service.program = Some(program);
                        return true;
                    }
                    error!(
                        service = %service.name,
                        elapsed,
                        pid = handle.pid(),
                        "program timed out, killing it"
                    );
                    match handle.kill_and_wait() {
                        Ok(exit) => exit,
                        Err(e) => {
                            error!(service = %service.name, error = %e, "cannot reap killed program");
                            -1
                        }
                    }
                }
            };

            program.last_exit = Some(exit);
            let output = handle.read_output(STATUS_OUTPUT_MAX);
            for i in 0..service.statuses.len() {
                let rule = service.statuses[i].clone();
                if rule.operator.matches(exit as i64, rule.exit_value) {
                    let message = if output.is_empty() {
                        format!(
                            "'{}' failed with exit status ({}) -- no output from program",
                            service.path.display(),
                            exit
                        )
                    } else {
                        output.clone()
                    };
                    self.post(service, EventKind::Status, EventState::Failed, rule.action, message);
                } else {
                    debug!(service = %service.name, "status check succeeded");
                    self.post(
                        service,
                        EventKind::Status,
                        EventState::Succeeded,
                        rule.action,
                        "status succeeded".to_string(),
                    );
                }
            }
        }

        // Start a fresh run; the next cycles will collect its verdict.
        match self.platform.execute(&program.command) {
            Ok(handle) => {
                let action = service.actions.exec;
                let message = format!("'{}' program started", service.name);
                self.post(service, EventKind::Status, EventState::Succeeded, action, message);
                program.started = Some(now);
                program.handle = Some(handle);
            }
            Err(e) => {
                let action = service.actions.exec;
                let message = format!("failed to execute '{}' -- {}", service.path.display(), e);
                self.post(service, EventKind::Status, EventState::Failed, action, message);
            }
        }

        service.program = Some(program);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RecordingSink;
    use crate::model::{ActionKind, Program, Service, ServiceType, StatusRule};
    use crate::platform::{ExecScript, MockPlatform};
    use crate::predicate::Operator;

    fn validator() -> Validator<MockPlatform, RecordingSink> {
        Validator::new(MockPlatform::new(), RecordingSink::new())
    }

    fn program_service(timeout_secs: i64) -> Service {
        let mut s = Service::new("checker", ServiceType::Program, "/usr/local/bin/check.sh");
        s.program = Some(Program::new(
            vec!["/usr/local/bin/check.sh".to_string()],
            timeout_secs,
        ));
        s.statuses = vec![StatusRule {
            operator: Operator::NotEqual,
            exit_value: 0,
            action: ActionKind::Alert,
        }];
        s
    }

    #[test]
    fn test_first_cycle_starts_program() {
        let mut v = validator();
        v.platform.script_exec([ExecScript::running()]);
        let mut s = program_service(60);

        assert!(v.check_program(&mut s));
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Succeeded);
        assert!(events[0].message.contains("program started"));
        let program = s.program.as_ref().unwrap();
        assert!(program.handle.is_some());
        assert!(program.started.is_some());
    }

    #[test]
    fn test_spawn_failure_posts_exec_status() {
        let mut v = validator();
        v.platform.script_exec([ExecScript::spawn_failure()]);
        let mut s = program_service(60);

        assert!(v.check_program(&mut s));
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0].message.contains("failed to execute"));
        assert!(s.program.as_ref().unwrap().handle.is_none());
    }

    #[test]
    fn test_running_within_timeout_defers() {
        let mut v = validator();
        v.platform.script_exec([ExecScript::running()]);
        let mut s = program_service(60);
        v.check_program(&mut s);
        v.sink.clear();

        // Still running, still within the budget: nothing happens.
        v.platform.advance(10);
        assert!(v.check_program(&mut s));
        assert!(v.sink.events.is_empty());
        assert!(s.program.as_ref().unwrap().handle.is_some());
    }

    #[test]
    fn test_exit_evaluated_and_fresh_run_started() {
        let mut v = validator();
        v.platform.script_exec([
            ExecScript::exits(2, "disk check failed"),
            ExecScript::running(),
        ]);
        let mut s = program_service(60);
        v.check_program(&mut s);
        v.sink.clear();

        // Next cycle: the run has exited with 2, rule (!= 0) fires with
        // the captured output, and a fresh run starts in the same cycle.
        v.platform.advance(30);
        assert!(v.check_program(&mut s));
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].state, EventState::Failed);
        assert_eq!(events[0].message, "disk check failed");
        assert_eq!(events[1].state, EventState::Succeeded);
        assert!(events[1].message.contains("program started"));
        assert_eq!(s.program.as_ref().unwrap().last_exit, Some(2));
        assert!(s.program.as_ref().unwrap().handle.is_some());
    }

    #[test]
    fn test_timeout_kills_then_evaluates_and_restarts() {
        let mut v = validator();
        v.platform.script_exec([
            ExecScript {
                exit: 137,
                ..ExecScript::running()
            },
            ExecScript::running(),
        ]);
        let mut s = program_service(2);
        v.check_program(&mut s);
        v.sink.clear();

        // 3 seconds later the run is over budget: killed, evaluated,
        // restarted.
        v.platform.advance(3);
        assert!(v.check_program(&mut s));
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0].message.contains("exit status (137)"));
        assert!(events[1].message.contains("program started"));
        assert_eq!(s.program.as_ref().unwrap().last_exit, Some(137));
    }

    #[test]
    fn test_clean_exit_posts_success() {
        let mut v = validator();
        v.platform
            .script_exec([ExecScript::exits(0, ""), ExecScript::running()]);
        let mut s = program_service(60);
        v.check_program(&mut s);
        v.sink.clear();

        v.platform.advance(5);
        v.check_program(&mut s);
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events[0].state, EventState::Succeeded);
        assert_eq!(events[0].message, "status succeeded");
    }

    #[test]
    fn test_no_output_fallback_message() {
        let mut v = validator();
        v.platform
            .script_exec([ExecScript::exits(7, ""), ExecScript::running()]);
        let mut s = program_service(60);
        v.check_program(&mut s);
        v.sink.clear();

        v.platform.advance(5);
        v.check_program(&mut s);
        let events = v.sink.of_kind(EventKind::Status);
        assert_eq!(events[0].state, EventState::Failed);
        assert!(events[0]
            .message
            .contains("failed with exit status (7) -- no output from program"));
    }
}
