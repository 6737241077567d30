//! Process and system resource rules: cpu, memory, swap, load averages,
//! children counts and process-subtree totals.
//!
//! Cpu families are skipped while the service is still initializing or
//! while the sampled value has no baseline yet. Swap families only make
//! sense on the system service and are a silent no-op elsewhere.

use tracing::debug;

use crate::event::{EventKind, EventSink, EventState};
use crate::model::{Monitor, ResourceId, ResourceRule, Service, ServiceType};
use crate::platform::Platform;

use super::Validator;

/// Report for a ×10-scaled value ("cpu usage of 90.1% matches resource
/// limit [cpu usage > 90.0%]").
fn scaled_report(
    service: &Service,
    rule: &ResourceRule,
    value: i64,
    noun: &str,
    unit: &str,
) -> (bool, String) {
    if rule.operator.matches(value, rule.limit) {
        (
            true,
            format!(
                "{} of {:.1}{} matches resource limit [{}{}{:.1}{}]",
                noun,
                value as f64 / 10.0,
                unit,
                noun,
                rule.operator,
                rule.limit as f64 / 10.0,
                unit
            ),
        )
    } else {
        (
            false,
            format!(
                "'{}' {} check succeeded [current {}={:.1}{}]",
                service.name,
                noun,
                noun,
                value as f64 / 10.0,
                unit
            ),
        )
    }
}

/// Report for an absolute value ("mem amount of 1024kB matches resource
/// limit [mem amount > 512kB]").
fn amount_report(
    service: &Service,
    rule: &ResourceRule,
    value: i64,
    noun: &str,
    unit: &str,
) -> (bool, String) {
    if rule.operator.matches(value, rule.limit) {
        (
            true,
            format!(
                "{} of {}{} matches resource limit [{}{}{}{}]",
                noun, value, unit, noun, rule.operator, rule.limit, unit
            ),
        )
    } else {
        (
            false,
            format!(
                "'{}' {} check succeeded [current {}={}{}]",
                service.name, noun, noun, value, unit
            ),
        )
    }
}

impl<P: Platform, S: EventSink> Validator<P, S> {
    /// Evaluates one resource rule and posts its Resource event. Rules
    /// whose value is not measurable this cycle post nothing.
    pub(crate) fn check_process_resource(&mut self, service: &mut Service, index: usize) {
        let rule = service.resources[index].clone();
        let system = *self.system();
        let initializing = service.monitor.contains(Monitor::INIT);

        let outcome = match rule.resource {
            ResourceId::CpuPercent => match service.inf.process.cpu_percent {
                Some(value) if !initializing => {
                    Some(scaled_report(service, &rule, value, "cpu usage", "%"))
                }
                _ => {
                    debug!(service = %service.name, "cpu usage check skipped (initializing)");
                    None
                }
            },
            ResourceId::TotalCpuPercent => match service.inf.process.total_cpu_percent {
                Some(value) if !initializing => {
                    Some(scaled_report(service, &rule, value, "total cpu usage", "%"))
                }
                _ => {
                    debug!(service = %service.name, "total cpu usage check skipped (initializing)");
                    None
                }
            },
            ResourceId::CpuUser => match system.cpu_user_percent {
                Some(value) if !initializing => {
                    Some(scaled_report(service, &rule, value, "cpu user usage", "%"))
                }
                _ => {
                    debug!(service = %service.name, "cpu user usage check skipped (initializing)");
                    None
                }
            },
            ResourceId::CpuSystem => match system.cpu_system_percent {
                Some(value) if !initializing => {
                    Some(scaled_report(service, &rule, value, "cpu system usage", "%"))
                }
                _ => {
                    debug!(service = %service.name, "cpu system usage check skipped (initializing)");
                    None
                }
            },
            ResourceId::CpuWait => match system.cpu_wait_percent {
                Some(value) if !initializing => {
                    Some(scaled_report(service, &rule, value, "cpu wait usage", "%"))
                }
                _ => {
                    debug!(service = %service.name, "cpu wait usage check skipped (initializing)");
                    None
                }
            },
            ResourceId::MemPercent => {
                let value = if service.kind == ServiceType::System {
                    system.mem_percent
                } else {
                    service.inf.process.mem_percent
                };
                Some(scaled_report(service, &rule, value, "mem usage", "%"))
            }
            ResourceId::MemKbyte => {
                let value = if service.kind == ServiceType::System {
                    system.mem_kbyte
                } else {
                    service.inf.process.mem_kbyte
                };
                Some(amount_report(service, &rule, value, "mem amount", "kB"))
            }
            ResourceId::SwapPercent => (service.kind == ServiceType::System)
                .then(|| scaled_report(service, &rule, system.swap_percent, "swap usage", "%")),
            ResourceId::SwapKbyte => (service.kind == ServiceType::System)
                .then(|| amount_report(service, &rule, system.swap_kbyte, "swap amount", "kB")),
            ResourceId::LoadAvg1 => {
                let value = (system.loadavg[0] * 10.0) as i64;
                Some(scaled_report(service, &rule, value, "loadavg(1min)", ""))
            }
            ResourceId::LoadAvg5 => {
                let value = (system.loadavg[1] * 10.0) as i64;
                Some(scaled_report(service, &rule, value, "loadavg(5min)", ""))
            }
            ResourceId::LoadAvg15 => {
                let value = (system.loadavg[2] * 10.0) as i64;
                Some(scaled_report(service, &rule, value, "loadavg(15min)", ""))
            }
            ResourceId::Children => Some(amount_report(
                service,
                &rule,
                service.inf.process.children,
                "children",
                "",
            )),
            ResourceId::TotalMemKbyte => Some(amount_report(
                service,
                &rule,
                service.inf.process.total_mem_kbyte,
                "total mem amount",
                "kB",
            )),
            ResourceId::TotalMemPercent => Some(scaled_report(
                service,
                &rule,
                service.inf.process.total_mem_percent,
                "total mem amount",
                "%",
            )),
        };

        let Some((fired, report)) = outcome else {
            return;
        };
        if fired {
            self.post(service, EventKind::Resource, EventState::Failed, rule.action, report);
        } else {
            debug!(service = %service.name, "{}", report);
            self.post(
                service,
                EventKind::Resource,
                EventState::Succeeded,
                rule.action,
                report,
            );
        }
    }
}
