//! Remote-host checker: ICMP echo probes first, then port connections.
//! When the last ping in the list failed, the host is presumed down and
//! port probes are skipped for the cycle.

use tracing::debug;

use crate::event::{EventKind, EventSink, EventState};
use crate::model::Service;
use crate::platform::{IcmpOutcome, Platform};

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    pub(crate) fn check_remote_host(&mut self, service: &mut Service) -> bool {
        let host = service.path.display().to_string();
        let mut last_ping_available = None;

        for i in 0..service.icmps.len() {
            let entry = service.icmps[i].clone();
            let outcome = self.platform.icmp_echo(&host, entry.timeout, entry.count);
            match outcome {
                IcmpOutcome::PermissionDenied => {
                    service.icmps[i].is_available = true;
                    service.icmps[i].response = None;
                    debug!(
                        service = %service.name,
                        "icmp ping skipped -- no permission to create an icmp socket, \
                         run as root or widen net.ipv4.ping_group_range"
                    );
                }
                IcmpOutcome::Unreachable => {
                    service.icmps[i].is_available = false;
                    service.icmps[i].response = None;
                    debug!(service = %service.name, "icmp ping failed");
                    self.post(
                        service,
                        EventKind::Icmp,
                        EventState::Failed,
                        entry.action,
                        "failed ICMP test [Echo Request]".to_string(),
                    );
                }
                IcmpOutcome::Response(rtt) => {
                    service.icmps[i].is_available = true;
                    service.icmps[i].response = Some(rtt);
                    debug!(
                        service = %service.name,
                        response = %format_args!("{:.3}s", rtt.as_secs_f64()),
                        "icmp ping succeeded"
                    );
                    self.post(
                        service,
                        EventKind::Icmp,
                        EventState::Succeeded,
                        entry.action,
                        "succeeded ICMP test [Echo Request]".to_string(),
                    );
                }
            }
            last_ping_available = Some(service.icmps[i].is_available);
        }

        // An unanswered final ping means the host is down; probing its
        // ports would only produce noise.
        if last_ping_available == Some(false) {
            debug!(
                service = %service.name,
                "icmp ping failed, skipping any port connection tests"
            );
            return false;
        }

        for i in 0..service.ports.len() {
            self.check_connection(service, i);
        }

        true
    }
}
