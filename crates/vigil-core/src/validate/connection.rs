//! Connection probe: open a socket to a port target, verify readiness
//! and the configured protocol, time the exchange, and retry on failure
//! until the port's retry budget is spent.

use std::time::Instant;

use tracing::debug;

use crate::event::{EventKind, EventSink, EventState};
use crate::model::Service;
use crate::platform::{DefaultProtocol, Platform};

use super::Validator;

impl<P: Platform, S: EventSink> Validator<P, S> {
    /// Probes one port of the service. The readiness poll runs for every
    /// stream socket but for datagram sockets only when no protocol test
    /// is configured: polling a connectionless socket costs seconds and
    /// a real protocol test covers the same ground.
    pub(crate) fn check_connection(&mut self, service: &mut Service, index: usize) {
        let target = service.ports[index].target.clone();
        let timeout = service.ports[index].timeout;
        let retry = service.ports[index].retry.max(1);
        let description = target.to_string();

        let mut report = String::new();
        let mut response = None;

        for attempt in 1..=retry {
            let started = Instant::now();
            let mut conduit = match self.platform.connect(&target, timeout) {
                Ok(conduit) => conduit,
                Err(_) => {
                    report = format!("failed, cannot open a connection to {}", description);
                    if attempt < retry {
                        debug!(service = %service.name, attempt, retry, "{}", report);
                    }
                    continue;
                }
            };
            debug!(service = %service.name, target = %description, "succeeded connecting");

            let protocol = &service.ports[index].protocol;
            let no_protocol = protocol.name() == DefaultProtocol::NAME;
            if !conduit.is_datagram() || no_protocol {
                if let Err(e) = conduit.ready() {
                    report = format!(
                        "connection failed, {} is not ready for i|o -- {}",
                        description, e
                    );
                    if attempt < retry {
                        debug!(service = %service.name, attempt, retry, "{}", report);
                    }
                    continue;
                }
            }

            if let Err(e) = protocol.check(&mut *conduit) {
                report = format!(
                    "failed protocol test [{}] at {} -- {}",
                    protocol.name(),
                    description,
                    e
                );
                if attempt < retry {
                    debug!(service = %service.name, attempt, retry, "{}", report);
                }
                continue;
            }
            debug!(
                service = %service.name,
                protocol = protocol.name(),
                target = %description,
                "succeeded testing protocol"
            );

            response = Some(started.elapsed());
            break;
        }

        let port = &mut service.ports[index];
        match response {
            Some(elapsed) => {
                port.response = Some(elapsed);
                port.is_available = true;
                let action = port.action;
                let message = format!("connection succeeded to {}", description);
                self.post(
                    service,
                    EventKind::Connection,
                    EventState::Succeeded,
                    action,
                    message,
                );
            }
            None => {
                port.response = None;
                port.is_available = false;
                let action = port.action;
                self.post(service, EventKind::Connection, EventState::Failed, action, report);
            }
        }
    }
}
