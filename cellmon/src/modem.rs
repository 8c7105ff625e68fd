use crate::{
    at::{AtClient, AtResponse, Exchange},
    parser::{self, GeoFix, OperatorInfo, RegistrationState, SignalSample},
    transport::Connector,
};
use serde::Serialize;
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tracing::{error, info, warn};

pub const CMD_AT: &str = "AT";
pub const CMD_SIM_STATUS: &str = "AT+CPIN?";
pub const CMD_SIGNAL: &str = "AT+CSQ";
pub const CMD_OPERATOR: &str = "AT+COPS?";
pub const CMD_REGISTRATION: &str = "AT+CGREG?";
pub const CMD_LOCATION: &str = "AT+CIPGSMLOC=1,1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Ready,
}

/// Snapshot of the modem's basic health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModemStatus {
    pub session: SessionState,
    pub module_detected: bool,
    pub sim_inserted: bool,
    pub signal: Option<SignalSample>,
}

/// Capability surface of a cellular modem.
///
/// Every probe re-queries the modem and is independently fail-soft: a dead
/// link or a garbled answer turns into `false` / `None` / `Unknown`.
pub struct ModemSession {
    connector: Option<Box<dyn Connector>>,
    client: AtClient,
    state: Mutex<SessionState>,
}

impl ModemSession {
    pub fn new(connector: impl Connector + 'static, timeout: Duration) -> Self {
        Self {
            connector: Some(Box::new(connector)),
            client: AtClient::disconnected(timeout),
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    /// A session with no device behind it. Every probe reports nothing.
    pub fn unavailable(timeout: Duration) -> Self {
        Self {
            connector: None,
            client: AtClient::disconnected(timeout),
            state: Mutex::new(SessionState::Disconnected),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    /// Opens the transport. Returns whether the session is `Ready`.
    ///
    /// Succeeds as soon as the port opens; the modem itself may still be
    /// silent, which later probes report as "not detected". A link that is
    /// already attached is reused, reopening it in place if it was closed, so
    /// the port is never held twice. Failure to open is logged and leaves the
    /// session `Disconnected`.
    pub fn connect(&self) -> bool {
        let mut state = self.lock_state();
        if self.client.is_connected() {
            *state = SessionState::Ready;
            return true;
        }

        let Some(connector) = &self.connector else {
            *state = SessionState::Disconnected;
            return false;
        };

        *state = SessionState::Connecting;
        let opened = if self.client.has_transport() {
            self.client.reopen()
        } else {
            connector.open().map(|transport| self.client.attach(transport))
        };

        match opened {
            Ok(()) => {
                *state = SessionState::Ready;
                info!(device = %connector.describe(), "connected to modem");
                true
            }
            Err(e) => {
                *state = SessionState::Disconnected;
                error!(device = %connector.describe(), error = %e, "failed to connect to modem");
                false
            }
        }
    }

    pub fn disconnect(&self) {
        self.client.detach();
        *self.lock_state() = SessionState::Disconnected;
    }

    pub fn is_module_detected(&self) -> bool {
        let exchange = self.send(CMD_AT, "OK");
        parser::is_ok(exchange.text())
    }

    pub fn is_sim_inserted(&self) -> bool {
        let exchange = self.send(CMD_SIM_STATUS, "+CPIN:");
        parser::parse_cpin(exchange.text())
    }

    pub fn signal_strength(&self) -> Option<SignalSample> {
        let exchange = self.send(CMD_SIGNAL, "+CSQ:");
        let sample = parser::parse_csq(exchange.text());
        if sample.is_none() && exchange.response.is_line() {
            warn!(response = exchange.text(), "failed to parse signal strength");
        }
        sample
    }

    pub fn operator(&self) -> OperatorInfo {
        let exchange = self.send(CMD_OPERATOR, "+COPS:");
        parser::parse_cops(exchange.text())
    }

    pub fn network_type(&self) -> RegistrationState {
        let exchange = self.send(CMD_REGISTRATION, "+CGREG:");
        parser::parse_cgreg(exchange.text())
    }

    pub fn location(&self) -> GeoFix {
        let exchange = self.send(CMD_LOCATION, "+CIPGSMLOC:");
        parser::parse_cipgsmloc(exchange.text())
    }

    pub fn status(&self) -> ModemStatus {
        let module_detected = self.is_module_detected();
        let sim_inserted = self.is_sim_inserted();
        let signal = self.signal_strength();

        ModemStatus {
            session: self.state(),
            module_detected,
            sim_inserted,
            signal,
        }
    }

    fn send(&self, command: &str, expected_prefix: &str) -> Exchange {
        let exchange = self.client.send(command, expected_prefix);
        let mut state = self.lock_state();
        match (exchange.response == AtResponse::NotConnected, *state) {
            (true, SessionState::Ready) => {
                warn!(command, "modem link lost");
                *state = SessionState::Disconnected;
            }
            // The client reopened the link on its own.
            (false, SessionState::Disconnected) => {
                info!(command, "modem link restored");
                *state = SessionState::Ready;
            }
            _ => {}
        }
        drop(state);

        exchange
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
