//! One-command-at-a-time AT client.

use crate::transport::{Transport, TransportError};
use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tracing::{debug, warn};

/// Outcome of a single AT exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResponse {
    /// The first meaningful line the modem sent back.
    Line(String),
    /// The modem answered with `ERROR`, `+CME ERROR: ..` or similar.
    Error(String),
    /// Nothing arrived before the timeout.
    NoResponse,
    /// There is no open transport.
    NotConnected,
}

impl AtResponse {
    /// Response text, empty unless the modem answered.
    pub fn text(&self) -> &str {
        match self {
            Self::Line(line) | Self::Error(line) => line,
            Self::NoResponse | Self::NotConnected => "",
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Self::Line(_))
    }
}

/// A command together with what came back for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub command: String,
    pub expected_prefix: String,
    pub response: AtResponse,
}

impl Exchange {
    pub fn text(&self) -> &str {
        self.response.text()
    }

    /// True when the modem answered with the expected prefix.
    pub fn is_expected(&self) -> bool {
        match &self.response {
            AtResponse::Line(line) => line.contains(&self.expected_prefix),
            _ => false,
        }
    }
}

/// Serializes AT exchanges over a shared [`Transport`].
///
/// The channel has no request tagging, so a write and its read must never
/// interleave with another caller's. The transport lives behind a mutex that
/// is held for the whole exchange; later callers block until it is released.
pub struct AtClient {
    transport: Mutex<Option<Box<dyn Transport>>>,
    timeout: Duration,
}

impl AtClient {
    pub fn new(transport: Option<Box<dyn Transport>>, timeout: Duration) -> Self {
        Self {
            transport: Mutex::new(transport),
            timeout,
        }
    }

    pub fn disconnected(timeout: Duration) -> Self {
        Self::new(None, timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_connected(&self) -> bool {
        self.lock().as_ref().is_some_and(|t| t.is_open())
    }

    /// True when a transport is attached, open or not.
    pub fn has_transport(&self) -> bool {
        self.lock().is_some()
    }

    /// Reopens the attached transport in place if it was closed.
    pub fn reopen(&self) -> Result<(), TransportError> {
        match self.lock().as_mut() {
            Some(transport) if transport.is_open() => Ok(()),
            Some(transport) => transport.reopen(),
            None => Err(TransportError::Closed),
        }
    }

    /// Replaces the transport, closing the previous one.
    pub fn attach(&self, transport: Box<dyn Transport>) {
        let mut guard = self.lock();
        if let Some(old) = guard.as_mut() {
            old.close();
        }
        *guard = Some(transport);
    }

    pub fn detach(&self) {
        if let Some(mut transport) = self.lock().take() {
            transport.close();
        }
    }

    /// Sends with the client's default timeout.
    pub fn send(&self, command: &str, expected_prefix: &str) -> Exchange {
        self.send_with_timeout(command, expected_prefix, self.timeout)
    }

    /// Writes `command` + CR+LF and waits for one response line.
    ///
    /// Blank lines and the modem's echo of `command` are skipped. There is no
    /// retry here.
    pub fn send_with_timeout(
        &self,
        command: &str,
        expected_prefix: &str,
        timeout: Duration,
    ) -> Exchange {
        let response = {
            let mut guard = self.lock();
            match guard.as_mut() {
                Some(transport) => exchange(transport.as_mut(), command, timeout),
                None => AtResponse::NotConnected,
            }
        };

        let exchange = Exchange {
            command: command.to_owned(),
            expected_prefix: expected_prefix.to_owned(),
            response,
        };
        match &exchange.response {
            AtResponse::Line(_) if !exchange.is_expected() => {
                debug!(command, response = exchange.text(), expected_prefix, "unexpected AT response");
            }
            AtResponse::Line(line) => debug!(command, response = %line, "AT response"),
            AtResponse::Error(line) => warn!(command, response = %line, "AT command returned error"),
            AtResponse::NoResponse => debug!(command, ?timeout, "no AT response"),
            AtResponse::NotConnected => debug!(command, "AT command skipped, modem not connected"),
        }

        exchange
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.transport.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn exchange(transport: &mut dyn Transport, command: &str, timeout: Duration) -> AtResponse {
    if !transport.is_open() {
        if let Err(e) = transport.reopen() {
            debug!(error = %e, "failed to reopen transport");
            return AtResponse::NotConnected;
        }
    }

    debug!(command, "sending AT command");
    if let Err(e) = transport.write_line(command) {
        warn!(command, error = %e, "failed to write AT command, closing transport");
        transport.close();
        return AtResponse::NotConnected;
    }

    let deadline = std::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return AtResponse::NoResponse;
        }

        match transport.read_line(remaining) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() || line == command {
                    continue;
                }
                if line.contains("ERROR") {
                    return AtResponse::Error(line.to_owned());
                }
                return AtResponse::Line(line.to_owned());
            }
            Err(TransportError::Timeout(_)) => return AtResponse::NoResponse,
            Err(TransportError::Closed) => return AtResponse::NotConnected,
            Err(e) => {
                warn!(command, error = %e, "failed to read AT response, closing transport");
                transport.close();
                return AtResponse::NotConnected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Barrier},
        thread,
        time::Instant,
    };

    #[derive(Default)]
    struct Scripted {
        open: bool,
        reopen_fails: bool,
        lines: VecDeque<String>,
    }

    impl Transport for Scripted {
        fn is_open(&self) -> bool {
            self.open
        }

        fn reopen(&mut self) -> Result<(), TransportError> {
            if self.reopen_fails {
                return Err(TransportError::Closed);
            }
            self.open = true;
            Ok(())
        }

        fn write_line(&mut self, _: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
            self.lines.pop_front().ok_or(TransportError::Timeout(timeout))
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    fn scripted(lines: &[&str]) -> Scripted {
        Scripted {
            open: true,
            lines: lines.iter().map(|l| l.to_string()).collect(),
            ..Default::default()
        }
    }

    fn client(transport: Scripted, timeout: Duration) -> AtClient {
        AtClient::new(Some(Box::new(transport) as Box<dyn Transport>), timeout)
    }

    #[test]
    fn skips_echo_and_blank_lines() {
        let client = client(
            scripted(&["AT+CSQ", "", "+CSQ: 20,0", "OK"]),
            Duration::from_secs(1),
        );

        let exchange = client.send("AT+CSQ", "+CSQ:");
        assert_eq!(exchange.response, AtResponse::Line("+CSQ: 20,0".into()));
        assert!(exchange.is_expected());
    }

    #[test]
    fn error_lines_are_typed() {
        let client = client(scripted(&["+CME ERROR: 10"]), Duration::from_secs(1));

        let exchange = client.send("AT+CPIN?", "+CPIN:");
        assert_eq!(exchange.response, AtResponse::Error("+CME ERROR: 10".into()));
        assert!(!exchange.is_expected());
    }

    #[test]
    fn timeout_is_no_response() {
        let client = client(scripted(&[]), Duration::from_millis(50));

        let exchange = client.send("AT", "OK");
        assert_eq!(exchange.response, AtResponse::NoResponse);
        assert_eq!(exchange.text(), "");
    }

    #[test]
    fn absent_transport_is_not_connected_without_blocking() {
        let client = AtClient::disconnected(Duration::from_secs(5));

        let start = Instant::now();
        let exchange = client.send("AT+CSQ", "+CSQ:");
        assert_eq!(exchange.response, AtResponse::NotConnected);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn closed_transport_is_reopened_before_write() {
        let mut transport = scripted(&["OK"]);
        transport.open = false;
        let client = client(transport, Duration::from_secs(1));

        assert_eq!(client.send("AT", "OK").response, AtResponse::Line("OK".into()));
        assert!(client.is_connected());
    }

    #[test]
    fn failed_reopen_is_not_connected() {
        let mut transport = scripted(&["OK"]);
        transport.open = false;
        transport.reopen_fails = true;
        let client = client(transport, Duration::from_secs(1));

        assert_eq!(client.send("AT", "OK").response, AtResponse::NotConnected);
    }

    #[test]
    fn reopen_revives_attached_transport() {
        let mut transport = scripted(&[]);
        transport.open = false;
        let client = client(transport, Duration::from_secs(1));

        assert!(client.has_transport());
        assert!(!client.is_connected());
        client.reopen().unwrap();
        assert!(client.is_connected());

        let client = AtClient::disconnected(Duration::from_secs(1));
        assert!(!client.has_transport());
        assert!(matches!(client.reopen(), Err(TransportError::Closed)));
    }

    #[test]
    fn concurrent_senders_do_not_interleave() {
        struct Echoing {
            pending: Option<String>,
        }

        impl Transport for Echoing {
            fn is_open(&self) -> bool {
                true
            }
            fn reopen(&mut self) -> Result<(), TransportError> {
                Ok(())
            }
            fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
                assert!(self.pending.is_none(), "write while a read is outstanding");
                self.pending = Some(format!("+ECHO: {line}"));
                Ok(())
            }
            fn read_line(&mut self, _: Duration) -> Result<String, TransportError> {
                thread::sleep(Duration::from_millis(5));
                Ok(self.pending.take().expect("read without write"))
            }
            fn close(&mut self) {}
        }

        let client = Arc::new(AtClient::new(
            Some(Box::new(Echoing { pending: None }) as Box<dyn Transport>),
            Duration::from_secs(1),
        ));
        let barrier = Arc::new(Barrier::new(4));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let client = Arc::clone(&client);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let cmd = format!("AT+X{i}");
                    let exchange = client.send(&cmd, "+ECHO:");
                    assert_eq!(exchange.text(), format!("+ECHO: {cmd}"));
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
