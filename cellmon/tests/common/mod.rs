#![allow(dead_code)]
use cellmon::transport::{Connector, Transport, TransportError};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// A simulated modem: answers each AT command from a table, echoing the
/// command first like a SIM800 with `ATE1`.
#[derive(Clone, Default)]
pub struct FakeModem {
    answers: Arc<Mutex<HashMap<String, Vec<String>>>>,
    pub echo: bool,
}

impl FakeModem {
    pub fn new() -> Self {
        Self {
            echo: true,
            ..Default::default()
        }
    }

    /// A modem that never answers anything.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn answer(self, command: &str, lines: &[&str]) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(command.to_owned(), lines.iter().map(|l| l.to_string()).collect());
        self
    }

    pub fn sim800() -> Self {
        Self::new()
            .answer("AT", &["OK"])
            .answer("AT+CPIN?", &["+CPIN: READY", "", "OK"])
            .answer("AT+CSQ", &["", "+CSQ: 20,0", "", "OK"])
            .answer("AT+COPS?", &["", "+COPS: 0,0,\"MTN\"", "", "OK"])
            .answer("AT+CGREG?", &["", "+CGREG: 0,3", "", "OK"])
            .answer(
                "AT+CIPGSMLOC=1,1",
                &["", "+CIPGSMLOC: 0,3.379206,6.524379,2025/02/03,14:30:45", "", "OK"],
            )
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector {
            modem: Some(self.clone()),
        }
    }
}

pub struct FakeConnector {
    modem: Option<FakeModem>,
}

impl FakeConnector {
    /// Behaves like a port that does not exist.
    pub fn missing() -> Self {
        Self { modem: None }
    }
}

impl Connector for FakeConnector {
    fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let modem = self.modem.clone().ok_or(TransportError::Closed)?;
        Ok(Box::new(FakeLink {
            modem,
            rx: Vec::new(),
            open: true,
        }))
    }

    fn describe(&self) -> String {
        "fake-modem".into()
    }
}

struct FakeLink {
    modem: FakeModem,
    rx: Vec<String>,
    open: bool,
}

impl Transport for FakeLink {
    fn is_open(&self) -> bool {
        self.open
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.rx.clear();
        if self.modem.echo {
            self.rx.push(line.to_owned());
        }
        if let Some(answer) = self.modem.answers.lock().unwrap().get(line) {
            self.rx.extend(answer.iter().cloned());
        }
        self.rx.reverse();
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<String, TransportError> {
        self.rx.pop().ok_or(TransportError::Timeout(timeout))
    }

    fn close(&mut self) {
        self.open = false;
    }
}
