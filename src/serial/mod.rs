use crate::decoder::{self, Decoded, NoData};
use crate::errors::*;
use std::thread;
use std::time::{Duration, Instant};

mod mock;
mod real;

#[cfg(test)]
pub use self::mock::MockChunk;
pub use self::mock::MockConnector;
pub use self::real::SerialPortConnector;

/// An opened serial link, seen as a plain byte stream.
pub trait Transport {
    /// Number of bytes currently waiting in the input buffer.
    fn bytes_available(&mut self) -> Result<u32>;
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;
    /// Drop whatever the device printed before we started listening.
    fn clear_input(&mut self) -> Result<()>;
}

/// Knows how to open the device described by `SerialSettings`.
pub trait Connector {
    type Port: Transport;

    fn open(&self, settings: &SerialSettings) -> Result<Self::Port>;
}

#[derive(Debug, Clone)]
pub struct SerialSettings {
    /// The serial port name or device path (eg: /dev/ttyACM0 or COM3)
    pub path: String,
    pub baud_rate: u32,
    /// Wait after opening, the board resets when the port opens
    pub settle_delay: Duration,
    /// How long a poll waits for the first byte
    pub poll_timeout: Duration,
    pub poll_step: Duration,
    /// Timeout of a single read on the underlying port
    pub read_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Consecutive polls that did not produce a complete reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCounter {
    count: u32,
    threshold: u32,
}

impl FailureCounter {
    pub fn new(threshold: u32) -> Self {
        FailureCounter {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Returns true once the threshold is reached.
    pub fn record_failure(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.reached()
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn reached(&self) -> bool {
        self.count >= self.threshold
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

/// Owns the connection to one serial device and decodes what it prints.
///
/// The reader never reconnects by itself: once `needs_reconnect` is set the
/// caller decides when to `disconnect` and `connect` again.
pub struct ResilientReader<C: Connector> {
    connector: C,
    settings: SerialSettings,
    state: ConnectionState,
    port: Option<C::Port>,
    failures: FailureCounter,
}

impl<C: Connector> ResilientReader<C> {
    pub fn new(connector: C, settings: SerialSettings, failure_threshold: u32) -> Self {
        ResilientReader {
            connector,
            settings,
            state: ConnectionState::Disconnected,
            port: None,
            failures: FailureCounter::new(failure_threshold),
        }
    }

    /// Open the device. Each attempt starts a new failure window.
    pub fn connect(&mut self) -> Result<()> {
        self.disconnect();
        self.failures.reset();
        self.state = ConnectionState::Connecting;
        info!(
            "Connecting to {} at {} baud",
            self.settings.path, self.settings.baud_rate
        );

        let mut port = match self.connector.open(&self.settings) {
            Ok(port) => port,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        thread::sleep(self.settings.settle_delay);
        match port.bytes_available() {
            Ok(0) => {}
            Ok(pending) => {
                debug!("Discarding {} stale bytes from {}", pending, self.settings.path);
                if let Err(e) = port.clear_input() {
                    warn!("Unable to clear input buffer of {}: {}", self.settings.path, e);
                }
            }
            Err(e) => warn!("Unable to check input buffer of {}: {}", self.settings.path, e),
        }

        self.port = Some(port);
        self.state = ConnectionState::Connected;
        info!("Connected to {}", self.settings.path);
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!("Disconnected from {}", self.settings.path);
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Wait for the device to print something and decode it.
    pub fn poll(&mut self) -> Decoded {
        let received = match (self.state, self.port.as_mut()) {
            (ConnectionState::Connected, Some(port)) => receive(port, &self.settings),
            _ => return self.record(Decoded::NoData(NoData::Disconnected)),
        };
        let decoded = match received {
            Ok(Some(bytes)) => {
                debug!("Received {:?}", String::from_utf8_lossy(&bytes));
                decoder::decode_bytes(&bytes)
            }
            Ok(None) => Decoded::NoData(NoData::Silence),
            Err(e) => {
                error!("Serial error on {}: {}", self.settings.path, e);
                self.disconnect();
                Decoded::NoData(NoData::Transport(e.to_string()))
            }
        };
        self.record(decoded)
    }

    fn record(&mut self, decoded: Decoded) -> Decoded {
        match decoded {
            Decoded::Reading(_) => self.failures.reset(),
            _ => {
                self.failures.record_failure();
            }
        }
        decoded
    }

    pub fn needs_reconnect(&self) -> bool {
        self.failures.reached()
    }

    pub fn failures(&self) -> &FailureCounter {
        &self.failures
    }

    #[cfg(test)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

/// Everything buffered once the first byte shows up, `None` on timeout.
fn receive<T: Transport>(port: &mut T, settings: &SerialSettings) -> Result<Option<Vec<u8>>> {
    let deadline = Instant::now() + settings.poll_timeout;
    let available = loop {
        let available = port.bytes_available()?;
        if available > 0 {
            break available;
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(settings.poll_step.min(deadline - now));
    };

    let mut buf = vec![0; available as usize];
    let read = port.read_available(&mut buf)?;
    buf.truncate(read);
    Ok(Some(buf))
}
