use crate::errors::*;
use crate::serial::{Connector, SerialSettings, Transport};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

/// What the firmware prints every few seconds when things go well.
const FIRMWARE_OUTPUT: &str = "CO2: 411.0 ppm, Temp: 21.50 °C, RH: 40.00 %\r\n\
                               JSON:{\"temperature\": 21.5, \"humidity\": 40.0, \"co2\": 411.0}\r\n";

/// One scripted event of the mock device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(not(test), allow(dead_code))]
pub enum MockChunk {
    Data(Vec<u8>),
    /// Nothing arrives during one availability check.
    Silence,
    IoError,
}

#[derive(Default)]
#[cfg_attr(not(test), allow(dead_code))]
struct MockState {
    chunks: VecDeque<MockChunk>,
    repeat: Option<Vec<u8>>,
    refuse_open: bool,
    opens: u32,
    clears: u32,
    transport_calls: u32,
}

/// In-process stand-in for the board.
///
/// Scripted chunks are delivered in order after the connection settled, so
/// clearing the input buffer on connect never drops them. Clones share the
/// same script, which lets a test keep a handle on a connector it gave away.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Rc<RefCell<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device printing the same firmware output forever.
    pub fn firmware() -> Self {
        let mock = Self::new();
        mock.state.borrow_mut().repeat = Some(FIRMWARE_OUTPUT.as_bytes().to_vec());
        mock
    }
}

#[cfg(test)]
impl MockConnector {
    pub fn push(&self, chunk: MockChunk) {
        self.state.borrow_mut().chunks.push_back(chunk);
    }

    pub fn push_data(&self, data: &str) {
        self.push(MockChunk::Data(data.as_bytes().to_vec()));
    }

    pub fn refuse_open(&self, refuse: bool) {
        self.state.borrow_mut().refuse_open = refuse;
    }

    pub fn opens(&self) -> u32 {
        self.state.borrow().opens
    }

    pub fn clears(&self) -> u32 {
        self.state.borrow().clears
    }

    pub fn transport_calls(&self) -> u32 {
        self.state.borrow().transport_calls
    }
}

impl Connector for MockConnector {
    type Port = MockPort;

    fn open(&self, settings: &SerialSettings) -> Result<MockPort> {
        let mut state = self.state.borrow_mut();
        state.opens += 1;
        if state.refuse_open {
            bail!(ErrorKind::Connection(
                settings.path.clone(),
                "mock device refused to open".to_string()
            ));
        }
        Ok(MockPort {
            state: self.state.clone(),
        })
    }
}

pub struct MockPort {
    state: Rc<RefCell<MockState>>,
}

impl Transport for MockPort {
    fn bytes_available(&mut self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        match state.chunks.front() {
            Some(MockChunk::Data(data)) => Ok(data.len() as u32),
            Some(MockChunk::Silence) => {
                state.chunks.pop_front();
                Ok(0)
            }
            Some(MockChunk::IoError) => {
                state.chunks.pop_front();
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock device unplugged").into())
            }
            None => Ok(state.repeat.as_ref().map_or(0, |data| data.len() as u32)),
        }
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        let (data, scripted) = match state.chunks.pop_front() {
            Some(MockChunk::Data(data)) => (data, true),
            Some(other) => {
                state.chunks.push_front(other);
                return Ok(0);
            }
            None => match &state.repeat {
                Some(data) => (data.clone(), false),
                None => return Ok(0),
            },
        };

        let read = data.len().min(buf.len());
        buf[..read].copy_from_slice(&data[..read]);
        if read < data.len() && scripted {
            state.chunks.push_front(MockChunk::Data(data[read..].to_vec()));
        }
        Ok(read)
    }

    fn clear_input(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.transport_calls += 1;
        state.clears += 1;
        Ok(())
    }
}
