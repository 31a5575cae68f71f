use crate::errors::*;
use crate::serial::{Connector, SerialSettings, Transport};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::Read;

/// Opens real serial devices through `serialport`.
pub struct SerialPortConnector;

impl Connector for SerialPortConnector {
    type Port = Box<dyn SerialPort>;

    fn open(&self, settings: &SerialSettings) -> Result<Self::Port> {
        // the board's USB CDC console, 8N1 without flow control
        serialport::new(settings.path.as_str(), settings.baud_rate)
            .timeout(settings.read_timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()
            .map_err(|e| ErrorKind::Connection(settings.path.clone(), e.to_string()).into())
    }
}

impl Transport for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> Result<u32> {
        Ok((**self).bytes_to_read()?)
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok((**self).read(buf)?)
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok((**self).clear(ClearBuffer::Input)?)
    }
}
