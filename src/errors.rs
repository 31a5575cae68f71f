error_chain! {
    foreign_links {
        IOError(std::io::Error);
        SerialError(serialport::Error);
    }

    errors {
        Connection(path: String, reason: String) {
            description("unable to open serial device")
            display("unable to open serial device {}: {}", path, reason)
        }
        Sink(reason: String) {
            description("unable to write point to sink")
            display("unable to write point to sink: {}", reason)
        }
        /// The sink answered but refused the point, retrying will not help.
        SinkRejected(status: u16, body: String) {
            description("point rejected by sink")
            display("point rejected by sink (HTTP {}): {}", status, body)
        }
        Config(reason: String) {
            description("invalid configuration")
            display("invalid configuration: {}", reason)
        }
    }
}

impl Error {
    /// Whether a failed sink write is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self.kind() {
            ErrorKind::SinkRejected(..) | ErrorKind::Config(_) => false,
            _ => true,
        }
    }
}
