use crate::collector::CollectorSettings;
use crate::errors::*;
use crate::serial::SerialSettings;
use crate::sink::{InfluxConfig, MqttConfig, RetryPolicy};
use std::time::Duration;
use structopt::StructOpt;

/// Availability of the serial input is checked this often during a poll.
pub const POLL_STEP: Duration = Duration::from_millis(500);
pub const SERIAL_READ_TIMEOUT: Duration = Duration::from_secs(2);
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const BACKOFF_MULTIPLIER: u32 = 2;
/// Port name reported when running against the in-process mock board.
pub const MOCK_SERIAL_PATH: &str = "__mock__";

arg_enum! {
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum SinkKind {
        Influx,
        Mqtt,
        Log,
    }
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "co2-collector",
    about = "Reads CO2 / environment readings from a sensor board over serial and writes them to InfluxDB"
)]
pub struct Opt {
    /// print out some debugging information
    #[structopt(short = "d", long = "debug")]
    pub debug: bool,
    /// Use an in-process mock board instead of a serial device
    #[structopt(short = "m", long = "mock-serial")]
    pub mock_serial: bool,
    /// The serial port name or device path (eg: /dev/ttyACM0 or COM3)
    #[structopt(name = "serial_port", env = "COM_PORT")]
    pub serial_port: Option<String>,
    #[structopt(long = "baud-rate", default_value = "115200")]
    pub baud_rate: u32,
    /// Sensor read interval in second
    #[structopt(
        short = "i",
        long = "read-interval",
        env = "MEASUREMENT_INTERVAL",
        default_value = "60"
    )]
    pub read_interval_secs: u64,
    /// Read interval in second while reads keep failing
    #[structopt(long = "recovery-interval", default_value = "10")]
    pub recovery_interval_secs: u64,
    /// How long a read waits for the board to print something, in second
    #[structopt(long = "poll-timeout", default_value = "10")]
    pub poll_timeout_secs: u64,
    /// Wait after opening the serial port, in millisecond
    #[structopt(long = "settle-delay", default_value = "2000")]
    pub settle_delay_ms: u64,
    /// Consecutive failed reads before the serial port is reopened
    #[structopt(long = "failure-threshold", default_value = "5")]
    pub failure_threshold: u32,
    /// Pause between closing and reopening the serial port, in second
    #[structopt(long = "reconnect-delay", default_value = "2")]
    pub reconnect_delay_secs: u64,
    /// Value of the `device` tag on written points
    #[structopt(long = "device-id", default_value = "feather_s2")]
    pub device_id: String,
    #[structopt(
        long = "sink",
        default_value = "influx",
        possible_values = &SinkKind::variants(),
        case_insensitive = true
    )]
    pub sink: SinkKind,
    #[structopt(long = "influx-url", env = "INFLUXDB_URL")]
    pub influx_url: Option<String>,
    #[structopt(long = "influx-token", env = "INFLUXDB_TOKEN", hide_env_values = true)]
    pub influx_token: Option<String>,
    #[structopt(long = "influx-org", env = "INFLUXDB_ORG")]
    pub influx_org: Option<String>,
    #[structopt(long = "influx-bucket", env = "INFLUXDB_BUCKET")]
    pub influx_bucket: Option<String>,
    #[structopt(long = "mqtt-port", default_value = "1883")]
    pub mqtt_port: u16,
    #[structopt(long = "mqtt-host", default_value = "mosquitto")]
    pub mqtt_host: String,
    #[structopt(long = "mqtt-base-topic", default_value = "co2-collector")]
    pub mqtt_base_topic: String,
    /// Write attempts per reading before it is dropped
    #[structopt(long = "sink-attempts", default_value = "3")]
    pub sink_attempts: u32,
    /// Wait before the first write retry, doubled on each further retry, in millisecond
    #[structopt(long = "sink-backoff", default_value = "1000")]
    pub sink_backoff_ms: u64,
    /// Serve the reading history on this address (eg: 0.0.0.0:9090)
    #[structopt(short = "b", long = "bind-address")]
    pub bind_address: Option<String>,
    /// History size kept for /debug endpoint
    #[structopt(long = "history-size", default_value = "300")]
    pub history_size: usize,
}

#[derive(Debug, Clone)]
pub enum SinkConfig {
    Influx(InfluxConfig),
    Mqtt(MqttConfig),
    Log,
}

/// Everything the collector needs, checked once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub serial: SerialSettings,
    pub failure_threshold: u32,
    pub mock_serial: bool,
    pub collector: CollectorSettings,
    pub sink: SinkConfig,
    pub bind_address: Option<String>,
    pub history_size: usize,
}

impl Config {
    pub fn from_opt(opt: Opt) -> Result<Config> {
        let path = match (opt.serial_port, opt.mock_serial) {
            (Some(path), _) => path,
            (None, true) => MOCK_SERIAL_PATH.to_string(),
            (None, false) => {
                bail!(ErrorKind::Config(
                    "no serial port given (argument or COM_PORT)".to_string()
                ));
            }
        };
        if opt.failure_threshold == 0 {
            bail!(ErrorKind::Config("failure threshold must be at least 1".to_string()));
        }
        if opt.read_interval_secs == 0 {
            bail!(ErrorKind::Config("read interval must be at least 1 second".to_string()));
        }
        if opt.recovery_interval_secs == 0 {
            bail!(ErrorKind::Config("recovery interval must be at least 1 second".to_string()));
        }
        if opt.sink_attempts == 0 {
            bail!(ErrorKind::Config("sink attempts must be at least 1".to_string()));
        }

        let sink = match opt.sink {
            SinkKind::Influx => SinkConfig::Influx(InfluxConfig {
                url: required("INFLUXDB_URL", opt.influx_url)?,
                token: required("INFLUXDB_TOKEN", opt.influx_token)?,
                org: required("INFLUXDB_ORG", opt.influx_org)?,
                bucket: required("INFLUXDB_BUCKET", opt.influx_bucket)?,
                timeout: HTTP_TIMEOUT,
            }),
            SinkKind::Mqtt => SinkConfig::Mqtt(MqttConfig::new(
                opt.mqtt_host,
                opt.mqtt_port,
                opt.mqtt_base_topic,
                format!("co2-collector-{}", opt.device_id),
            )),
            SinkKind::Log => SinkConfig::Log,
        };

        Ok(Config {
            serial: SerialSettings {
                path,
                baud_rate: opt.baud_rate,
                settle_delay: Duration::from_millis(opt.settle_delay_ms),
                poll_timeout: Duration::from_secs(opt.poll_timeout_secs),
                poll_step: POLL_STEP,
                read_timeout: SERIAL_READ_TIMEOUT,
            },
            failure_threshold: opt.failure_threshold,
            mock_serial: opt.mock_serial,
            collector: CollectorSettings {
                device_id: opt.device_id,
                poll_interval: Duration::from_secs(opt.read_interval_secs),
                recovery_interval: Duration::from_secs(opt.recovery_interval_secs),
                reconnect_delay: Duration::from_secs(opt.reconnect_delay_secs),
                retry: RetryPolicy {
                    max_attempts: opt.sink_attempts,
                    initial_backoff: Duration::from_millis(opt.sink_backoff_ms),
                    multiplier: BACKOFF_MULTIPLIER,
                },
            },
            sink,
            bind_address: opt.bind_address,
            history_size: opt.history_size,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match value.as_ref().map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ErrorKind::Config(format!("{} is required", name)).into()),
    }
}
