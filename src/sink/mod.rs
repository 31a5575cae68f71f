use crate::errors::*;
use crate::reading::Reading;
use chrono::prelude::*;
use std::thread;
use std::time::Duration;

mod influx;
mod mqtt;

pub use self::influx::{InfluxConfig, InfluxSink};
pub use self::mqtt::{MqttConfig, MqttSink};

/// One time-series record, ready to be handed to a sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, f64)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    pub fn from_reading(reading: &Reading, device_id: &str, timestamp: DateTime<Utc>) -> Self {
        Point {
            measurement: reading.kind().measurement().to_string(),
            tags: vec![("device".to_string(), device_id.to_string())],
            fields: reading
                .fields()
                .into_iter()
                .map(|(field, value)| (field.name().to_string(), value))
                .collect(),
            timestamp,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// InfluxDB line protocol with a millisecond timestamp.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape(key, &[',', '=', ' ']));
            line.push('=');
            line.push_str(&escape(value, &[',', '=', ' ']));
        }
        let fields: Vec<String> = self
            .fields
            .iter()
            // NaN and infinities are not representable
            .filter(|(_, value)| value.is_finite())
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect();
        line.push(' ');
        line.push_str(&fields.join(","));
        line.push(' ');
        line.push_str(&self.timestamp.timestamp_millis().to_string());
        line
    }
}

fn escape(s: &str, specials: &[char]) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if specials.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Downstream store for readings.
pub trait Sink {
    fn name(&self) -> &str;

    fn write(&mut self, point: &Point) -> Result<()>;
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn write(&mut self, point: &Point) -> Result<()> {
        (**self).write(point)
    }
}

/// Only logs points, handy with `--mock-serial` or when no store is around.
pub struct LogSink;

impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn write(&mut self, point: &Point) -> Result<()> {
        info!("{}", point.to_line_protocol());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

/// Write a point, retrying transient failures with exponential backoff.
pub fn write_with_retry<S: Sink + ?Sized>(
    sink: &mut S,
    point: &Point,
    policy: &RetryPolicy,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match sink.write(point) {
            Ok(()) => return Ok(()),
            Err(e) => {
                if !e.is_retryable() || attempt >= policy.max_attempts {
                    return Err(e);
                }
                let delay = policy.backoff(attempt);
                warn!(
                    "Write to {} failed (attempt {}/{}): {}, retrying in {:?}",
                    sink.name(),
                    attempt,
                    policy.max_attempts,
                    e,
                    delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}
