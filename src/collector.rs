use crate::datastore::{DataStore, Sample};
use crate::decoder::Decoded;
use crate::reading::Reading;
use crate::serial::{Connector, ResilientReader};
use crate::sink::{write_with_retry, Point, RetryPolicy, Sink};
use chrono::prelude::*;
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// `device` tag of the written points
    pub device_id: String,
    pub poll_interval: Duration,
    /// Shorter interval used while polls keep failing
    pub recovery_interval: Duration,
    /// Pause between closing and reopening the serial device
    pub reconnect_delay: Duration,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered,
    /// Complete reading, but the sink refused it or was unreachable
    Dropped,
    Partial,
    NoData,
}

/// Drives the poll, decode, write, sleep cycle.
pub struct Collector<C: Connector, S: Sink> {
    reader: ResilientReader<C>,
    sink: S,
    data_store: Arc<RwLock<DataStore>>,
    settings: CollectorSettings,
}

impl<C: Connector, S: Sink> Collector<C, S> {
    pub fn new(
        reader: ResilientReader<C>,
        sink: S,
        data_store: Arc<RwLock<DataStore>>,
        settings: CollectorSettings,
    ) -> Self {
        Collector {
            reader,
            sink,
            data_store,
            settings,
        }
    }

    /// Loop until something is sent on `stop`.
    pub fn run(&mut self, stop: &Receiver<()>) {
        if let Err(e) = self.reader.connect() {
            error!("Unable to connect to the sensor board, will retry: {}", e);
        }

        loop {
            self.run_cycle();
            if wait_for_stop(stop, self.next_wait()) {
                break;
            }
        }

        self.reader.disconnect();
    }

    pub fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = match self.reader.poll() {
            Decoded::Reading(reading) => self.deliver(reading),
            Decoded::Partial(partial) => {
                warn!("Discarding {}", partial);
                CycleOutcome::Partial
            }
            Decoded::NoData(reason) => {
                let failures = self.reader.failures();
                warn!(
                    "No sensor data: {}. Consecutive failures: {}/{}",
                    reason,
                    failures.count(),
                    failures.threshold()
                );
                CycleOutcome::NoData
            }
        };

        if self.reader.needs_reconnect() {
            self.reconnect();
        }
        outcome
    }

    fn deliver(&mut self, reading: Reading) -> CycleOutcome {
        info!("Read {}", reading);
        let received_at = Utc::now();
        let point = Point::from_reading(&reading, &self.settings.device_id, received_at);
        let delivered = match write_with_retry(&mut self.sink, &point, &self.settings.retry) {
            Ok(()) => true,
            Err(e) => {
                error!("Dropping reading, write to {} failed: {}", self.sink.name(), e);
                false
            }
        };

        match self.data_store.write() {
            Ok(mut data_store) => data_store.insert(Sample {
                reading,
                received_at,
                delivered,
            }),
            Err(_) => error!("History lock poisoned, sample not recorded"),
        }

        if delivered {
            CycleOutcome::Delivered
        } else {
            CycleOutcome::Dropped
        }
    }

    fn reconnect(&mut self) {
        error!(
            "Too many consecutive failures, reconnecting to {}",
            self.reader.settings().path
        );
        self.reader.disconnect();
        thread::sleep(self.settings.reconnect_delay);
        match self.reader.connect() {
            Ok(()) => info!("Successfully reconnected to serial port"),
            Err(e) => error!("Failed to reconnect to serial port: {}", e),
        }
    }

    fn next_wait(&self) -> Duration {
        if self.reader.failures().count() > 0 {
            self.settings.poll_interval.min(self.settings.recovery_interval)
        } else {
            self.settings.poll_interval
        }
    }

    #[cfg(test)]
    pub fn reader(&self) -> &ResilientReader<C> {
        &self.reader
    }

    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

/// Sleep for `wait` unless a stop is requested first.
///
/// A receiver whose senders are all gone can no longer deliver a stop, so it
/// only paces the loop.
fn wait_for_stop(stop: &Receiver<()>, wait: Duration) -> bool {
    match stop.recv_timeout(wait) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(wait);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::*;
    use crate::serial::{ConnectionState, MockConnector, SerialSettings};

    #[derive(Default)]
    struct RecordingSink {
        points: Vec<Point>,
        unreachable: bool,
    }

    impl Sink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn write(&mut self, point: &Point) -> Result<()> {
            if self.unreachable {
                bail!(ErrorKind::Sink("connection refused".to_string()));
            }
            self.points.push(point.clone());
            Ok(())
        }
    }

    fn collector(
        mock: &MockConnector,
        sink: RecordingSink,
        threshold: u32,
    ) -> (Collector<MockConnector, RecordingSink>, Arc<RwLock<DataStore>>) {
        let serial = SerialSettings {
            path: "/dev/ttyMOCK0".to_string(),
            baud_rate: 115_200,
            settle_delay: Duration::from_millis(0),
            poll_timeout: Duration::from_millis(0),
            poll_step: Duration::from_millis(1),
            read_timeout: Duration::from_millis(10),
        };
        let settings = CollectorSettings {
            device_id: "feather_s2".to_string(),
            poll_interval: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(10),
            reconnect_delay: Duration::from_millis(0),
            retry: RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(0),
                multiplier: 2,
            },
        };
        let data_store = Arc::new(RwLock::new(DataStore::new(10)));
        let reader = ResilientReader::new(mock.clone(), serial, threshold);
        (
            Collector::new(reader, sink, data_store.clone(), settings),
            data_store,
        )
    }

    #[test]
    fn reading_is_written_and_recorded() {
        let mock = MockConnector::firmware();
        let (mut collector, data_store) = collector(&mock, RecordingSink::default(), 5);
        collector.reader.connect().unwrap();

        assert_eq!(collector.run_cycle(), CycleOutcome::Delivered);
        let points = &collector.sink().points;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "scd30_sensor");
        assert_eq!(points[0].tag("device"), Some("feather_s2"));
        assert!(data_store.read().unwrap().latest().unwrap().delivered);
        assert_eq!(collector.next_wait(), Duration::from_secs(60));
    }

    #[test]
    fn unreachable_sink_drops_the_reading() {
        let mock = MockConnector::firmware();
        let sink = RecordingSink {
            unreachable: true,
            ..RecordingSink::default()
        };
        let (mut collector, data_store) = collector(&mock, sink, 5);
        collector.reader.connect().unwrap();

        assert_eq!(collector.run_cycle(), CycleOutcome::Dropped);
        assert!(!data_store.read().unwrap().latest().unwrap().delivered);
        assert_eq!(collector.reader().failures().count(), 0);
    }

    #[test]
    fn partial_reading_is_not_written() {
        let mock = MockConnector::new();
        mock.push_data("read\r\nCO2:415.2\r\nTEMP:23.10\r\n");
        let (mut collector, data_store) = collector(&mock, RecordingSink::default(), 5);
        collector.reader.connect().unwrap();

        assert_eq!(collector.run_cycle(), CycleOutcome::Partial);
        assert!(collector.sink().points.is_empty());
        assert!(data_store.read().unwrap().is_empty());
        assert_eq!(collector.next_wait(), Duration::from_secs(10));
    }

    #[test]
    fn reconnects_once_threshold_is_reached() {
        let mock = MockConnector::new();
        let (mut collector, _) = collector(&mock, RecordingSink::default(), 2);
        collector.reader.connect().unwrap();

        assert_eq!(collector.run_cycle(), CycleOutcome::NoData);
        assert_eq!(mock.opens(), 1);
        assert_eq!(collector.run_cycle(), CycleOutcome::NoData);
        assert_eq!(mock.opens(), 2);
        assert_eq!(collector.reader().state(), ConnectionState::Connected);
        assert_eq!(collector.reader().failures().count(), 0);
    }

    #[test]
    fn failed_reconnect_is_retried_after_another_window() {
        let mock = MockConnector::new();
        let (mut collector, _) = collector(&mock, RecordingSink::default(), 2);
        mock.refuse_open(true);

        collector.run_cycle();
        collector.run_cycle();
        assert_eq!(mock.opens(), 1);
        assert_eq!(collector.reader().state(), ConnectionState::Disconnected);

        mock.refuse_open(false);
        mock.push_data("JSON:{\"temperature\": 21.5, \"humidity\": 40.0, \"co2\": 411.0}");
        collector.run_cycle();
        collector.run_cycle();
        assert_eq!(mock.opens(), 2);
        assert_eq!(collector.run_cycle(), CycleOutcome::Delivered);
    }

    #[test]
    fn lost_stop_sender_only_paces_the_loop() {
        let (stop, stopped) = crossbeam::channel::bounded::<()>(1);
        drop(stop);

        let wait = Duration::from_millis(20);
        let started = std::time::Instant::now();
        assert!(!wait_for_stop(&stopped, wait));
        assert!(started.elapsed() >= wait);

        let (stop, stopped) = crossbeam::channel::bounded(1);
        stop.send(()).unwrap();
        assert!(wait_for_stop(&stopped, Duration::from_secs(60)));
    }

    #[test]
    fn run_stops_on_signal_and_disconnects() {
        let mock = MockConnector::firmware();
        let (mut collector, data_store) = collector(&mock, RecordingSink::default(), 5);
        let (stop, stopped) = crossbeam::channel::bounded(1);
        stop.send(()).unwrap();

        collector.run(&stopped);
        assert_eq!(data_store.read().unwrap().len(), 1);
        assert_eq!(collector.reader().state(), ConnectionState::Disconnected);
    }
}
