#[macro_use]
extern crate log;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate clap;

use crate::collector::Collector;
use crate::config::{Config, Opt, SinkConfig};
use crate::datastore::DataStore;
use crate::serial::{Connector, MockConnector, ResilientReader, SerialPortConnector};
use crate::sink::{InfluxSink, LogSink, MqttSink, Sink};
use crossbeam::channel::{Receiver, Sender};
use env_logger::Env;
use std::sync::{Arc, RwLock};
use structopt::StructOpt;

mod collector;
mod config;
mod datastore;
mod decoder;
mod errors;
mod http;
mod reading;
mod serial;
mod sink;

fn main() {
    let opt: Opt = Opt::from_args();
    env_logger::Builder::from_env(Env::default().default_filter_or(if opt.debug {
        "debug"
    } else {
        "info"
    }))
    .init();

    let config = match Config::from_opt(opt) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    debug!("Config {:?}", config);

    let data_store = Arc::new(RwLock::new(DataStore::new(config.history_size)));
    if let Some(bind_address) = config.bind_address.clone() {
        if let Err(e) = http::launch_http_server(bind_address, data_store.clone()) {
            error!("Cannot start http server thread - {}", e);
        }
    }

    let (_stop_sender, stop) = install_stop_handler();
    let sink = build_sink(&config.sink);

    info!(
        "Sensor data collector started on {}, reading every {}s, writing to {}.",
        config.serial.path,
        config.collector.poll_interval.as_secs(),
        sink.name()
    );

    if config.mock_serial {
        run(MockConnector::firmware(), sink, &config, data_store, &stop);
    } else {
        run(SerialPortConnector, sink, &config, data_store, &stop);
    }

    info!("Sensor data collector stopped");
}

fn run<C: Connector>(
    connector: C,
    sink: Box<dyn Sink>,
    config: &Config,
    data_store: Arc<RwLock<DataStore>>,
    stop: &Receiver<()>,
) {
    let reader = ResilientReader::new(
        connector,
        config.serial.clone(),
        config.failure_threshold,
    );
    Collector::new(reader, sink, data_store, config.collector.clone()).run(stop);
}

/// Ctrl-C ends the current sleep and stops the collector.
///
/// The returned sender keeps the channel open when no handler could be installed.
fn install_stop_handler() -> (Sender<()>, Receiver<()>) {
    let (stop_sender, stop_receiver) = crossbeam::channel::bounded(1);
    let handler_sender = stop_sender.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Stop requested, shutting down");
        let _ = handler_sender.try_send(());
    }) {
        warn!("Unable to install the stop handler, stop the collector by killing it - {}", e);
    }
    (stop_sender, stop_receiver)
}

fn build_sink(sink_config: &SinkConfig) -> Box<dyn Sink> {
    match sink_config {
        SinkConfig::Influx(influx_config) => {
            info!("Writing to InfluxDB bucket {} at {}", influx_config.bucket, influx_config.url);
            let sink = InfluxSink::new(influx_config.clone());
            match sink.check_health() {
                Ok(health) => info!("InfluxDB health: {}", health.trim()),
                Err(e) => warn!("InfluxDB health check failed, will keep trying: {}", e),
            }
            Box::new(sink)
        }
        SinkConfig::Mqtt(mqtt_config) => Box::new(MqttSink::new(mqtt_config.clone())),
        SinkConfig::Log => Box::new(LogSink),
    }
}
