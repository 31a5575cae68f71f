use crate::errors::*;
use crate::sink::{Point, Sink};
use rumqtt::{MqttClient, MqttOptions, QoS, ReconnectOptions};

#[derive(Debug, Clone)]
pub struct MqttConfig {
    port: u16,
    host: String,
    base_topic: String,
    client_id: String,
}

impl MqttConfig {
    pub fn new(host: String, port: u16, base_topic: String, client_id: String) -> Self {
        let base_topic = MqttConfig::normalize_base_topic(&base_topic);
        MqttConfig {
            host,
            port,
            base_topic,
            client_id,
        }
    }

    fn normalize_base_topic(base_topic: &str) -> String {
        let mut normalized_base_topic = String::with_capacity(base_topic.len() + 1);
        normalized_base_topic.push_str(base_topic);
        if !base_topic.ends_with('/') {
            normalized_base_topic.push('/');
        }
        normalized_base_topic
    }

    /// `<base_topic>/<device>/<field>`, or `<base_topic>/<field>` for untagged points.
    fn get_topic(&self, point: &Point, field: &str) -> String {
        let mut ret = self.base_topic.clone();
        if let Some(device) = point.tag("device") {
            ret.push_str(device);
            ret.push('/');
        }
        ret.push_str(field);
        ret
    }
}

/// Publishes every field of a point on its own topic.
///
/// The broker connection is opened on the first write and dropped after a
/// failed publish, so the next write reconnects.
pub struct MqttSink {
    config: MqttConfig,
    mqtt_client: Option<MqttClient>,
}

impl MqttSink {
    pub fn new(config: MqttConfig) -> Self {
        MqttSink {
            config,
            mqtt_client: None,
        }
    }

    fn connect(&self) -> Result<MqttClient> {
        let reconnection_options = ReconnectOptions::Always(10);
        let mqtt_options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        )
        .set_keep_alive(10)
        .set_reconnect_opts(reconnection_options)
        .set_clean_session(false);

        info!(
            "Connecting to MQTT broker {}:{}",
            self.config.host, self.config.port
        );
        match MqttClient::start(mqtt_options) {
            Ok((mqtt_client, _)) => Ok(mqtt_client),
            Err(e) => Err(ErrorKind::Sink(format!(
                "unable to initialize MQTT client for {}:{}, {}",
                self.config.host, self.config.port, e
            ))
            .into()),
        }
    }
}

impl Sink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn write(&mut self, point: &Point) -> Result<()> {
        let mut mqtt_client = match self.mqtt_client.take() {
            Some(mqtt_client) => mqtt_client,
            None => self.connect()?,
        };
        for (field, value) in &point.fields {
            let topic = self.config.get_topic(point, field);
            if let Err(e) = mqtt_client.publish(
                topic.as_str(),
                QoS::AtLeastOnce,
                false,
                format!("{}", value).into_bytes(),
            ) {
                bail!(ErrorKind::Sink(format!("unable to publish {}: {}", topic, e)));
            }
        }
        self.mqtt_client = Some(mqtt_client);
        Ok(())
    }
}
