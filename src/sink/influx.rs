use crate::errors::*;
use crate::sink::{Point, Sink};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout: Duration,
}

// keep the token out of the logs
impl fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("token", &"***")
            .field("org", &self.org)
            .field("bucket", &self.bucket)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Writes points through the InfluxDB v2 HTTP API (works for Cloud and local servers).
pub struct InfluxSink {
    agent: ureq::Agent,
    config: InfluxConfig,
}

impl InfluxSink {
    pub fn new(config: InfluxConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        InfluxSink { agent, config }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Body of the `/health` endpoint.
    pub fn check_health(&self) -> Result<String> {
        let response = self
            .agent
            .get(&self.endpoint("health"))
            .call()
            .map_err(sink_error)?;
        Ok(response.into_string()?)
    }
}

impl Sink for InfluxSink {
    fn name(&self) -> &str {
        "influxdb"
    }

    fn write(&mut self, point: &Point) -> Result<()> {
        let body = point.to_line_protocol();
        debug!("POST {} to bucket {}", body, self.config.bucket);
        self.agent
            .post(&self.endpoint("api/v2/write"))
            .query("org", &self.config.org)
            .query("bucket", &self.config.bucket)
            .query("precision", "ms")
            .set("Authorization", &format!("Token {}", self.config.token))
            .set("Content-Type", "text/plain; charset=utf-8")
            .set("Accept", "application/json")
            .send_string(&body)
            .map(|_| ())
            .map_err(sink_error)
    }
}

/// Server errors and throttling are worth retrying, other statuses are not.
fn sink_error(e: ureq::Error) -> Error {
    match e {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let body = body.trim().to_string();
            if status == 429 || status >= 500 {
                ErrorKind::Sink(format!("HTTP {}: {}", status, body)).into()
            } else {
                ErrorKind::SinkRejected(status, body).into()
            }
        }
        e => ErrorKind::Sink(e.to_string()).into(),
    }
}
