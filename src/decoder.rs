//! Turns whatever the board printed since the last poll into a reading.
//!
//! The firmware prints a `JSON:{...}` line per sample, surrounded by
//! human-readable log lines. When the board drops back into its REPL the host
//! only sees echoed commands and `KEY:<number>` lines, which are scraped as a
//! last resort.

use crate::reading::{Field, Fields, PartialReading, Reading};
use serde_json::Value;
use std::fmt;

const JSON_TAG: &str = "JSON:";
/// Echoed `read` command, the board is sitting in its REPL.
const REPL_TOKEN: &str = "read";
const DEVICE_IO_ERRORS: [&str; 2] = ["I/O ERROR", "[Errno 5] Input/output error"];
const LINE_KEYS: [(&str, Field); 5] = [
    ("CO2", Field::Co2),
    ("TEMP", Field::Temperature),
    ("HUM", Field::Humidity),
    ("PRES", Field::Pressure),
    ("GAS", Field::GasResistance),
];
const MIN_PARTIAL_FIELDS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Reading(Reading),
    Partial(PartialReading),
    NoData(NoData),
}

/// Why a poll produced nothing usable.
#[derive(Debug, Clone, PartialEq)]
pub enum NoData {
    Disconnected,
    Silence,
    Transport(String),
    DeviceIoError,
    NoPayload,
    TooFewFields(usize),
}

impl fmt::Display for NoData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NoData::Disconnected => f.write_str("serial device is disconnected"),
            NoData::Silence => f.write_str("no data received within timeout"),
            NoData::Transport(e) => write!(f, "serial transport error: {}", e),
            NoData::DeviceIoError => f.write_str("device reported an I/O error"),
            NoData::NoPayload => f.write_str("no sensor payload found"),
            NoData::TooFewFields(n) => write!(f, "only {} field(s) recovered", n),
        }
    }
}

pub fn decode_bytes(bytes: &[u8]) -> Decoded {
    decode(&String::from_utf8_lossy(bytes))
}

pub fn decode(text: &str) -> Decoded {
    if text.trim().is_empty() {
        return Decoded::NoData(NoData::NoPayload);
    }
    if DEVICE_IO_ERRORS.iter().any(|marker| text.contains(marker)) {
        return Decoded::NoData(NoData::DeviceIoError);
    }
    if let Some(fields) = tagged_json(text).or_else(|| bare_json(text)) {
        return promote(fields);
    }
    if text.contains(REPL_TOKEN) || has_key_value_lines(text) {
        debug!("No JSON payload, scraping key-value lines");
        return promote(key_value_fields(text));
    }
    Decoded::NoData(NoData::NoPayload)
}

fn promote(fields: Fields) -> Decoded {
    let count = fields.len();
    match Reading::from_fields(fields) {
        Ok(reading) => Decoded::Reading(reading),
        Err(partial) if count >= MIN_PARTIAL_FIELDS => Decoded::Partial(partial),
        Err(_) => Decoded::NoData(NoData::TooFewFields(count)),
    }
}

fn tagged_json(text: &str) -> Option<Fields> {
    text.match_indices(JSON_TAG)
        .map(|(idx, _)| &text[idx + JSON_TAG.len()..])
        .filter(|rest| rest.starts_with('{'))
        .filter_map(object_at)
        .find_map(json_fields)
}

fn bare_json(text: &str) -> Option<Fields> {
    text.match_indices('{')
        .filter_map(|(idx, _)| object_at(&text[idx..]))
        .find_map(json_fields)
}

/// The balanced `{...}` object `text` starts with, if it is complete.
fn object_at(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn json_fields(candidate: &str) -> Option<Fields> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(
            map.iter()
                .filter_map(|(name, value)| Some((Field::from_name(name)?, value.as_f64()?)))
                .collect(),
        ),
        Ok(_) => None,
        Err(e) => {
            debug!("Discarding {:?}: {}", candidate, e);
            None
        }
    }
}

fn has_key_value_lines(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_start();
        LINE_KEYS.iter().any(|(key, _)| {
            line.strip_prefix(key)
                .map_or(false, |rest| rest.starts_with(':'))
        })
    })
}

fn key_value_fields(text: &str) -> Fields {
    let mut fields = Fields::new();
    for line in text.lines() {
        for (key, field) in LINE_KEYS.iter() {
            if fields.contains_key(field) {
                continue;
            }
            if let Some(value) = line_value(line, key) {
                fields.insert(*field, value);
            }
        }
    }

    // the REPL path never prints a VOC index, approximate it from the gas resistance
    let bme_inputs = [
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::GasResistance,
    ];
    if !fields.contains_key(&Field::Voc) && bme_inputs.iter().all(|f| fields.contains_key(f)) {
        if let Some(gas) = fields.get(&Field::GasResistance).copied() {
            fields.insert(Field::Voc, (gas / 50_000.0).clamp(1.0, 5.0));
        }
    }
    fields
}

fn line_value(line: &str, key: &str) -> Option<f64> {
    line.match_indices(key)
        .filter_map(|(idx, _)| line[idx + key.len()..].strip_prefix(':'))
        .map(numeric_prefix)
        .filter(|number| !number.is_empty())
        .find_map(|number| number.parse::<f64>().ok())
}

fn numeric_prefix(s: &str) -> &str {
    let sign = if s.starts_with('-') { 1 } else { 0 };
    let end = s[sign..]
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .map_or(s.len(), |i| i + sign);
    if end == sign {
        ""
    } else {
        &s[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::SensorKind;

    fn co2_reading(co2: f64, temperature: f64, humidity: f64) -> Decoded {
        Decoded::Reading(Reading::Co2TempHumidity {
            co2,
            temperature,
            humidity,
        })
    }

    #[test]
    fn tagged_json_inside_firmware_noise() {
        let chunk = "SCD30 sensor initialized successfully\r\n\
                     Waiting for sensor data...\r\n\
                     CO2: 415.2 ppm, Temp: 23.10 °C, RH: 41.50 %\r\n\
                     JSON:{\"temperature\": 23.1, \"humidity\": 41.5, \"co2\": 415.2}\r\n\
                     >>> ";
        assert_eq!(decode(chunk), co2_reading(415.2, 23.1, 41.5));
    }

    #[test]
    fn bare_json_decodes_like_tagged_json() {
        let payload = "{\"temperature\": 22.3, \"humidity\": 45.7, \"pressure\": 1013.2, \
                       \"gas_resistance\": 12345, \"voc\": 1.5}";
        let tagged = decode(&format!("boot\r\nJSON:{}\r\n", payload));
        let bare = decode(&format!("boot\r\n{}\r\n", payload));
        assert_eq!(tagged, bare);
        match bare {
            Decoded::Reading(reading) => {
                assert_eq!(reading.kind(), SensorKind::Bme688);
                assert_eq!(reading.get(Field::GasResistance), Some(12345.0));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_tagged_object_falls_back_to_later_candidates() {
        let chunk = "JSON:{\"co2\": 41x}\r\nJSON:{\"co2\": 420.0, \"temperature\": 21.0, \"humidity\": 40.0}\r\n";
        assert_eq!(decode(chunk), co2_reading(420.0, 21.0, 40.0));
    }

    #[test]
    fn truncated_payload_is_no_data() {
        let chunk = "Waiting for sensor data...\r\nJSON:{\"temperature\": 23.1, \"humi";
        assert_eq!(decode(chunk), Decoded::NoData(NoData::NoPayload));
    }

    #[test]
    fn json_with_missing_fields_is_partial() {
        match decode("JSON:{\"co2\": 415.2, \"temperature\": 23.1}") {
            Decoded::Partial(partial) => assert_eq!(partial.fields().len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            decode("{\"status\": \"ok\"}"),
            Decoded::NoData(NoData::TooFewFields(0))
        );
    }

    #[test]
    fn repl_echo_key_values() {
        let chunk = ">>> read\r\nCO2:415.2\r\nTEMP:23.10\r\nHUM:41.50\r\n";
        assert_eq!(decode(chunk), co2_reading(415.2, 23.10, 41.50));
    }

    #[test]
    fn repl_echo_with_f_string_braces() {
        let chunk = ">>> read\r\n\
                     >>> print(f'CO2:{co2:.1f}')\r\nCO2:600.5\r\n\
                     >>> print(f'TEMP:{temp:.2f}')\r\nTEMP:19.25\r\n\
                     >>> print(f'HUM:{hum:.2f}')\r\nHUM:55.00\r\n";
        assert_eq!(decode(chunk), co2_reading(600.5, 19.25, 55.0));
    }

    #[test]
    fn single_key_value_line_is_no_data() {
        assert_eq!(
            decode("TEMP:23.10\r\n"),
            Decoded::NoData(NoData::TooFewFields(1))
        );
    }

    #[test]
    fn two_key_value_lines_are_partial() {
        let expected: Fields = vec![(Field::Co2, 415.2), (Field::Temperature, 23.10)]
            .into_iter()
            .collect();
        assert_eq!(
            decode("CO2:415.2\r\nTEMP:23.10\r\n"),
            Decoded::Partial(PartialReading::new(expected))
        );
    }

    #[test]
    fn unparsable_values_are_dropped() {
        let expected: Fields = vec![(Field::Temperature, 23.1), (Field::Humidity, 41.5)]
            .into_iter()
            .collect();
        assert_eq!(
            decode("read\r\nCO2:.\r\nTEMP:23.1\r\nHUM:41.5\r\n"),
            Decoded::Partial(PartialReading::new(expected))
        );
    }

    #[test]
    fn bme_repl_echo_derives_voc() {
        let chunk = "read\r\nTEMP:22.30\r\nHUM:45.70\r\nPRES:1013.20\r\nGAS:125000.00\r\n";
        assert_eq!(
            decode(chunk),
            Decoded::Reading(Reading::Bme688 {
                temperature: 22.3,
                humidity: 45.7,
                pressure: 1013.2,
                gas_resistance: 125000.0,
                voc: 2.5,
            })
        );
    }

    #[test]
    fn device_io_error_wins() {
        let chunk = "ERROR reading sensor: [Errno 5] Input/output error\r\n\
                     JSON:{\"temperature\": 23.1, \"humidity\": 41.5, \"co2\": 415.2}";
        assert_eq!(decode(chunk), Decoded::NoData(NoData::DeviceIoError));
    }

    #[test]
    fn plain_noise_is_no_data() {
        assert_eq!(decode(""), Decoded::NoData(NoData::NoPayload));
        assert_eq!(
            decode("Adafruit CircuitPython 8.2.0 on 2023-07-05\r\n"),
            Decoded::NoData(NoData::NoPayload)
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut bytes = vec![0xff, 0xfe];
        bytes.extend_from_slice(b"JSON:{\"co2\": 500.0, \"temperature\": 20.0, \"humidity\": 30.0}");
        assert_eq!(decode_bytes(&bytes), co2_reading(500.0, 20.0, 30.0));
    }

    #[test]
    fn decoding_is_idempotent() {
        let chunk = b"read\r\nCO2:415.2\r\nTEMP:23.10\r\n";
        assert_eq!(decode_bytes(chunk), decode_bytes(chunk));
    }
}
