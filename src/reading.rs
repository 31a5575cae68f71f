use std::collections::BTreeMap;
use std::fmt;

/// A sensor attribute carried by the line protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Co2,
    Temperature,
    Humidity,
    Pressure,
    GasResistance,
    Voc,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Co2,
        Field::Temperature,
        Field::Humidity,
        Field::Pressure,
        Field::GasResistance,
        Field::Voc,
    ];

    /// Name used by the firmware JSON payload and by downstream points.
    pub fn name(self) -> &'static str {
        match self {
            Field::Co2 => "co2",
            Field::Temperature => "temperature",
            Field::Humidity => "humidity",
            Field::Pressure => "pressure",
            Field::GasResistance => "gas_resistance",
            Field::Voc => "voc",
        }
    }

    pub fn from_name(name: &str) -> Option<Field> {
        Field::ALL.iter().copied().find(|f| f.name() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Fields = BTreeMap<Field, f64>;

/// The closed set of payload shapes the firmware produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// SCD30 style CO2 / temperature / humidity sensor
    Co2TempHumidity,
    Bme688,
}

impl SensorKind {
    /// Checked in this order when a field set could satisfy more than one kind.
    pub const ALL: [SensorKind; 2] = [SensorKind::Bme688, SensorKind::Co2TempHumidity];

    pub fn name(self) -> &'static str {
        match self {
            SensorKind::Co2TempHumidity => "co2_temp_humidity",
            SensorKind::Bme688 => "bme688",
        }
    }

    pub fn required_fields(self) -> &'static [Field] {
        match self {
            SensorKind::Co2TempHumidity => &[Field::Co2, Field::Temperature, Field::Humidity],
            SensorKind::Bme688 => &[
                Field::Temperature,
                Field::Humidity,
                Field::Pressure,
                Field::GasResistance,
                Field::Voc,
            ],
        }
    }

    /// Measurement name of the points written downstream.
    pub fn measurement(self) -> &'static str {
        match self {
            SensorKind::Co2TempHumidity => "scd30_sensor",
            SensorKind::Bme688 => "bme688_sensor",
        }
    }

    fn missing_from(self, fields: &Fields) -> Vec<Field> {
        self.required_fields()
            .iter()
            .copied()
            .filter(|f| !fields.contains_key(f))
            .collect()
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One complete sensor sample. Each variant holds every field its kind requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Co2TempHumidity {
        co2: f64,
        temperature: f64,
        humidity: f64,
    },
    Bme688 {
        temperature: f64,
        humidity: f64,
        pressure: f64,
        gas_resistance: f64,
        voc: f64,
    },
}

impl Reading {
    /// Promote a field map to a reading, or hand it back as a partial one.
    pub fn from_fields(fields: Fields) -> Result<Reading, PartialReading> {
        let get = |field: Field| fields.get(&field).copied();
        for kind in SensorKind::ALL.iter() {
            let reading = match kind {
                SensorKind::Bme688 => match (
                    get(Field::Temperature),
                    get(Field::Humidity),
                    get(Field::Pressure),
                    get(Field::GasResistance),
                    get(Field::Voc),
                ) {
                    (Some(temperature), Some(humidity), Some(pressure), Some(gas_resistance), Some(voc)) => {
                        Some(Reading::Bme688 {
                            temperature,
                            humidity,
                            pressure,
                            gas_resistance,
                            voc,
                        })
                    }
                    _ => None,
                },
                SensorKind::Co2TempHumidity => {
                    match (get(Field::Co2), get(Field::Temperature), get(Field::Humidity)) {
                        (Some(co2), Some(temperature), Some(humidity)) => {
                            Some(Reading::Co2TempHumidity {
                                co2,
                                temperature,
                                humidity,
                            })
                        }
                        _ => None,
                    }
                }
            };
            if let Some(reading) = reading {
                return Ok(reading);
            }
        }
        Err(PartialReading::new(fields))
    }

    pub fn kind(&self) -> SensorKind {
        match self {
            Reading::Co2TempHumidity { .. } => SensorKind::Co2TempHumidity,
            Reading::Bme688 { .. } => SensorKind::Bme688,
        }
    }

    pub fn fields(&self) -> Vec<(Field, f64)> {
        match *self {
            Reading::Co2TempHumidity {
                co2,
                temperature,
                humidity,
            } => vec![
                (Field::Co2, co2),
                (Field::Temperature, temperature),
                (Field::Humidity, humidity),
            ],
            Reading::Bme688 {
                temperature,
                humidity,
                pressure,
                gas_resistance,
                voc,
            } => vec![
                (Field::Temperature, temperature),
                (Field::Humidity, humidity),
                (Field::Pressure, pressure),
                (Field::GasResistance, gas_resistance),
                (Field::Voc, voc),
            ],
        }
    }

    #[cfg(test)]
    pub fn get(&self, field: Field) -> Option<f64> {
        self.fields()
            .into_iter()
            .find(|(f, _)| *f == field)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        for (field, value) in self.fields() {
            write!(f, " {}={}", field, value)?;
        }
        Ok(())
    }
}

/// A sample where some of the required fields could not be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialReading {
    fields: Fields,
}

impl PartialReading {
    pub fn new(fields: Fields) -> Self {
        PartialReading { fields }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// The kind these fields come closest to, with the fields it still lacks.
    ///
    /// Any field only the BME688 reports settles it. Otherwise the kind
    /// missing fewer fields wins, ties going to the CO2 sensor.
    pub fn closest_kind(&self) -> (SensorKind, Vec<Field>) {
        let co2 = SensorKind::Co2TempHumidity;
        let bme = SensorKind::Bme688;
        let co2_missing = co2.missing_from(&self.fields);
        let bme_missing = bme.missing_from(&self.fields);
        let bme_only = self
            .fields
            .keys()
            .any(|f| !co2.required_fields().contains(f));
        if bme_only || bme_missing.len() < co2_missing.len() {
            (bme, bme_missing)
        } else {
            (co2, co2_missing)
        }
    }
}

impl fmt::Display for PartialReading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (kind, missing) = self.closest_kind();
        write!(f, "partial {}", kind)?;
        for (field, value) in &self.fields {
            write!(f, " {}={}", field, value)?;
        }
        let missing: Vec<&str> = missing.iter().map(|m| m.name()).collect();
        write!(f, " (missing {})", missing.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[(Field, f64)]) -> Fields {
        values.iter().copied().collect()
    }

    #[test]
    fn co2_fields_make_a_co2_reading() {
        let reading = Reading::from_fields(fields(&[
            (Field::Co2, 415.2),
            (Field::Temperature, 23.1),
            (Field::Humidity, 41.5),
        ]))
        .unwrap();
        assert_eq!(reading.kind(), SensorKind::Co2TempHumidity);
        assert_eq!(reading.get(Field::Co2), Some(415.2));
        assert_eq!(reading.get(Field::Pressure), None);
    }

    #[test]
    fn bme_wins_when_both_kinds_are_satisfied() {
        let reading = Reading::from_fields(fields(&[
            (Field::Co2, 415.2),
            (Field::Temperature, 22.3),
            (Field::Humidity, 45.7),
            (Field::Pressure, 1013.2),
            (Field::GasResistance, 12345.0),
            (Field::Voc, 1.5),
        ]))
        .unwrap();
        assert_eq!(reading.kind(), SensorKind::Bme688);
        assert_eq!(reading.fields().len(), 5);
    }

    #[test]
    fn incomplete_fields_come_back_as_partial() {
        let partial = Reading::from_fields(fields(&[
            (Field::Temperature, 22.3),
            (Field::Humidity, 45.7),
            (Field::Pressure, 1013.2),
        ]))
        .unwrap_err();
        assert_eq!(partial.fields().len(), 3);
        assert_eq!(
            partial.closest_kind(),
            (SensorKind::Bme688, vec![Field::GasResistance, Field::Voc])
        );
    }

    #[test]
    fn bme_only_field_decides_the_partial_kind() {
        let partial = PartialReading::new(fields(&[
            (Field::Co2, 415.2),
            (Field::Temperature, 22.3),
            (Field::GasResistance, 12345.0),
        ]));
        assert_eq!(
            partial.closest_kind(),
            (
                SensorKind::Bme688,
                vec![Field::Humidity, Field::Pressure, Field::Voc]
            )
        );
    }

    #[test]
    fn partial_closest_kind_prefers_co2_on_ties() {
        let partial = PartialReading::new(fields(&[(Field::Temperature, 22.3), (Field::Humidity, 45.7)]));
        assert_eq!(
            partial.closest_kind(),
            (SensorKind::Co2TempHumidity, vec![Field::Co2])
        );
        assert_eq!(
            partial.to_string(),
            "partial co2_temp_humidity temperature=22.3 humidity=45.7 (missing co2)"
        );
    }
}
