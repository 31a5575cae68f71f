use crate::reading::Reading;
use chrono::prelude::*;
use chrono::SecondsFormat;
use std::collections::vec_deque::VecDeque;
use std::fmt;

/// A reading as it went through the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
    /// false when every write attempt to the sink failed
    pub delivered: bool,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]",
            self.received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.reading,
            if self.delivered { "delivered" } else { "dropped" }
        )
    }
}

/// Bounded history of the latest samples, oldest first.
pub struct DataStore {
    history: VecDeque<Sample>,
    capacity: usize,
}

impl DataStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = match capacity {
            0 => 1,
            c => c,
        };
        DataStore {
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, sample: Sample) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.history.back()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl fmt::Display for DataStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.history.is_empty() {
            return writeln!(f, "no samples yet");
        }
        for sample in &self.history {
            writeln!(f, "{}", sample)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(co2: f64, delivered: bool) -> Sample {
        Sample {
            reading: Reading::Co2TempHumidity {
                co2,
                temperature: 21.5,
                humidity: 40.0,
            },
            received_at: Utc.ymd(2023, 10, 11).and_hms(8, 30, 0),
            delivered,
        }
    }

    #[test]
    fn oldest_sample_is_evicted() {
        let mut store = DataStore::new(2);
        store.insert(sample(400.0, true));
        store.insert(sample(410.0, true));
        store.insert(sample(420.0, false));

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest(), Some(&sample(420.0, false)));
        assert!(!store.to_string().contains("co2=400"));
    }

    #[test]
    fn zero_capacity_keeps_one() {
        let mut store = DataStore::new(0);
        store.insert(sample(400.0, true));
        store.insert(sample(410.0, true));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn renders_one_line_per_sample() {
        let mut store = DataStore::new(10);
        assert_eq!(store.to_string(), "no samples yet\n");

        store.insert(sample(415.5, true));
        store.insert(sample(416.0, false));
        assert_eq!(
            store.to_string(),
            "2023-10-11T08:30:00.000Z co2_temp_humidity co2=415.5 temperature=21.5 humidity=40 [delivered]\n\
             2023-10-11T08:30:00.000Z co2_temp_humidity co2=416 temperature=21.5 humidity=40 [dropped]\n"
        );
    }
}
