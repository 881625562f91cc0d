//! Sample logs: scalar and time-series run properties.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Conventional log holding the incident energy of a direct-geometry run.
pub const EI_LOG: &str = "Ei";
/// Conventional log holding the final energy of an indirect-geometry run.
pub const EFIXED_LOG: &str = "Efixed";

/// A single sample log value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(untagged))]
pub enum LogValue {
    /// Scalar number.
    Number(f64),
    /// Time series (seconds since run start, value).
    Series {
        /// Sample times.
        times: Vec<f64>,
        /// Sample values.
        values: Vec<f64>,
    },
    /// Free text.
    Text(String),
}

impl LogValue {
    /// Representative numeric value: the number itself or the series mean.
    #[must_use]
    pub fn single_value(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Series { values, .. } if !values.is_empty() => {
                #[allow(clippy::cast_precision_loss)]
                let n = values.len() as f64;
                Some(values.iter().sum::<f64>() / n)
            }
            Self::Series { .. } => None,
            Self::Text(s) => s.trim().parse().ok(),
        }
    }

    /// Value range. A scalar is the degenerate range `[v, v]`.
    #[must_use]
    pub fn min_max(&self) -> Option<(f64, f64)> {
        match self {
            Self::Series { values, .. } => values
                .iter()
                .filter(|v| v.is_finite())
                .fold(None, |acc, &v| match acc {
                    None => Some((v, v)),
                    Some((lo, hi)) => Some((f64::min(lo, v), f64::max(hi, v))),
                }),
            _ => self.single_value().map(|v| (v, v)),
        }
    }
}

/// Named run properties of a source workspace.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct SampleLogs {
    entries: BTreeMap<String, LogValue>,
}

impl SampleLogs {
    /// Empty log set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a scalar log.
    pub fn add_number(&mut self, name: impl Into<String>, value: f64) {
        self.entries.insert(name.into(), LogValue::Number(value));
    }

    /// Builder form of [`Self::add_number`].
    #[must_use]
    pub fn with_number(mut self, name: impl Into<String>, value: f64) -> Self {
        self.add_number(name, value);
        self
    }

    /// Adds or replaces a time-series log.
    ///
    /// # Errors
    /// Returns an error if `times` and `values` differ in length.
    pub fn add_series(
        &mut self,
        name: impl Into<String>,
        times: Vec<f64>,
        values: Vec<f64>,
    ) -> Result<()> {
        let name = name.into();
        if times.len() != values.len() {
            return Err(Error::InvalidLog {
                name,
                reason: format!("{} times but {} values", times.len(), values.len()),
            });
        }
        self.entries.insert(name, LogValue::Series { times, values });
        Ok(())
    }

    /// Adds or replaces a text log.
    pub fn add_text(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), LogValue::Text(value.into()));
    }

    /// Looks up a log.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&LogValue> {
        self.entries.get(name)
    }

    /// Returns true if the log exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Representative value of a numeric log.
    #[must_use]
    pub fn single_value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(LogValue::single_value)
    }

    /// Range of a numeric log.
    #[must_use]
    pub fn min_max(&self, name: &str) -> Option<(f64, f64)> {
        self.get(name).and_then(LogValue::min_max)
    }

    /// Log names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of logs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no logs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_is_degenerate_range() {
        let logs = SampleLogs::new().with_number("temperature", 4.2);
        assert_eq!(logs.min_max("temperature"), Some((4.2, 4.2)));
        assert_eq!(logs.single_value("temperature"), Some(4.2));
        assert_eq!(logs.min_max("missing"), None);
    }

    #[test]
    fn test_series_statistics() {
        let mut logs = SampleLogs::new();
        logs.add_series("field", vec![0.0, 1.0, 2.0], vec![3.0, -1.0, 7.0])
            .unwrap();
        assert_eq!(logs.min_max("field"), Some((-1.0, 7.0)));
        assert_eq!(logs.single_value("field"), Some(3.0));
    }

    #[test]
    fn test_series_length_mismatch() {
        let mut logs = SampleLogs::new();
        let err = logs.add_series("field", vec![0.0], vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidLog { ref name, .. } if name == "field"));
        assert!(logs.is_empty());
    }

    #[test]
    fn test_numeric_text() {
        let mut logs = SampleLogs::new();
        logs.add_text("Ei", " 12.5 ");
        logs.add_text("comment", "room temperature");
        assert_eq!(logs.single_value("Ei"), Some(12.5));
        assert_eq!(logs.single_value("comment"), None);
        assert_eq!(logs.names().collect::<Vec<_>>(), vec!["Ei", "comment"]);
    }
}
