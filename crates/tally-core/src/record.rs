//! Metric kinds and the wire/snapshot record shape.

use crate::MetricError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The two supported metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Accumulating integer, updates add a delta
    Counter,
    /// Point-in-time float, updates replace the value
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            other => Err(MetricError::UnsupportedKind(other.to_string())),
        }
    }
}

/// A typed metric value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Parse textual input for the given kind
    pub fn parse(kind: MetricKind, text: &str) -> Result<Self, MetricError> {
        let parse_err = || MetricError::Parse {
            kind,
            text: text.to_string(),
        };
        match kind {
            MetricKind::Counter => text
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|_| parse_err()),
            MetricKind::Gauge => text
                .parse::<f64>()
                .map(MetricValue::Gauge)
                .map_err(|_| parse_err()),
        }
    }
}

/// Wire and snapshot representation of one metric.
///
/// `kind` is kept as received so that an unsupported kind inside a batch
/// only invalidates its own record. Use [`MetricRecord::metric_kind`] and
/// [`MetricRecord::value`] to get the typed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,

    #[serde(alias = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Full store contents at one instant
pub type Snapshot = Vec<MetricRecord>;

impl MetricRecord {
    /// Create a counter record carrying a delta
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter.as_str().to_string(),
            delta: Some(delta),
            value: None,
            hash: None,
        }
    }

    /// Create a gauge record carrying a value
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge.as_str().to_string(),
            delta: None,
            value: Some(value),
            hash: None,
        }
    }

    /// Create a query record (no value) for lookups
    pub fn query(id: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            delta: None,
            value: None,
            hash: None,
        }
    }

    /// Parsed kind of this record
    pub fn metric_kind(&self) -> Result<MetricKind, MetricError> {
        self.kind.parse()
    }

    /// Typed value, validating that the field required by the kind is present
    pub fn value(&self) -> Result<MetricValue, MetricError> {
        if self.id.is_empty() {
            return Err(MetricError::EmptyName);
        }
        let kind = self.metric_kind()?;
        let absent = |field| MetricError::AbsentField {
            id: self.id.clone(),
            kind,
            field,
        };
        match kind {
            MetricKind::Counter => self
                .delta
                .map(MetricValue::Counter)
                .ok_or_else(|| absent("delta")),
            MetricKind::Gauge => self
                .value
                .map(MetricValue::Gauge)
                .ok_or_else(|| absent("value")),
        }
    }

    /// Builder-style hash setter
    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}
