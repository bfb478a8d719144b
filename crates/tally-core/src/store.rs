//! In-memory authoritative metric store.
//!
//! Counters and gauges live in two independent maps behind one
//! `parking_lot::RwLock`. Single-entry reads take the shared lock; every
//! writer, [`Store::restore`] and [`Store::snapshot`] take the exclusive lock
//! so a snapshot always observes a consistent view of both maps. No I/O ever
//! happens while the lock is held.

use crate::integrity;
use crate::{MetricError, MetricKind, MetricRecord, MetricValue, Snapshot};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct Maps {
    counters: HashMap<String, i64>,
    gauges: HashMap<String, f64>,
    /// Names seen so far, only used for the first-seen notice
    known: HashSet<(MetricKind, String)>,
}

impl Maps {
    fn apply(&mut self, name: &str, value: MetricValue) {
        if self.known.insert((value.kind(), name.to_string())) {
            info!(name = %name, kind = %value.kind(), "Adding new metric");
        }
        match value {
            MetricValue::Counter(delta) => {
                let stored = self.counters.entry(name.to_string()).or_insert(0);
                *stored = stored.wrapping_add(delta);
            }
            MetricValue::Gauge(value) => {
                self.gauges.insert(name.to_string(), value);
            }
        }
    }
}

/// Outcome of applying a batch record by record
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Number of records applied
    pub applied: usize,
    /// Records that were rejected, in input order
    pub failures: Vec<BatchFailure>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A rejected record inside a batch
#[derive(Debug)]
pub struct BatchFailure {
    pub index: usize,
    pub id: String,
    pub error: MetricError,
}

/// Thread-safe counter/gauge store
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Maps>,
}

impl Store {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an already typed value
    pub fn apply(&self, name: &str, value: MetricValue) -> Result<(), MetricError> {
        if name.is_empty() {
            return Err(MetricError::EmptyName);
        }
        self.inner.write().apply(name, value);
        Ok(())
    }

    /// Add `delta` to a counter
    pub fn add_counter(&self, name: &str, delta: i64) -> Result<(), MetricError> {
        self.apply(name, MetricValue::Counter(delta))
    }

    /// Replace a gauge value
    pub fn set_gauge(&self, name: &str, value: f64) -> Result<(), MetricError> {
        self.apply(name, MetricValue::Gauge(value))
    }

    /// Parse `text` according to `kind` and apply it.
    ///
    /// Used by the plain-text update path where every piece arrives as text.
    pub fn update_raw(&self, kind: &str, name: &str, text: &str) -> Result<(), MetricError> {
        let kind: MetricKind = kind.parse()?;
        let value = MetricValue::parse(kind, text)?;
        self.apply(name, value)
    }

    /// Verify (when `key` is set), validate and apply one record.
    ///
    /// The hash is checked before anything else touches the store, so a
    /// rejected record leaves the store unchanged.
    pub fn update_checked(&self, key: &str, record: &MetricRecord) -> Result<(), MetricError> {
        integrity::verify(record, key)?;
        let value = record.value()?;
        self.apply(&record.id, value)
    }

    /// Apply records one by one. An invalid record never blocks the others
    /// and nothing is rolled back.
    pub fn apply_batch(&self, key: &str, records: &[MetricRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for (index, record) in records.iter().enumerate() {
            match self.update_checked(key, record) {
                Ok(()) => outcome.applied += 1,
                Err(error) => {
                    warn!(index, id = %record.id, error = %error, "Rejected batch record");
                    outcome.failures.push(BatchFailure {
                        index,
                        id: record.id.clone(),
                        error,
                    });
                }
            }
        }
        debug!(
            applied = outcome.applied,
            rejected = outcome.failures.len(),
            "Applied batch"
        );
        outcome
    }

    /// Current gauge value
    pub fn read_gauge(&self, name: &str) -> Result<f64, MetricError> {
        self.inner
            .read()
            .gauges
            .get(name)
            .copied()
            .ok_or_else(|| MetricError::NotFound {
                kind: MetricKind::Gauge,
                id: name.to_string(),
            })
    }

    /// Current counter total
    pub fn read_counter(&self, name: &str) -> Result<i64, MetricError> {
        self.inner
            .read()
            .counters
            .get(name)
            .copied()
            .ok_or_else(|| MetricError::NotFound {
                kind: MetricKind::Counter,
                id: name.to_string(),
            })
    }

    /// Populated record for an `{id, kind}` query, hashed when `key` is set
    pub fn lookup(&self, key: &str, id: &str, kind: &str) -> Result<MetricRecord, MetricError> {
        let mut record = match kind.parse::<MetricKind>()? {
            MetricKind::Counter => MetricRecord::counter(id, self.read_counter(id)?),
            MetricKind::Gauge => MetricRecord::gauge(id, self.read_gauge(id)?),
        };
        integrity::sign(&mut record, key)?;
        Ok(record)
    }

    /// Consistent copy of the whole store, sorted by kind then name
    pub fn snapshot(&self) -> Snapshot {
        let maps = self.inner.write();
        let mut records: Snapshot = Vec::with_capacity(maps.counters.len() + maps.gauges.len());
        records.extend(
            maps.counters
                .iter()
                .map(|(id, delta)| MetricRecord::counter(id.as_str(), *delta)),
        );
        records.extend(
            maps.gauges
                .iter()
                .map(|(id, value)| MetricRecord::gauge(id.as_str(), *value)),
        );
        drop(maps);

        records.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Merge persisted records into the live maps.
    ///
    /// A restored value replaces the live value for its name. Records that
    /// are invalid are skipped with a warning instead of aborting.
    /// Returns the number of records restored.
    pub fn restore(&self, snapshot: &[MetricRecord]) -> usize {
        let mut maps = self.inner.write();
        let mut restored = 0;
        for record in snapshot {
            let value = match record.value() {
                Ok(value) => value,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Skipping invalid record during restore");
                    continue;
                }
            };
            maps.known.insert((value.kind(), record.id.clone()));
            match value {
                MetricValue::Counter(total) => {
                    maps.counters.insert(record.id.clone(), total);
                }
                MetricValue::Gauge(value) => {
                    maps.gauges.insert(record.id.clone(), value);
                }
            }
            restored += 1;
        }
        restored
    }

    /// Sorted copy of all gauges
    pub fn gauges(&self) -> Vec<(String, f64)> {
        let maps = self.inner.write();
        let mut out: Vec<_> = maps.gauges.iter().map(|(k, v)| (k.clone(), *v)).collect();
        drop(maps);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Sorted copy of all counters
    pub fn counters(&self) -> Vec<(String, i64)> {
        let maps = self.inner.write();
        let mut out: Vec<_> = maps.counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        drop(maps);
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Total number of entries across both kinds
    pub fn len(&self) -> usize {
        let maps = self.inner.read();
        maps.counters.len() + maps.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
