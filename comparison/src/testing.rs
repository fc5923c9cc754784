//! Testing utilities for the comparison pipeline.
//!
//! [`InMemoryBackend`] answers [`BackendQuery`]s from a fixed set of
//! records the way an OLAP store would: filter, group, rank, sum. It can
//! also be told to slow down or never answer, so timeout handling can be
//! exercised with a paused tokio clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Window;
use crate::query::{BackendQuery, BackendResponse, OTHER_GROUP, QueryBackend, ResponseRow};
use crate::timestamp::Timestamp;

/// One raw event: a timestamp, its dimension values and its metric values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: Timestamp,
    pub dimensions: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
}

impl Record {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            dimensions: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn at_millis(millis: i64) -> Self {
        Self::new(Timestamp::from_millis(millis))
    }

    pub fn with_dimension(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.dimensions.insert(name.into(), value.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    fn matches(&self, query: &BackendQuery) -> bool {
        query.start <= self.timestamp
            && self.timestamp < query.end
            && query.filters.iter().all(|(dimension, accepted)| {
                self.dimensions
                    .get(dimension)
                    .is_some_and(|value| accepted.contains(value))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Stall {
    window: Window,
    bucket: Option<usize>,
}

/// A [`QueryBackend`] over in-memory records.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    collections: HashMap<String, Vec<Record>>,
    latency: Option<Duration>,
    stalls: Vec<Stall>,
    executed: Mutex<Vec<BackendQuery>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(
        mut self,
        collection: impl Into<String>,
        records: impl IntoIterator<Item = Record>,
    ) -> Self {
        self.collections
            .entry(collection.into())
            .or_default()
            .extend(records);
        self
    }

    /// Delays every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Never answers queries for `window`.
    pub fn stall_window(mut self, window: Window) -> Self {
        self.stalls.push(Stall {
            window,
            bucket: None,
        });
        self
    }

    /// Never answers queries for one bucket of `window`.
    pub fn stall_bucket(mut self, window: Window, bucket: usize) -> Self {
        self.stalls.push(Stall {
            window,
            bucket: Some(bucket),
        });
        self
    }

    /// Number of queries received so far, answered or not.
    pub fn query_count(&self) -> usize {
        self.executed().len()
    }

    /// Queries received so far, in arrival order.
    pub fn executed(&self) -> Vec<BackendQuery> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_stalled(&self, query: &BackendQuery) -> bool {
        self.stalls.iter().any(|stall| {
            stall.window == query.window && stall.bucket.is_none_or(|b| b == query.bucket)
        })
    }

    fn aggregate(&self, query: &BackendQuery) -> BackendResponse {
        let records: Vec<&Record> = self
            .collections
            .get(&query.collection)
            .map(|records| records.iter().filter(|r| r.matches(query)).collect())
            .unwrap_or_default();

        let rows = match &query.group_by {
            None if records.is_empty() => Vec::new(),
            None => vec![ResponseRow::new(None, Vec::new(), sums(query, &records))],
            Some(dimension) => grouped_rows(query, dimension, &records),
        };

        BackendResponse {
            metric_functions: query.metric_functions.clone(),
            group_key_columns: query.group_by.iter().cloned().collect(),
            rows,
        }
    }
}

#[async_trait]
impl QueryBackend for InMemoryBackend {
    async fn execute(&self, query: &BackendQuery) -> Result<BackendResponse> {
        self.executed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query.clone());

        if self.is_stalled(query) {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.aggregate(query))
    }
}

fn sums(query: &BackendQuery, records: &[&Record]) -> Vec<f64> {
    query
        .metric_functions
        .iter()
        .map(|function| {
            records
                .iter()
                .filter_map(|record| record.metrics.get(&function.metric_name))
                .sum::<f64>()
        })
        .collect()
}

/// Groups by one dimension, keeps the `top_k` largest groups by the first
/// metric and folds the remainder into [`OTHER_GROUP`].
fn grouped_rows(query: &BackendQuery, dimension: &str, records: &[&Record]) -> Vec<ResponseRow> {
    let mut groups: BTreeMap<&str, Vec<&Record>> = BTreeMap::new();
    for &record in records {
        if let Some(value) = record.dimensions.get(dimension) {
            groups.entry(value.as_str()).or_default().push(record);
        }
    }

    let mut ranked: Vec<(String, Vec<f64>)> = groups
        .into_iter()
        .map(|(value, members)| (value.to_string(), sums(query, &members)))
        .collect();
    ranked.sort_by(|(a_value, a), (b_value, b)| {
        let a = a.first().copied().unwrap_or(0.0);
        let b = b.first().copied().unwrap_or(0.0);
        b.total_cmp(&a).then_with(|| a_value.cmp(b_value))
    });

    if let Some(top_k) = query.top_k {
        if ranked.len() > top_k {
            let overflow = ranked.split_off(top_k);
            let mut other = vec![0.0; query.metric_functions.len()];
            for (_, metrics) in overflow {
                for (total, value) in other.iter_mut().zip(metrics) {
                    *total += value;
                }
            }
            ranked.push((OTHER_GROUP.to_string(), other));
        }
    }

    ranked
        .into_iter()
        .map(|(value, metrics)| ResponseRow::new(None, vec![value], metrics))
        .collect()
}
