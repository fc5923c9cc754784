//! Backend query model and the execution seam.
//!
//! The comparison pipeline never aggregates data itself. It describes each
//! sub-query as a [`BackendQuery`] and hands it to a [`QueryBackend`],
//! which returns aggregated [`ResponseRow`]s.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{MetricFunction, Window};
use crate::timestamp::Timestamp;

/// Name of the group the backend folds values beyond the top-K cutoff into.
pub const OTHER_GROUP: &str = "OTHER";

/// One aggregation sub-query against the backend.
///
/// `window` and `bucket` identify where the answer belongs once the
/// pipeline reassembles results; they are part of the query identity so
/// that the same time range asked for two buckets stays two queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendQuery {
    pub collection: String,
    pub metric_functions: Vec<MetricFunction>,
    pub filters: BTreeMap<String, Vec<String>>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub group_by: Option<String>,
    pub top_k: Option<usize>,
    pub window: Window,
    pub bucket: usize,
}

impl Display for BackendQuery {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} bucket {} [{}, {})",
            self.collection, self.window, self.bucket, self.start, self.end
        )?;
        if let Some(group_by) = &self.group_by {
            write!(f, " group by {}", group_by)?;
        }
        Ok(())
    }
}

/// One aggregated row returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRow {
    /// Index of the time bucket this row aggregates, or `None` when the
    /// backend did not group by time.
    pub time_bucket: Option<usize>,
    /// Group-by values, aligned with the response's non-time group keys.
    pub dimensions: Vec<String>,
    /// Aggregated values, aligned with the response's metric functions.
    pub metrics: Vec<f64>,
}

impl ResponseRow {
    pub fn new(time_bucket: Option<usize>, dimensions: Vec<String>, metrics: Vec<f64>) -> Self {
        Self {
            time_bucket,
            dimensions,
            metrics,
        }
    }

    /// Value at `index`, or 0 when the backend returned fewer values.
    pub fn metric_or_zero(&self, index: usize) -> f64 {
        self.metrics.get(index).copied().unwrap_or(0.0)
    }
}

/// The backend's answer to one [`BackendQuery`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BackendResponse {
    pub metric_functions: Vec<MetricFunction>,
    pub group_key_columns: Vec<String>,
    pub rows: Vec<ResponseRow>,
}

impl BackendResponse {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<&ResponseRow> {
        self.rows.get(index)
    }
}

/// Executes aggregation sub-queries.
///
/// Implementations own their connection pools and retry policy. The
/// dispatcher runs every call on its own task, so an implementation may
/// be driven concurrently.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Executes one query. For a grouped query the backend returns at most
    /// `top_k` groups ranked by the first metric and folds the rest into
    /// [`OTHER_GROUP`].
    async fn execute(&self, query: &BackendQuery) -> Result<BackendResponse>;
}
