//! Core data types for time-on-time comparison.
//!
//! A [`ComparisonRequest`] names a collection, the metrics to compare, the
//! two windows and how to break them down. The pipeline answers with a
//! [`ComparisonResponse`]: one [`Row`] per output key, each carrying a
//! baseline and a current value for every requested [`Metric`].

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::timestamp::Timestamp;

/// Unit of a [`TimeGranularity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    /// Length of one unit in milliseconds.
    pub fn millis(&self) -> i64 {
        match self {
            TimeUnit::Milliseconds => 1,
            TimeUnit::Seconds => 1_000,
            TimeUnit::Minutes => 60_000,
            TimeUnit::Hours => 3_600_000,
            TimeUnit::Days => 86_400_000,
            TimeUnit::Weeks => 604_800_000,
        }
    }
}

impl Display for TimeUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeUnit::Milliseconds => "MILLISECONDS",
            TimeUnit::Seconds => "SECONDS",
            TimeUnit::Minutes => "MINUTES",
            TimeUnit::Hours => "HOURS",
            TimeUnit::Days => "DAYS",
            TimeUnit::Weeks => "WEEKS",
        };
        f.write_str(name)
    }
}

/// Bucket width used to break a window into aligned sub-intervals,
/// expressed as a multiplier of a [`TimeUnit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeGranularity {
    pub size: u32,
    pub unit: TimeUnit,
}

impl TimeGranularity {
    pub fn new(size: u32, unit: TimeUnit) -> Self {
        Self { size, unit }
    }

    pub fn days(size: u32) -> Self {
        Self::new(size, TimeUnit::Days)
    }

    pub fn hours(size: u32) -> Self {
        Self::new(size, TimeUnit::Hours)
    }

    /// Width of one bucket in milliseconds.
    pub fn to_millis(&self) -> i64 {
        i64::from(self.size).saturating_mul(self.unit.millis())
    }
}

impl Display for TimeGranularity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.size, self.unit)
    }
}

/// Half-open interval `[start, end)`. Always satisfies `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeInterval {
    start: Timestamp,
    end: Timestamp,
}

impl TimeInterval {
    /// Creates an interval, rejecting empty or inverted ranges.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn from_millis(start: i64, end: i64) -> Result<Self> {
        Self::new(Timestamp::from_millis(start), Timestamp::from_millis(end))
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    pub fn duration_millis(&self) -> i64 {
        self.end - self.start
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl Display for TimeInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Which side of the comparison a value or query belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Window {
    Baseline,
    Current,
}

impl Display for Window {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Window::Baseline => f.write_str("baseline"),
            Window::Current => f.write_str("current"),
        }
    }
}

/// Aggregation applied by the backend to a raw metric column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationFunction {
    Sum,
}

impl Display for AggregationFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationFunction::Sum => f.write_str("SUM"),
        }
    }
}

/// A raw metric the backend aggregates, e.g. `SUM(clicks)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricFunction {
    pub function: AggregationFunction,
    pub metric_name: String,
}

impl MetricFunction {
    pub fn sum(metric_name: impl Into<String>) -> Self {
        Self {
            function: AggregationFunction::Sum,
            metric_name: metric_name.into(),
        }
    }
}

impl Display for MetricFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.function, self.metric_name)
    }
}

/// A named arithmetic expression over raw metric names.
///
/// A raw metric is the identity expression: `impressions = impressions`.
/// Anything else (`ctr = clicks / impressions`) is derived and evaluated
/// after the backend values are joined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricExpression {
    pub name: String,
    pub expression: String,
}

impl MetricExpression {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
        }
    }

    /// Expression that reads a single backend metric under its own name.
    pub fn raw(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            expression: name.clone(),
            name,
        }
    }
}

/// One group-by dimension value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A time-on-time comparison request.
///
/// Immutable once built. The pipeline derives one specialized copy per
/// bucket via [`ComparisonRequest::for_bucket`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRequest {
    collection: String,
    metric_expressions: Vec<MetricExpression>,
    group_by_dimensions: Vec<String>,
    baseline: TimeInterval,
    current: TimeInterval,
    granularity: Option<TimeGranularity>,
    filters: BTreeMap<String, Vec<String>>,
}

impl ComparisonRequest {
    pub fn builder(collection: impl Into<String>) -> ComparisonRequestBuilder {
        ComparisonRequestBuilder::new(collection)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn metric_expressions(&self) -> &[MetricExpression] {
        &self.metric_expressions
    }

    pub fn group_by_dimensions(&self) -> &[String] {
        &self.group_by_dimensions
    }

    pub fn baseline(&self) -> TimeInterval {
        self.baseline
    }

    pub fn current(&self) -> TimeInterval {
        self.current
    }

    pub fn granularity(&self) -> Option<&TimeGranularity> {
        self.granularity.as_ref()
    }

    /// Dimension name to accepted values. A record matches when, for every
    /// entry, its value for that dimension is one of the listed values.
    pub fn filters(&self) -> &BTreeMap<String, Vec<String>> {
        &self.filters
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by_dimensions.is_empty()
    }

    /// Copy of this request narrowed to one baseline/current bucket pair.
    pub fn for_bucket(&self, baseline: TimeInterval, current: TimeInterval) -> Self {
        Self {
            baseline,
            current,
            ..self.clone()
        }
    }
}

/// Fluent builder for [`ComparisonRequest`].
#[derive(Debug, Clone)]
pub struct ComparisonRequestBuilder {
    collection: String,
    metric_expressions: Vec<MetricExpression>,
    group_by_dimensions: Vec<String>,
    baseline: Option<(Timestamp, Timestamp)>,
    current: Option<(Timestamp, Timestamp)>,
    granularity: Option<TimeGranularity>,
    filters: BTreeMap<String, Vec<String>>,
}

impl ComparisonRequestBuilder {
    fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            metric_expressions: Vec::new(),
            group_by_dimensions: Vec::new(),
            baseline: None,
            current: None,
            granularity: None,
            filters: BTreeMap::new(),
        }
    }

    pub fn metric(mut self, expression: MetricExpression) -> Self {
        self.metric_expressions.push(expression);
        self
    }

    /// Adds a metric read directly from the backend.
    pub fn raw_metric(self, name: impl Into<String>) -> Self {
        self.metric(MetricExpression::raw(name))
    }

    /// Adds a metric computed from other metrics.
    pub fn derived_metric(self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.metric(MetricExpression::new(name, expression))
    }

    pub fn group_by(mut self, dimension: impl Into<String>) -> Self {
        self.group_by_dimensions.push(dimension.into());
        self
    }

    pub fn baseline(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.baseline = Some((start, end));
        self
    }

    pub fn current(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.current = Some((start, end));
        self
    }

    pub fn granularity(mut self, granularity: TimeGranularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    pub fn filter(mut self, dimension: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters
            .entry(dimension.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Validates both windows and produces the request.
    pub fn build(self) -> Result<ComparisonRequest> {
        let (baseline_start, baseline_end) = self
            .baseline
            .ok_or_else(|| Error::InvalidRequest("baseline window is not set".to_string()))?;
        let (current_start, current_end) = self
            .current
            .ok_or_else(|| Error::InvalidRequest("current window is not set".to_string()))?;
        if self.group_by_dimensions.iter().any(|d| d.is_empty()) {
            return Err(Error::InvalidRequest(
                "group-by dimension names must not be empty".to_string(),
            ));
        }

        Ok(ComparisonRequest {
            collection: self.collection,
            metric_expressions: self.metric_expressions,
            group_by_dimensions: self.group_by_dimensions,
            baseline: TimeInterval::new(baseline_start, baseline_end)?,
            current: TimeInterval::new(current_start, current_end)?,
            granularity: self.granularity,
            filters: self.filters,
        })
    }
}

/// Baseline and current value of one metric within a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub baseline_value: f64,
    pub current_value: f64,
}

impl Metric {
    pub fn new(name: impl Into<String>, baseline_value: f64, current_value: f64) -> Self {
        Self {
            name: name.into(),
            baseline_value,
            current_value,
        }
    }
}

/// One output row of a comparison.
///
/// Metrics keep insertion order: raw metrics in metric-function order,
/// followed by derived metrics in expression order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    baseline: TimeInterval,
    current: TimeInterval,
    dimension: Option<Dimension>,
    metrics: Vec<Metric>,
}

impl Row {
    pub fn new(baseline: TimeInterval, current: TimeInterval, dimension: Option<Dimension>) -> Self {
        Self {
            baseline,
            current,
            dimension,
            metrics: Vec::new(),
        }
    }

    pub fn baseline(&self) -> TimeInterval {
        self.baseline
    }

    pub fn current(&self) -> TimeInterval {
        self.current
    }

    pub fn dimension(&self) -> Option<&Dimension> {
        self.dimension.as_ref()
    }

    pub fn dimension_name(&self) -> Option<&str> {
        self.dimension.as_ref().map(|d| d.name.as_str())
    }

    pub fn dimension_value(&self) -> Option<&str> {
        self.dimension.as_ref().map(|d| d.value.as_str())
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub(crate) fn push_metric(&mut self, metric: Metric) {
        self.metrics.push(metric);
    }
}

/// Ordered result of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonResponse {
    rows: Vec<Row>,
}

impl ComparisonResponse {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Metric names in the order they appear on the first row.
    pub fn metric_names(&self) -> Vec<&str> {
        self.rows
            .first()
            .map(|row| row.metrics.iter().map(|m| m.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Distinct dimension names, in first-seen order.
    pub fn dimension_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for name in self.rows.iter().filter_map(Row::dimension_name) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}
