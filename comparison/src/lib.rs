//! OpenData Comparison - time-on-time comparison over OLAP aggregates.
//!
//! Compares a set of metrics between a baseline window and a current window
//! (this week against last week, today against the same day last year). The
//! windows can be broken into aligned time buckets and each bucket broken
//! down further by dimension values.
//!
//! # Architecture
//!
//! A comparison runs as a pipeline over a pluggable [`QueryBackend`]:
//!
//! 1. Both windows are decomposed into index-aligned buckets.
//! 2. Every bucket becomes a baseline and a current sub-query, one pair per
//!    group-by dimension when the request is grouped.
//! 3. All sub-queries are dispatched concurrently and awaited with a
//!    per-query timeout; one failure fails the comparison.
//! 4. Responses are keyed by bucket and dimension value and joined across
//!    the two windows, reading anything missing as 0.
//! 5. Derived metrics such as `ctr = clicks / impressions` are evaluated per
//!    row for each window.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use comparison::{ComparisonHandler, ComparisonRequest, Config, QueryDispatcher};
//! use comparison::{TimeGranularity, Timestamp};
//!
//! let config = Config::default();
//! let dispatcher = QueryDispatcher::new(Arc::new(backend), &config);
//! let handler = ComparisonHandler::new(dispatcher, &config);
//!
//! let request = ComparisonRequest::builder("ads")
//!     .raw_metric("impressions")
//!     .raw_metric("clicks")
//!     .derived_metric("ctr", "clicks / impressions")
//!     .baseline(last_week_start, last_week_end)
//!     .current(this_week_start, this_week_end)
//!     .granularity(TimeGranularity::days(1))
//!     .group_by("country")
//!     .build()?;
//!
//! for row in handler.handle(&request).await?.rows() {
//!     println!("{:?} {:?}", row.dimension(), row.metric("ctr"));
//! }
//! ```

mod config;
mod derived;
mod dispatcher;
mod error;
mod expression;
mod generator;
mod handler;
mod indexer;
mod model;
mod query;
mod reassembler;
mod time_range;
mod timestamp;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{CacheConfig, Config};
pub use derived::append_derived_metrics;
pub use dispatcher::{PendingResponse, QueryDispatcher};
pub use error::{Error, Result};
pub use expression::{
    ExpressionEvaluator, PromqlExpressionEvaluator, metric_functions_from_expressions,
};
pub use generator::RequestGenerator;
pub use handler::ComparisonHandler;
pub use indexer::{IndexMode, ResponseIndex, ResponseKey, WindowIndex, index_response};
pub use model::{
    AggregationFunction, ComparisonRequest, ComparisonRequestBuilder, ComparisonResponse,
    Dimension, Metric, MetricExpression, MetricFunction, Row, TimeGranularity, TimeInterval,
    TimeUnit, Window,
};
pub use query::{BackendQuery, BackendResponse, OTHER_GROUP, QueryBackend, ResponseRow};
pub use reassembler::reassemble;
pub use time_range::{BucketedWindows, decompose, decompose_windows};
pub use timestamp::Timestamp;
