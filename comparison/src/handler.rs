//! Entry point that runs a comparison end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::Config;
use crate::derived::append_derived_metrics;
use crate::dispatcher::QueryDispatcher;
use crate::error::{Error, Result};
use crate::expression::{
    ExpressionEvaluator, PromqlExpressionEvaluator, metric_functions_from_expressions,
};
use crate::generator::RequestGenerator;
use crate::indexer::{IndexMode, WindowIndex};
use crate::model::{ComparisonRequest, ComparisonResponse, MetricFunction, Row};
use crate::query::{BackendQuery, BackendResponse};
use crate::reassembler::reassemble;
use crate::time_range::{BucketedWindows, decompose_windows};

/// Runs time-on-time comparisons.
///
/// A request is broken into aligned baseline/current buckets, each bucket
/// into backend sub-queries; all sub-queries run concurrently and their
/// answers are joined back into one row per bucket and dimension value.
pub struct ComparisonHandler {
    dispatcher: QueryDispatcher,
    generator: RequestGenerator,
    evaluator: Arc<dyn ExpressionEvaluator>,
    query_timeout: Duration,
}

impl ComparisonHandler {
    pub fn new(dispatcher: QueryDispatcher, config: &Config) -> Self {
        Self {
            dispatcher,
            generator: RequestGenerator::new(config),
            evaluator: Arc::new(PromqlExpressionEvaluator),
            query_timeout: config.query_timeout,
        }
    }

    /// Replaces the default PromQL-based expression evaluator.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn dispatcher(&self) -> &QueryDispatcher {
        &self.dispatcher
    }

    /// Runs the full comparison.
    ///
    /// Sub-queries for every bucket are submitted together, then each is
    /// waited on for up to the configured query timeout. If any of them
    /// fails or times out the whole comparison fails and the rest are
    /// cancelled.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(
            collection = request.collection(),
            buckets = tracing::field::Empty,
            queries = tracing::field::Empty,
        )
    )]
    pub async fn handle(&self, request: &ComparisonRequest) -> Result<ComparisonResponse> {
        let metric_functions = self.metric_functions(request)?;
        let windows = decompose_windows(request)?;

        let mut queries = Vec::new();
        let pairs = windows.baseline.iter().zip(&windows.current);
        for (bucket, (baseline, current)) in pairs.enumerate() {
            let bucket_request = request.for_bucket(*baseline, *current);
            queries.extend(
                self.generator
                    .generate(&bucket_request, &metric_functions, bucket)?,
            );
        }

        let span = tracing::Span::current();
        span.record("buckets", windows.len());
        span.record("queries", queries.len());
        debug!(buckets = windows.len(), queries = queries.len(), "dispatching sub-queries");

        let pending = self.dispatcher.submit_batch(queries);
        let responses = self.dispatcher.await_all(pending, self.query_timeout).await?;

        let mode = IndexMode::for_request(request.granularity().is_some(), request.has_group_by());
        let rows = self.assemble(mode, request, &windows, &metric_functions, &responses)?;
        debug!(rows = rows.len(), "comparison complete");
        Ok(ComparisonResponse::new(rows))
    }

    /// Compares the two windows as a whole, ignoring granularity and
    /// group-by, and returns the single resulting row.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = request.collection()))]
    pub async fn handle_aggregate_only(&self, request: &ComparisonRequest) -> Result<Row> {
        let metric_functions = self.metric_functions(request)?;
        let windows = whole_windows(request);
        let queries = self
            .generator
            .requests_for_aggregation(request, &metric_functions, 0)?;

        let responses = self.dispatcher.submit_batch_and_wait_all(queries).await?;
        let rows = self.assemble(
            IndexMode::Tabular,
            request,
            &windows,
            &metric_functions,
            &responses,
        )?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Backend("aggregation produced no row".to_string()))
    }

    /// Compares the two windows as a whole, broken down by each group-by
    /// dimension. Granularity is ignored.
    #[tracing::instrument(level = "debug", skip_all, fields(collection = request.collection()))]
    pub async fn handle_group_by_dimension(&self, request: &ComparisonRequest) -> Result<Vec<Row>> {
        if !request.has_group_by() {
            return Err(Error::InvalidRequest(
                "dimension breakdown requires at least one group-by dimension".to_string(),
            ));
        }
        let metric_functions = self.metric_functions(request)?;
        let windows = whole_windows(request);
        let queries = self
            .generator
            .requests_for_group_by_dimensions(request, &metric_functions, 0)?;

        let responses = self.dispatcher.submit_batch_and_wait_all(queries).await?;
        self.assemble(
            IndexMode::Heatmap,
            request,
            &windows,
            &metric_functions,
            &responses,
        )
    }

    fn metric_functions(&self, request: &ComparisonRequest) -> Result<Vec<MetricFunction>> {
        metric_functions_from_expressions(self.evaluator.as_ref(), request.metric_expressions())
    }

    fn assemble(
        &self,
        mode: IndexMode,
        request: &ComparisonRequest,
        windows: &BucketedWindows,
        metric_functions: &[MetricFunction],
        responses: &HashMap<BackendQuery, BackendResponse>,
    ) -> Result<Vec<Row>> {
        let index = WindowIndex::build(mode, responses);
        let mut rows = reassemble(
            mode,
            &index,
            windows,
            metric_functions,
            request.group_by_dimensions(),
        );
        append_derived_metrics(
            &mut rows,
            request.metric_expressions(),
            metric_functions,
            self.evaluator.as_ref(),
        )?;
        Ok(rows)
    }
}

fn whole_windows(request: &ComparisonRequest) -> BucketedWindows {
    BucketedWindows {
        baseline: vec![request.baseline()],
        current: vec![request.current()],
    }
}
