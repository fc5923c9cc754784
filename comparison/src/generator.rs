//! Builds backend sub-queries for one bucket of a comparison.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{ComparisonRequest, MetricFunction, TimeInterval, Window};
use crate::query::BackendQuery;

/// Turns per-bucket [`ComparisonRequest`]s into [`BackendQuery`]s.
///
/// Every query carries its window and bucket index so responses can be
/// keyed correctly whatever order they complete in.
#[derive(Debug, Clone)]
pub struct RequestGenerator {
    top_k: usize,
}

impl RequestGenerator {
    pub fn new(config: &Config) -> Self {
        Self { top_k: config.top_k }
    }

    /// Queries for one bucket, grouped or not depending on the request.
    pub fn generate(
        &self,
        request: &ComparisonRequest,
        metric_functions: &[MetricFunction],
        bucket: usize,
    ) -> Result<Vec<BackendQuery>> {
        if request.has_group_by() {
            self.requests_for_group_by_dimensions(request, metric_functions, bucket)
        } else {
            self.requests_for_aggregation(request, metric_functions, bucket)
        }
    }

    /// One baseline and one current query over the request's windows:
    ///
    /// ```text
    /// select sum(m1), sum(m2) from T where filters and t in [baselineStart, baselineEnd)
    /// select sum(m1), sum(m2) from T where filters and t in [currentStart, currentEnd)
    /// ```
    pub fn requests_for_aggregation(
        &self,
        request: &ComparisonRequest,
        metric_functions: &[MetricFunction],
        bucket: usize,
    ) -> Result<Vec<BackendQuery>> {
        validate(request, metric_functions)?;
        Ok(vec![
            query(request, metric_functions, Window::Baseline, bucket, None),
            query(request, metric_functions, Window::Current, bucket, None),
        ])
    }

    /// For each group-by dimension independently, one baseline and one
    /// current query grouped by that dimension alone, capped at top-K.
    /// Dimensions are never cross-joined.
    pub fn requests_for_group_by_dimensions(
        &self,
        request: &ComparisonRequest,
        metric_functions: &[MetricFunction],
        bucket: usize,
    ) -> Result<Vec<BackendQuery>> {
        validate(request, metric_functions)?;
        let mut queries = Vec::with_capacity(request.group_by_dimensions().len() * 2);
        for dimension in request.group_by_dimensions() {
            for window in [Window::Baseline, Window::Current] {
                let mut query = query(request, metric_functions, window, bucket, Some(dimension));
                query.top_k = Some(self.top_k);
                queries.push(query);
            }
        }
        Ok(queries)
    }
}

fn validate(request: &ComparisonRequest, metric_functions: &[MetricFunction]) -> Result<()> {
    if request.metric_expressions().is_empty() || metric_functions.is_empty() {
        return Err(Error::InvalidRequest(format!(
            "no metrics requested for collection '{}'",
            request.collection()
        )));
    }
    Ok(())
}

fn query(
    request: &ComparisonRequest,
    metric_functions: &[MetricFunction],
    window: Window,
    bucket: usize,
    group_by: Option<&String>,
) -> BackendQuery {
    let interval: TimeInterval = match window {
        Window::Baseline => request.baseline(),
        Window::Current => request.current(),
    };
    BackendQuery {
        collection: request.collection().to_string(),
        metric_functions: metric_functions.to_vec(),
        filters: request.filters().clone(),
        start: interval.start(),
        end: interval.end(),
        group_by: group_by.cloned(),
        top_k: None,
        window,
        bucket,
    }
}
