//! Joins baseline and current rows into comparison rows.

use crate::indexer::{IndexMode, ResponseKey, WindowIndex};
use crate::model::{Dimension, Metric, MetricFunction, Row, TimeInterval, Window};
use crate::query::ResponseRow;
use crate::time_range::BucketedWindows;

/// Builds one [`Row`] per output key with a baseline and current value for
/// every metric function.
///
/// The key space is the union of both windows, so a value that exists on
/// one side only still produces a row, with the missing side read as 0.
/// Short metric vectors read as 0 as well.
///
/// Rows come out in a fixed order. Tabular rows follow bucket order.
/// Contributor rows go dimension by dimension (declared order), then value
/// (sorted), then bucket. Heatmap rows go dimension then value and carry the
/// first bucket's intervals.
pub fn reassemble(
    mode: IndexMode,
    index: &WindowIndex,
    windows: &BucketedWindows,
    metric_functions: &[MetricFunction],
    group_by_dimensions: &[String],
) -> Vec<Row> {
    let mut rows = Vec::new();
    match mode {
        IndexMode::Tabular => {
            for (bucket, (baseline, current)) in buckets(windows) {
                let key = ResponseKey::bucket(bucket);
                rows.push(row(index, &key, baseline, current, None, metric_functions));
            }
        }
        IndexMode::Contributor => {
            for dimension in ordered_dimensions(index, group_by_dimensions) {
                for (bucket, (baseline, current)) in buckets(windows) {
                    let key = ResponseKey::contributor(bucket, dimension.clone());
                    rows.push(row(
                        index,
                        &key,
                        baseline,
                        current,
                        Some(dimension.clone()),
                        metric_functions,
                    ));
                }
            }
        }
        IndexMode::Heatmap => {
            let Some((baseline, current)) = windows.pair(0) else {
                return rows;
            };
            for dimension in ordered_dimensions(index, group_by_dimensions) {
                let key = ResponseKey::heatmap(dimension.clone());
                rows.push(row(
                    index,
                    &key,
                    baseline,
                    current,
                    Some(dimension),
                    metric_functions,
                ));
            }
        }
    }
    rows
}

fn buckets(windows: &BucketedWindows) -> impl Iterator<Item = (usize, (TimeInterval, TimeInterval))> + '_ {
    (0..windows.len()).filter_map(|bucket| windows.pair(bucket).map(|pair| (bucket, pair)))
}

/// Dimension values seen in either window, grouped by dimension name in
/// declared order. Names the request did not declare sort last.
fn ordered_dimensions(index: &WindowIndex, group_by_dimensions: &[String]) -> Vec<Dimension> {
    let mut dimensions: Vec<Dimension> = index.dimensions().into_iter().collect();
    dimensions.sort_by_key(|dimension| {
        group_by_dimensions
            .iter()
            .position(|name| *name == dimension.name)
            .unwrap_or(group_by_dimensions.len())
    });
    dimensions
}

fn row(
    index: &WindowIndex,
    key: &ResponseKey,
    baseline: TimeInterval,
    current: TimeInterval,
    dimension: Option<Dimension>,
    metric_functions: &[MetricFunction],
) -> Row {
    let baseline_row = index.get(Window::Baseline, key);
    let current_row = index.get(Window::Current, key);
    let value = |row: Option<&ResponseRow>, i: usize| row.map_or(0.0, |r| r.metric_or_zero(i));

    let mut row = Row::new(baseline, current, dimension);
    for (i, function) in metric_functions.iter().enumerate() {
        row.push_metric(Metric::new(
            function.metric_name.clone(),
            value(baseline_row, i),
            value(current_row, i),
        ));
    }
    row
}
