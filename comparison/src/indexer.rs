//! Keys backend rows so the two windows can be joined.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use crate::model::{Dimension, Window};
use crate::query::{BackendQuery, BackendResponse, ResponseRow};

/// How rows are keyed, following what the comparison breaks down by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Time buckets only: one row per bucket.
    Tabular,
    /// Time buckets and dimension values: one row per bucket and value.
    Contributor,
    /// Dimension values only: one row per value over the whole window.
    Heatmap,
}

impl IndexMode {
    /// An ungrouped comparison without time bucketing is a single
    /// tabular bucket.
    pub fn for_request(has_time: bool, has_group_by: bool) -> Self {
        match (has_time, has_group_by) {
            (true, true) => IndexMode::Contributor,
            (false, true) => IndexMode::Heatmap,
            (_, false) => IndexMode::Tabular,
        }
    }

    fn keys_bucket(&self) -> bool {
        matches!(self, IndexMode::Tabular | IndexMode::Contributor)
    }

    fn keys_dimension(&self) -> bool {
        matches!(self, IndexMode::Contributor | IndexMode::Heatmap)
    }
}

/// Join key for one backend row.
///
/// Which parts are set depends on the [`IndexMode`]; a dimension value
/// containing any character still compares by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResponseKey {
    pub bucket: Option<usize>,
    pub dimension: Option<Dimension>,
}

impl ResponseKey {
    pub fn bucket(bucket: usize) -> Self {
        Self {
            bucket: Some(bucket),
            dimension: None,
        }
    }

    pub fn contributor(bucket: usize, dimension: Dimension) -> Self {
        Self {
            bucket: Some(bucket),
            dimension: Some(dimension),
        }
    }

    pub fn heatmap(dimension: Dimension) -> Self {
        Self {
            bucket: None,
            dimension: Some(dimension),
        }
    }
}

pub type ResponseIndex = HashMap<ResponseKey, ResponseRow>;

/// Adds every row of `response` to `index`.
///
/// The bucket comes from the row when the backend grouped by time and from
/// the query otherwise. The dimension value is the row's first dimension
/// column, since each grouped query covers exactly one dimension. A later
/// row with the same key replaces an earlier one.
pub fn index_response(
    mode: IndexMode,
    query: &BackendQuery,
    response: &BackendResponse,
    index: &mut ResponseIndex,
) {
    let dimension_name = query
        .group_by
        .clone()
        .or_else(|| response.group_key_columns.last().cloned());

    for row in &response.rows {
        let bucket = mode
            .keys_bucket()
            .then(|| row.time_bucket.unwrap_or(query.bucket));

        let dimension = if mode.keys_dimension() {
            match (&dimension_name, row.dimensions.first()) {
                (Some(name), Some(value)) => Some(Dimension::new(name.clone(), value.clone())),
                _ => {
                    warn!(query = %query, "grouped response row carries no dimension value");
                    continue;
                }
            }
        } else {
            None
        };

        index.insert(ResponseKey { bucket, dimension }, row.clone());
    }
}

/// Baseline and current rows, each keyed by [`ResponseKey`].
#[derive(Debug, Clone, Default)]
pub struct WindowIndex {
    pub baseline: ResponseIndex,
    pub current: ResponseIndex,
}

impl WindowIndex {
    /// Indexes a batch of responses, routing each by its query's window.
    pub fn build<'a>(
        mode: IndexMode,
        responses: impl IntoIterator<Item = (&'a BackendQuery, &'a BackendResponse)>,
    ) -> Self {
        let mut index = WindowIndex::default();
        for (query, response) in responses {
            let target = match query.window {
                Window::Baseline => &mut index.baseline,
                Window::Current => &mut index.current,
            };
            index_response(mode, query, response, target);
        }
        index
    }

    pub fn get(&self, window: Window, key: &ResponseKey) -> Option<&ResponseRow> {
        match window {
            Window::Baseline => self.baseline.get(key),
            Window::Current => self.current.get(key),
        }
    }

    /// Every dimension value seen in either window.
    pub fn dimensions(&self) -> BTreeSet<Dimension> {
        self.baseline
            .keys()
            .chain(self.current.keys())
            .filter_map(|key| key.dimension.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MetricFunction;
    use crate::timestamp::Timestamp;
    use std::collections::BTreeMap;

    fn query(window: Window, bucket: usize, group_by: Option<&str>) -> BackendQuery {
        BackendQuery {
            collection: "ads".to_string(),
            metric_functions: vec![MetricFunction::sum("clicks")],
            filters: BTreeMap::new(),
            start: Timestamp::from_millis(0),
            end: Timestamp::from_millis(10),
            group_by: group_by.map(str::to_string),
            top_k: group_by.map(|_| 25),
            window,
            bucket,
        }
    }

    fn response(rows: Vec<ResponseRow>) -> BackendResponse {
        BackendResponse {
            metric_functions: vec![MetricFunction::sum("clicks")],
            group_key_columns: Vec::new(),
            rows,
        }
    }

    fn row(time_bucket: Option<usize>, dimension: Option<&str>, value: f64) -> ResponseRow {
        ResponseRow::new(
            time_bucket,
            dimension.into_iter().map(str::to_string).collect(),
            vec![value],
        )
    }

    #[test]
    fn should_key_tabular_rows_by_query_bucket() {
        // given
        let query = query(Window::Current, 4, None);
        let response = response(vec![row(None, None, 7.0)]);
        let mut index = ResponseIndex::new();

        // when
        index_response(IndexMode::Tabular, &query, &response, &mut index);

        // then
        assert_eq!(index.len(), 1);
        assert_eq!(index[&ResponseKey::bucket(4)].metrics, vec![7.0]);
    }

    #[test]
    fn should_prefer_row_time_bucket_over_query_bucket() {
        // given: a backend that grouped the whole window by time itself
        let query = query(Window::Current, 0, None);
        let response = response(vec![row(Some(0), None, 1.0), row(Some(1), None, 2.0)]);
        let mut index = ResponseIndex::new();

        // when
        index_response(IndexMode::Tabular, &query, &response, &mut index);

        // then
        assert_eq!(index[&ResponseKey::bucket(0)].metrics, vec![1.0]);
        assert_eq!(index[&ResponseKey::bucket(1)].metrics, vec![2.0]);
    }

    #[test]
    fn should_key_contributor_rows_without_delimiter_collisions() {
        // given: values that would collide as "bucket|value" strings
        let query = query(Window::Baseline, 1, Some("page"));
        let response = response(vec![row(None, Some("a|b"), 1.0), row(None, Some("b"), 2.0)]);
        let mut index = ResponseIndex::new();

        // when
        index_response(IndexMode::Contributor, &query, &response, &mut index);

        // then
        assert_eq!(index.len(), 2);
        let key = ResponseKey::contributor(1, Dimension::new("page", "a|b"));
        assert_eq!(index[&key].metrics, vec![1.0]);
    }

    #[test]
    fn should_key_heatmap_rows_by_dimension_only() {
        // given
        let query = query(Window::Current, 0, Some("country"));
        let response = response(vec![row(None, Some("us"), 3.0)]);
        let mut index = ResponseIndex::new();

        // when
        index_response(IndexMode::Heatmap, &query, &response, &mut index);

        // then
        let key = ResponseKey::heatmap(Dimension::new("country", "us"));
        assert_eq!(index[&key].metrics, vec![3.0]);
    }

    #[test]
    fn should_let_last_duplicate_win() {
        // given
        let query = query(Window::Current, 0, Some("country"));
        let response = response(vec![row(None, Some("us"), 1.0), row(None, Some("us"), 9.0)]);
        let mut index = ResponseIndex::new();

        // when
        index_response(IndexMode::Heatmap, &query, &response, &mut index);

        // then
        assert_eq!(index.len(), 1);
        let key = ResponseKey::heatmap(Dimension::new("country", "us"));
        assert_eq!(index[&key].metrics, vec![9.0]);
    }

    #[test]
    fn should_skip_grouped_rows_without_dimension_value() {
        let query = query(Window::Current, 0, Some("country"));
        let response = response(vec![row(None, None, 1.0)]);
        let mut index = ResponseIndex::new();

        index_response(IndexMode::Heatmap, &query, &response, &mut index);

        assert!(index.is_empty());
    }

    #[test]
    fn should_route_responses_by_window_and_union_dimensions() {
        // given
        let baseline_query = query(Window::Baseline, 0, Some("country"));
        let current_query = query(Window::Current, 0, Some("country"));
        let baseline = response(vec![row(None, Some("us"), 1.0)]);
        let current = response(vec![row(None, Some("us"), 2.0), row(None, Some("de"), 3.0)]);
        let responses = vec![(&baseline_query, &baseline), (&current_query, &current)];

        // when
        let index = WindowIndex::build(IndexMode::Heatmap, responses);

        // then
        assert_eq!(index.baseline.len(), 1);
        assert_eq!(index.current.len(), 2);
        let values: Vec<String> = index.dimensions().into_iter().map(|d| d.value).collect();
        assert_eq!(values, vec!["de".to_string(), "us".to_string()]);
        let de = ResponseKey::heatmap(Dimension::new("country", "de"));
        assert!(index.get(Window::Baseline, &de).is_none());
        assert_eq!(index.get(Window::Current, &de).unwrap().metrics, vec![3.0]);
    }
}
