//! Fans sub-queries out to the backend and gathers their responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use moka::future::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::{CacheConfig, Config};
use crate::error::{Error, Result};
use crate::query::{BackendQuery, BackendResponse, QueryBackend};

/// A sub-query that has been submitted and may still be running.
///
/// Dropping a pending response aborts its task, so a comparison that gives
/// up on one sub-query does not leave the others running.
pub struct PendingResponse {
    description: String,
    handle: JoinHandle<Result<BackendResponse>>,
}

impl PendingResponse {
    /// Waits up to `timeout` for the response.
    pub async fn wait(&mut self, timeout: Duration) -> Result<BackendResponse> {
        match tokio::time::timeout(timeout, &mut self.handle).await {
            Ok(joined) => Ok(joined??),
            Err(_) => Err(Error::BackendTimeout {
                query: self.description.clone(),
                timeout,
            }),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Submits batches of [`BackendQuery`]s for concurrent execution.
///
/// Responses are cached by query, so refreshing a dashboard over the same
/// windows does not hit the backend again until the entries expire.
pub struct QueryDispatcher {
    backend: Arc<dyn QueryBackend>,
    cache: Option<Cache<BackendQuery, Arc<BackendResponse>>>,
    timeout: Duration,
}

impl QueryDispatcher {
    pub fn new(backend: Arc<dyn QueryBackend>, config: &Config) -> Self {
        Self {
            backend,
            cache: config.cache.as_ref().map(build_cache),
            timeout: config.query_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn QueryBackend> {
        &self.backend
    }

    /// Default per-handle wait budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts every query on its own task and returns one pending handle
    /// per query, in submission order.
    #[tracing::instrument(level = "debug", skip_all, fields(queries = queries.len()))]
    pub fn submit_batch(&self, queries: Vec<BackendQuery>) -> Vec<(BackendQuery, PendingResponse)> {
        queries
            .into_iter()
            .map(|query| {
                let pending = self.submit(query.clone());
                (query, pending)
            })
            .collect()
    }

    fn submit(&self, query: BackendQuery) -> PendingResponse {
        let description = query.to_string();
        let backend = self.backend.clone();
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            if let Some(cache) = &cache {
                if let Some(cached) = cache.get(&query).await {
                    debug!(query = %query, "serving sub-query from cache");
                    return Ok(cached.as_ref().clone());
                }
            }

            let response = backend.execute(&query).await?;
            if let Some(cache) = &cache {
                cache.insert(query, Arc::new(response.clone())).await;
            }
            Ok(response)
        });
        PendingResponse {
            description,
            handle,
        }
    }

    /// Waits on each handle in turn, allowing each up to `timeout`.
    ///
    /// The first failure aborts every handle not yet collected and is
    /// returned on its own; no partial results escape.
    pub async fn await_all(
        &self,
        pending: Vec<(BackendQuery, PendingResponse)>,
        timeout: Duration,
    ) -> Result<HashMap<BackendQuery, BackendResponse>> {
        let mut responses = HashMap::with_capacity(pending.len());
        for (query, mut handle) in pending {
            match handle.wait(timeout).await {
                Ok(response) => {
                    responses.insert(query, response);
                }
                Err(err) => {
                    error!(query = %query, error = %err, "sub-query failed, abandoning batch");
                    return Err(err);
                }
            }
        }
        Ok(responses)
    }

    /// Submits `queries` and waits on all of them concurrently with the
    /// configured timeout.
    pub async fn submit_batch_and_wait_all(
        &self,
        queries: Vec<BackendQuery>,
    ) -> Result<HashMap<BackendQuery, BackendResponse>> {
        let timeout = self.timeout;
        let mut pending = self.submit_batch(queries);
        let responses = try_join_all(pending.iter_mut().map(|(_, handle)| handle.wait(timeout)))
            .await
            .inspect_err(|err| error!(error = %err, "sub-query failed, abandoning batch"))?;

        Ok(pending
            .into_iter()
            .map(|(query, _)| query)
            .zip(responses)
            .collect())
    }
}

fn build_cache(config: &CacheConfig) -> Cache<BackendQuery, Arc<BackendResponse>> {
    Cache::builder()
        .max_capacity(config.max_capacity)
        .time_to_live(config.time_to_live)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricFunction, Window};
    use crate::query::ResponseRow;
    use crate::timestamp::Timestamp;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every query with its bucket index; hangs on the bucket in `stall`.
    struct EchoBackend {
        calls: AtomicUsize,
        stall: Option<usize>,
    }

    impl EchoBackend {
        fn new(stall: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                stall,
            }
        }
    }

    #[async_trait]
    impl QueryBackend for EchoBackend {
        async fn execute(&self, query: &BackendQuery) -> Result<BackendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stall == Some(query.bucket) {
                std::future::pending::<()>().await;
            }
            Ok(BackendResponse {
                metric_functions: query.metric_functions.clone(),
                group_key_columns: Vec::new(),
                rows: vec![ResponseRow::new(None, Vec::new(), vec![query.bucket as f64])],
            })
        }
    }

    fn query(bucket: usize) -> BackendQuery {
        BackendQuery {
            collection: "ads".to_string(),
            metric_functions: vec![MetricFunction::sum("clicks")],
            filters: BTreeMap::new(),
            start: Timestamp::from_millis(bucket as i64 * 10),
            end: Timestamp::from_millis(bucket as i64 * 10 + 10),
            group_by: None,
            top_k: None,
            window: Window::Current,
            bucket,
        }
    }

    fn config_without_cache() -> Config {
        Config {
            cache: None,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn should_map_each_query_to_its_response() {
        // given
        let backend = Arc::new(EchoBackend::new(None));
        let dispatcher = QueryDispatcher::new(backend, &config_without_cache());

        // when
        let responses = dispatcher
            .submit_batch_and_wait_all(vec![query(0), query(1), query(2)])
            .await
            .unwrap();

        // then
        assert_eq!(responses.len(), 3);
        for bucket in 0..3 {
            let response = &responses[&query(bucket)];
            assert_eq!(response.rows[0].metrics, vec![bucket as f64]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_fail_whole_batch_when_one_query_times_out() {
        // given
        let backend = Arc::new(EchoBackend::new(Some(1)));
        let dispatcher = QueryDispatcher::new(backend, &config_without_cache());
        let pending = dispatcher.submit_batch(vec![query(0), query(1), query(2)]);

        // when
        let result = dispatcher
            .await_all(pending, Duration::from_secs(5))
            .await;

        // then
        match result {
            Err(Error::BackendTimeout { query, timeout }) => {
                assert!(query.contains("bucket 1"));
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn should_time_out_synchronous_form_with_configured_budget() {
        // given
        let backend = Arc::new(EchoBackend::new(Some(0)));
        let config = Config {
            query_timeout: Duration::from_millis(250),
            cache: None,
            ..Config::default()
        };
        let dispatcher = QueryDispatcher::new(backend, &config);

        // when
        let result = dispatcher
            .submit_batch_and_wait_all(vec![query(0), query(1)])
            .await;

        // then
        assert!(matches!(
            result,
            Err(Error::BackendTimeout { timeout, .. }) if timeout == Duration::from_millis(250)
        ));
    }

    #[tokio::test]
    async fn should_serve_repeated_query_from_cache() {
        // given
        let backend = Arc::new(EchoBackend::new(None));
        let dispatcher = QueryDispatcher::new(backend.clone(), &Config::default());

        // when
        let first = dispatcher
            .submit_batch_and_wait_all(vec![query(4)])
            .await
            .unwrap();
        let second = dispatcher
            .submit_batch_and_wait_all(vec![query(4)])
            .await
            .unwrap();

        // then
        assert_eq!(first, second);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn should_surface_backend_failure() {
        // given
        struct FailingBackend;

        #[async_trait]
        impl QueryBackend for FailingBackend {
            async fn execute(&self, _query: &BackendQuery) -> Result<BackendResponse> {
                Err(Error::Backend("segment unavailable".to_string()))
            }
        }
        let dispatcher = QueryDispatcher::new(Arc::new(FailingBackend), &config_without_cache());

        // when
        let result = dispatcher.submit_batch_and_wait_all(vec![query(0)]).await;

        // then
        assert_eq!(result, Err(Error::Backend("segment unavailable".to_string())));
    }

    #[tokio::test]
    async fn should_abort_task_when_pending_response_dropped() {
        // given
        let backend = Arc::new(EchoBackend::new(Some(0)));
        let dispatcher = QueryDispatcher::new(backend, &config_without_cache());
        let mut pending = dispatcher.submit_batch(vec![query(0)]);
        let (_, handle) = pending.pop().unwrap();
        let abort = handle.handle.abort_handle();

        // when
        drop(handle);
        for _ in 0..16 {
            if abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }

        // then
        assert!(abort.is_finished());
    }
}
