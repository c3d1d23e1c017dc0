//! The pending-request table.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::protocol::ResponseEnvelope;

use super::error::RequestError;
use super::validate::{validate_response, WorkerResponse};

type Completion = oneshot::Sender<Result<WorkerResponse, RequestError>>;

/// Caller data attached to a request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Directory the declared output files must exist in.
    pub work_dir: Option<PathBuf>,
}

impl RequestContext {
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: Some(work_dir.into()),
        }
    }
}

/// What `resolve` did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The matching request completed successfully.
    Completed,
    /// The matching request failed validation.
    Rejected,
    /// No request with that id is pending. The response was dropped.
    Unmatched,
}

struct PendingRequest {
    completion: Completion,
    context: RequestContext,
    timer: AbortHandle,
    registered_at: Instant,
}

struct Inner {
    name: String,
    pending: Mutex<HashMap<String, PendingRequest>>,
    count: watch::Sender<usize>,
}

/// Matches asynchronous responses to in-flight requests by id.
///
/// Every entry leaves the table exactly once, through `resolve`, `reject`,
/// its deadline or `fail_all`, all of which remove it under the same lock
/// before completing the caller's future.
#[derive(Clone)]
pub struct TaskCorrelator {
    inner: Arc<Inner>,
}

impl TaskCorrelator {
    pub fn new(name: impl Into<String>) -> Self {
        let (count, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                pending: Mutex::new(HashMap::new()),
                count,
            }),
        }
    }

    /// Registers a request and starts its deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(
        &self,
        id: impl Into<String>,
        context: RequestContext,
        timeout: Duration,
    ) -> Result<PendingResponse, RequestError> {
        let id = id.into();
        let (completion, receiver) = oneshot::channel();

        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(RequestError::DuplicateId { id });
        }
        let timer = tokio::spawn(expire(
            Arc::downgrade(&self.inner),
            id.clone(),
            timeout,
        ))
        .abort_handle();
        pending.insert(
            id.clone(),
            PendingRequest {
                completion,
                context,
                timer,
                registered_at: Instant::now(),
            },
        );
        self.inner.count.send_replace(pending.len());
        debug!(worker = %self.inner.name, request_id = %id, "Request registered");

        Ok(PendingResponse { id, receiver })
    }

    /// Completes the request matching `envelope.id`, after validating it.
    ///
    /// The entry is taken before the output files are checked on disk, so a
    /// deadline firing meanwhile finds nothing to expire.
    pub async fn resolve(&self, envelope: ResponseEnvelope) -> ResolveOutcome {
        let Some(entry) = self.take(&envelope.id) else {
            debug!(
                worker = %self.inner.name,
                request_id = %envelope.id,
                "Dropping response with no pending request"
            );
            metrics::UNMATCHED_RESPONSES.inc();
            return ResolveOutcome::Unmatched;
        };
        entry.timer.abort();
        let elapsed = entry.registered_at.elapsed();

        match validate_response(&envelope, entry.context.work_dir.as_deref()).await {
            Ok(response) => {
                info!(
                    worker = %self.inner.name,
                    request_id = %envelope.id,
                    code = response.code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Request completed"
                );
                record_outcome("success", elapsed);
                let _ = entry.completion.send(Ok(response));
                ResolveOutcome::Completed
            }
            Err(reason) => {
                warn!(
                    worker = %self.inner.name,
                    request_id = %envelope.id,
                    "Invalid response: {}",
                    reason
                );
                record_outcome("bad_response", elapsed);
                let _ = entry.completion.send(Err(RequestError::BadResponse {
                    id: envelope.id,
                    reason,
                }));
                ResolveOutcome::Rejected
            }
        }
    }

    /// Fails a pending request with `error`. Returns false if it was not pending.
    pub fn reject(&self, id: &str, error: RequestError) -> bool {
        let Some(entry) = self.take(id) else {
            return false;
        };
        entry.timer.abort();
        warn!(worker = %self.inner.name, request_id = %id, "Request failed: {}", error);
        record_outcome(error.outcome(), entry.registered_at.elapsed());
        let _ = entry.completion.send(Err(error));
        true
    }

    pub fn cancel(&self, id: &str) -> bool {
        self.reject(
            id,
            RequestError::Cancelled {
                id: id.to_string(),
            },
        )
    }

    /// Fails every pending request with `WorkerTerminated`. Returns how many.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.lock();
            let drained = pending.drain().collect();
            self.inner.count.send_replace(0);
            drained
        };

        let failed = drained.len();
        for (id, entry) in drained {
            entry.timer.abort();
            record_outcome("worker_terminated", entry.registered_at.elapsed());
            let _ = entry.completion.send(Err(RequestError::WorkerTerminated {
                id,
                reason: reason.to_string(),
            }));
        }
        if failed > 0 {
            warn!(
                worker = %self.inner.name,
                failed,
                "Failed pending requests: {}",
                reason
            );
        }
        failed
    }

    pub fn pending_count(&self) -> usize {
        *self.inner.count.borrow()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    /// Waits until no request is pending.
    pub async fn wait_idle(&self) {
        let mut count = self.inner.count.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = count.wait_for(|n| *n == 0).await;
    }

    fn take(&self, id: &str) -> Option<PendingRequest> {
        let mut pending = self.lock();
        let entry = pending.remove(id);
        if entry.is_some() {
            self.inner.count.send_replace(pending.len());
        }
        entry
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TaskCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCorrelator")
            .field("name", &self.inner.name)
            .field("pending", &self.pending_count())
            .finish()
    }
}

async fn expire(inner: Weak<Inner>, id: String, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let correlator = TaskCorrelator { inner };
    // The entry may already be gone if a response won the race for the lock.
    if let Some(entry) = correlator.take(&id) {
        let timeout_ms = timeout.as_millis() as u64;
        warn!(
            worker = %correlator.inner.name,
            request_id = %id,
            timeout_ms,
            "Request timed out"
        );
        record_outcome("timeout", entry.registered_at.elapsed());
        let _ = entry
            .completion
            .send(Err(RequestError::Timeout { id, timeout_ms }));
    }
}

fn record_outcome(outcome: &str, elapsed: Duration) {
    metrics::WORKER_REQUESTS.with_label_values(&[outcome]).inc();
    metrics::REQUEST_DURATION
        .with_label_values(&[outcome])
        .observe(elapsed.as_secs_f64());
}

/// The caller's side of a registered request.
#[derive(Debug)]
pub struct PendingResponse {
    id: String,
    receiver: oneshot::Receiver<Result<WorkerResponse, RequestError>>,
}

impl PendingResponse {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> Result<WorkerResponse, RequestError> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(RequestError::WorkerTerminated {
                id: self.id,
                reason: "correlator dropped".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    const LONG: Duration = Duration::from_secs(30);

    fn response(id: &str, fnames: &[&str]) -> ResponseEnvelope {
        ResponseEnvelope::parse(&json!({"id": id, "code": 0, "fnames": fnames}).to_string())
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_completes_exactly_once() {
        let correlator = TaskCorrelator::new("worker");
        let pending = correlator
            .register("a", RequestContext::default(), LONG)
            .unwrap();
        assert!(correlator.contains("a"));

        assert_eq!(
            correlator.resolve(response("a", &["a.mid"])).await,
            ResolveOutcome::Completed
        );
        assert_eq!(
            correlator.resolve(response("a", &["a.mid"])).await,
            ResolveOutcome::Unmatched
        );

        let result = pending.wait().await.unwrap();
        assert_eq!(result.fnames, vec!["a.mid"]);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_id_is_dropped() {
        let correlator = TaskCorrelator::new("worker");
        let _pending = correlator
            .register("a", RequestContext::default(), LONG)
            .unwrap();
        assert_eq!(
            correlator.resolve(response("other", &[])).await,
            ResolveOutcome::Unmatched
        );
        assert!(correlator.contains("a"));
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let correlator = TaskCorrelator::new("worker");
        let _pending = correlator
            .register("a", RequestContext::default(), LONG)
            .unwrap();
        let err = correlator
            .register("a", RequestContext::default(), LONG)
            .unwrap_err();
        assert_eq!(err, RequestError::DuplicateId { id: "a".to_string() });
        assert_eq!(correlator.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_drops_late_response() {
        let correlator = TaskCorrelator::new("worker");
        let pending = correlator
            .register("slow", RequestContext::default(), Duration::from_millis(50))
            .unwrap();

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, RequestError::Timeout { ref id, timeout_ms: 50 } if id == "slow"));
        assert!(!correlator.contains("slow"));
        assert_eq!(
            correlator.resolve(response("slow", &[])).await,
            ResolveOutcome::Unmatched
        );
    }

    #[tokio::test]
    async fn test_timeout_only_affects_its_request() {
        let correlator = TaskCorrelator::new("worker");
        let slow = correlator
            .register("slow", RequestContext::default(), Duration::from_millis(30))
            .unwrap();
        let fast = correlator
            .register("fast", RequestContext::default(), LONG)
            .unwrap();

        assert!(slow.wait().await.is_err());
        assert!(correlator.contains("fast"));
        correlator.resolve(response("fast", &[])).await;
        assert!(fast.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_output_file_is_bad_response() {
        let dir = TempDir::new().unwrap();
        let correlator = TaskCorrelator::new("worker");
        let pending = correlator
            .register("a", RequestContext::with_work_dir(dir.path()), LONG)
            .unwrap();

        assert_eq!(
            correlator.resolve(response("a", &["a.mid"])).await,
            ResolveOutcome::Rejected
        );
        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, RequestError::BadResponse { .. }));
    }

    #[tokio::test]
    async fn test_fail_all_fails_every_pending_request() {
        let correlator = TaskCorrelator::new("worker");
        let pending: Vec<_> = (0..4)
            .map(|i| {
                correlator
                    .register(format!("r{}", i), RequestContext::default(), LONG)
                    .unwrap()
            })
            .collect();

        assert_eq!(correlator.fail_all("worker exited"), 4);
        assert_eq!(correlator.fail_all("worker exited"), 0);
        for p in pending {
            let err = p.wait().await.unwrap_err();
            assert!(matches!(err, RequestError::WorkerTerminated { .. }));
        }
        assert_eq!(
            correlator.resolve(response("r0", &[])).await,
            ResolveOutcome::Unmatched
        );
    }

    #[tokio::test]
    async fn test_out_of_order_responses_match_by_id() {
        let correlator = TaskCorrelator::new("worker");
        let ids = ["a", "b", "c"];
        let pending: Vec<_> = ids
            .iter()
            .map(|id| correlator.register(*id, RequestContext::default(), LONG).unwrap())
            .collect();

        for id in ids.iter().rev() {
            correlator.resolve(response(id, &[format!("{}.mid", id).as_str()])).await;
        }
        for (p, id) in pending.into_iter().zip(ids) {
            let resp = p.wait().await.unwrap();
            assert_eq!(resp.id, id);
            assert_eq!(resp.fnames, vec![format!("{}.mid", id)]);
        }
    }

    #[tokio::test]
    async fn test_wait_idle_and_cancel() {
        let correlator = TaskCorrelator::new("worker");
        let pending = correlator
            .register("a", RequestContext::default(), LONG)
            .unwrap();

        let waiter = {
            let correlator = correlator.clone();
            tokio::spawn(async move { correlator.wait_idle().await })
        };
        assert!(correlator.cancel("a"));
        assert!(!correlator.cancel("a"));
        waiter.await.unwrap();
        assert!(matches!(
            pending.wait().await,
            Err(RequestError::Cancelled { .. })
        ));
    }
}
