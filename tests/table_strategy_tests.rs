//! Table strategy: single-poller delivery over the store with no automatic
//! retry.

mod common;

use std::sync::Arc;
use std::time::Duration;

use dossier::config::OrchestratorOptions;
use dossier::executor::{ExecutionError, ExecutionOutput, ProgressReporter, WorkflowExecutor};
use dossier::store::RequestStore;
use dossier::strategy::{ProcessingStrategy, TableStrategy};
use dossier::{JobConfiguration, Priority, Request, RequestStatus};

use common::{configuration, in_memory_store, ScriptedExecutor};

fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        poll_interval: Duration::from_millis(10),
        execution_timeout: Duration::from_secs(5),
        ..OrchestratorOptions::default()
    }
}

async fn put_pending(store: &Arc<dyn RequestStore>, id: &str, priority: Priority, created_at_ms: u64) {
    let request = Request::new(id, configuration(id), priority, 3, created_at_ms);
    store.put(&request).await.unwrap();
}

#[tokio::test]
async fn polls_in_priority_then_fifo_order() {
    let store = in_memory_store();
    put_pending(&store, "a", Priority::Low, 1).await;
    put_pending(&store, "b", Priority::High, 2).await;
    put_pending(&store, "c", Priority::High, 0).await;

    let executor = Arc::new(ScriptedExecutor::succeeding());
    let strategy = TableStrategy::new(store.clone(), executor.clone(), options());

    for _ in 0..3 {
        assert!(strategy.poll_once().await.unwrap());
    }
    assert!(!strategy.poll_once().await.unwrap());

    assert_eq!(executor.calls().await, vec!["c", "b", "a"]);
    for id in ["a", "b", "c"] {
        let r = store.get(id).await.unwrap().unwrap();
        assert_eq!(r.status, RequestStatus::Completed);
    }
}

#[tokio::test]
async fn failure_is_terminal_without_retry() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::Medium, 1).await;

    let executor = Arc::new(ScriptedExecutor::always_failing());
    let strategy = TableStrategy::new(store.clone(), executor.clone(), options());

    assert!(strategy.poll_once().await.unwrap());
    // Nothing left to poll: the failure did not re-enter Pending.
    assert!(!strategy.poll_once().await.unwrap());

    let r = store.get("r-1").await.unwrap().unwrap();
    assert_eq!(r.status, RequestStatus::Failed);
    assert_eq!(r.attempt_count, 1);
    assert_eq!(r.errors.len(), 1);
    assert_eq!(r.errors[0].attempt, 1);
    assert!(r.completed_at_ms.is_some());
    assert_eq!(executor.call_count().await, 1);
}

#[tokio::test]
async fn cancelled_request_is_never_delivered() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::High, 1).await;

    let executor = Arc::new(ScriptedExecutor::succeeding());
    let strategy = TableStrategy::new(store.clone(), executor.clone(), options());

    let outcome = strategy.cancel("r-1").await.unwrap();
    assert_eq!(outcome, dossier::CancelOutcome::Accepted);

    assert!(!strategy.poll_once().await.unwrap());
    assert_eq!(executor.call_count().await, 0);

    let r = store.get("r-1").await.unwrap().unwrap();
    assert_eq!(r.status, RequestStatus::Cancelled);
    assert!(r.completed_at_ms.is_some());
    assert!(r.started_at_ms.is_none());
}

#[tokio::test]
async fn completed_result_round_trips() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::Medium, 1).await;

    let executor = Arc::new(ScriptedExecutor::succeeding());
    let strategy = TableStrategy::new(store.clone(), executor.clone(), options());
    assert!(strategy.poll_once().await.unwrap());

    let r = store.get("r-1").await.unwrap().unwrap();
    let result = r.result.expect("completed request must carry a result");
    assert_eq!(
        result.summary,
        serde_json::json!({"keyword": "r-1", "sources": ["news", "filings"]})
    );
    assert_eq!(result.artifact_ref, "reports/r-1.json");
}

#[tokio::test]
async fn racing_pollers_claim_exclusively() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::Medium, 1).await;

    let executor = Arc::new(ScriptedExecutor::succeeding().with_delay(Duration::from_millis(20)));
    let a = Arc::new(TableStrategy::new(store.clone(), executor.clone(), options()));
    let b = Arc::new(TableStrategy::new(store.clone(), executor.clone(), options()));

    let (ra, rb) = tokio::join!(
        { let a = a.clone(); async move { a.poll_once().await.unwrap() } },
        { let b = b.clone(); async move { b.poll_once().await.unwrap() } },
    );
    // Exactly one poller claimed it; the loser abandoned its iteration.
    assert!(ra ^ rb, "exactly one poller must win (got {ra}, {rb})");
    assert_eq!(executor.call_count().await, 1);
    assert_eq!(executor.max_in_flight(), 1);
}

#[tokio::test]
async fn wall_clock_ceiling_fails_the_attempt() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::Medium, 1).await;

    let executor = Arc::new(ScriptedExecutor::succeeding().with_delay(Duration::from_secs(30)));
    let strategy = TableStrategy::new(
        store.clone(),
        executor,
        OrchestratorOptions {
            execution_timeout: Duration::from_millis(50),
            ..options()
        },
    );

    assert!(strategy.poll_once().await.unwrap());
    let r = store.get("r-1").await.unwrap().unwrap();
    assert_eq!(r.status, RequestStatus::Failed);
    assert!(r.errors[0].message.contains("wall-clock ceiling"));
}

/// Executor that parks mid-execution so the test can observe persisted
/// progress while the request is still `Executing`.
struct GatedExecutor {
    entered: tokio::sync::Notify,
    resume: tokio::sync::Notify,
}

#[async_trait::async_trait]
impl WorkflowExecutor for GatedExecutor {
    async fn execute(
        &self,
        _configuration: &JobConfiguration,
        progress: &dyn ProgressReporter,
    ) -> Result<ExecutionOutput, ExecutionError> {
        progress.stage("extraction", 2, 4).await;
        self.entered.notify_one();
        self.resume.notified().await;
        Ok(ExecutionOutput {
            summary: serde_json::json!({"ok": true}),
            artifact_ref: "reports/gated.json".into(),
        })
    }
}

#[tokio::test]
async fn progress_is_visible_while_executing() {
    let store = in_memory_store();
    put_pending(&store, "r-1", Priority::Medium, 1).await;

    let executor = Arc::new(GatedExecutor {
        entered: tokio::sync::Notify::new(),
        resume: tokio::sync::Notify::new(),
    });
    let strategy = Arc::new(TableStrategy::new(store.clone(), executor.clone(), options()));

    let poll = {
        let strategy = strategy.clone();
        tokio::spawn(async move { strategy.poll_once().await.unwrap() })
    };

    executor.entered.notified().await;
    let r = store.get("r-1").await.unwrap().unwrap();
    assert_eq!(r.status, RequestStatus::Executing);
    assert_eq!(r.progress.current_stage, "extraction");
    // Extraction spans 30-80; 2 of 4 lands mid-band.
    assert_eq!(r.progress.percentage, 55);

    executor.resume.notify_one();
    assert!(poll.await.unwrap());
    let r = store.get("r-1").await.unwrap().unwrap();
    assert_eq!(r.status, RequestStatus::Completed);
    assert_eq!(r.progress.percentage, 100);
}
