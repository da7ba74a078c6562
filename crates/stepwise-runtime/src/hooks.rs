use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use stepwise_core::report::RunReport;

/// Extension point invoked once a run has reached a terminal state.
///
/// Hooks see the final report; they cannot change it.
#[async_trait]
pub trait PostRunHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_run_finished(&self, report: &RunReport) -> Result<(), String>;
}

/// Registry for post-run hooks.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn PostRunHook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, hook: Arc<dyn PostRunHook>) {
        self.hooks.write().await.push(hook);
    }

    pub async fn len(&self) -> usize {
        self.hooks.read().await.len()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn PostRunHook>> {
        self.hooks.read().await.clone()
    }

    pub async fn on_run_finished(&self, report: &RunReport) {
        for hook in self.snapshot().await {
            if let Err(err) = hook.on_run_finished(report).await {
                tracing::warn!(
                    run_id = %report.run_id,
                    hook = hook.name(),
                    error = %err,
                    "post-run hook failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use stepwise_core::types::{RunId, RunStatus};

    struct RecordingHook {
        seen: Mutex<Vec<RunStatus>>,
    }

    #[async_trait]
    impl PostRunHook for RecordingHook {
        fn name(&self) -> &str {
            "recording"
        }

        async fn on_run_finished(&self, report: &RunReport) -> Result<(), String> {
            self.seen.lock().expect("lock").push(report.status);
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl PostRunHook for FailingHook {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_run_finished(&self, _report: &RunReport) -> Result<(), String> {
            Err("verifier offline".to_string())
        }
    }

    #[test]
    fn test_failing_hook_does_not_stop_later_hooks() {
        tokio_test::block_on(async {
            let registry = HookRegistry::new();
            let recording = Arc::new(RecordingHook {
                seen: Mutex::new(Vec::new()),
            });
            registry.register(Arc::new(FailingHook)).await;
            registry.register(recording.clone()).await;
            assert_eq!(registry.len().await, 2);

            let report = RunReport {
                run_id: RunId::from("r1"),
                goal: "g".to_string(),
                status: RunStatus::Completed,
                steps: Vec::new(),
                warnings: Vec::new(),
                started_at: None,
                completed_at: None,
            };
            registry.on_run_finished(&report).await;
            assert_eq!(*recording.seen.lock().expect("lock"), vec![RunStatus::Completed]);
        });
    }
}
