/// Integration tests against a real Docker daemon
///
/// These verify the full path with real containers:
/// 1. Warm and cold invocations produce the expected output
/// 2. Timeouts kill the container and return promptly
/// 3. stderr-only code is flagged as an error
/// 4. The sandboxed runtime can be compared against the standard one
///
/// They need Docker, and `runsc` registered for the comparison test. Run
/// from the workspace root so `dockerfiles/` resolves.

#[cfg(test)]
mod live_docker_tests {
    use crate::comparator::compare;
    use crate::config::EngineConfig;
    use crate::metrics::MetricsRecorder;
    use crate::orchestrator::Orchestrator;
    use crate::runtime::{ContainerRuntime, DockerRuntime};
    use lambdalite_common::types::{FunctionSpec, InvocationStatus, Language, RuntimeSelector};
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    async fn orchestrator() -> Orchestrator {
        let runtime = DockerRuntime::connect().expect("Failed to connect to Docker");
        runtime.ping().await.expect("Docker is not running");

        let config = EngineConfig {
            recipe_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../dockerfiles"),
            pool_size: 1,
            max_idle: 1,
            replenish_on_discard: false,
            ..Default::default()
        };
        let orch = Orchestrator::new(Arc::new(runtime), MetricsRecorder::in_memory(), config);
        orch.images().ensure_images().await.expect("Failed to provision images");
        orch
    }

    fn function(language: &str, code: &str, timeout: u64, runtime: RuntimeSelector) -> FunctionSpec {
        FunctionSpec {
            name: format!("it-{}", uuid::Uuid::new_v4()),
            language: language.to_string(),
            timeout_seconds: timeout,
            runtime,
            source_code: code.to_string(),
        }
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_python_cold_start() {
        let orch = orchestrator().await;

        let result = orch
            .execute(&function("python", "print(\"hi\")", 5, RuntimeSelector::Standard))
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::Completed);
        assert_eq!(result.output, "hi");
        assert!(!result.error);
        assert!(result.cold_start);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_python_handler_on_warm_container() {
        let orch = orchestrator().await;
        orch.pool().prewarm(Language::Python, RuntimeSelector::Standard, 1).await;

        let code = "def handler(event):\n    return 'handled'\n";
        let result = orch
            .execute(&function("python", code, 5, RuntimeSelector::Standard))
            .await
            .unwrap();

        assert_eq!(result.output, "handled");
        assert!(!result.cold_start);
        assert!(result.memory_usage_mb > 0.0);
        assert_eq!(orch.pool().idle_count(Language::Python, RuntimeSelector::Standard), 1);

        orch.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_node_stderr_only() {
        let orch = orchestrator().await;

        let result = orch
            .execute(&function("node", "console.error('bad')", 5, RuntimeSelector::Standard))
            .await
            .unwrap();

        assert_eq!(result.output, "bad");
        assert!(result.error);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_timeout_returns_promptly() {
        let orch = orchestrator().await;
        orch.pool().prewarm(Language::Python, RuntimeSelector::Standard, 1).await;

        let started = Instant::now();
        let result = orch
            .execute(&function("python", "import time\ntime.sleep(30)", 2, RuntimeSelector::Standard))
            .await
            .unwrap();

        assert_eq!(result.status, InvocationStatus::TimedOut);
        assert!(result.output.contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));

        orch.shutdown().await;
    }

    #[tokio::test]
    #[ignore] // Requires Docker with runsc registered
    async fn test_compare_hello() {
        let orch = orchestrator().await;

        let comparison = compare(
            &orch,
            &function("python", "print(\"hi\")", 5, RuntimeSelector::Standard),
        )
        .await
        .unwrap();

        assert_eq!(comparison.standard.output, "hi");
        assert_eq!(comparison.sandboxed.output, "hi");
        assert!(!comparison.standard.error);
        assert!(!comparison.sandboxed.error);
    }
}
