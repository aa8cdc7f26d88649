// Runtime comparator: the same function under both isolation runtimes
use crate::orchestrator::Orchestrator;
use lambdalite_common::types::{Comparison, FunctionSpec, RuntimeSelector};
use lambdalite_common::Result;
use tracing::info;

/// Run `function` under the standard runtime, then the sandboxed one.
///
/// Sequential so the two runs do not compete for CPU. The `runtime` field of
/// the input is ignored. Either leg failing with an error fails the whole
/// comparison; timeouts and non-zero exits are ordinary results.
pub async fn compare(orchestrator: &Orchestrator, function: &FunctionSpec) -> Result<Comparison> {
    let standard = orchestrator
        .execute(&function.with_runtime(RuntimeSelector::Standard))
        .await?;
    let sandboxed = orchestrator
        .execute(&function.with_runtime(RuntimeSelector::Sandboxed))
        .await?;

    info!(
        function = %function.name,
        standard_secs = standard.response_time_seconds,
        sandboxed_secs = sandboxed.response_time_seconds,
        "Runtime comparison finished"
    );

    Ok(Comparison { standard, sandboxed })
}
