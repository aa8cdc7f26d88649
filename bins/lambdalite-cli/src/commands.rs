// CLI commands for operating LambdaLite
use anyhow::{Context, Result};
use lambdalite_common::types::{FunctionSpec, InvocationResult, Language, RuntimeSelector};
use lambdalite_engine::images::ImageProvisioner;
use lambdalite_engine::runtime::{ContainerRuntime, DockerRuntime};
use lambdalite_engine::{EngineConfig, MetricsRecorder, Orchestrator};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

const PYTHON_RECIPE: &str = include_str!("../../../dockerfiles/python/Dockerfile");
const NODE_RECIPE: &str = include_str!("../../../dockerfiles/node/Dockerfile");
const ENGINE_CONFIG: &str = include_str!("../../../config/engine.json");

fn default_recipe(language: Language) -> &'static str {
    match language {
        Language::Python => PYTHON_RECIPE,
        Language::Node => NODE_RECIPE,
    }
}

/// Write a file unless it already exists; returns whether it was written
fn write_if_absent(path: &Path, contents: &str) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing LambdaLite project at: {}", path);

    let project_path = Path::new(path);

    for language in Language::all_variants() {
        let relative = format!("dockerfiles/{}/Dockerfile", language.recipe_dir());
        if write_if_absent(&project_path.join(&relative), default_recipe(*language))? {
            println!("  ✅ Created: {}", relative);
        } else {
            println!("  ⏭️  Exists:  {}", relative);
        }
    }

    if write_if_absent(&project_path.join("config/engine.json"), ENGINE_CONFIG)? {
        println!("  ✅ Created: config/engine.json");
    }

    println!("✅ Project initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Build images: lambdalite-cli build-images");
    println!("  2. Register runsc with Docker for the sandboxed runtime");
    println!("  3. Start the API: lambdalite-api");

    Ok(())
}

pub async fn build_images(force: bool) -> Result<()> {
    let config = EngineConfig::from_env()?;
    let runtime = DockerRuntime::connect()?;
    runtime.ping().await?;

    let images = ImageProvisioner::new(Arc::new(runtime), &config);

    for language in Language::all_variants() {
        println!("🐳 {} ({})", language, language.image_tag());
        if force {
            images.rebuild(*language).await?;
        } else {
            images.ensure_image(*language).await?;
        }
    }

    println!("✅ Images ready");
    Ok(())
}

fn read_function(name: &str, language: &str, file: &Path, timeout: u64, runtime: RuntimeSelector) -> Result<FunctionSpec> {
    let source_code = fs::read_to_string(file)
        .with_context(|| format!("Failed to read source file {}", file.display()))?;

    Ok(FunctionSpec {
        name: name.to_string(),
        language: language.to_string(),
        timeout_seconds: timeout,
        runtime,
        source_code,
    })
}

fn print_result(label: &str, result: &InvocationResult) {
    let marker = if result.error { "❌" } else { "✅" };
    println!(
        "{} [{}] {:?} in {:.3}s{}",
        marker,
        label,
        result.status,
        result.response_time_seconds,
        if result.cold_start { " (cold start)" } else { "" }
    );
    println!("   memory: {:.2} MB, cpu: {:.2}%", result.memory_usage_mb, result.cpu_usage_percent);
    println!("   output: {}", result.output);
}

pub async fn invoke(name: &str, language: &str, file: &Path, timeout: u64, runtime: &str) -> Result<()> {
    let selector = RuntimeSelector::from_str(runtime)?;
    let function = read_function(name, language, file, timeout, selector)?;

    let orchestrator = Orchestrator::connect(EngineConfig::from_env()?).await?;
    let result = orchestrator.execute(&function).await?;

    print_result(&selector.to_string(), &result);
    Ok(())
}

pub async fn compare(name: &str, language: &str, file: &Path, timeout: u64) -> Result<()> {
    let function = read_function(name, language, file, timeout, RuntimeSelector::Standard)?;

    let orchestrator = Orchestrator::connect(EngineConfig::from_env()?).await?;
    let comparison = lambdalite_engine::compare(&orchestrator, &function).await?;

    print_result("standard", &comparison.standard);
    print_result("sandboxed", &comparison.sandboxed);

    let delta = comparison.sandboxed.response_time_seconds - comparison.standard.response_time_seconds;
    println!("\n📊 Sandboxed overhead: {:+.3}s", delta);
    Ok(())
}

pub async fn show_metrics(function: Option<&str>) -> Result<()> {
    let config = EngineConfig::from_env()?;
    let recorder = MetricsRecorder::connect(config.redis_url.as_deref()).await?;

    if let Some(name) = function {
        let record = recorder.most_recent(name).await?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let summaries = recorder.aggregate().await?;
    if summaries.is_empty() {
        println!("No metrics recorded.");
        return Ok(());
    }

    println!(
        "{:<24} {:<10} {:>8} {:>12} {:>8} {:>10} {:>8}",
        "FUNCTION", "RUNTIME", "RUNS", "AVG TIME(s)", "ERRORS", "AVG MB", "AVG CPU%"
    );
    println!("{}", "─".repeat(86));
    for s in &summaries {
        println!(
            "{:<24} {:<10} {:>8} {:>12.3} {:>8} {:>10.2} {:>8.2}",
            s.function_name,
            s.runtime.to_string(),
            s.invocations,
            s.avg_response_time,
            s.error_count,
            s.avg_memory_mb,
            s.avg_cpu_percent
        );
    }
    Ok(())
}
