/// Image Provisioner
///
/// Makes sure one execution image per supported language exists before any
/// code runs, building it from `{recipe_dir}/{language}/Dockerfile` when the
/// daemon does not have it. Meant for start-up; the orchestrator calls it
/// again as a guard, which is a cheap lookup once a language is known ready.
use crate::config::EngineConfig;
use crate::runtime::ContainerRuntime;
use lambdalite_common::types::Language;
use lambdalite_common::{FaasError, Result};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct ImageProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    recipe_dir: PathBuf,
    /// Languages verified or built by this process; the lock also serializes builds
    ready: Mutex<HashSet<Language>>,
}

impl ImageProvisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: &EngineConfig) -> Self {
        Self {
            runtime,
            recipe_dir: config.recipe_dir.clone(),
            ready: Mutex::new(HashSet::new()),
        }
    }

    pub fn recipe_path(&self, language: Language) -> PathBuf {
        self.recipe_dir.join(language.recipe_dir()).join("Dockerfile")
    }

    /// Idempotent: every language is checked at most once per process
    pub async fn ensure_images(&self) -> Result<()> {
        for language in Language::all_variants() {
            self.ensure_image(*language).await?;
        }
        Ok(())
    }

    pub async fn ensure_image(&self, language: Language) -> Result<()> {
        let mut ready = self.ready.lock().await;
        if ready.contains(&language) {
            return Ok(());
        }

        let tag = language.image_tag();
        if self.runtime.image_exists(tag).await? {
            debug!(image = %tag, "Image cache hit");
        } else {
            warn!(image = %tag, "Image cache miss (building now)");
            self.build(language).await?;
        }

        ready.insert(language);
        Ok(())
    }

    /// Build unconditionally, replacing whatever image carries the tag
    pub async fn rebuild(&self, language: Language) -> Result<()> {
        let mut ready = self.ready.lock().await;
        ready.remove(&language);
        self.build(language).await?;
        ready.insert(language);
        Ok(())
    }

    async fn build(&self, language: Language) -> Result<()> {
        let recipe = self.recipe_path(language);
        if !recipe.is_file() {
            return Err(FaasError::ImageBuild(format!(
                "build recipe not found: {}",
                recipe.display()
            )));
        }

        let tag = language.image_tag();
        self.runtime.build_image(&recipe, tag).await?;
        info!(image = %tag, language = %language, "Image ready");
        Ok(())
    }
}
