//! Wiring of configuration, tools and services.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rh_acquire::{Acquisition, ReadyListener};
use rh_av::ToolRegistry;
use rh_core::config::{expand_path, Config};
use rh_core::Result;
use rh_pipeline::{
    CommandProducer, ConversionRequest, ConversionService, JobStore, Preferences,
    SelectionPreference,
};
use rh_probe::{Prober, StreamProbe};
use tracing::{info, warn};

/// Extensions handed to conversion when an acquisition becomes ready.
const VIDEO_EXTENSIONS: [&str; 8] = ["mkv", "mp4", "avi", "mov", "webm", "m4v", "ts", "wmv"];

/// Everything a command needs, resolved once from the config.
pub struct AppContext {
    pub config: Config,
    pub tools: ToolRegistry,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        let tools = ToolRegistry::discover(&config.tools);
        Self { config, tools }
    }

    pub fn prober(&self) -> Result<StreamProbe> {
        StreamProbe::from_registry(&self.tools, &self.config.probe)
    }

    pub fn producer(&self) -> Result<CommandProducer> {
        CommandProducer::from_config(&self.tools, &self.config.conversion)
    }

    /// Selection preferences from the configured languages.
    pub fn default_preferences(&self) -> Preferences {
        let conversion = &self.config.conversion;
        Preferences {
            audio: SelectionPreference {
                language: conversion.audio_language.clone(),
                ..Default::default()
            },
            subtitle: SelectionPreference {
                language: conversion.subtitle_language.clone(),
                ..Default::default()
            },
        }
    }

    /// Start a conversion service backed by `store`.
    pub async fn conversion_service(&self, store: Arc<dyn JobStore>) -> Result<ConversionService> {
        let prober: Arc<dyn Prober> = Arc::new(self.prober()?);
        ConversionService::start(
            self.config.conversion.workers,
            store,
            prober,
            self.producer()?,
            expand_path(&self.config.conversion.output_dir),
        )
        .await
    }
}

/// Whether `path` looks like a video container.
pub fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| VIDEO_EXTENSIONS.contains(&e.as_str()))
}

/// Submits every ready video file of an acquisition for conversion.
pub struct AutoConvert {
    conversions: Arc<ConversionService>,
    preferences: Preferences,
}

impl AutoConvert {
    pub fn new(conversions: Arc<ConversionService>, preferences: Preferences) -> Self {
        Self {
            conversions,
            preferences,
        }
    }
}

#[async_trait]
impl ReadyListener for AutoConvert {
    async fn on_ready(&self, acquisition: &Acquisition) {
        let ready = acquisition
            .files
            .iter()
            .filter_map(|f| f.ready_path.as_ref())
            .filter(|p| is_video(p));

        for path in ready {
            let request = ConversionRequest {
                input: path.clone(),
                preferences: self.preferences.clone(),
                output: None,
            };
            match self.conversions.submit(request).await {
                Ok(job_id) => info!(
                    acquisition_id = %acquisition.id,
                    job_id = %job_id,
                    input = %path.display(),
                    "Auto conversion submitted"
                ),
                Err(e) => warn!(
                    acquisition_id = %acquisition.id,
                    input = %path.display(),
                    error = %e,
                    "Auto conversion rejected"
                ),
            }
        }
    }
}
