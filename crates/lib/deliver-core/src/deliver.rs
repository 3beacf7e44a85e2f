//! Build-and-save pipeline turning a compose project into an offline bundle.
//!
//! The pipeline has three steps: build every service that carries build
//! instructions, export all referenced images into a single archive, and
//! write a deployment-only manifest with every service pinned to a concrete
//! image reference. Steps run in that order and fail fast; completed steps
//! stay on disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compose::{self, BuildConfig, BuildSpec, ComposeProject, LoadError, LoadOptions};
use crate::engine::{EngineClient, EngineError, ImageBuildRequest};

/// File name of the image archive written into the output directory.
pub const IMAGES_ARCHIVE_NAME: &str = "images.tar";
/// File name of the generated deployment manifest.
pub const GENERATED_MANIFEST_NAME: &str = "docker-compose.generated.yaml";
/// Tag applied to synthesized image references when none is configured.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Logging verbosity accepted by the CLI and the tool-call surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidLogLevel {
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: {value} (expected debug, info, warn, or error)")]
    InvalidLogLevel { value: String },
    #[error("at least one compose file is required")]
    NoComposeFiles,
    #[error("output directory is required")]
    MissingOutputDir,
}

/// Configuration for one deliver run.
#[derive(Debug, Clone)]
pub struct DeliverConfig {
    /// Compose files in merge order.
    pub files: Vec<PathBuf>,
    /// Base directory for relative paths.
    pub workdir: PathBuf,
    /// Directory receiving the image archive and the generated manifest.
    pub output_dir: PathBuf,
    /// Tag for synthesized image references.
    pub tag: String,
    pub log_level: LogLevel,
}

impl DeliverConfig {
    #[must_use]
    pub fn new(files: Vec<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            files,
            workdir: PathBuf::from("."),
            output_dir: output_dir.into(),
            tag: DEFAULT_IMAGE_TAG.to_string(),
            log_level: LogLevel::default(),
        }
    }

    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub const fn with_log_level(mut self, log_level: LogLevel) -> Self {
        self.log_level = log_level;
        self
    }

    /// # Errors
    /// Fails when no compose file is given or the output directory is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::NoComposeFiles);
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingOutputDir);
        }
        Ok(())
    }

    fn normalized_tag(&self) -> &str {
        let tag = self.tag.trim();
        if tag.is_empty() { DEFAULT_IMAGE_TAG } else { tag }
    }
}

#[derive(Debug, Error)]
pub enum DeliverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("creating output directory {}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("building service {service}")]
    Build {
        service: String,
        #[source]
        source: EngineError,
    },
    #[error("saving images")]
    Save(#[source] EngineError),
    #[error("serializing generated manifest")]
    SerializeManifest(#[source] serde_yaml_ng::Error),
    #[error("writing generated manifest {}", .path.display())]
    WriteManifest {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Summary of a completed deliver run.
#[derive(Debug, Clone, Serialize)]
pub struct DeliverReport {
    pub project: String,
    pub services: Vec<String>,
    /// Image references built during this run.
    pub built: Vec<String>,
    /// Image references exported to the archive.
    pub images: Vec<String>,
    /// Absent when the project referenced no images.
    pub archive_path: Option<PathBuf>,
    pub manifest_path: PathBuf,
}

/// Orchestrates the build, export, and manifest steps for one project.
#[derive(Debug)]
pub struct DeliverClient {
    config: DeliverConfig,
    project: ComposeProject,
    build_order: Vec<String>,
}

impl DeliverClient {
    /// Loads the project and prepares the output directory.
    ///
    /// # Errors
    /// Fails on invalid configuration, a project that does not load or
    /// validate, or an output directory that cannot be created.
    pub fn new(config: DeliverConfig) -> Result<Self, DeliverError> {
        config.validate()?;
        let options =
            LoadOptions::new(config.files.clone(), config.workdir.clone()).with_process_env();
        let project = compose::load(&options)?;
        let build_order = project
            .services_in_dependency_order()
            .map_err(LoadError::from)?;
        std::fs::create_dir_all(&config.output_dir).map_err(|source| DeliverError::OutputDir {
            path: config.output_dir.clone(),
            source,
        })?;
        Ok(Self {
            config,
            project,
            build_order,
        })
    }

    #[must_use]
    pub const fn project(&self) -> &ComposeProject {
        &self.project
    }

    #[must_use]
    pub fn project_name(&self) -> &str {
        self.project.name.as_deref().unwrap_or("default")
    }

    /// Builds every service that carries build instructions, dependencies
    /// first, and pins each one to its built image reference. Services
    /// without an image reference receive `<service>:<tag>` up front.
    ///
    /// Returns the references built during this run.
    ///
    /// # Errors
    /// Fails with the offending service name on the first rejected build.
    pub async fn build_images(
        &mut self,
        engine: &EngineClient,
    ) -> Result<Vec<String>, DeliverError> {
        let tag = self.config.normalized_tag().to_string();
        self.project.assign_missing_images(&tag);

        let mut built = Vec::new();
        for name in self.build_order.clone() {
            let Some(service) = self.project.services.get(&name) else {
                continue;
            };
            let Some(build) = service.build.as_ref().map(BuildSpec::to_config) else {
                continue;
            };
            let reference = resolve_build_reference(&name, service.image.as_deref(), &build, &tag);
            let context_dir = resolve_context_dir(&self.config.workdir, &build.context);
            let request = build_request(&reference, &build);
            info!(service = %name, reference = %reference, "building service");
            engine
                .build_image(&context_dir, &request)
                .await
                .map_err(|source| DeliverError::Build {
                    service: name.clone(),
                    source,
                })?;
            self.mark_built(&name, &reference);
            built.push(reference);
        }
        Ok(built)
    }

    /// Exports every referenced image into the archive under the output
    /// directory. Returns `None`, with a warning, when the project
    /// references no images.
    ///
    /// # Errors
    /// Fails when the engine export or the archive write fails.
    pub async fn save_images(
        &self,
        engine: &EngineClient,
    ) -> Result<Option<PathBuf>, DeliverError> {
        for (name, service) in &self.project.services {
            if !service.has_image() {
                warn!(service = %name, "service has no image reference; skipping");
            }
        }
        let references = self.project.image_references();
        if references.is_empty() {
            warn!("no image references to export");
            return Ok(None);
        }

        let path = self.config.output_dir.join(IMAGES_ARCHIVE_NAME);
        info!(images = references.len(), path = %path.display(), "exporting images");
        let written = engine
            .export_images(&references, &path)
            .await
            .map_err(DeliverError::Save)?;
        debug!(bytes = written, "image archive written");
        Ok(Some(path))
    }

    /// Serializes the project to the generated manifest under the output
    /// directory.
    ///
    /// # Errors
    /// Fails when the project cannot be serialized or the file written.
    pub fn write_manifest(&self) -> Result<PathBuf, DeliverError> {
        let path = self.config.output_dir.join(GENERATED_MANIFEST_NAME);
        let rendered =
            serde_yaml_ng::to_string(&self.project).map_err(DeliverError::SerializeManifest)?;
        std::fs::write(&path, rendered).map_err(|source| DeliverError::WriteManifest {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "generated manifest written");
        Ok(path)
    }

    /// Runs the full pipeline: build, export, manifest.
    ///
    /// # Errors
    /// Fails fast on the first failing step; completed steps are not rolled
    /// back.
    pub async fn deliver(&mut self, engine: &EngineClient) -> Result<DeliverReport, DeliverError> {
        let built = self.build_images(engine).await?;
        let archive_path = self.save_images(engine).await?;
        let manifest_path = self.write_manifest()?;
        Ok(DeliverReport {
            project: self.project_name().to_string(),
            services: self.project.services.keys().cloned().collect(),
            built,
            images: self.project.image_references(),
            archive_path,
            manifest_path,
        })
    }

    fn mark_built(&mut self, name: &str, reference: &str) {
        if let Some(service) = self.project.services.get_mut(name) {
            service.image = Some(reference.to_string());
            service.build = None;
        }
    }
}

/// The reference a build is tagged with: an explicit `build.tags` entry wins,
/// then the service's image reference, then `<service>:<tag>`.
fn resolve_build_reference(
    name: &str,
    image: Option<&str>,
    build: &BuildConfig,
    tag: &str,
) -> String {
    if let Some(explicit) = build.tags.first() {
        return explicit.clone();
    }
    match image {
        Some(image) if !image.is_empty() => image.to_string(),
        _ => format!("{name}:{tag}"),
    }
}

fn resolve_context_dir(workdir: &Path, context: &str) -> PathBuf {
    let context = Path::new(context);
    if context.is_absolute() {
        context.to_path_buf()
    } else {
        workdir.join(context)
    }
}

fn build_request(reference: &str, build: &BuildConfig) -> ImageBuildRequest {
    ImageBuildRequest {
        reference: reference.to_string(),
        dockerfile: build.dockerfile.clone(),
        args: build.args.to_map().into_iter().collect(),
        target: build.target.clone(),
        labels: build.labels.to_map().into_iter().collect(),
        cache_from: build.cache_from.clone(),
        no_cache: build.no_cache,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn log_levels_parse_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("Error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!(
            "verbose".parse::<LogLevel>().unwrap_err(),
            ConfigError::InvalidLogLevel {
                value: "verbose".to_string()
            }
        );
    }

    #[test]
    fn config_requires_files_and_output_dir() {
        let no_files = DeliverConfig::new(Vec::new(), "dist");
        assert_eq!(no_files.validate(), Err(ConfigError::NoComposeFiles));

        let no_output = DeliverConfig::new(vec![PathBuf::from("compose.yaml")], "");
        assert_eq!(no_output.validate(), Err(ConfigError::MissingOutputDir));
    }

    #[test]
    fn blank_tag_normalizes_to_latest() {
        let config =
            DeliverConfig::new(vec![PathBuf::from("compose.yaml")], "dist").with_tag("  ");
        assert_eq!(config.normalized_tag(), DEFAULT_IMAGE_TAG);
    }

    #[test]
    fn build_reference_prefers_explicit_tags() {
        let build = BuildConfig {
            tags: vec!["registry.local/api:2".to_string()],
            ..BuildConfig::default()
        };
        assert_eq!(
            resolve_build_reference("api", Some("api:old"), &build, "v1"),
            "registry.local/api:2"
        );

        let plain = BuildConfig::default();
        assert_eq!(
            resolve_build_reference("api", Some("api:old"), &plain, "v1"),
            "api:old"
        );
        assert_eq!(resolve_build_reference("api", None, &plain, "v1"), "api:v1");
        assert_eq!(resolve_build_reference("api", Some(""), &plain, "v1"), "api:v1");
    }

    #[test]
    fn context_dirs_resolve_against_the_workdir() {
        assert_eq!(
            resolve_context_dir(Path::new("/work"), "./svc"),
            PathBuf::from("/work/./svc")
        );
        assert_eq!(
            resolve_context_dir(Path::new("/work"), "/abs/ctx"),
            PathBuf::from("/abs/ctx")
        );
    }

    #[test]
    fn new_loads_the_project_and_creates_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "compose.yaml",
            "services:\n  api:\n    image: api:1\n",
        );
        let output = dir.path().join("out/bundle");

        let client = DeliverClient::new(
            DeliverConfig::new(vec![file], &output).with_workdir(dir.path()),
        )
        .unwrap();

        assert!(output.is_dir());
        assert_eq!(client.project().services.len(), 1);
    }

    #[test]
    fn dependency_cycles_fail_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "compose.yaml",
            concat!(
                "services:\n",
                "  a:\n    image: a:1\n    depends_on: [b]\n",
                "  b:\n    image: b:1\n    depends_on: [a]\n",
            ),
        );

        let err = DeliverClient::new(
            DeliverConfig::new(vec![file], dir.path().join("dist")).with_workdir(dir.path()),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            DeliverError::Load(LoadError::DependencyCycle(_))
        ));
    }

    #[test]
    fn report_serializes_with_stable_field_names() {
        let report = DeliverReport {
            project: "demo".to_string(),
            services: vec!["api".to_string()],
            built: vec!["api:v1".to_string()],
            images: vec!["api:v1".to_string()],
            archive_path: None,
            manifest_path: PathBuf::from("dist/docker-compose.generated.yaml"),
        };

        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["project"], "demo");
        assert_eq!(value["built"][0], "api:v1");
        assert!(value["archive_path"].is_null());
        assert_eq!(
            value["manifest_path"],
            "dist/docker-compose.generated.yaml"
        );
    }

    #[test]
    fn finished_manifest_pins_images_and_drops_builds() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_file(
            dir.path(),
            "compose.yaml",
            concat!(
                "services:\n",
                "  proxy:\n    image: nginx:latest\n",
                "  web:\n    build: ./web\n",
            ),
        );

        let mut client = DeliverClient::new(
            DeliverConfig::new(vec![file], dir.path().join("dist"))
                .with_workdir(dir.path())
                .with_tag("v1"),
        )
        .unwrap();

        // The bookkeeping a successful engine build performs.
        let tag = client.config.normalized_tag().to_string();
        client.project.assign_missing_images(&tag);
        let web = client.project.services["web"].clone();
        let build = web.build.as_ref().map(BuildSpec::to_config).unwrap();
        let reference = resolve_build_reference("web", web.image.as_deref(), &build, &tag);
        client.mark_built("web", &reference);

        assert_eq!(reference, "web:v1");
        assert_eq!(
            client.project.image_references(),
            vec!["nginx:latest", "web:v1"]
        );

        let manifest_path = client.write_manifest().unwrap();
        let rendered = std::fs::read_to_string(&manifest_path).unwrap();
        let reparsed: ComposeProject = serde_yaml_ng::from_str(&rendered).unwrap();

        assert!(!rendered.contains("build:"));
        assert_eq!(
            reparsed.services["proxy"].image.as_deref(),
            Some("nginx:latest")
        );
        assert_eq!(reparsed.services["web"].image.as_deref(), Some("web:v1"));
        assert!(reparsed.services["web"].build.is_none());
    }
}
