//! Container engine client for image build and export.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bollard::Docker;
use bollard::image::BuildImageOptions;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const CONNECT_TIMEOUT_SECS: u64 = 120;
#[cfg(windows)]
const DEFAULT_NAMED_PIPE: &str = "npipe:////./pipe/docker_engine";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("connecting to container engine")]
    Connect(#[source] bollard::errors::Error),
    #[error("unsupported engine endpoint: {endpoint}")]
    UnsupportedEndpoint { endpoint: String },
    #[error("archiving build context {}", .path.display())]
    Context {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("building image {reference}: {message}")]
    Build { reference: String, message: String },
    #[error("engine API request failed")]
    Api(#[source] bollard::errors::Error),
    #[error("writing image archive {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One image build against the engine.
#[derive(Debug, Clone, Default)]
pub struct ImageBuildRequest {
    /// Reference the built image is tagged with.
    pub reference: String,
    /// Dockerfile path relative to the context; the engine default applies
    /// when unset.
    pub dockerfile: Option<String>,
    pub args: HashMap<String, String>,
    pub target: Option<String>,
    pub labels: HashMap<String, String>,
    pub cache_from: Vec<String>,
    pub no_cache: bool,
}

/// Client for the container engine's build and save APIs.
#[derive(Debug, Clone)]
pub struct EngineClient {
    docker: Docker,
}

impl EngineClient {
    /// Connects using the explicit endpoint, the `DOCKER_HOST` environment
    /// variable, or the platform default socket, in that order.
    ///
    /// Recognized endpoint schemes are `unix://`, `tcp://`/`http://`, and
    /// `npipe://` on Windows.
    ///
    /// # Errors
    /// Fails when the endpoint scheme is not recognized or the client cannot
    /// be constructed.
    pub fn connect(endpoint: Option<&str>) -> Result<Self, EngineError> {
        let endpoint = endpoint
            .map(str::to_string)
            .or_else(|| std::env::var("DOCKER_HOST").ok())
            .filter(|value| !value.trim().is_empty());
        let docker = match endpoint.as_deref() {
            None => Self::connect_default()?,
            Some(endpoint) => Self::connect_endpoint(endpoint)?,
        };
        Ok(Self { docker })
    }

    #[cfg(not(windows))]
    fn connect_default() -> Result<Docker, EngineError> {
        Docker::connect_with_socket_defaults().map_err(EngineError::Connect)
    }

    #[cfg(windows)]
    fn connect_default() -> Result<Docker, EngineError> {
        Docker::connect_with_named_pipe(
            DEFAULT_NAMED_PIPE,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(EngineError::Connect)
    }

    fn connect_endpoint(endpoint: &str) -> Result<Docker, EngineError> {
        if endpoint.starts_with("unix://") {
            Docker::connect_with_unix(endpoint, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(EngineError::Connect)
        } else if endpoint.starts_with("tcp://") || endpoint.starts_with("http://") {
            Docker::connect_with_http(endpoint, CONNECT_TIMEOUT_SECS, bollard::API_DEFAULT_VERSION)
                .map_err(EngineError::Connect)
        } else if endpoint.starts_with("npipe://") {
            Self::connect_named_pipe(endpoint)
        } else {
            Err(EngineError::UnsupportedEndpoint {
                endpoint: endpoint.to_string(),
            })
        }
    }

    #[cfg(windows)]
    fn connect_named_pipe(endpoint: &str) -> Result<Docker, EngineError> {
        Docker::connect_with_named_pipe(
            endpoint,
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(EngineError::Connect)
    }

    #[cfg(not(windows))]
    fn connect_named_pipe(endpoint: &str) -> Result<Docker, EngineError> {
        Err(EngineError::UnsupportedEndpoint {
            endpoint: endpoint.to_string(),
        })
    }

    /// Builds an image from `context_dir`, streaming engine output to the
    /// log, and fails on the first error the engine reports.
    ///
    /// # Errors
    /// Fails when the context cannot be archived, the API call fails, or the
    /// engine reports a build error.
    pub async fn build_image(
        &self,
        context_dir: &Path,
        request: &ImageBuildRequest,
    ) -> Result<(), EngineError> {
        info!(
            reference = %request.reference,
            context = %context_dir.display(),
            "building image"
        );
        let context = archive_context(context_dir).await?;
        let options = build_options(request);

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(update) = stream.next().await {
            let update = update.map_err(EngineError::Api)?;
            if update.error.is_some() || update.error_detail.is_some() {
                let message = update
                    .error_detail
                    .and_then(|detail| detail.message)
                    .or(update.error)
                    .unwrap_or_else(|| "build failed".to_string());
                return Err(EngineError::Build {
                    reference: request.reference.clone(),
                    message,
                });
            }
            if let Some(line) = update.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    info!("{line}");
                }
            }
            if let Some(id) = update.aux.and_then(|aux| aux.id) {
                debug!(image = %id, "image written");
            }
        }
        info!(reference = %request.reference, "image built");
        Ok(())
    }

    /// Exports the given images into a single archive at `output_path` and
    /// returns the number of bytes written.
    ///
    /// # Errors
    /// Fails when the export API call fails or the archive cannot be written.
    pub async fn export_images(
        &self,
        references: &[String],
        output_path: &Path,
    ) -> Result<u64, EngineError> {
        let io_err = |source: std::io::Error| EngineError::Io {
            path: output_path.to_path_buf(),
            source,
        };
        let names: Vec<&str> = references.iter().map(String::as_str).collect();
        let mut stream = self.docker.export_images(&names);
        let mut file = tokio::fs::File::create(output_path).await.map_err(io_err)?;
        let mut written = 0_u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(EngineError::Api)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        Ok(written)
    }
}

fn build_options(request: &ImageBuildRequest) -> BuildImageOptions<String> {
    BuildImageOptions {
        dockerfile: request
            .dockerfile
            .clone()
            .unwrap_or_else(|| "Dockerfile".to_string()),
        t: request.reference.clone(),
        buildargs: request.args.clone(),
        labels: request.labels.clone(),
        cachefrom: request.cache_from.clone(),
        target: request.target.clone().unwrap_or_default(),
        nocache: request.no_cache,
        rm: true,
        ..Default::default()
    }
}

/// Tars a build context directory in a blocking task.
async fn archive_context(dir: &Path) -> Result<Vec<u8>, EngineError> {
    let dir_owned = dir.to_path_buf();
    let archived = tokio::task::spawn_blocking(move || {
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_dir_all(".", &dir_owned)?;
        builder.into_inner()
    })
    .await;
    match archived {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(source)) => Err(EngineError::Context {
            path: dir.to_path_buf(),
            source,
        }),
        Err(join) => Err(EngineError::Context {
            path: dir.to_path_buf(),
            source: std::io::Error::other(join),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = EngineClient::connect(Some("carrier-pigeon://coop")).unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnsupportedEndpoint { endpoint } if endpoint == "carrier-pigeon://coop"
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn named_pipes_are_windows_only() {
        let err = EngineClient::connect(Some("npipe:////./pipe/docker_engine")).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEndpoint { .. }));
    }

    #[test]
    fn unix_and_tcp_endpoints_construct_clients() {
        assert!(EngineClient::connect(Some("unix:///tmp/missing.sock")).is_ok());
        assert!(EngineClient::connect(Some("tcp://127.0.0.1:2375")).is_ok());
    }

    #[test]
    fn build_options_map_the_request() {
        let request = ImageBuildRequest {
            reference: "api:1".to_string(),
            dockerfile: Some("Dockerfile.prod".to_string()),
            args: HashMap::from([("MODE".to_string(), "release".to_string())]),
            target: Some("runtime".to_string()),
            labels: HashMap::new(),
            cache_from: vec!["api:cache".to_string()],
            no_cache: true,
        };

        let options = build_options(&request);

        assert_eq!(options.t, "api:1");
        assert_eq!(options.dockerfile, "Dockerfile.prod");
        assert_eq!(options.target, "runtime");
        assert_eq!(options.cachefrom, vec!["api:cache"]);
        assert!(options.nocache);
        assert!(options.rm);
        assert_eq!(options.buildargs.get("MODE").map(String::as_str), Some("release"));
    }

    #[test]
    fn default_dockerfile_applies() {
        let request = ImageBuildRequest {
            reference: "api:1".to_string(),
            ..ImageBuildRequest::default()
        };
        assert_eq!(build_options(&request).dockerfile, "Dockerfile");
    }

    #[tokio::test]
    async fn archive_context_captures_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();

        let bytes = archive_context(dir.path()).await.unwrap();

        let mut archive = tar::Archive::new(bytes.as_slice());
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect();

        assert!(paths.iter().any(|path| path.ends_with("Dockerfile")));
        assert!(paths.iter().any(|path| path.ends_with("main.rs")));
    }

    #[tokio::test]
    async fn archive_context_fails_on_missing_directory() {
        let err = archive_context(Path::new("/definitely/not/here"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Context { .. }));
    }

    #[tokio::test]
    #[ignore] // requires a running container engine
    async fn connects_to_the_local_engine() {
        assert!(EngineClient::connect(None).is_ok());
    }

    #[tokio::test]
    #[ignore] // requires a running container engine
    async fn exports_a_public_image() {
        let dir = tempfile::tempdir().unwrap();
        let engine = EngineClient::connect(None).unwrap();
        let output = dir.path().join("images.tar");
        let written = engine
            .export_images(&["hello-world:latest".to_string()], &output)
            .await
            .unwrap();
        assert!(written > 0);
    }
}
