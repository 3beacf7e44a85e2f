use std::path::PathBuf;
use std::sync::Arc;

use deliver_core::deliver::{DeliverClient, DeliverConfig, LogLevel};
use deliver_core::engine::EngineClient;
use rmcp::{
    ErrorData,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ErrorCode},
    schemars,
    tool,
    tool_router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::registry::{AttachError, ToolProvider};
use crate::{DeliverMcp, helpers};

/// Parameters for packaging a compose project.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct DeliverComposeParams {
    /// Compose files in merge order; later files override earlier ones.
    pub files: Vec<String>,
    /// Directory receiving images.tar and the generated manifest.
    pub output_dir: String,
    /// Base directory for relative paths; defaults to the current directory.
    pub workdir: Option<String>,
    /// Tag for image references synthesized for build-only services.
    pub tag: Option<String>,
    /// Log level recorded for the run: debug, info, warn, or error.
    pub log_level: Option<String>,
}

#[tool_router(router = tool_router_deliver, vis = "pub")]
impl DeliverMcp {
    #[tool(
        description = "Package a compose project for offline installation: build every service with build instructions, export all referenced images to images.tar, and write a docker-compose.generated.yaml pinned to concrete image references."
    )]
    async fn deliver_compose_project(
        &self,
        Parameters(params): Parameters<DeliverComposeParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let mut config = DeliverConfig::new(
            params.files.iter().map(PathBuf::from).collect(),
            params.output_dir,
        );
        if let Some(workdir) = normalize(params.workdir) {
            config = config.with_workdir(workdir);
        }
        if let Some(tag) = normalize(params.tag) {
            config = config.with_tag(tag);
        }
        if let Some(level) = normalize(params.log_level) {
            let level = level
                .parse::<LogLevel>()
                .map_err(|err| helpers::map_deliver_err(err.into()))?;
            config = config.with_log_level(level);
        }
        info!(
            files = config.files.len(),
            output_dir = %config.output_dir.display(),
            "deliver_compose_project invoked"
        );

        let mut client = DeliverClient::new(config).map_err(helpers::map_deliver_err)?;
        let engine = EngineClient::connect(None)
            .map_err(|err| helpers::mcp_err(ErrorCode::INTERNAL_ERROR, helpers::error_chain(&err)))?;
        let report = client
            .deliver(&engine)
            .await
            .map_err(helpers::map_deliver_err)?;
        Ok(CallToolResult::success(vec![Content::json(report)?]))
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Provider attaching the compose delivery tools to a server session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComposeToolProvider;

impl ComposeToolProvider {
    /// Name this provider is conventionally registered under.
    pub const NAME: &'static str = "compose";

    #[must_use]
    pub fn shared() -> Arc<dyn ToolProvider> {
        Arc::new(Self)
    }
}

impl ToolProvider for ComposeToolProvider {
    fn attach(&self, service: &mut DeliverMcp) -> Result<(), AttachError> {
        service.add_router(DeliverMcp::tool_router_deliver());
        Ok(())
    }
}
