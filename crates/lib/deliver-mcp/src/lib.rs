//! MCP surface for docker-deliver.
//!
//! This crate wires the deliver pipeline into rmcp tool handlers and exposes
//! the registry and server session that serve them over stdio or streamable
//! HTTP.

mod helpers;
mod trace_io;
pub mod registry;
pub mod server;
pub mod tools;

use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{
    ErrorData,
    ServerHandler,
    handler::server::tool::ToolRouter,
    tool,
    tool_handler,
    tool_router,
};

const SERVER_INSTRUCTIONS: &str = r"docker-deliver packages a compose project for offline installation.

Call `deliver_compose_project` with the compose file paths and an output
directory. The tool builds every service that carries build instructions,
exports all referenced images into `images.tar`, and writes a
`docker-compose.generated.yaml` manifest in which every service is pinned
to a concrete image reference. Load the bundle on an offline host with
`docker load -i images.tar` followed by
`docker compose -f docker-compose.generated.yaml up`.

`health` returns `ok`.";

/// MCP service carrying the deliver tool routes and the server identity.
#[derive(Clone)]
pub struct DeliverMcp {
    tool_router: ToolRouter<Self>,
    server_name: String,
    server_version: String,
}

impl DeliverMcp {
    /// Creates a service with the core routes and the given identity.
    /// Provider routes are merged in through [`Self::add_router`].
    #[must_use]
    pub fn new(server_name: impl Into<String>, server_version: impl Into<String>) -> Self {
        Self {
            tool_router: Self::tool_router_core(),
            server_name: server_name.into(),
            server_version: server_version.into(),
        }
    }

    /// Merges an additional tool route set into this service.
    pub fn add_router(&mut self, router: ToolRouter<Self>) {
        self.tool_router = self.tool_router.clone() + router;
    }

    /// Names of the tools currently routed, in listing order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tool_router
            .list_all()
            .into_iter()
            .map(|tool| tool.name.to_string())
            .collect()
    }
}

#[tool_router(router = tool_router_core, vis = "pub")]
impl DeliverMcp {
    #[tool(description = "Health check. Returns 'ok'.")]
    async fn health(&self) -> Result<CallToolResult, ErrorData> {
        Ok(CallToolResult::success(vec![Content::text("ok")]))
    }
}

#[tool_handler]
impl ServerHandler for DeliverMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
                ..Implementation::default()
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
