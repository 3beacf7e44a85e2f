use deliver_mcp::registry::{RegistryError, ServiceRegistry};
use deliver_mcp::tools::deliver::ComposeToolProvider;

/// Builds the provider registry served by the MCP session.
pub fn build_registry() -> Result<ServiceRegistry, RegistryError> {
    let registry = ServiceRegistry::new();
    registry.register(ComposeToolProvider::NAME, ComposeToolProvider::shared())?;
    Ok(registry)
}
