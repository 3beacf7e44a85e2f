//! MCP tool modules.
//!
//! Each module contributes one router of related tools plus the provider
//! that attaches it to a server session.

pub mod deliver;
