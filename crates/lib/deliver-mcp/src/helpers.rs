use std::borrow::Cow;
use std::error::Error;

use deliver_core::deliver::DeliverError;
use rmcp::model::{ErrorCode, ErrorData};

pub fn mcp_err(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> ErrorData {
    ErrorData {
        code,
        message: message.into(),
        data: None,
    }
}

/// Renders an error and its source chain as a single line.
pub fn error_chain(err: &dyn Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        rendered.push_str(": ");
        rendered.push_str(&cause.to_string());
        source = cause.source();
    }
    rendered
}

/// Maps a delivery failure onto the protocol error space. Bad input (config
/// and compose-file problems) becomes invalid-params; everything else is an
/// internal error.
pub fn map_deliver_err(err: DeliverError) -> ErrorData {
    let code = match &err {
        DeliverError::Config(_) | DeliverError::Load(_) => ErrorCode::INVALID_PARAMS,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    mcp_err(code, error_chain(&err))
}
