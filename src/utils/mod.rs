pub mod connection;
pub mod credentials;
pub mod revision;

use std::path::PathBuf;
use which::which;

use crate::errors::EngineError;

/// Finds an executable in the system PATH.
pub fn find_executable(program: &str) -> Result<PathBuf, EngineError> {
    which(program).map_err(|_| EngineError::ToolMissing {
        tool: program.to_string(),
    })
}
