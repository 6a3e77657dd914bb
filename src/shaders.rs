// Shader asset loading
//
// The renderer treats shader programs as opaque bytes; this is where they
// come from. Programs are looked up by logical name.

use crate::backend::SetupError;
use std::path::PathBuf;

pub trait ShaderSource {
    /// Full contents of the named program
    fn load(&self, name: &str) -> Result<Vec<u8>, SetupError>;
}

/// Compiled `.spv` files in one directory
#[derive(Debug, Clone)]
pub struct ShaderDirectory {
    root: PathBuf,
}

impl ShaderDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ShaderSource for ShaderDirectory {
    fn load(&self, name: &str) -> Result<Vec<u8>, SetupError> {
        let path = self.root.join(name);
        let bytes = std::fs::read(&path).map_err(|source| SetupError::ShaderRead {
            name: path.display().to_string(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(SetupError::InvalidShader {
                name: path.display().to_string(),
                reason: "file is empty".to_string(),
            });
        }
        log::debug!("Loaded shader {:?} ({} bytes)", path, bytes.len());
        Ok(bytes)
    }
}
