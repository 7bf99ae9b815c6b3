//! Shader manifest
//!
//! Lists the compiled SPIR-V stages available to the pipeline cache together
//! with the binding declarations reflected from their sources:
//!
//! ```toml
//! [[shader]]
//! name = "default_fragment.spv"
//! stage = "fragment"
//! file = "default_fragment.spv"
//!
//! [[shader.binding]]
//! name = "content"
//! kind = "sampled_image"
//! set = 0
//! binding = 0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};
use crate::render::types::{BindingDecl, ShaderStage};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// One compiled shader stage listed in a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderManifestEntry {
    /// Name pipelines refer to the stage by
    pub name: String,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// SPIR-V file, relative to the manifest directory
    pub file: PathBuf,
    /// Declared bindings
    #[serde(default, rename = "binding")]
    pub bindings: Vec<BindingDecl>,
}

/// Collection of shader stages to register at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderManifest {
    /// Listed stages
    #[serde(default, rename = "shader")]
    pub shaders: Vec<ShaderManifestEntry>,
}

impl Config for ShaderManifest {}

impl ShaderManifest {
    /// Resolve an entry's SPIR-V path against the manifest location
    pub fn resolve(manifest_path: &Path, entry: &ShaderManifestEntry) -> PathBuf {
        if entry.file.is_absolute() {
            return entry.file.clone();
        }
        manifest_path
            .parent()
            .map_or_else(|| entry.file.clone(), |dir| dir.join(&entry.file))
    }
}

/// Read a SPIR-V binary into 32-bit words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>, ConfigError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(ConfigError::Parse(format!(
            "{}: SPIR-V size {} is not a multiple of 4",
            path.display(),
            bytes.len()
        )));
    }

    let mut words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    match words.first() {
        Some(&SPIRV_MAGIC) => {}
        Some(&word) if word.swap_bytes() == SPIRV_MAGIC => {
            for word in &mut words {
                *word = word.swap_bytes();
            }
        }
        _ => {
            return Err(ConfigError::Parse(format!(
                "{}: missing SPIR-V magic number",
                path.display()
            )))
        }
    }

    Ok(words)
}
