//! Render error types

use ash::vk;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the render engine and its backends
#[derive(Error, Debug)]
pub enum RenderError {
    /// Vulkan API error
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Device, instance or swapchain setup failed
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// A required instance or device extension is not available
    #[error("Missing extension: {0}")]
    MissingExtension(String),

    /// A pipeline referenced a shader stage that was never loaded
    #[error("Shader not found: {name}")]
    ShaderNotFound {
        /// Requested stage name
        name: String,
    },

    /// No descriptor arena could satisfy an allocation
    #[error("Binding table allocation exhausted: {reason}")]
    AllocationExhausted {
        /// What failed
        reason: String,
    },

    /// A surface handle that is not (or no longer) registered
    #[error("Unknown surface: {0}")]
    UnknownSurface(String),

    /// Operation not valid in the current state
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Why the operation was rejected
        reason: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

impl RenderError {
    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`RenderError::AllocationExhausted`]
    pub fn exhausted(reason: impl Into<String>) -> Self {
        Self::AllocationExhausted {
            reason: reason.into(),
        }
    }

    /// True for errors that only affect the surface that raised them
    pub const fn is_surface_local(&self) -> bool {
        matches!(self, Self::AllocationExhausted { .. })
    }
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;
