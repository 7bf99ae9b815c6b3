//! Engine configuration
//!
//! Everything the engine reads at construction time: swapchain preferences,
//! retirement thresholds, descriptor arena sizing, the synchronization
//! strategy and the default shader selections.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Config, ConfigError};

/// Presentation mode requested for the output swapchain
///
/// Unsupported modes fall back to FIFO, which every device must provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    /// Low-latency triple buffering without tearing
    #[default]
    Mailbox,
    /// Vsync queue
    Fifo,
    /// No vsync, may tear
    Immediate,
}

/// How the capture stage and the presented frame are fenced against the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    /// Device-idle barrier after the capture submission and after present
    #[default]
    WaitIdle,
    /// Rely on the per-slot semaphore chain and fences only
    SemaphoreChain,
}

/// Capacity of one descriptor arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Maximum binding tables allocated from one arena
    pub max_tables: u32,
    /// Sampler descriptors available in one arena
    pub samplers: u32,
    /// Sampled-image descriptors available in one arena
    pub sampled_images: u32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            max_tables: 16,
            samplers: 16,
            sampled_images: 16,
        }
    }
}

/// Vertex, geometry and fragment stage names of one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderSet {
    /// Vertex stage name
    pub vertex: String,
    /// Geometry stage name
    pub geometry: String,
    /// Fragment stage name
    pub fragment: String,
}

impl ShaderSet {
    /// Create a shader set from three stage names
    pub fn new(
        vertex: impl Into<String>,
        geometry: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        Self {
            vertex: vertex.into(),
            geometry: geometry.into(),
            fragment: fragment.into(),
        }
    }

    /// Stage names in pipeline order
    pub fn names(&self) -> [&str; 3] {
        [&self.vertex, &self.geometry, &self.fragment]
    }

    /// Shaders used for plain client windows and the background
    pub fn default_set() -> Self {
        Self::new("default_vertex.spv", "default_geometry.spv", "default_fragment.spv")
    }

    /// Shaders used for decorated client frames
    pub fn frame_set() -> Self {
        Self::new("frame_vertex.spv", "frame_geometry.spv", "frame_fragment.spv")
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Index of the physical device to use
    pub gpu_index: usize,
    /// Requested number of swapchain images, which is also the frames-in-flight ring size
    pub preferred_image_count: u32,
    /// Requested presentation mode
    pub present_mode: PresentModePreference,
    /// Minimum seconds a pooled texture stays unused before it is destroyed
    pub texture_idle_secs: f64,
    /// Descriptor arena capacity
    pub arena: ArenaConfig,
    /// Frame synchronization strategy
    pub sync_strategy: SyncStrategy,
    /// Output clear color (RGBA)
    pub clear_color: [f32; 4],
    /// Pipeline used for the background and surfaces without a selection
    pub default_shaders: ShaderSet,
    /// Pipeline used for decorated client frames
    pub frame_shaders: ShaderSet,
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Shader manifest loaded at startup
    pub shader_manifest: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gpu_index: 0,
            preferred_image_count: 3,
            present_mode: PresentModePreference::Mailbox,
            texture_idle_secs: 5.0,
            arena: ArenaConfig::default(),
            sync_strategy: SyncStrategy::WaitIdle,
            clear_color: [1.0, 1.0, 1.0, 1.0],
            default_shaders: ShaderSet::default_set(),
            frame_shaders: ShaderSet::frame_set(),
            enable_validation: None,
            shader_manifest: None,
        }
    }
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Select the physical device by index
    pub fn with_gpu_index(mut self, index: usize) -> Self {
        self.gpu_index = index;
        self
    }

    /// Set the requested swapchain image count
    pub fn with_image_count(mut self, count: u32) -> Self {
        self.preferred_image_count = count;
        self
    }

    /// Set the requested presentation mode
    pub fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the pooled texture idle threshold in seconds
    pub fn with_texture_idle_secs(mut self, secs: f64) -> Self {
        self.texture_idle_secs = secs;
        self
    }

    /// Set the descriptor arena capacity
    pub fn with_arena(mut self, arena: ArenaConfig) -> Self {
        self.arena = arena;
        self
    }

    /// Set the frame synchronization strategy
    pub fn with_sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.sync_strategy = strategy;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Load shaders from a manifest at startup
    pub fn with_shader_manifest(mut self, path: impl Into<PathBuf>) -> Self {
        self.shader_manifest = Some(path.into());
        self
    }

    /// Whether validation layers should be requested
    pub const fn validation_enabled(&self) -> bool {
        match self.enable_validation {
            Some(enabled) => enabled,
            None => cfg!(debug_assertions),
        }
    }

    /// Pooled texture idle threshold
    pub fn texture_idle_threshold(&self) -> Duration {
        Duration::from_secs_f64(self.texture_idle_secs.max(0.0))
    }

    /// Check the values that would otherwise fail deep inside the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.preferred_image_count < 2 {
            return Err(ConfigError::Invalid(format!(
                "preferred_image_count must be at least 2, got {}",
                self.preferred_image_count
            )));
        }
        if !self.texture_idle_secs.is_finite() || self.texture_idle_secs < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "texture_idle_secs must be a non-negative number, got {}",
                self.texture_idle_secs
            )));
        }
        let arena = &self.arena;
        if arena.max_tables == 0 || arena.samplers == 0 || arena.sampled_images == 0 {
            return Err(ConfigError::Invalid(format!(
                "arena capacities must be non-zero, got {arena:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{Builder, NamedTempFile};

    fn temp_file(suffix: &str) -> NamedTempFile {
        Builder::new().suffix(suffix).tempfile().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.preferred_image_count, 3);
        assert_eq!(config.arena, ArenaConfig { max_tables: 16, samplers: 16, sampled_images: 16 });
        assert_eq!(config.sync_strategy, SyncStrategy::WaitIdle);
        assert_eq!(config.texture_idle_threshold(), Duration::from_secs(5));
        assert_eq!(config.default_shaders.names()[1], "default_geometry.spv");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            present_mode = "fifo"
            sync_strategy = "semaphore_chain"

            [arena]
            max_tables = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.present_mode, PresentModePreference::Fifo);
        assert_eq!(config.sync_strategy, SyncStrategy::SemaphoreChain);
        assert_eq!(config.arena.max_tables, 4);
        assert_eq!(config.arena.samplers, 16);
        assert_eq!(config.preferred_image_count, 3);
    }

    #[test]
    fn test_toml_file_roundtrip() {
        let file = temp_file(".toml");
        let config = EngineConfig::default()
            .with_image_count(2)
            .with_texture_idle_secs(0.5)
            .with_sync_strategy(SyncStrategy::SemaphoreChain);

        config.save_to_file(file.path()).unwrap();
        let loaded = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_file_roundtrip() {
        let file = temp_file(".ron");
        let config = EngineConfig::default().with_present_mode(PresentModePreference::Immediate);

        config.save_to_file(file.path()).unwrap();
        let loaded = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.present_mode, PresentModePreference::Immediate);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = temp_file(".json");
        let result = EngineConfig::default().save_to_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::default().with_image_count(1).validate().is_err());
        assert!(EngineConfig::default().with_texture_idle_secs(-1.0).validate().is_err());
        let empty_arena = ArenaConfig { max_tables: 0, ..ArenaConfig::default() };
        assert!(EngineConfig::default().with_arena(empty_arena).validate().is_err());
    }
}
