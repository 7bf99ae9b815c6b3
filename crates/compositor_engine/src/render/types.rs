//! Backend-agnostic render types
//!
//! Shader stage and binding declarations, the per-draw push constant block,
//! draw flags and captured pixel buffers.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Vector2, Vector4};
use serde::{Deserialize, Serialize};

use crate::foundation::geometry::{Extent, Rect};

/// Number of programmable stages in a compositor pipeline
pub const STAGE_COUNT: usize = 3;

/// Binding name a shader uses for the surface content image
pub const CONTENT_BINDING: &str = "content";

/// Programmable pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    /// Vertex stage
    Vertex,
    /// Geometry stage, expands the point into the surface quad
    Geometry,
    /// Fragment stage
    Fragment,
}

impl ShaderStage {
    /// Stages in pipeline order
    pub const ALL: [Self; STAGE_COUNT] = [Self::Vertex, Self::Geometry, Self::Fragment];

    /// Position of the stage in a pipeline stage tuple
    pub const fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Geometry => 1,
            Self::Fragment => 2,
        }
    }
}

/// Kind of resource a binding slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    /// Separate sampler object
    Sampler,
    /// Sampled image without sampler
    SampledImage,
}

/// One binding declared by a shader stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingDecl {
    /// Name of the variable in the shader source
    pub name: String,
    /// Resource kind
    pub kind: BindingKind,
    /// Binding slot within its table
    pub binding: u32,
    /// Binding table (descriptor set) index
    #[serde(default)]
    pub set: u32,
}

impl BindingDecl {
    /// Create a binding declaration
    pub fn new(name: impl Into<String>, kind: BindingKind, set: u32, binding: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            binding,
            set,
        }
    }
}

/// Number of binding tables a list of declarations spans
pub fn table_count(bindings: &[BindingDecl]) -> usize {
    bindings.iter().map(|decl| decl.set as usize + 1).max().unwrap_or(0)
}

bitflags! {
    /// Per-draw flags passed to the shaders
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DrawFlags: u32 {
        /// Surface holds the input focus
        const FOCUS = 0x1;
    }
}

impl DrawFlags {
    /// Combine the focus bit with per-surface user shading flags
    pub const fn for_surface(focused: bool, user_flags: u32) -> Self {
        let flags = Self::from_bits_retain(user_flags);
        if focused {
            flags.union(Self::FOCUS)
        } else {
            flags
        }
    }
}

/// Per-draw constant block visible to the geometry and fragment stages
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    /// Surface rectangle in clip space: left, top, right, bottom
    pub frame: [f32; 4],
    /// Output extent in pixels
    pub image_extent: [f32; 2],
    /// Border width
    pub border_width: [f32; 2],
    /// Draw flags
    pub flags: u32,
    /// Seconds since the surface was created
    pub time: f32,
}

/// Size of [`PushConstants`] in bytes
pub const PUSH_CONSTANT_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

const _: () = assert!(std::mem::size_of::<PushConstants>() == 40);

impl PushConstants {
    /// Build the constant block for one surface draw
    ///
    /// Pixel corners are mapped to their centers before normalizing, so a
    /// rectangle covering the whole output spans slightly less than [-1, 1].
    pub fn new(rect: Rect, output: Extent, border_width: [f32; 2], flags: DrawFlags, time: f32) -> Self {
        let scale = Vector4::new(
            output.width as f32,
            output.height as f32,
            output.width as f32,
            output.height as f32,
        );
        let corners = Vector4::new(
            rect.x as f32,
            rect.y as f32,
            rect.right() as f32,
            rect.bottom() as f32,
        );
        let frame = (corners.add_scalar(0.5).component_div(&scale) * 2.0).add_scalar(-1.0);
        let image_extent = Vector2::new(output.width as f32, output.height as f32);

        Self {
            frame: frame.into(),
            image_extent: image_extent.into(),
            border_width,
            flags: flags.bits(),
            time,
        }
    }

    /// Raw bytes as pushed to the command list
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Raw 32-bit BGRA pixels captured for a surface
///
/// Rows are tightly packed with a stride of `extent.width * 4`. Sources may
/// fill only the requested regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPixels {
    /// Size of the captured image
    pub extent: Extent,
    /// Color depth of the source drawable; anything but 32 carries no alpha
    pub depth: u8,
    /// Pixel bytes
    pub data: Vec<u8>,
}

impl CapturedPixels {
    /// Zero-filled pixels for `extent`
    pub fn blank(extent: Extent, depth: u8) -> Self {
        Self {
            extent,
            depth,
            data: vec![0; extent.byte_size()],
        }
    }

    /// Pixels filled with a single BGRA color
    pub fn solid(extent: Extent, depth: u8, bgra: [u8; 4]) -> Self {
        Self {
            extent,
            depth,
            data: bgra.repeat(extent.pixel_count()),
        }
    }

    /// True if the buffer is large enough for its extent
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.extent.byte_size()
    }

    /// True if the alpha channel must be treated as opaque
    pub const fn forces_opaque(&self) -> bool {
        self.depth != 32
    }
}

/// Copy `regions` of `pixels` into a tightly packed staging image of the same extent
///
/// Regions are clipped to the image. Alpha is forced to 255 for sources
/// without an alpha channel.
pub fn copy_regions(staging: &mut [u8], pixels: &CapturedPixels, regions: &[Rect]) {
    let extent = pixels.extent;
    let stride = extent.width as usize * 4;
    let force_opaque = pixels.forces_opaque();

    for region in regions {
        let Some(region) = clip_to(*region, extent) else {
            continue;
        };
        let row_bytes = region.width as usize * 4;
        for row in 0..region.height as usize {
            let start = (region.y as usize + row) * stride + region.x as usize * 4;
            let end = start + row_bytes;
            let (Some(dst), Some(src)) = (staging.get_mut(start..end), pixels.data.get(start..end))
            else {
                break;
            };
            dst.copy_from_slice(src);
            if force_opaque {
                for pixel in dst.chunks_exact_mut(4) {
                    pixel[3] = 255;
                }
            }
        }
    }
}

/// Intersection of a rectangle with an image of `extent`
pub fn clip_to(rect: Rect, extent: Extent) -> Option<Rect> {
    let left = i64::from(rect.x).max(0);
    let top = i64::from(rect.y).max(0);
    let right = rect.right().min(i64::from(extent.width));
    let bottom = rect.bottom().min(i64::from(extent.height));
    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::new(
        left as i32,
        top as i32,
        (right - left) as u32,
        (bottom - top) as u32,
    ))
}
