//! Core value types exchanged between pipeline stages
//!
//! Everything in this module is plain data. Nothing here owns GPU resources;
//! a [`Frame`] only *names* a texture that lives for the duration of the
//! `on_frame` call that delivered it.
//!
//! # Main Types
//!
//! - [`Frame`] - One produced image: texture handle, size, format flags and transform
//! - [`TextureId`] - Opaque GPU texture handle
//! - [`Matrix4`] - Column-major 4x4 matrix used for texture and model-view transforms
//! - [`MirrorMode`] - One of the four fixed orientation flips applied at draw time
//! - [`Color`] - RGBA clear colour
//!
//! # Mirror Arithmetic
//!
//! Mirror modes form a small group under composition: each mode is a pair of
//! independent flip bits (horizontal, vertical), so combining two modes is an
//! XOR of their bits and every mode is its own inverse.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of elements in a 4x4 matrix
pub const MATRIX_LEN: usize = 16;

/// Opaque GPU texture handle
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TextureId(pub u32);

impl TextureId {
    /// Handle value that never names a live texture
    pub const NONE: TextureId = TextureId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NONE
    }
}

impl fmt::Debug for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::NONE {
            write!(f, "TextureId(NONE)")
        } else {
            write!(f, "TextureId({})", self.0)
        }
    }
}

/// Column-major 4x4 matrix (OpenGL layout)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix4(pub [f32; MATRIX_LEN]);

impl Matrix4 {
    pub const IDENTITY: Matrix4 = Matrix4([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn identity() -> Self {
        Self::IDENTITY
    }

    /// Build a matrix from the first 16 elements of `values`.
    ///
    /// Producers sometimes hand over a larger buffer (e.g. a matrix with an
    /// offset into a shared array); anything beyond the first 16 elements is
    /// ignored. Fewer than 16 elements is rejected.
    pub fn from_slice(values: &[f32]) -> PipelineResult<Self> {
        if values.len() < MATRIX_LEN {
            return Err(PipelineError::InvalidArgument(format!(
                "transform matrix needs {} elements, got {}",
                MATRIX_LEN,
                values.len()
            )));
        }
        let mut m = [0.0f32; MATRIX_LEN];
        m.copy_from_slice(&values[..MATRIX_LEN]);
        Ok(Self(m))
    }

    /// Scale matrix
    pub fn scale(sx: f32, sy: f32, sz: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = sx;
        m.0[5] = sy;
        m.0[10] = sz;
        m
    }

    /// Translation matrix
    pub fn translation(tx: f32, ty: f32, tz: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = tx;
        m.0[13] = ty;
        m.0[14] = tz;
        m
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Element at `row`, `col`
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0[col * 4 + row]
    }

    /// Matrix product `self * rhs`
    pub fn multiply(&self, rhs: &Matrix4) -> Matrix4 {
        let mut out = [0.0f32; MATRIX_LEN];
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.get(row, k) * rhs.get(k, col);
                }
                out[col * 4 + row] = sum;
            }
        }
        Matrix4(out)
    }

    pub fn is_identity(&self) -> bool {
        self.approx_eq(&Self::IDENTITY, 1e-6)
    }

    /// Element-wise comparison within `epsilon`
    pub fn approx_eq(&self, other: &Matrix4, epsilon: f32) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| (a - b).abs() <= epsilon)
    }
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Orientation flip applied when a frame is drawn to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorMode {
    #[default]
    Normal,
    Horizontal,
    Vertical,
    Both,
}

impl MirrorMode {
    pub const ALL: [MirrorMode; 4] = [
        MirrorMode::Normal,
        MirrorMode::Horizontal,
        MirrorMode::Vertical,
        MirrorMode::Both,
    ];

    /// Mode from its numeric index; values wrap modulo 4
    pub fn from_index(index: i32) -> Self {
        Self::from_bits(index.rem_euclid(4) as u8)
    }

    pub fn index(self) -> i32 {
        self.bits() as i32
    }

    fn bits(self) -> u8 {
        match self {
            MirrorMode::Normal => 0b00,
            MirrorMode::Horizontal => 0b01,
            MirrorMode::Vertical => 0b10,
            MirrorMode::Both => 0b11,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b01 => MirrorMode::Horizontal,
            0b10 => MirrorMode::Vertical,
            0b11 => MirrorMode::Both,
            _ => MirrorMode::Normal,
        }
    }

    pub fn flips_horizontal(self) -> bool {
        self.bits() & 0b01 != 0
    }

    pub fn flips_vertical(self) -> bool {
        self.bits() & 0b10 != 0
    }

    /// Apply `other` on top of `self`
    pub fn combine(self, other: MirrorMode) -> MirrorMode {
        Self::from_bits(self.bits() ^ other.bits())
    }

    pub fn toggle_horizontal(self) -> MirrorMode {
        self.combine(MirrorMode::Horizontal)
    }

    pub fn toggle_vertical(self) -> MirrorMode {
        self.combine(MirrorMode::Vertical)
    }

    /// Flip matrix for this mode
    pub fn matrix(self) -> Matrix4 {
        let sx = if self.flips_horizontal() { -1.0 } else { 1.0 };
        let sy = if self.flips_vertical() { -1.0 } else { 1.0 };
        Matrix4::scale(sx, sy, 1.0)
    }

    /// Model-view matrix with this flip applied
    pub fn apply(self, model_view: &Matrix4) -> Matrix4 {
        if self == MirrorMode::Normal {
            return *model_view;
        }
        model_view.multiply(&self.matrix())
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            MirrorMode::Normal => "Normal",
            MirrorMode::Horizontal => "Horizontal",
            MirrorMode::Vertical => "Vertical",
            MirrorMode::Both => "Both",
        }
    }
}

impl fmt::Display for MirrorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// RGBA colour with components in [0.0, 1.0]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Colour from a packed `0xAARRGGBB` value
    pub fn from_argb(argb: u32) -> Self {
        let channel = |shift: u32| ((argb >> shift) & 0xFF) as f32 / 255.0;
        Self::rgba(channel(16), channel(8), channel(0), channel(24))
    }

    pub fn to_argb(&self) -> u32 {
        let channel = |v: f32| ((v.clamp(0.0, 1.0) * 255.0).round() as u32) & 0xFF;
        (channel(self.a) << 24) | (channel(self.r) << 16) | (channel(self.g) << 8) | channel(self.b)
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::BLACK
    }
}

/// One produced image travelling through the pipeline
///
/// Frames are transient: a stage must not keep `texture` beyond the call that
/// delivered it unless it copies the contents into its own buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Texture holding the image
    pub texture: TextureId,
    /// Externally sourced texture (camera/video stream) rather than a regular 2D texture
    pub is_external: bool,
    pub width: u32,
    pub height: u32,
    /// Texture-coordinate transform supplied by the producer
    pub transform: Matrix4,
    /// Produced on a context with the advanced capability set
    pub is_advanced: bool,
}

impl Frame {
    /// Create a frame with an identity transform.
    pub fn new(texture: TextureId, width: u32, height: u32) -> PipelineResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "frame size must be positive, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            texture,
            is_external: false,
            width,
            height,
            transform: Matrix4::IDENTITY,
            is_advanced: false,
        })
    }

    pub fn with_transform(mut self, transform: Matrix4) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_external(mut self, is_external: bool) -> Self {
        self.is_external = is_external;
        self
    }

    pub fn with_advanced(mut self, is_advanced: bool) -> Self {
        self.is_advanced = is_advanced;
        self
    }

    /// Frame describing the result of rendering into an off-screen buffer.
    ///
    /// Rendered frames are always regular textures with an identity
    /// transform; the producer's transform has already been applied.
    pub fn rendered(&self, texture: TextureId, width: u32, height: u32) -> Frame {
        Frame {
            texture,
            is_external: false,
            width,
            height,
            transform: Matrix4::IDENTITY,
            is_advanced: self.is_advanced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_from_short_slice_rejected() {
        let err = Matrix4::from_slice(&[1.0; 12]).unwrap_err();
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn test_matrix_from_long_slice_takes_prefix() {
        let mut values = vec![0.0f32; 20];
        values[0] = 2.0;
        values[19] = 9.0;
        let m = Matrix4::from_slice(&values).unwrap();
        assert_eq!(m.0[0], 2.0);
        assert_eq!(m.0[15], 0.0);
    }

    #[test]
    fn test_matrix_multiply_identity() {
        let t = Matrix4::translation(3.0, 4.0, 0.0);
        assert_eq!(t.multiply(&Matrix4::IDENTITY), t);
        assert_eq!(Matrix4::IDENTITY.multiply(&t), t);
    }

    #[test]
    fn test_matrix_scale_then_translate() {
        let m = Matrix4::translation(1.0, 0.0, 0.0).multiply(&Matrix4::scale(2.0, 2.0, 1.0));
        assert_eq!(m.get(0, 0), 2.0);
        assert_eq!(m.get(0, 3), 1.0);
    }

    #[test]
    fn test_mirror_combine_is_xor() {
        assert_eq!(
            MirrorMode::Horizontal.combine(MirrorMode::Vertical),
            MirrorMode::Both
        );
        assert_eq!(
            MirrorMode::Both.combine(MirrorMode::Horizontal),
            MirrorMode::Vertical
        );
        for mode in MirrorMode::ALL {
            assert_eq!(mode.combine(mode), MirrorMode::Normal);
        }
    }

    #[test]
    fn test_mirror_from_index_wraps() {
        assert_eq!(MirrorMode::from_index(5), MirrorMode::Horizontal);
        assert_eq!(MirrorMode::from_index(-1), MirrorMode::Both);
        for mode in MirrorMode::ALL {
            assert_eq!(MirrorMode::from_index(mode.index()), mode);
        }
    }

    #[test]
    fn test_mirror_apply_flips_axes() {
        let m = MirrorMode::Horizontal.apply(&Matrix4::IDENTITY);
        assert_eq!(m.get(0, 0), -1.0);
        assert_eq!(m.get(1, 1), 1.0);

        let m = MirrorMode::Both.apply(&Matrix4::IDENTITY);
        assert_eq!(m.get(0, 0), -1.0);
        assert_eq!(m.get(1, 1), -1.0);

        assert!(MirrorMode::Normal.apply(&Matrix4::IDENTITY).is_identity());
    }

    #[test]
    fn test_color_argb() {
        let c = Color::from_argb(0xFF00_80FF);
        assert_eq!(c.a, 1.0);
        assert_eq!(c.r, 0.0);
        assert_eq!(c.to_argb(), 0xFF00_80FF);
    }

    #[test]
    fn test_frame_rejects_zero_size() {
        assert!(Frame::new(TextureId(1), 0, 480).is_err());
        assert!(Frame::new(TextureId(1), 640, 0).is_err());
        let frame = Frame::new(TextureId(1), 640, 480).unwrap();
        assert!(frame.transform.is_identity());
    }

    #[test]
    fn test_rendered_frame_resets_transform() {
        let frame = Frame::new(TextureId(3), 640, 480)
            .unwrap()
            .with_external(true)
            .with_transform(Matrix4::scale(1.0, -1.0, 1.0));
        let rendered = frame.rendered(TextureId(9), 320, 240);
        assert!(!rendered.is_external);
        assert!(rendered.transform.is_identity());
        assert_eq!(rendered.texture, TextureId(9));
    }
}
