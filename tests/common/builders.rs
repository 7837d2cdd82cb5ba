//! Test data builders for creating test objects

use texflow::{Frame, Matrix4, TextureId};

/// Builder for creating test Frames
pub struct FrameBuilder {
    texture: TextureId,
    width: u32,
    height: u32,
    external: bool,
    transform: Matrix4,
}

impl FrameBuilder {
    pub fn new(texture: u32) -> Self {
        Self {
            texture: TextureId(texture),
            width: 640,
            height: 480,
            external: false,
            transform: Matrix4::IDENTITY,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn transform(mut self, transform: Matrix4) -> Self {
        self.transform = transform;
        self
    }

    pub fn build(self) -> Frame {
        Frame::new(self.texture, self.width, self.height)
            .expect("test frame size must be non-zero")
            .with_external(self.external)
            .with_transform(self.transform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(3).size(32, 16).external().build();

        assert_eq!(frame.texture, TextureId(3));
        assert_eq!((frame.width, frame.height), (32, 16));
        assert!(frame.is_external);
    }
}
