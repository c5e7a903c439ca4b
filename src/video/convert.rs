//! Color space conversion: packed RGBA/BGRA → planar YUV 4:2:0
//!
//! The shared-memory contract fixes the framebuffer to packed four-byte
//! pixels; the encoder consumes I420. Integer BT.601 full-swing math,
//! chroma averaged over each 2x2 block.

use openh264::formats::YUVSource;

use super::format::{PixelFormat, Resolution};

/// Reusable YUV 4:2:0 planar buffer sized for one frame.
pub struct Yuv420Buffer {
    data: Vec<u8>,
    width: usize,
    height: usize,
    u_offset: usize,
    v_offset: usize,
}

impl Yuv420Buffer {
    pub fn new(resolution: Resolution) -> Self {
        let width = resolution.width as usize;
        let height = resolution.height as usize;
        let y_size = width * height;
        let uv_size = y_size / 4;

        Self {
            data: vec![0u8; y_size + 2 * uv_size],
            width,
            height,
            u_offset: y_size,
            v_offset: y_size + uv_size,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width as u32, self.height as u32)
    }

    /// Convert one packed frame into this buffer. `stride` is the source
    /// row length in bytes; rows shorter than `width * 4` are rejected by
    /// the caller via the shared-memory validation.
    pub fn fill_from_packed(&mut self, src: &[u8], stride: usize, format: PixelFormat) {
        let (ri, gi, bi) = match format {
            PixelFormat::Rgba => (0usize, 1usize, 2usize),
            PixelFormat::Bgra => (2, 1, 0),
        };

        let width = self.width;
        let height = self.height;

        for row in 0..height {
            let src_row = &src[row * stride..];
            let dst_y = &mut self.data[row * width..(row + 1) * width];
            for col in 0..width {
                let px = &src_row[col * 4..col * 4 + 4];
                let (r, g, b) = (px[ri] as i32, px[gi] as i32, px[bi] as i32);
                dst_y[col] = (((66 * r + 129 * g + 25 * b + 128) >> 8) + 16) as u8;
            }
        }

        let chroma_w = width / 2;
        for row in 0..height / 2 {
            for col in 0..chroma_w {
                let mut r = 0i32;
                let mut g = 0i32;
                let mut b = 0i32;
                for dy in 0..2 {
                    let base = (row * 2 + dy) * stride + col * 2 * 4;
                    for dx in 0..2 {
                        let px = &src[base + dx * 4..base + dx * 4 + 4];
                        r += px[ri] as i32;
                        g += px[gi] as i32;
                        b += px[bi] as i32;
                    }
                }
                r /= 4;
                g /= 4;
                b /= 4;

                self.data[self.u_offset + row * chroma_w + col] =
                    (((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128) as u8;
                self.data[self.v_offset + row * chroma_w + col] =
                    (((112 * r - 94 * g - 18 * b + 128) >> 8) + 128) as u8;
            }
        }
    }
}

impl YUVSource for Yuv420Buffer {
    fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        (self.width, self.width / 2, self.width / 2)
    }

    fn y(&self) -> &[u8] {
        &self.data[..self.u_offset]
    }

    fn u(&self) -> &[u8] {
        &self.data[self.u_offset..self.v_offset]
    }

    fn v(&self) -> &[u8] {
        &self.data[self.v_offset..]
    }
}
