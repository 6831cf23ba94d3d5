//! Byte-valued image planes.
//!
//! A [`ChannelImage`] is a row-major, top-left-origin plane of `u8`
//! samples. The same type carries both interleaved RGBA buffers
//! (`width * height * 4` bytes) and single-channel planes
//! (`width * height` bytes); [`decompose`] and [`compose`] convert
//! between the two.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelImage {
    pub width: usize,
    pub height: usize,
    pub buffer: Vec<u8>,
}

impl ChannelImage {
    /// A zeroed single-channel plane.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buffer: vec![0; width * height],
        }
    }

    /// Wrap an interleaved RGBA buffer.
    pub fn from_rgba(buffer: Vec<u8>, width: usize, height: usize) -> Result<Self> {
        if buffer.len() != width * height * 4 {
            return Err(Error::SizeMismatch(format!(
                "RGBA buffer: expected {} bytes ({width}x{height}x4), got {}",
                width * height * 4,
                buffer.len()
            )));
        }
        Ok(Self {
            width,
            height,
            buffer,
        })
    }

    fn index(&self, x: usize, y: usize) -> usize {
        x + y * self.width
    }

    /// Nearest-neighbor resize. Output dimensions are
    /// `round(width * scale)` x `round(height * scale)`; the source
    /// coordinate for output column `w` is `round((w + 1) / scale) - 1`,
    /// clamped at zero (and analogously for rows). `scale == 1.0` is a
    /// no-op.
    pub fn resize(&self, scale: f64) -> ChannelImage {
        if scale == 1.0 {
            return self.clone();
        }
        let scaled_width = (self.width as f64 * scale).round() as usize;
        let scaled_height = (self.height as f64 * scale).round() as usize;
        let mut scaled = ChannelImage::new(scaled_width, scaled_height);
        for h in 0..scaled_height {
            let src_h = (((h + 1) as f64 / scale).round() - 1.0).max(0.0) as usize;
            for w in 0..scaled_width {
                let src_w = (((w + 1) as f64 / scale).round() - 1.0).max(0.0) as usize;
                scaled.buffer[w + h * scaled_width] = self.buffer[self.index(src_w, src_h)];
            }
        }
        scaled
    }

    /// Clamp-padding extrapolation: grows the plane by `pad` pixels on
    /// every side. The interior is a shifted copy; border bands replicate
    /// the nearest interior row or column, corners the nearest corner
    /// pixel.
    pub fn extrapolate(&self, pad: usize) -> ChannelImage {
        let out_width = self.width + 2 * pad;
        let out_height = self.height + 2 * pad;
        let mut out = ChannelImage::new(out_width, out_height);
        let max_x = (self.width - 1) as isize;
        let max_y = (self.height - 1) as isize;
        for h in 0..out_height {
            let src_h = (h as isize - pad as isize).clamp(0, max_y) as usize;
            for w in 0..out_width {
                let src_w = (w as isize - pad as isize).clamp(0, max_x) as usize;
                out.buffer[w + h * out_width] = self.buffer[self.index(src_w, src_h)];
            }
        }
        out
    }

    /// True when every alpha byte of an interleaved RGBA buffer is 255.
    pub fn is_opaque(&self) -> bool {
        self.buffer.iter().skip(3).step_by(4).all(|&a| a == 255)
    }
}

/// Split an interleaved RGBA image into its R, G, B and A planes.
pub fn decompose(
    img: &ChannelImage,
) -> Result<(ChannelImage, ChannelImage, ChannelImage, ChannelImage)> {
    let pixels = img.width * img.height;
    if img.buffer.len() != pixels * 4 {
        return Err(Error::SizeMismatch(format!(
            "decompose: expected {} bytes ({}x{}x4), got {}",
            pixels * 4,
            img.width,
            img.height,
            img.buffer.len()
        )));
    }
    let mut r = ChannelImage::new(img.width, img.height);
    let mut g = ChannelImage::new(img.width, img.height);
    let mut b = ChannelImage::new(img.width, img.height);
    let mut a = ChannelImage::new(img.width, img.height);
    for i in 0..pixels {
        r.buffer[i] = img.buffer[i * 4];
        g.buffer[i] = img.buffer[i * 4 + 1];
        b.buffer[i] = img.buffer[i * 4 + 2];
        a.buffer[i] = img.buffer[i * 4 + 3];
    }
    Ok((r, g, b, a))
}

/// Interleave four equally-sized planes back into an RGBA buffer.
pub fn compose(
    r: &ChannelImage,
    g: &ChannelImage,
    b: &ChannelImage,
    a: &ChannelImage,
) -> Result<ChannelImage> {
    for (name, plane) in [("G", g), ("B", b), ("A", a)] {
        if plane.width != r.width || plane.height != r.height {
            return Err(Error::SizeMismatch(format!(
                "compose: {name} plane is {}x{}, R plane is {}x{}",
                plane.width, plane.height, r.width, r.height
            )));
        }
    }
    let pixels = r.width * r.height;
    let mut buffer = vec![0u8; pixels * 4];
    for i in 0..pixels {
        buffer[i * 4] = r.buffer[i];
        buffer[i * 4 + 1] = g.buffer[i];
        buffer[i * 4 + 2] = b.buffer[i];
        buffer[i * 4 + 3] = a.buffer[i];
    }
    Ok(ChannelImage {
        width: r.width,
        height: r.height,
        buffer,
    })
}
