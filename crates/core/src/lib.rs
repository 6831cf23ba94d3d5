//! CPU inference engine for the waifu2x family of image upscaling and
//! denoising CNNs.
//!
//! The entry point is [`Waifu2x`]: feed it an interleaved RGBA
//! [`ChannelImage`] and a scale factor, get the scaled (and optionally
//! denoised) image back. Image container decoding/encoding lives in the
//! CLI crate; this crate works on raw pixel buffers only.

pub mod channel_image;
pub mod config;
pub mod conv;
pub mod engine;
pub mod error;
pub mod image_plane;
pub mod logging;
pub mod model;
pub mod tiler;

pub use channel_image::ChannelImage;
pub use engine::Waifu2x;
pub use error::{Error, Result};
pub use model::{Mode, Model, ModelSet};
