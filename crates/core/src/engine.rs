//! Pipeline orchestration: decompose, denoise, scale, recompose.
//!
//! A pass over one channel image is: nearest-neighbor pre-resize,
//! clamp-pad by the model depth, normalize, split into overlapping
//! tiles, run the layer stack on every tile in parallel, reassemble and
//! denormalize. The noise model (when present) runs first at scale 1,
//! then the scale model. The 2x scale model is iterated for larger
//! factors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel_image::{self, ChannelImage};
use crate::conv;
use crate::error::{Error, Result};
use crate::image_plane::ImagePlane;
use crate::model::{Mode, Model, ModelSet};
use crate::tiler;

#[derive(Debug)]
pub struct Waifu2x {
    scale_model: Option<Arc<Model>>,
    noise_model: Option<Arc<Model>>,
    parallel: usize,
    verbose: bool,
    cancel: CancellationToken,
}

impl Waifu2x {
    /// Engine over the bundled model catalogs.
    pub fn new(mode: Mode, noise_level: u8) -> Result<Self> {
        Ok(Self::from_model_set(ModelSet::from_assets(
            mode,
            noise_level,
        )?))
    }

    pub fn from_model_set(set: ModelSet) -> Self {
        Self::from_models(Some(set.scale), set.noise)
    }

    /// Engine over explicit models; either may be absent. Without a
    /// scale model, scaling degrades to nearest-neighbor resizing.
    pub fn from_models(scale: Option<Model>, noise: Option<Model>) -> Self {
        Self {
            scale_model: scale.map(Arc::new),
            noise_model: noise.map(Arc::new),
            parallel: default_parallelism(),
            verbose: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Limit of in-flight tile workers.
    pub fn with_parallel(mut self, parallel: usize) -> Result<Self> {
        if parallel < 1 {
            return Err(Error::InvalidArgument(format!(
                "parallel must be >= 1, got {parallel}"
            )));
        }
        self.parallel = parallel;
        Ok(self)
    }

    /// Emit a per-tile progress line on stderr.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Token observed between tiles; cancelling it aborts the run with
    /// [`Error::Cancelled`] and discards partial output.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scale an interleaved RGBA image by `scale >= 1.0`, denoising
    /// first when a noise model is loaded. The 2x model is applied
    /// repeatedly while the remaining factor is >= 2, then once more at
    /// the residual factor.
    pub async fn scale_up(&self, image: ChannelImage, scale: f64) -> Result<ChannelImage> {
        if !(scale >= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "scale must be >= 1.0, got {scale}"
            )));
        }
        let mut image = image;
        let mut remaining = scale;
        let mut converted = false;
        while remaining >= 2.0 {
            image = self.convert_channel_image(image, 2.0).await?;
            remaining /= 2.0;
            converted = true;
        }
        if remaining > 1.0 {
            image = self.convert_channel_image(image, remaining).await?;
        } else if !converted {
            // scale == 1.0: a noise-only pass, or nothing at all
            image = self.convert_channel_image(image, 1.0).await?;
        }
        Ok(image)
    }

    async fn convert_channel_image(
        &self,
        image: ChannelImage,
        scale: f64,
    ) -> Result<ChannelImage> {
        if scale == 1.0 && self.noise_model.is_none() {
            return Ok(image);
        }

        debug!(scale, parallel = self.parallel, "converting channel image");
        let (r, g, b, a) = channel_image::decompose(&image)?;
        let (mut r, mut g, mut b) = (r, g, b);

        if let Some(noise) = &self.noise_model {
            debug!("de-noising");
            (r, g, b) = self.convert_rgb(r, g, b, noise.clone(), 1.0).await?;
        }

        if scale > 1.0 {
            match &self.scale_model {
                Some(model) => {
                    debug!("scaling");
                    (r, g, b) = self.convert_rgb(r, g, b, model.clone(), scale).await?;
                }
                None => {
                    r = r.resize(scale);
                    g = g.resize(scale);
                    b = b.resize(scale);
                }
            }
        }

        let a = a.resize(scale);
        if a.buffer.len() != r.buffer.len() {
            return Err(Error::SizeMismatch(format!(
                "alpha plane has {} samples, color planes have {}",
                a.buffer.len(),
                r.buffer.len()
            )));
        }

        channel_image::compose(&r, &g, &b, &a)
    }

    /// Run one model over three color channels: pre-resize, pad by the
    /// model depth, normalize, tile, convolve, reassemble, denormalize.
    async fn convert_rgb(
        &self,
        r: ChannelImage,
        g: ChannelImage,
        b: ChannelImage,
        model: Arc<Model>,
        scale: f64,
    ) -> Result<(ChannelImage, ChannelImage, ChannelImage)> {
        let pad = model.depth();
        let prepare = |channel: ChannelImage| -> Result<ImagePlane> {
            ImagePlane::from_channel(&channel.resize(scale).extrapolate(pad))
        };
        let planes = [prepare(r)?, prepare(g)?, prepare(b)?];

        let (tiles, grid) = tiler::split(&planes);
        drop(planes);
        let total = tiles.len();
        debug!(
            tiles = total,
            cols = grid.cols,
            rows = grid.rows,
            depth = pad,
            "running tiled inference"
        );

        let progress = Arc::new(ProgressMeter::new(total, self.verbose));
        progress.start();

        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut slots: Vec<Option<Vec<ImagePlane>>> = tiles.into_iter().map(Some).collect();
        let mut handles = Vec::with_capacity(total);
        for slot in &mut slots {
            // admission is gated by the semaphore; the tile input leaves
            // its slot only once a worker may start
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.expect("semaphore never closed")
                }
            };
            let tile = slot.take().expect("tile input consumed once");
            let model = Arc::clone(&model);
            let progress = Arc::clone(&progress);
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let mut planes = tile;
                for layer in model.layers() {
                    planes = conv::convolve(&planes, &layer.weight_vec, &layer.bias);
                }
                progress.tick();
                planes
            }));
        }

        let mut outputs = Vec::with_capacity(total);
        for handle in handles {
            outputs.push(handle.await.expect("tile worker panicked"));
        }
        progress.finish();

        let [pr, pg, pb] = tiler::merge(&outputs, grid)?;
        Ok((pr.to_channel(), pg.to_channel(), pb.to_channel()))
    }
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Tile completion counter, rewritten in place on stderr when enabled.
struct ProgressMeter {
    total: usize,
    width: usize,
    done: AtomicUsize,
    enabled: bool,
}

impl ProgressMeter {
    fn new(total: usize, enabled: bool) -> Self {
        Self {
            total,
            width: total.to_string().len() + 1,
            done: AtomicUsize::new(0),
            enabled,
        }
    }

    fn start(&self) {
        if self.enabled {
            eprint!(
                "{:>w$}/{:>w$} (0.0%)",
                0,
                self.total,
                w = self.width
            );
        }
    }

    fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.enabled {
            let percent = done as f64 / self.total as f64 * 100.0;
            eprint!(
                "\x1b[2K\r{:>w$}/{:>w$} ({percent:.1}%)",
                done,
                self.total,
                w = self.width
            );
        }
    }

    fn finish(&self) {
        if self.enabled {
            eprintln!();
        }
    }
}
