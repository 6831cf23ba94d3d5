//! Command-line frontend: argument parsing, image container
//! decoding/encoding and logging bootstrap around the inference engine.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser};
use image::codecs::gif::{GifDecoder, GifEncoder, Repeat};
use image::{AnimationDecoder, DynamicImage, Frame, ImageFormat, RgbaImage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use waifu2x_core::config::{self, AppConfig};
use waifu2x_core::logging::{select_log_filter, LoggingOptions, DEFAULT_LOG_FILTER};
use waifu2x_core::{ChannelImage, Mode, ModelSet, Waifu2x};

#[derive(Parser)]
#[command(
    name = "waifu2x",
    about = "Image upscaling and denoising with the waifu2x CNN family",
    version
)]
struct Cli {
    #[arg(short = 'i', long, help = "Input image (default stdin)")]
    input: Option<PathBuf>,

    #[arg(short = 'o', long, help = "Output image (default stdout)")]
    output: Option<PathBuf>,

    #[arg(short = 's', long, default_value_t = 2.0, help = "Scale multiplier >= 1.0")]
    scale: f64,

    #[arg(short = 'n', long, default_value_t = 0, help = "Noise reduction level 0..=3")]
    noise: u8,

    #[arg(
        short = 'j',
        long,
        help = "Max parallel tile workers (default: host CPU count)"
    )]
    jobs: Option<usize>,

    #[arg(
        short = 'm',
        long,
        default_value = "anime",
        help = "Model family, choose from 'anime' and 'photo'"
    )]
    mode: String,

    #[arg(
        short = 'v',
        long,
        action = ArgAction::Count,
        help = "Increase verbosity (-v: debug + tile progress, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long,
        value_name = "FILTER",
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, help = "Models directory (overrides config)")]
    models_dir: Option<PathBuf>,

    #[arg(long, help = "Data directory holding config.toml")]
    data_dir: Option<PathBuf>,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_filter.as_deref());
    validate(&cli)?;
    run(cli).await
}

fn validate(cli: &Cli) -> Result<()> {
    if !(cli.scale >= 1.0) {
        bail!("invalid scale {}, must be >= 1.0", cli.scale);
    }
    if cli.noise > 3 {
        bail!("invalid noise reduction level {}, must be 0..=3", cli.noise);
    }
    if cli.jobs == Some(0) {
        bail!("invalid number of jobs 0, must be >= 1");
    }
    Ok(())
}

fn init_logging(verbose: u8, cli_log_filter: Option<&str>) {
    let filter = select_log_filter(&LoggingOptions {
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
    });
    let env_filter = tracing_subscriber::EnvFilter::try_new(&filter).unwrap_or_else(|error| {
        eprintln!("Invalid log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'.");
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    });
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        eprintln!("Failed to initialize tracing subscriber. Continuing without structured tracing.");
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mode: Mode = cli.mode.parse()?;

    let data_dir = config::data_dir(cli.data_dir.as_deref());
    let config_path = config::config_path(&data_dir);
    let app_config = AppConfig::load_from_path(&config_path)?;
    debug!(config = %config_path.display(), "configuration loaded");

    let model_set = load_model_set(&cli, &data_dir, &app_config, mode)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut engine = Waifu2x::from_model_set(model_set)
        .with_verbose(cli.verbose > 0)
        .with_cancellation_token(cancel);
    let parallel = cli
        .jobs
        .or((app_config.engine.parallel > 0).then_some(app_config.engine.parallel));
    if let Some(parallel) = parallel {
        engine = engine.with_parallel(parallel)?;
    }

    let bytes = read_input(cli.input.as_deref())?;
    let format = image::guess_format(&bytes).context("unrecognized input image format")?;

    let encoded = if format == ImageFormat::Gif {
        scale_up_gif(&engine, &bytes, cli.scale).await?
    } else {
        scale_up_image(&engine, &bytes, cli.scale).await?
    };

    write_output(cli.output.as_deref(), &encoded)
}

/// Resolve the model catalogs: an explicit `--models-dir` wins;
/// otherwise the bundled assets are tried first with the configured
/// directory as fallback.
fn load_model_set(
    cli: &Cli,
    data_dir: &Path,
    app_config: &AppConfig,
    mode: Mode,
) -> Result<ModelSet> {
    if let Some(dir) = &cli.models_dir {
        return ModelSet::from_dir(dir, mode, cli.noise)
            .with_context(|| format!("failed to load models from {}", dir.display()));
    }
    match ModelSet::from_assets(mode, cli.noise) {
        Ok(set) => Ok(set),
        Err(waifu2x_core::Error::InvalidArgument(reason)) => bail!(reason),
        Err(_) => {
            let dir = config::resolve_relative_to(data_dir, &app_config.paths.models_dir);
            debug!(dir = %dir.display(), "bundled models unavailable, trying models directory");
            ModelSet::from_dir(&dir, mode, cli.noise).with_context(|| {
                format!(
                    "no bundled model catalogs and none found in {} (see --models-dir)",
                    dir.display()
                )
            })
        }
    }
}

fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read input file {}", path.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read image from stdin")?;
            Ok(buf)
        }
    }
}

fn write_output(path: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, bytes)
            .with_context(|| format!("failed to write output file {}", path.display())),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(bytes)
                .context("failed to write image to stdout")?;
            stdout.flush().context("failed to flush stdout")
        }
    }
}

/// Decode a still image, scale it, re-encode as PNG.
async fn scale_up_image(engine: &Waifu2x, bytes: &[u8], scale: f64) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("failed to decode input image")?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    info!(width, height, scale, "scaling image");

    let channel = ChannelImage::from_rgba(rgba.into_raw(), width as usize, height as usize)?;
    let out = engine.scale_up(channel, scale).await?;

    let out_buffer = RgbaImage::from_raw(out.width as u32, out.height as u32, out.buffer)
        .context("engine returned a malformed buffer")?;
    let mut encoded = Vec::new();
    DynamicImage::ImageRgba8(out_buffer)
        .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)
        .context("failed to encode PNG output")?;
    Ok(encoded)
}

/// Scale an animated GIF frame by frame. Frame offsets scale with the
/// image; palette quantization is left to the encoder.
async fn scale_up_gif(engine: &Waifu2x, bytes: &[u8], scale: f64) -> Result<Vec<u8>> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).context("failed to decode GIF")?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .context("failed to decode GIF frames")?;
    info!(frames = frames.len(), scale, "scaling animated GIF");

    let mut scaled = Vec::with_capacity(frames.len());
    for frame in frames {
        let delay = frame.delay();
        let left = (frame.left() as f64 * scale).round() as u32;
        let top = (frame.top() as f64 * scale).round() as u32;
        let buffer = frame.into_buffer();
        let (width, height) = buffer.dimensions();

        let channel =
            ChannelImage::from_rgba(buffer.into_raw(), width as usize, height as usize)?;
        let out = engine.scale_up(channel, scale).await?;

        let out_buffer = RgbaImage::from_raw(out.width as u32, out.height as u32, out.buffer)
            .context("engine returned a malformed frame buffer")?;
        scaled.push(Frame::from_parts(out_buffer, left, top, delay));
    }

    let mut encoded = Vec::new();
    {
        let mut encoder = GifEncoder::new(Cursor::new(&mut encoded));
        encoder
            .set_repeat(Repeat::Infinite)
            .context("failed to configure GIF encoder")?;
        encoder
            .encode_frames(scaled)
            .context("failed to encode GIF output")?;
    }
    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("waifu2x").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_match_the_contract() {
        let cli = parse(&[]);
        assert!(cli.input.is_none());
        assert!(cli.output.is_none());
        assert_eq!(cli.scale, 2.0);
        assert_eq!(cli.noise, 0);
        assert!(cli.jobs.is_none());
        assert_eq!(cli.mode, "anime");
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn short_flags_parse() {
        let cli = parse(&[
            "-i", "in.png", "-o", "out.png", "-s", "3.5", "-n", "2", "-j", "4", "-m", "photo",
            "-vv",
        ]);
        assert_eq!(cli.input.as_deref(), Some(Path::new("in.png")));
        assert_eq!(cli.output.as_deref(), Some(Path::new("out.png")));
        assert_eq!(cli.scale, 3.5);
        assert_eq!(cli.noise, 2);
        assert_eq!(cli.jobs, Some(4));
        assert_eq!(cli.mode, "photo");
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(validate(&parse(&["-s", "0.5"])).is_err());
        assert!(validate(&parse(&["-n", "4"])).is_err());
        assert!(validate(&parse(&["-j", "0"])).is_err());
        assert!(validate(&parse(&[])).is_ok());
        assert!(validate(&parse(&["-s", "1.0"])).is_ok());
    }

    #[test]
    fn bad_mode_is_rejected_at_run_time() {
        let err = "manga".parse::<Mode>().unwrap_err();
        assert!(err.to_string().contains("manga"));
    }

    #[tokio::test]
    async fn still_image_round_trip_through_engine() {
        // no models: scaling degrades to nearest-neighbor, which is
        // enough to exercise decode -> engine -> encode end to end
        let engine = Waifu2x::from_models(None, None);
        let mut png = Vec::new();
        let img = RgbaImage::from_fn(8, 6, |x, y| {
            image::Rgba([(x * 30) as u8, (y * 40) as u8, 100, 255])
        });
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        let encoded = scale_up_image(&engine, &png, 2.0).await.unwrap();
        let out = image::load_from_memory(&encoded).unwrap();
        assert_eq!((out.width(), out.height()), (16, 12));
    }

    #[tokio::test]
    async fn gif_frames_are_scaled_individually() {
        let engine = Waifu2x::from_models(None, None);
        let mut gif = Vec::new();
        {
            let mut encoder = GifEncoder::new(Cursor::new(&mut gif));
            for shade in [0u8, 128] {
                let img = RgbaImage::from_pixel(4, 4, image::Rgba([shade, shade, shade, 255]));
                encoder
                    .encode_frame(Frame::new(img))
                    .expect("encode test frame");
            }
        }

        let encoded = scale_up_gif(&engine, &gif, 2.0).await.unwrap();
        let decoder = GifDecoder::new(Cursor::new(encoded.as_slice())).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 2);
        for frame in &frames {
            assert_eq!(frame.buffer().dimensions(), (8, 8));
        }
    }
}
