//! Trained model catalogs.
//!
//! A model is an ordered stack of 3x3 convolution layers parsed from the
//! upstream waifu2x JSON format. At load time each layer's 4-D weight
//! tensor is flattened into a single vector laid out so the convolution
//! inner loop reads it linearly:
//! `weight_vec[(i * n_out + o) * 9 + r * 3 + c] = weight[o][i][r][c]`.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const KERNEL_SIZE: usize = 3;
/// Planes entering the first layer and leaving the last one (R, G, B).
pub const COLOR_PLANES: usize = 3;

/// One convolution layer, as serialized by the upstream trainer.
/// Unknown JSON keys are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Layer {
    #[serde(rename = "nInputPlane")]
    pub in_planes: usize,
    #[serde(rename = "nOutputPlane")]
    pub out_planes: usize,
    #[serde(rename = "kW")]
    pub kernel_w: usize,
    #[serde(rename = "kH")]
    pub kernel_h: usize,
    pub bias: Vec<f32>,
    /// Source form: `weight[out][in][row][col]`.
    pub weight: Vec<Vec<Vec<Vec<f32>>>>,
    /// Flattened form, filled in after parsing.
    #[serde(skip)]
    pub weight_vec: Vec<f32>,
}

impl Layer {
    fn validate(&self, index: usize) -> Result<()> {
        let fail = |reason: String| Err(Error::MalformedModel(format!("layer {index}: {reason}")));
        if self.kernel_w != KERNEL_SIZE || self.kernel_h != KERNEL_SIZE {
            return fail(format!(
                "kernel must be 3x3, got {}x{}",
                self.kernel_w, self.kernel_h
            ));
        }
        if self.bias.len() != self.out_planes {
            return fail(format!(
                "bias has {} entries for {} output planes",
                self.bias.len(),
                self.out_planes
            ));
        }
        if self.weight.len() != self.out_planes {
            return fail(format!(
                "weight has {} output slices for {} output planes",
                self.weight.len(),
                self.out_planes
            ));
        }
        for (o, per_input) in self.weight.iter().enumerate() {
            if per_input.len() != self.in_planes {
                return fail(format!(
                    "weight[{o}] has {} input slices for {} input planes",
                    per_input.len(),
                    self.in_planes
                ));
            }
            for (i, kernel) in per_input.iter().enumerate() {
                if kernel.len() != KERNEL_SIZE || kernel.iter().any(|row| row.len() != KERNEL_SIZE)
                {
                    return fail(format!("weight[{o}][{i}] is not a 3x3 kernel"));
                }
            }
        }
        Ok(())
    }

    /// Reorder `weight[out][in][row][col]` into the input-major flat
    /// layout used by the convolution kernel.
    pub fn flatten(&mut self) {
        let mut vec = vec![0.0f32; self.in_planes * self.out_planes * 9];
        for i in 0..self.in_planes {
            for o in 0..self.out_planes {
                let offset = (i * self.out_planes + o) * 9;
                let kernel = &self.weight[o][i];
                for (r, row) in kernel.iter().enumerate() {
                    vec[offset + r * 3..offset + r * 3 + 3].copy_from_slice(row);
                }
            }
        }
        self.weight_vec = vec;
    }
}

/// An ordered stack of layers. Immutable after loading.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Model {
    layers: Vec<Layer>,
}

impl Model {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut model: Model = serde_json::from_reader(reader)
            .map_err(|e| Error::MalformedModel(e.to_string()))?;
        model.finalize()?;
        Ok(model)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::from_reader(bytes)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            Error::MalformedModel(format!("cannot open {}: {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(file))
    }

    fn finalize(&mut self) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::MalformedModel("model has no layers".to_string()));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            layer.validate(index)?;
            if index > 0 && self.layers[index - 1].out_planes != layer.in_planes {
                return Err(Error::MalformedModel(format!(
                    "layer {index} expects {} input planes but layer {} produces {}",
                    layer.in_planes,
                    index - 1,
                    self.layers[index - 1].out_planes
                )));
            }
        }
        if self.layers[0].in_planes != COLOR_PLANES {
            return Err(Error::MalformedModel(format!(
                "first layer takes {} planes, expected {COLOR_PLANES}",
                self.layers[0].in_planes
            )));
        }
        if self.layers[self.layers.len() - 1].out_planes != COLOR_PLANES {
            return Err(Error::MalformedModel(format!(
                "last layer produces {} planes, expected {COLOR_PLANES}",
                self.layers[self.layers.len() - 1].out_planes
            )));
        }
        for layer in &mut self.layers {
            layer.flatten();
        }
        Ok(())
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layer count; equals the per-side padding the engine applies.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

/// Family of trained models to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Anime,
    Photo,
}

impl Mode {
    fn asset_dir(self) -> &'static str {
        match self {
            Mode::Anime => "anime_style_art_rgb",
            Mode::Photo => "photo",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Anime => write!(f, "anime"),
            Mode::Photo => write!(f, "photo"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "anime" => Ok(Mode::Anime),
            "photo" => Ok(Mode::Photo),
            other => Err(Error::InvalidArgument(format!(
                "invalid mode '{other}', choose from 'anime' and 'photo'"
            ))),
        }
    }
}

/// Model catalogs bundled into the binary. The folder mirrors the
/// upstream layout: `{anime_style_art_rgb|photo}/{scale2.0x_model.json,
/// noiseN_model.json}`.
#[derive(rust_embed::RustEmbed)]
#[folder = "models/"]
struct ModelAssets;

fn scale_model_key(mode: Mode) -> String {
    format!("{}/scale2.0x_model.json", mode.asset_dir())
}

fn noise_model_key(mode: Mode, level: u8) -> String {
    format!("{}/noise{level}_model.json", mode.asset_dir())
}

/// Load a bundled catalog by relative path.
pub fn load_asset(key: &str) -> Result<Model> {
    let file = ModelAssets::get(key)
        .ok_or_else(|| Error::MalformedModel(format!("bundled model not found: {key}")))?;
    debug!(key, bytes = file.data.len(), "loading bundled model");
    Model::from_slice(file.data.as_ref())
}

/// The scale model plus, for `noise_level > 0`, the matching noise model.
#[derive(Debug, Clone)]
pub struct ModelSet {
    pub scale: Model,
    pub noise: Option<Model>,
}

impl ModelSet {
    /// Load from the bundled assets.
    pub fn from_assets(mode: Mode, noise_level: u8) -> Result<Self> {
        Self::load_with(mode, noise_level, load_asset)
    }

    /// Load from a directory holding the upstream JSON catalogs in the
    /// same relative layout as the bundled assets.
    pub fn from_dir(dir: &Path, mode: Mode, noise_level: u8) -> Result<Self> {
        Self::load_with(mode, noise_level, |key| Model::from_file(&dir.join(key)))
    }

    fn load_with(
        mode: Mode,
        noise_level: u8,
        load: impl Fn(&str) -> Result<Model>,
    ) -> Result<Self> {
        if noise_level > 3 {
            return Err(Error::InvalidArgument(format!(
                "invalid noise level: 0..=3 but {noise_level}"
            )));
        }
        let noise = if noise_level > 0 {
            Some(load(&noise_model_key(mode, noise_level))?)
        } else {
            None
        };
        let scale = load(&scale_model_key(mode))?;
        Ok(Self { scale, noise })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// A 3->3 layer whose kernels pass the matching input plane through.
    pub(crate) fn identity_layer_json() -> serde_json::Value {
        let weight: Vec<Vec<Vec<Vec<f64>>>> = (0..3)
            .map(|o| {
                (0..3)
                    .map(|i| {
                        let mut kernel = vec![vec![0.0; 3]; 3];
                        if i == o {
                            kernel[1][1] = 1.0;
                        }
                        kernel
                    })
                    .collect()
            })
            .collect();
        json!({
            "nInputPlane": 3,
            "nOutputPlane": 3,
            "kW": 3,
            "kH": 3,
            "bias": [0.0, 0.0, 0.0],
            "weight": weight,
        })
    }

    /// A model of `depth` stacked identity layers; values pass through
    /// unchanged while the geometry shrinks as in a real catalog.
    pub(crate) fn identity_model(depth: usize) -> Model {
        let layers: Vec<_> = (0..depth).map(|_| identity_layer_json()).collect();
        let text = serde_json::to_string(&layers).unwrap();
        Model::from_slice(text.as_bytes()).unwrap()
    }

    #[test]
    fn parses_and_flattens_a_minimal_model() {
        let text = serde_json::to_string(&json!([identity_layer_json()])).unwrap();
        let model = Model::from_slice(text.as_bytes()).unwrap();
        assert_eq!(model.depth(), 1);
        let layer = &model.layers()[0];
        assert_eq!(layer.weight_vec.len(), 3 * 3 * 9);
        // input-major layout: block (i, o) at (i * 3 + o) * 9, center tap at +4
        for i in 0..3 {
            for o in 0..3 {
                let center = layer.weight_vec[(i * 3 + o) * 9 + 4];
                assert_eq!(center, if i == o { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn flatten_indexing_recovers_source_weights() {
        let (n_in, n_out) = (2, 3);
        let weight: Vec<Vec<Vec<Vec<f32>>>> = (0..n_out)
            .map(|o| {
                (0..n_in)
                    .map(|i| {
                        (0..3)
                            .map(|r| (0..3).map(|c| (100 * o + 10 * i + 3 * r + c) as f32).collect())
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let mut layer = Layer {
            in_planes: n_in,
            out_planes: n_out,
            kernel_w: 3,
            kernel_h: 3,
            bias: vec![0.0; n_out],
            weight,
            weight_vec: Vec::new(),
        };
        layer.flatten();
        assert_eq!(layer.weight_vec.len(), n_in * n_out * 9);
        // weight[2][1][1][2] = 215 lands at ((1 * 3 + 2) * 9 + 1 * 3 + 2)
        assert_eq!(layer.weight_vec[(1 * 3 + 2) * 9 + 1 * 3 + 2], 215.0);
        for o in 0..n_out {
            for i in 0..n_in {
                for r in 0..3 {
                    for c in 0..3 {
                        assert_eq!(
                            layer.weight_vec[(i * n_out + o) * 9 + r * 3 + c],
                            layer.weight[o][i][r][c]
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn rejects_non_3x3_kernels() {
        let mut layer = identity_layer_json();
        layer["kW"] = json!(5);
        let text = serde_json::to_string(&json!([layer])).unwrap();
        let err = Model::from_slice(text.as_bytes()).unwrap_err();
        assert!(matches!(err, Error::MalformedModel(_)));
    }

    #[test]
    fn rejects_bias_length_mismatch() {
        let mut layer = identity_layer_json();
        layer["bias"] = json!([0.0, 0.0]);
        let text = serde_json::to_string(&json!([layer])).unwrap();
        assert!(Model::from_slice(text.as_bytes()).is_err());
    }

    #[test]
    fn rejects_missing_fields() {
        let err = Model::from_slice(br#"[{"nInputPlane": 3}]"#).unwrap_err();
        assert!(matches!(err, Error::MalformedModel(_)));
    }

    #[test]
    fn rejects_broken_layer_chain() {
        let layers = json!([identity_layer_json(), {
            "nInputPlane": 4,
            "nOutputPlane": 3,
            "kW": 3,
            "kH": 3,
            "bias": [0.0, 0.0, 0.0],
            "weight": (0..3).map(|_| {
                (0..4).map(|_| vec![vec![0.0; 3]; 3]).collect::<Vec<_>>()
            }).collect::<Vec<_>>(),
        }]);
        let text = serde_json::to_string(&layers).unwrap();
        let err = Model::from_slice(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("layer 1"));
    }

    #[test]
    fn rejects_empty_model() {
        assert!(Model::from_slice(b"[]").is_err());
    }

    #[test]
    fn ignores_unknown_keys() {
        let mut layer = identity_layer_json();
        layer["dW"] = json!(1);
        layer["padW"] = json!(0);
        let text = serde_json::to_string(&json!([layer])).unwrap();
        assert!(Model::from_slice(text.as_bytes()).is_ok());
    }

    #[test]
    fn mode_parsing_and_display() {
        assert_eq!("anime".parse::<Mode>().unwrap(), Mode::Anime);
        assert_eq!("photo".parse::<Mode>().unwrap(), Mode::Photo);
        assert!("manga".parse::<Mode>().is_err());
        assert_eq!(Mode::Anime.to_string(), "anime");
        assert_eq!(Mode::Photo.to_string(), "photo");
    }

    #[test]
    fn asset_keys_follow_upstream_layout() {
        assert_eq!(
            scale_model_key(Mode::Anime),
            "anime_style_art_rgb/scale2.0x_model.json"
        );
        assert_eq!(noise_model_key(Mode::Photo, 2), "photo/noise2_model.json");
    }

    #[test]
    fn missing_asset_reports_the_key() {
        let err = load_asset("no_such_dir/no_such_model.json").unwrap_err();
        assert!(err.to_string().contains("no_such_dir/no_such_model.json"));
    }

    #[test]
    fn model_set_rejects_out_of_range_noise_level() {
        let err = ModelSet::from_assets(Mode::Anime, 4).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn model_set_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let anime = dir.path().join("anime_style_art_rgb");
        std::fs::create_dir_all(&anime).unwrap();
        let model_text = serde_json::to_string(&json!([identity_layer_json()])).unwrap();
        std::fs::write(anime.join("scale2.0x_model.json"), &model_text).unwrap();
        std::fs::write(anime.join("noise1_model.json"), &model_text).unwrap();

        let set = ModelSet::from_dir(dir.path(), Mode::Anime, 0).unwrap();
        assert!(set.noise.is_none());
        assert_eq!(set.scale.depth(), 1);

        let set = ModelSet::from_dir(dir.path(), Mode::Anime, 1).unwrap();
        assert!(set.noise.is_some());
    }

    #[test]
    fn model_set_from_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModelSet::from_dir(dir.path(), Mode::Photo, 0).unwrap_err();
        assert!(matches!(err, Error::MalformedModel(_)));
    }
}
