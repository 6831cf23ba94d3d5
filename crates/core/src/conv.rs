//! 3x3 convolution with leaky-ReLU activation.
//!
//! Weights arrive pre-flattened (see [`crate::model`]) so that the inner
//! loop over output planes sweeps `n_out * 9` contiguous floats per
//! input plane per pixel.

use crate::image_plane::ImagePlane;

const LEAKY_SLOPE: f32 = 0.1;

#[inline]
fn leaky_relu(v: f32) -> f32 {
    if v < 0.0 {
        v * LEAKY_SLOPE
    } else {
        v
    }
}

/// Convolve a stack of input planes into `bias.len()` output planes,
/// each two pixels smaller per dimension. `weights` must hold
/// `inputs.len() * bias.len() * 9` floats in the flattened layout.
pub fn convolve(inputs: &[ImagePlane], weights: &[f32], bias: &[f32]) -> Vec<ImagePlane> {
    let n_out = bias.len();
    if inputs.is_empty() {
        return Vec::new();
    }
    let width = inputs[0].width;
    let height = inputs[0].height;
    debug_assert_eq!(weights.len(), inputs.len() * n_out * 9);

    let mut outputs: Vec<ImagePlane> = (0..n_out)
        .map(|_| ImagePlane::new(width - 2, height - 2))
        .collect();
    let mut sums = vec![0.0f32; n_out];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            sums.copy_from_slice(bias);
            let mut wi = 0;
            for plane in inputs {
                let [a0, a1, a2, b0, b1, b2, c0, c1, c2] = plane.segment_at(x, y);
                for sum in sums.iter_mut() {
                    let w = &weights[wi..wi + 9];
                    *sum += w[0] * a0
                        + w[1] * a1
                        + w[2] * a2
                        + w[3] * b0
                        + w[4] * b1
                        + w[5] * b2
                        + w[6] * c0
                        + w[7] * c1
                        + w[8] * c2;
                    wi += 9;
                }
            }
            for (o, &sum) in sums.iter().enumerate() {
                outputs[o].set(x - 1, y - 1, leaky_relu(sum));
            }
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane_from(values: &[f32], width: usize, height: usize) -> ImagePlane {
        let mut plane = ImagePlane::new(width, height);
        plane.buffer.copy_from_slice(values);
        plane
    }

    /// Kernel that passes the center pixel through.
    fn center_kernel() -> Vec<f32> {
        let mut k = vec![0.0; 9];
        k[4] = 1.0;
        k
    }

    #[test]
    fn leaky_relu_slopes() {
        assert_eq!(leaky_relu(1.0), 1.0);
        assert_eq!(leaky_relu(0.0), 0.0);
        assert!((leaky_relu(-1.0) + 0.1).abs() < 1e-7);
    }

    #[test]
    fn center_kernel_passes_input_through() {
        let input = plane_from(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9], 3, 3);
        let out = convolve(&[input], &center_kernel(), &[0.0]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].width, 1);
        assert_eq!(out[0].height, 1);
        assert!((out[0].value(0, 0) - 0.5).abs() < 1e-7);
    }

    #[test]
    fn output_shrinks_by_two_per_layer() {
        let input = ImagePlane::new(10, 8);
        let out = convolve(&[input], &center_kernel(), &[0.0]);
        assert_eq!((out[0].width, out[0].height), (8, 6));
        let out2 = convolve(&out, &center_kernel(), &[0.0]);
        assert_eq!((out2[0].width, out2[0].height), (6, 4));
    }

    #[test]
    fn bias_is_added_once_and_negative_sums_are_scaled() {
        let input = ImagePlane::new(3, 3);
        // zero weights, bias -1.0: the sum is -1.0, activation scales it by 0.1
        let out = convolve(&[input], &vec![0.0; 9], &[-1.0]);
        assert!((out[0].value(0, 0) + 0.1).abs() < 1e-7);
    }

    #[test]
    fn two_inputs_accumulate_into_each_output() {
        let a = plane_from(&[1.0; 9], 3, 3);
        let b = plane_from(&[2.0; 9], 3, 3);
        // both input planes feed output 0 with a center tap
        let mut weights = vec![0.0; 2 * 9];
        weights[4] = 1.0; // input 0 -> output 0
        weights[13] = 1.0; // input 1 -> output 0
        let out = convolve(&[a, b], &weights, &[0.5]);
        assert!((out[0].value(0, 0) - 3.5).abs() < 1e-6);
    }

    #[test]
    fn weight_layout_is_input_major() {
        let a = plane_from(&[1.0; 9], 3, 3);
        let b = plane_from(&[1.0; 9], 3, 3);
        // two inputs, two outputs: block order is (i0,o0) (i0,o1) (i1,o0) (i1,o1)
        let mut weights = vec![0.0; 2 * 2 * 9];
        weights[(0 * 2 + 1) * 9 + 4] = 1.0; // input 0 -> output 1
        weights[(1 * 2 + 0) * 9 + 4] = 1.0; // input 1 -> output 0
        let out = convolve(&[a, b], &weights, &[0.0, 0.0]);
        assert!((out[0].value(0, 0) - 1.0).abs() < 1e-6);
        assert!((out[1].value(0, 0) - 1.0).abs() < 1e-6);
    }
}
