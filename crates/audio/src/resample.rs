//! Linear-interpolation resampling
//!
//! Capture devices rarely run at the 16 kHz wire rate. Voice content
//! downsampled for a speech agent does not justify a sinc resampler, so
//! each callback buffer is resampled with linear interpolation.

/// Resample `input` from `from_rate` to `to_rate` by linear interpolation.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let output_len = (input.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(input.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        let sample = input[idx_floor] * (1.0 - frac) + input[idx_ceil] * frac;
        output.push(sample);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_rates_match() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&input, 16000, 16000), input);
    }

    #[test]
    fn test_downsample_48k_to_16k() {
        let input: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin()).collect();
        let output = resample_linear(&input, 48000, 16000);
        assert_eq!(output.len(), 160);
    }

    #[test]
    fn test_upsample_preserves_bounds() {
        let input = vec![0.0, 1.0];
        let output = resample_linear(&input, 8000, 16000);
        assert_eq!(output.len(), 4);
        assert!(output.iter().all(|s| (0.0..=1.0).contains(s)));
    }
}
