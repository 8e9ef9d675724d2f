//! Conversion pipeline from normalized samples to device-ready bytes.
//!
//! Every buffer handed to a device goes through the same fixed stages, in
//! order:
//!
//! 1. Clamp all samples to `[-1.0, 1.0]`.
//! 2. Reconcile the buffer's channel count with the device's: replicate
//!    mono across all device channels, downmix to mono by arithmetic mean,
//!    truncate excess channels, cycle source channels when the device wants
//!    more than the buffer has.
//! 3. Interleave frame-major and encode to the device's numeric format.
//!
//! The pipeline is pure: it never mutates the caller's buffer and never
//! touches device state, so each stage is testable in isolation.

use bytemuck::NoUninit;
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::device::{DeviceConfig, SampleFormat};
use crate::repr::SampleBuffer;

/// Full-scale factor for 16-bit encoding.
///
/// Encoding is symmetric around zero: `-1.0` maps to `-32767`, not
/// `i16::MIN`, so positive and negative full scale carry the same
/// magnitude.
const I16_FULL_SCALE: f32 = 32767.0;

/// A numeric sample format the device layer can encode into raw bytes.
trait DeviceSample: NoUninit + Copy {
    /// Encode one clamped, normalized sample.
    fn from_normalized(value: f32) -> Self;
}

impl DeviceSample for i16 {
    fn from_normalized(value: f32) -> Self {
        (value * I16_FULL_SCALE).round() as i16
    }
}

impl DeviceSample for f32 {
    fn from_normalized(value: f32) -> Self {
        value
    }
}

/// Convert a sample buffer into the byte stream the configured device
/// consumes.
///
/// An empty buffer converts to an empty byte vector, which the device layer
/// treats as a legal no-op write.
pub fn convert_for_device(buffer: &SampleBuffer<'_>, config: &DeviceConfig) -> Vec<u8> {
    if buffer.is_empty() {
        return Vec::new();
    }

    let clamped = clamp_unit(buffer.channels_view());
    let reconciled = reconcile_channels(clamped, config.channel_count);

    match config.sample_format {
        SampleFormat::Int16 => encode_interleaved::<i16>(&reconciled),
        SampleFormat::Float32 => encode_interleaved::<f32>(&reconciled),
    }
}

fn clamp_unit(samples: ArrayView2<'_, f32>) -> Array2<f32> {
    samples.mapv(|sample| sample.clamp(-1.0, 1.0))
}

/// Map `have` buffer channels onto `want` device channels.
///
/// Downmixing to mono averages across channels. A buffer with no channel
/// rows reconciles to silence. Every other mismatch is resolved by indexing
/// source rows modulo `have`, which replicates mono buffers, truncates
/// extra channels, and cycles when the device wants more channels than the
/// buffer carries.
fn reconcile_channels(samples: Array2<f32>, device_channels: u16) -> Array2<f32> {
    let have = samples.nrows();
    let want = device_channels as usize;

    if have == 0 {
        return Array2::zeros((want, samples.ncols()));
    }

    if have == want {
        return samples;
    }

    if want == 1 {
        let mono = samples
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(samples.ncols()));
        return mono.insert_axis(Axis(0));
    }

    Array2::from_shape_fn((want, samples.ncols()), |(channel, frame)| {
        samples[[channel % have, frame]]
    })
}

/// Interleave channel-major samples frame by frame and encode to bytes.
fn encode_interleaved<T: DeviceSample>(samples: &Array2<f32>) -> Vec<u8> {
    let channels = samples.nrows();
    let frames = samples.ncols();

    let mut interleaved: Vec<T> = Vec::with_capacity(channels * frames);
    for frame in 0..frames {
        for channel in 0..channels {
            interleaved.push(T::from_normalized(samples[[channel, frame]]));
        }
    }

    Vec::from(bytemuck::cast_slice(&interleaved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use approx_eq::assert_approx_eq;
    use ndarray::array;

    // Byte slices carry no alignment guarantee, so decode through
    // fixed-size chunks instead of casting the slice in place.
    fn decode_f32(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|sample| f32::from_ne_bytes(sample.try_into().unwrap()))
            .collect()
    }

    fn decode_i16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|sample| i16::from_ne_bytes(sample.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_mono_replicated_across_stereo_frames() {
        let buffer = SampleBuffer::from_mono(array![0.5f32, -0.5]);
        let config = DeviceConfig::default().with_channel_count(2);

        let bytes = convert_for_device(&buffer, &config);
        assert_eq!(decode_f32(&bytes), vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn test_stereo_frame_downmixes_to_arithmetic_mean() {
        let buffer = SampleBuffer::from_channels(array![[0.2f32], [0.8f32]]).unwrap();
        let config = DeviceConfig::default().with_channel_count(1);

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded.len(), 1);
        assert_approx_eq!(decoded[0] as f64, 0.5, 1e-6);
    }

    #[test]
    fn test_out_of_range_samples_clamp_before_encoding() {
        let buffer = SampleBuffer::from_mono(array![-10.0f32, 10.0, 2.0, -1.5]);

        let float_config = DeviceConfig::default();
        for sample in decode_f32(&convert_for_device(&buffer, &float_config)) {
            assert!((-1.0..=1.0).contains(&sample));
        }

        let int_config = DeviceConfig::default().with_sample_format(SampleFormat::Int16);
        let decoded = decode_i16(&convert_for_device(&buffer, &int_config));
        assert_eq!(decoded, vec![-32767, 32767, 32767, -32767]);
    }

    #[test]
    fn test_int16_encoding_is_symmetric_and_rounded() {
        let buffer = SampleBuffer::from_mono(array![1.0f32, -1.0, 0.0, 0.5]);
        let config = DeviceConfig::default().with_sample_format(SampleFormat::Int16);

        let decoded = decode_i16(&convert_for_device(&buffer, &config));
        assert_eq!(decoded[0], 32767);
        assert_eq!(decoded[1], -32767);
        assert_eq!(decoded[2], 0);
        // 0.5 * 32767 = 16383.5 rounds away from zero.
        assert_eq!(decoded[3], 16384);
    }

    #[test]
    fn test_excess_channels_truncate_to_device_count() {
        let buffer =
            SampleBuffer::from_channels(array![[0.1f32, 0.4], [0.2f32, 0.5], [0.3f32, 0.6]])
                .unwrap();
        let config = DeviceConfig::default().with_channel_count(2);

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded, vec![0.1, 0.2, 0.4, 0.5]);
    }

    #[test]
    fn test_missing_channels_cycle_source_rows() {
        let buffer = SampleBuffer::from_channels(array![[0.1f32], [0.2f32]]).unwrap();
        let config = DeviceConfig::default().with_channel_count(4);

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded, vec![0.1, 0.2, 0.1, 0.2]);
    }

    #[test]
    fn test_interleaving_is_frame_major() {
        // Channel-major input: left = [0.1, 0.3], right = [0.2, 0.4].
        let buffer = SampleBuffer::from_channels(array![[0.1f32, 0.3], [0.2f32, 0.4]]).unwrap();
        let config = DeviceConfig::default().with_channel_count(2);

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_matching_mono_passes_through() {
        let buffer = SampleBuffer::from_mono(array![0.25f32, -0.75]);
        let config = DeviceConfig::default();

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded, vec![0.25, -0.75]);
    }

    #[test]
    fn test_empty_buffer_converts_to_empty_bytes() {
        let buffer = SampleBuffer::from_mono(Array1::zeros(0));
        let config = DeviceConfig::default().with_channel_count(2);

        assert!(convert_for_device(&buffer, &config).is_empty());
    }

    #[test]
    fn test_zero_channel_buffer_encodes_silence() {
        // `from_channels` rejects this shape, but the variant itself is
        // public, so the pipeline has to take it without panicking.
        let buffer = SampleBuffer::Multi(Array2::<f32>::zeros((0, 4)).into());
        let config = DeviceConfig::default().with_channel_count(2);

        let decoded = decode_f32(&convert_for_device(&buffer, &config));
        assert_eq!(decoded, vec![0.0; 8]);
    }

    #[test]
    fn test_byte_length_matches_frame_size() {
        let buffer = SampleBuffer::from_mono(array![0.1f32, 0.2, 0.3]);

        let stereo_i16 = DeviceConfig::default()
            .with_channel_count(2)
            .with_sample_format(SampleFormat::Int16);
        let bytes = convert_for_device(&buffer, &stereo_i16);
        // 3 frames x 2 channels x 2 bytes.
        assert_eq!(bytes.len(), 12);
    }
}
