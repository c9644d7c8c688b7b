use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use voice_proxy_core::audio::{pcm16_from_bytes, pcm16_to_bytes};

/// Rate the upstream endpoint expects and produces. Playback audio is sent
/// to the client at this rate.
pub const UPSTREAM_SAMPLE_RATE: f64 = voice_proxy_core::UPSTREAM_PCM16_SAMPLE_RATE as f64;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Converts a slice of f32 samples to a vector of i16 samples.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// Converts a slice of i16 samples to a vector of f32 samples.
pub fn convert_i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Brings client microphone audio to the upstream rate.
///
/// The resampler consumes fixed-size frames, so samples that do not fill a
/// whole frame are carried over to the next call.
pub struct ClientAudioResampler {
    resampler: FastFixedIn<f32>,
    pending: Vec<f32>,
}

impl ClientAudioResampler {
    /// `client_rate` in Hz. Frames are 10 ms of client audio.
    pub fn new(client_rate: u32) -> anyhow::Result<Self> {
        let chunk_size = (client_rate as usize / 100).max(1);
        Ok(Self {
            resampler: create_resampler(client_rate as f64, UPSTREAM_SAMPLE_RATE, chunk_size)?,
            pending: Vec::new(),
        })
    }

    /// Resamples little-endian PCM16 bytes, returning PCM16 bytes at the
    /// upstream rate. May return nothing while a frame is still filling.
    pub fn process(&mut self, pcm: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.pending.extend(convert_i16_to_f32(&pcm16_from_bytes(pcm)));

        let mut resampled = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let frame: Vec<f32> = self.pending.drain(..needed).collect();
            let output = self.resampler.process(&[frame], None)?;
            resampled.extend_from_slice(&output[0]);
        }
        Ok(pcm16_to_bytes(&convert_f32_to_i16(&resampled)))
    }

    /// Samples waiting for a complete frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(16000.0, 24000.0, 160).is_ok());
        assert!(create_resampler(48000.0, 24000.0, 480).is_ok());
    }

    #[test]
    fn test_convert_f32_to_i16() {
        let input = vec![1.0f32, -1.0f32, 0.0f32, 0.5f32];
        let result = convert_f32_to_i16(&input);

        assert_eq!(result[0], i16::MAX);
        // -1.0 * 32767 = -32767, not i16::MIN (-32768)
        assert_eq!(result[1], -32767);
        assert_eq!(result[2], 0);
        assert_eq!(result[3], (0.5 * i16::MAX as f32) as i16);

        let result = convert_f32_to_i16(&[2.0, -2.0]);
        assert_eq!(result, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_convert_i16_to_f32() {
        let result = convert_i16_to_f32(&[i16::MIN, 0, 16384]);
        assert_abs_diff_eq!(result[0], -1.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[1], 0.0, epsilon = 0.0001);
        assert_abs_diff_eq!(result[2], 0.5, epsilon = 0.0001);
    }

    #[test]
    fn test_client_resampler_upsamples_to_upstream_rate() {
        let mut resampler = ClientAudioResampler::new(16_000).unwrap();
        // One second of a 440 Hz tone at 16 kHz.
        let tone: Vec<i16> = (0..16_000)
            .map(|i| ((i as f32 * 440.0 * std::f32::consts::TAU / 16_000.0).sin() * 8000.0) as i16)
            .collect();

        let output = resampler.process(&pcm16_to_bytes(&tone)).unwrap();
        let samples = output.len() / 2;
        assert!(
            (23_000..=24_500).contains(&samples),
            "expected about 24000 samples, got {samples}"
        );
        assert_eq!(resampler.buffered(), 0);
    }

    #[test]
    fn test_client_resampler_carries_partial_frames() {
        let mut resampler = ClientAudioResampler::new(48_000).unwrap();

        let output = resampler.process(&pcm16_to_bytes(&[100i16; 300])).unwrap();
        assert!(output.is_empty());
        assert_eq!(resampler.buffered(), 300);

        let output = resampler.process(&pcm16_to_bytes(&[100i16; 300])).unwrap();
        assert!(!output.is_empty());
        assert_eq!(resampler.buffered(), 120);
    }
}
