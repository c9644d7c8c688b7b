//! Audio collaborators and PCM16 helpers.
//!
//! The session consumes denoising/echo cancellation and voice activity
//! detection as capabilities. Hosts plug their own implementations in; the
//! simple ones here cover hosts that have none.

use base64::Engine;
use std::time::Duration;

/// Classification of one audio window by a voice activity detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    /// Speech began in this window.
    SpeechStart,
    /// Speech continues.
    Speaking,
    /// Speech ended in this window.
    SpeechEnd,
    Silence,
}

/// Denoise / echo-cancel capability.
pub trait AudioProcessor: Send {
    /// Cleans a microphone chunk. `reference` is the most recent audio played
    /// back to the user, used to cancel its echo.
    fn process_chunk(&mut self, mic: &[i16], reference: Option<&[i16]>) -> Vec<i16>;
}

/// Speech-boundary classifier.
pub trait VoiceActivityDetector: Send {
    fn process_chunk(&mut self, audio: &[i16]) -> SpeechState;

    /// Whether the detector currently considers the user to be speaking.
    fn is_speaking(&self) -> bool;
}

/// An [`AudioProcessor`] that returns the microphone audio untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl AudioProcessor for PassthroughProcessor {
    fn process_chunk(&mut self, mic: &[i16], _reference: Option<&[i16]>) -> Vec<i16> {
        mic.to_vec()
    }
}

/// RMS-energy voice activity detector with a silence hangover.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Normalized RMS (0.0-1.0) above which a chunk counts as voiced.
    energy_threshold: f32,
    /// Silence needed before speech is considered over.
    hangover: Duration,
    sample_rate: u32,
    speaking: bool,
    silence: Duration,
}

impl EnergyVad {
    pub fn new(energy_threshold: f32, hangover: Duration, sample_rate: u32) -> Self {
        Self {
            energy_threshold,
            hangover,
            sample_rate,
            speaking: false,
            silence: Duration::ZERO,
        }
    }

    /// Derives the detector from session VAD settings. A threshold of 1.0
    /// maps to an RMS of 0.05 (about -26 dBFS).
    pub fn from_settings(vad_threshold: f32, silence_duration_ms: u32, sample_rate: u32) -> Self {
        Self::new(
            vad_threshold.clamp(0.0, 1.0) * 0.05,
            Duration::from_millis(silence_duration_ms as u64),
            sample_rate,
        )
    }

    fn chunk_duration(&self, samples: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(samples as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn process_chunk(&mut self, audio: &[i16]) -> SpeechState {
        let voiced = rms(audio) > self.energy_threshold;
        match (voiced, self.speaking) {
            (true, false) => {
                self.speaking = true;
                self.silence = Duration::ZERO;
                SpeechState::SpeechStart
            }
            (true, true) => {
                self.silence = Duration::ZERO;
                SpeechState::Speaking
            }
            (false, true) => {
                self.silence += self.chunk_duration(audio.len());
                if self.silence >= self.hangover {
                    self.speaking = false;
                    self.silence = Duration::ZERO;
                    SpeechState::SpeechEnd
                } else {
                    SpeechState::Speaking
                }
            }
            (false, false) => SpeechState::Silence,
        }
    }

    fn is_speaking(&self) -> bool {
        self.speaking
    }
}

/// Normalized root-mean-square level of a PCM16 chunk.
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// Interprets little-endian bytes as PCM16 samples. A trailing odd byte is dropped.
pub fn pcm16_from_bytes(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|&s| s.to_le_bytes()).collect()
}

/// Encodes PCM16 samples as base64 for `input_audio_buffer.append`.
pub fn encode_pcm16(samples: &[i16]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16_to_bytes(samples))
}

/// Decodes a base64 PCM16 payload such as `response.audio.delta`.
pub fn decode_pcm16(base64_fragment: &str) -> Result<Vec<i16>, base64::DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(base64_fragment)?;
    Ok(pcm16_from_bytes(&bytes))
}
