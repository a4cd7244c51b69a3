use crate::error::EngineError;

/// Hard ceilings the engine pre-allocates against.
///
/// These bound every real-time buffer (§5 "Pre-allocation discipline"): nothing on the audio
/// path grows past them, so nothing on the audio path allocates.
pub const MAX_BUFFER_FRAMES: usize = 4096;
pub const MAX_CHANNELS: usize = 16;
pub const MAX_VOICES: usize = 256;
pub const MAX_GROUPS: usize = 16;

/// Configuration supplied to [`crate::base::Engine::init`].
///
/// There is no file-based configuration layer here — loading config from disk/env is an
/// application concern — but the struct and its defaults are the ambient surface every
/// embedding needs.
#[derive(Copy, Clone, Debug)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub num_output_channels: usize,
    pub max_voices: usize,
    pub num_groups: usize,
    pub smoothing_time_ms: f32,
    pub default_release_ms: f32,
    /// Tempo used only to derive `TransportPosition::beats` for UI display; the core never
    /// stretches or quantizes audio to it (§1 Non-goals: no time-stretching).
    pub tempo_bpm: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 512,
            num_output_channels: 2,
            max_voices: 64,
            num_groups: 4,
            smoothing_time_ms: 10.0,
            default_release_ms: 10.0,
            tempo_bpm: 120.0,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidParameter("sample_rate must be nonzero"));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_FRAMES {
            return Err(EngineError::InvalidParameter(
                "buffer_size must be in (0, MAX_BUFFER_FRAMES]",
            ));
        }
        if self.num_output_channels == 0 || self.num_output_channels > MAX_CHANNELS {
            return Err(EngineError::InvalidParameter(
                "num_output_channels must be in (0, MAX_CHANNELS]",
            ));
        }
        if self.max_voices == 0 || self.max_voices > MAX_VOICES {
            return Err(EngineError::InvalidParameter(
                "max_voices must be in (0, MAX_VOICES]",
            ));
        }
        if self.num_groups == 0 || self.num_groups > MAX_GROUPS {
            return Err(EngineError::InvalidParameter(
                "num_groups must be in (0, MAX_GROUPS]",
            ));
        }
        if !self.smoothing_time_ms.is_finite() || self.smoothing_time_ms <= 0.0 {
            return Err(EngineError::InvalidParameter(
                "smoothing_time_ms must be finite and positive",
            ));
        }
        if !self.default_release_ms.is_finite() || self.default_release_ms <= 0.0 {
            return Err(EngineError::InvalidParameter(
                "default_release_ms must be finite and positive",
            ));
        }
        if !self.tempo_bpm.is_finite() || self.tempo_bpm <= 0.0 {
            return Err(EngineError::InvalidParameter(
                "tempo_bpm must be finite and positive",
            ));
        }
        Ok(())
    }
}
