//! Bridges a platform driver's pull callback to [`Transport::process`] (§4.9), and the
//! interface the engine expects a driver to offer (§6 "Driver adapter interface").
//!
//! Platform drivers themselves (ASIO/CoreAudio/ALSA/WASAPI backends) are out of scope (§1): this
//! module only defines the trait they'd implement and ships one concrete, device-free
//! implementation — [`OfflineDriver`] — used as the offline-render stand-in and as the harness
//! the scenario tests in §8 are built on.

use crate::config::{EngineConfig, MAX_CHANNELS};
use crate::error::EngineError;
use crate::rt::buffer::SampleIndex;
use crate::rt::transport::Transport;

/// Parameters a driver is asked to open its device with (§6).
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub device_id: Option<String>,
}

/// Capability set a platform audio driver must expose to the engine (§6). Implemented outside
/// this crate for real hardware; [`OfflineDriver`] is the one implementation shipped here.
pub trait AudioDriver {
    fn initialize(&mut self, config: DriverConfig) -> Result<(), EngineError>;
    fn start(&mut self, callback: AudioCallback) -> Result<(), EngineError>;
    fn stop(&mut self) -> Result<(), EngineError>;
    fn is_running(&self) -> bool;
    fn latency_samples(&self) -> u32;
}

/// Owns the [`Transport`] and performs the interleaved-internal → planar-external conversion at
/// the driver boundary (§4.9). The driver guarantees exclusive, non-concurrent calls to
/// [`Self::render`] from its own real-time thread; this type holds no locks because none are
/// needed.
///
/// Must not retain references to the driver's buffers past a single `render` call — it doesn't;
/// it only ever borrows them for the duration of the call.
pub struct AudioCallback {
    transport: Transport,
}

impl AudioCallback {
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Renders `frames` frames into `output_buffers`, one non-interleaved (planar) slice per
    /// output channel, each guaranteed non-null and at least `frames` long by the driver (§6).
    /// Any channel beyond what the engine mixed to master is left untouched by the caller's
    /// buffer-ownership contract — callers that need silence on unmapped channels must zero them
    /// ahead of the call, mirroring real driver output buffers which typically start zeroed.
    pub fn render(&mut self, output_buffers: &mut [&mut [f32]], frames: usize) {
        let master = self.transport.process(frames);
        let channel_count = master.channel_count().min(output_buffers.len()).min(MAX_CHANNELS);
        for (channel, out) in output_buffers.iter_mut().enumerate().take(channel_count) {
            for frame in 0..frames {
                out[frame] = master
                    .sample_value_at(SampleIndex::new(channel, frame))
                    .unwrap_or(0.0);
            }
        }
    }
}

/// A device-free [`AudioDriver`] that pulls fixed-size buffers synchronously on whatever thread
/// calls [`Self::render_into`] — never its own thread. Used as the Non-goal-safe stand-in for a
/// real platform backend (offline rendering, in the sense of §1's out-of-scope list, is an
/// application concern built *on top of* this, not part of the core) and as the deterministic
/// harness every scenario test in this crate drives against.
pub struct OfflineDriver {
    config: Option<DriverConfig>,
    running: bool,
}

impl Default for OfflineDriver {
    fn default() -> Self {
        Self {
            config: None,
            running: false,
        }
    }
}

impl OfflineDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pulls one buffer of `frames` samples through `callback`, writing the mixed result into a
    /// freshly allocated interleaved `Vec<f32>` of length `frames * num_output_channels`. Not a
    /// real-time path itself — this allocates — but `callback.render` underneath never does.
    pub fn render_into(
        &self,
        callback: &mut AudioCallback,
        frames: usize,
        num_output_channels: usize,
    ) -> Vec<f32> {
        let mut channel_storage: Vec<Vec<f32>> = (0..num_output_channels)
            .map(|_| vec![0.0; frames])
            .collect();
        {
            let mut refs: Vec<&mut [f32]> =
                channel_storage.iter_mut().map(|c| c.as_mut_slice()).collect();
            callback.render(&mut refs, frames);
        }
        let mut interleaved = vec![0.0; frames * num_output_channels];
        for (ch, data) in channel_storage.iter().enumerate() {
            for (frame, sample) in data.iter().enumerate() {
                interleaved[frame * num_output_channels + ch] = *sample;
            }
        }
        interleaved
    }
}

impl AudioDriver for OfflineDriver {
    fn initialize(&mut self, config: DriverConfig) -> Result<(), EngineError> {
        if config.buffer_size == 0 || config.buffer_size > crate::config::MAX_BUFFER_FRAMES {
            return Err(EngineError::InvalidParameter(
                "buffer_size exceeds MAX_BUFFER_FRAMES",
            ));
        }
        self.config = Some(config);
        Ok(())
    }

    /// The offline driver has no background thread of its own: "starting" it only marks it
    /// running and hands the callback back to the caller via [`OfflineDriver::render_into`]-style
    /// pulls driven externally (by a test, or by an offline render loop built on top of this
    /// core). Real drivers spawn the real-time thread here instead.
    fn start(&mut self, _callback: AudioCallback) -> Result<(), EngineError> {
        if self.config.is_none() {
            return Err(EngineError::NotInitialized);
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn latency_samples(&self) -> u32 {
        self.config.as_ref().map(|c| c.buffer_size as u32).unwrap_or(0)
    }
}

/// Validates a requested [`DriverConfig`] against the engine's own configuration before wiring
/// it to a [`Transport`] (§5 "Pre-allocation discipline": the driver's `initialize` must reject
/// buffer sizes past `MAX_BUFFER_FRAMES`, and must not exceed what the engine was configured
/// for).
pub fn validate_driver_config(config: &DriverConfig, engine: &EngineConfig) -> Result<(), EngineError> {
    if config.buffer_size == 0 || config.buffer_size > crate::config::MAX_BUFFER_FRAMES {
        return Err(EngineError::InvalidParameter(
            "buffer_size exceeds MAX_BUFFER_FRAMES",
        ));
    }
    if config.buffer_size > engine.buffer_size {
        return Err(EngineError::InvalidParameter(
            "buffer_size exceeds the engine's configured buffer_size",
        ));
    }
    if config.sample_rate != engine.sample_rate {
        return Err(EngineError::InvalidParameter(
            "driver sample_rate does not match the engine's configured sample_rate",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::registry::ClipRegistry;
    use crate::rt::command::command_channel;
    use crate::rt::event::event_channel;
    use crate::source::MemorySource;
    use std::sync::Arc;

    fn make_callback() -> (AudioCallback, crate::rt::command::CommandProducer, ClipRegistry) {
        let config = EngineConfig::default();
        let registry = ClipRegistry::new(
            config.num_groups as u8,
            config.default_release_ms,
            config.sample_rate,
        );
        let (cmd_p, cmd_c) = command_channel(64);
        let (evt_p, _evt_c) = event_channel(64);
        let clip_states: Arc<Vec<atomic::Atomic<u8>>> = Arc::new(
            (0..crate::base::registry::MAX_REGISTERED_CLIPS)
                .map(|_| atomic::Atomic::new(0u8))
                .collect(),
        );
        let transport = Transport::new(
            config,
            registry.slots(),
            registry.generations(),
            clip_states,
            cmd_c,
            evt_p,
        );
        (AudioCallback::new(transport), cmd_p, registry)
    }

    #[test]
    fn offline_driver_rejects_oversized_buffer() {
        let mut driver = OfflineDriver::new();
        let err = driver
            .initialize(DriverConfig {
                sample_rate: 48_000,
                buffer_size: crate::config::MAX_BUFFER_FRAMES + 1,
                num_inputs: 0,
                num_outputs: 2,
                device_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn start_before_initialize_fails() {
        let (callback, _p, _reg) = make_callback();
        let mut driver = OfflineDriver::new();
        assert!(matches!(
            driver.start(callback),
            Err(EngineError::NotInitialized)
        ));
    }

    #[test]
    fn render_into_produces_interleaved_silence_with_no_voices() {
        let (mut callback, _p, _reg) = make_callback();
        let driver = OfflineDriver::new();
        let interleaved = driver.render_into(&mut callback, 8, 2);
        assert!(interleaved.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn driver_config_rejects_sample_rate_mismatch() {
        let engine = EngineConfig::default();
        let driver_config = DriverConfig {
            sample_rate: 44_100,
            buffer_size: 512,
            num_inputs: 0,
            num_outputs: 2,
            device_id: None,
        };
        assert!(matches!(
            validate_driver_config(&driver_config, &engine),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn source_registered_and_started_renders_through_offline_driver() {
        let (mut callback, mut cmd_p, registry) = make_callback();
        let src = Arc::new(MemorySource::constant(1.0, 48_000, 48_000));
        let id = registry.register(src).unwrap();
        cmd_p
            .push(crate::rt::command::Command::StartClip {
                clip_id: id,
                at_sample_offset: 0,
            })
            .unwrap();
        let driver = OfflineDriver::new();
        let interleaved = driver.render_into(&mut callback, 512, 2);
        assert!(interleaved.iter().any(|s| *s != 0.0));
    }
}
