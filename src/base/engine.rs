use crate::base::record::FadeCurve;
use crate::base::registry::ClipRegistry;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::ids::ClipId;
use crate::rt::audio_callback::AudioCallback;
use crate::rt::command::{command_channel, Command, CommandProducer};
use crate::rt::event::{event_channel, Event, EventConsumer};
use crate::rt::routing::{GroupAtomics, GroupMeter, MasterAtomics};
use crate::rt::transport::{ClipState, Transport, TransportPosition};
use crate::source::SourceRef;
use atomic::Atomic;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pending commands/events the UI thread can have in flight before the audio thread catches up.
/// Sized generously above ordinary per-buffer traffic; see [`Command::push`] (§4.2) for what
/// happens if a burst exceeds it.
const COMMAND_QUEUE_CAPACITY: usize = 1024;
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// UI-thread facade over the engine (§6). Owns the [`ClipRegistry`] and the command/event queue
/// producer/consumer halves; the audio-thread half lives in the [`AudioCallback`] handed back
/// alongside it from [`Self::init`].
///
/// Every read ([`Self::clip_state`], [`Self::current_position`], [`Self::group_meter`],
/// [`Self::master_meter`]) goes through a value published from the audio thread via a plain
/// atomic, never by reaching into the [`Transport`] itself — that type is moved into the
/// [`AudioCallback`] and from then on belongs exclusively to the real-time thread.
pub struct Engine {
    config: EngineConfig,
    registry: ClipRegistry,
    commands: CommandProducer,
    events: EventConsumer,
    clip_states: Arc<Vec<Atomic<u8>>>,
    voice_occupancy: Arc<AtomicUsize>,
    position: Arc<Atomic<i64>>,
    group_atomics: Vec<Arc<GroupAtomics>>,
    master_atomics: Arc<MasterAtomics>,
}

impl Engine {
    /// Validates `config`, wires up the command/event queues and shared atomics, and builds the
    /// [`Transport`] before handing its ownership off to a fresh [`AudioCallback`]. Call
    /// [`crate::init`] once per process before this, per §10.3.
    pub fn init(config: EngineConfig) -> Result<(Engine, AudioCallback), EngineError> {
        config.validate()?;

        let registry = ClipRegistry::new(
            config.num_groups as u8,
            config.default_release_ms,
            config.sample_rate,
        );
        let clip_states: Arc<Vec<Atomic<u8>>> = Arc::new(
            (0..crate::base::registry::MAX_REGISTERED_CLIPS)
                .map(|_| Atomic::new(0u8))
                .collect(),
        );
        let (commands, command_consumer) = command_channel(COMMAND_QUEUE_CAPACITY);
        let (event_producer, events) = event_channel(EVENT_QUEUE_CAPACITY);
        let voice_occupancy = Arc::new(AtomicUsize::new(0));
        let position = Arc::new(Atomic::new(0i64));

        let transport = Transport::with_shared_state(
            config,
            registry.slots(),
            registry.generations(),
            Arc::clone(&clip_states),
            command_consumer,
            event_producer,
            Arc::clone(&voice_occupancy),
            Arc::clone(&position),
        );
        let master_atomics = transport.master_atomics();
        let group_atomics = (0..config.num_groups as u8)
            .map(|g| transport.group_atomics(g))
            .collect::<Result<Vec<_>, _>>()?;

        let engine = Engine {
            config,
            registry,
            commands,
            events,
            clip_states,
            voice_occupancy,
            position,
            group_atomics,
            master_atomics,
        };
        Ok((engine, AudioCallback::new(transport)))
    }

    fn clip_index(&self, id: ClipId) -> Result<usize, EngineError> {
        self.registry.index_of(id)
    }

    fn group_index(&self, group_index: u8) -> Result<usize, EngineError> {
        let index = group_index as usize;
        if index >= self.group_atomics.len() {
            return Err(EngineError::InvalidParameter("unknown group index"));
        }
        Ok(index)
    }

    // -- Clip registration and parameter updates (§4.1) --

    pub fn register_clip(&self, source: SourceRef) -> Result<ClipId, EngineError> {
        self.registry.register(source)
    }

    pub fn unregister_clip(&self, id: ClipId) -> Result<(), EngineError> {
        self.registry.unregister(id)
    }

    pub fn update_trim(
        &self,
        id: ClipId,
        trim_in_samples: i64,
        trim_out_samples: i64,
    ) -> Result<(), EngineError> {
        self.registry.update_trim(id, trim_in_samples, trim_out_samples)
    }

    pub fn update_fades(
        &self,
        id: ClipId,
        fade_in_samples: u32,
        fade_out_samples: u32,
        fade_in_curve: FadeCurve,
        fade_out_curve: FadeCurve,
    ) -> Result<(), EngineError> {
        self.registry
            .update_fades(id, fade_in_samples, fade_out_samples, fade_in_curve, fade_out_curve)
    }

    /// Updates the clip's configured gain and, per §4.1, pushes the same change to any voices
    /// already playing this clip so it takes effect immediately rather than on the next start.
    pub fn update_gain_db(&mut self, id: ClipId, gain_db: f32) -> Result<(), EngineError> {
        let gain_linear = self.registry.update_gain_db(id, gain_db)?;
        self.commands.push(Command::UpdateGain {
            clip_id: id,
            gain_linear,
        })
    }

    pub fn set_loop(&self, id: ClipId, looped: bool) -> Result<(), EngineError> {
        self.registry.set_loop(id, looped)
    }

    pub fn assign_group(&self, id: ClipId, group_index: u8) -> Result<(), EngineError> {
        self.registry.assign_group(id, group_index)
    }

    pub fn set_output_bus(&self, id: ClipId, bus: u8) -> Result<(), EngineError> {
        self.registry.set_output_bus(id, bus)
    }

    pub fn add_cue_point(
        &self,
        id: ClipId,
        position_frames: i64,
        name: String,
        color: u32,
    ) -> Result<usize, EngineError> {
        self.registry.add_cue_point(id, position_frames, name, color)
    }

    pub fn remove_cue_point(&self, id: ClipId, cue_index: usize) -> Result<(), EngineError> {
        self.registry.remove_cue_point(id, cue_index)
    }

    /// Convenience that resolves a cue point to a source-frame position and emits a `Seek`
    /// command for every voice currently playing `id` (§4.1).
    pub fn seek_to_cue_point(&mut self, id: ClipId, cue_index: usize) -> Result<(), EngineError> {
        let to_source_sample = self.registry.cue_point_position(id, cue_index)?;
        self.commands.push(Command::Seek {
            clip_id: id,
            to_source_sample,
        })
    }

    // -- Transport control (§4.2, §7) --

    /// Starts a new voice playing `id` from `at_sample_offset`. Rejects synchronously with
    /// [`EngineError::NoVoiceAvailable`] if the pool was already full at the time of the call;
    /// the audio thread performs the same check again when it drains the command, in case a
    /// concurrent `start_clip` won the last free slot in between (§7).
    pub fn start_clip(&mut self, id: ClipId, at_sample_offset: i64) -> Result<(), EngineError> {
        self.registry.snapshot(id)?;
        if self.voice_occupancy.load(Ordering::Relaxed) >= self.config.max_voices {
            return Err(EngineError::NoVoiceAvailable);
        }
        self.commands.push(Command::StartClip {
            clip_id: id,
            at_sample_offset,
        })
    }

    pub fn stop_clip(&mut self, id: ClipId) -> Result<(), EngineError> {
        self.commands.push(Command::StopClip { clip_id: id })
    }

    pub fn stop_all(&mut self) -> Result<(), EngineError> {
        self.commands.push(Command::StopAll)
    }

    pub fn stop_all_in_group(&mut self, group_index: u8) -> Result<(), EngineError> {
        self.group_index(group_index)?;
        self.commands.push(Command::StopAllInGroup { group_index })
    }

    pub fn seek(&mut self, id: ClipId, to_source_sample: i64) -> Result<(), EngineError> {
        self.commands.push(Command::Seek {
            clip_id: id,
            to_source_sample,
        })
    }

    pub fn set_group_gain_db(&mut self, group_index: u8, gain_db: f32) -> Result<(), EngineError> {
        self.group_index(group_index)?;
        if !gain_db.is_finite() {
            return Err(EngineError::InvalidParameter("gain_db must be finite"));
        }
        let gain_linear = crate::conversion_util::db_to_linear(gain_db);
        self.commands.push(Command::SetGroupGain {
            group_index,
            gain_linear,
        })
    }

    pub fn set_group_mute(&mut self, group_index: u8, muted: bool) -> Result<(), EngineError> {
        self.group_index(group_index)?;
        self.commands.push(Command::SetGroupMute { group_index, muted })
    }

    pub fn set_group_solo(&mut self, group_index: u8, soloed: bool) -> Result<(), EngineError> {
        self.group_index(group_index)?;
        self.commands.push(Command::SetGroupSolo { group_index, soloed })
    }

    // -- Queries (§4.8) --

    pub fn clip_state(&self, id: ClipId) -> ClipState {
        match self.clip_index(id).map(|i| self.clip_states[i].load(Ordering::Relaxed)) {
            Ok(2) => ClipState::Playing,
            Ok(1) => ClipState::Stopping,
            _ => ClipState::Stopped,
        }
    }

    pub fn current_position(&self) -> TransportPosition {
        let samples = self.position.load(Ordering::Relaxed);
        let seconds = crate::conversion_util::convert_duration_in_frames_to_seconds(
            samples,
            self.config.sample_rate,
        );
        TransportPosition {
            samples,
            seconds,
            beats: seconds * self.config.tempo_bpm as f64 / 60.0,
        }
    }

    pub fn group_meter(&self, group_index: u8) -> Result<GroupMeter, EngineError> {
        let index = self.group_index(group_index)?;
        Ok(self.group_atomics[index].meter())
    }

    pub fn master_meter(&self) -> GroupMeter {
        self.master_atomics.meter()
    }

    /// Drains every event emitted by the audio thread since the last call, invoking `callback`
    /// for each in emission order (§4.3). Events dropped because the ring was full are not
    /// replayed; see [`EventConsumer::dropped_count`]. A rise in the dropped count since the
    /// last call is logged at `warn!` here, on the UI thread (§10.3).
    pub fn drain_events(&mut self, callback: impl FnMut(Event)) {
        let before = self.events.dropped_count();
        self.events.drain_events(callback);
        let after = self.events.dropped_count();
        if after > before {
            tracing::warn!(newly_dropped = after - before, total_dropped = after, "event queue overflowed");
        }
    }

    pub fn dropped_event_count(&self) -> u64 {
        self.events.dropped_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn source() -> SourceRef {
        Arc::new(MemorySource::constant(1.0, 48_000, 48_000))
    }

    #[test]
    fn init_rejects_invalid_config() {
        let mut config = EngineConfig::default();
        config.sample_rate = 0;
        assert!(matches!(
            Engine::init(config),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn register_then_start_renders_through_callback() {
        let (mut engine, mut callback) = Engine::init(EngineConfig::default()).unwrap();
        let id = engine.register_clip(source()).unwrap();
        engine.start_clip(id, 0).unwrap();
        assert_eq!(engine.clip_state(id), ClipState::Stopped);

        let driver = crate::rt::audio_callback::OfflineDriver::new();
        let interleaved = driver.render_into(&mut callback, 512, 2);
        assert!(interleaved.iter().any(|s| *s != 0.0));

        assert_eq!(engine.clip_state(id), ClipState::Playing);
        assert!(engine.current_position().samples > 0);

        let mut started = 0;
        engine.drain_events(|e| {
            if matches!(e, Event::ClipStarted { .. }) {
                started += 1;
            }
        });
        assert_eq!(started, 1);
    }

    #[test]
    fn start_clip_rejects_unknown_handle_synchronously() {
        let (mut engine, _callback) = Engine::init(EngineConfig::default()).unwrap();
        assert!(matches!(
            engine.start_clip(ClipId::from_raw(999_999), 0),
            Err(EngineError::InvalidHandle)
        ));
    }

    #[test]
    fn start_clip_rejects_when_voice_pool_is_full() {
        let mut config = EngineConfig::default();
        config.max_voices = 1;
        let (mut engine, _callback) = Engine::init(config).unwrap();
        let id = engine.register_clip(source()).unwrap();
        engine.start_clip(id, 0).unwrap();
        engine.voice_occupancy.store(config.max_voices, Ordering::Relaxed);
        assert!(matches!(
            engine.start_clip(id, 0),
            Err(EngineError::NoVoiceAvailable)
        ));
    }

    #[test]
    fn group_and_master_meters_are_readable_before_any_render() {
        let (engine, _callback) = Engine::init(EngineConfig::default()).unwrap();
        let meter = engine.group_meter(0).unwrap();
        assert_eq!(meter.peak, 0.0);
        assert_eq!(engine.master_meter().peak, 0.0);
        assert!(matches!(
            engine.group_meter(200),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn update_gain_db_pushes_live_update_for_playing_voice() {
        let (mut engine, mut callback) = Engine::init(EngineConfig::default()).unwrap();
        let id = engine.register_clip(source()).unwrap();
        engine.start_clip(id, 0).unwrap();
        let driver = crate::rt::audio_callback::OfflineDriver::new();
        driver.render_into(&mut callback, 64, 2);
        engine.update_gain_db(id, -6.0).unwrap();
    }
}
