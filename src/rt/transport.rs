use crate::base::registry::ClipSlot;
use crate::config::EngineConfig;
use crate::ids::ClipId;
use crate::ids::UNASSIGNED_GROUP;
use crate::rt::buffer::AudioBuf;
use crate::rt::command::{Command, CommandConsumer};
use crate::rt::event::EventProducer;
use crate::error::EngineError;
use crate::rt::routing::{GroupAtomics, GroupMeter, MasterAtomics, RoutingMatrix};
use crate::rt::voice::Voice;
use crate::rt::voice_pool::VoicePool;
use atomic::Atomic;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Externally-observable play state of a clip, aggregated across every voice currently playing
/// it (§4.8 "Queries"). A clip with no active voices is `Stopped`; if any voice is
/// `Starting`/`Playing` it is `Playing`; otherwise, if any voice is `Stopping`, it is `Stopping`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ClipState {
    Stopped,
    Playing,
    Stopping,
}

/// `position_samples` plus its derived seconds/beats view (§4.8).
#[derive(Copy, Clone, Debug)]
pub struct TransportPosition {
    pub samples: i64,
    pub seconds: f64,
    pub beats: f64,
}

/// Owns every [`Voice`], drains the [`CommandConsumer`], advances playback state, and produces
/// one mixed buffer per call (§4.8). The only type in this crate whose `process` method runs on
/// the audio thread.
pub struct Transport {
    config: EngineConfig,
    clip_slots: Arc<Vec<ClipSlot>>,
    clip_generations: Arc<Vec<AtomicU32>>,
    clip_states: Arc<Vec<Atomic<u8>>>,
    voices: VoicePool,
    routing: RoutingMatrix,
    commands: CommandConsumer,
    events: EventProducer,
    position_samples: i64,
    shared_position: Arc<Atomic<i64>>,
    scratch: Vec<f32>,
}

impl Transport {
    /// Builds a pool-owning transport with its own, unshared voice-occupancy and position
    /// counters. Prefer [`Self::with_shared_state`] when a UI-thread [`crate::base::Engine`]
    /// needs to observe either of them concurrently.
    pub fn new(
        config: EngineConfig,
        clip_slots: Arc<Vec<ClipSlot>>,
        clip_generations: Arc<Vec<AtomicU32>>,
        clip_states: Arc<Vec<Atomic<u8>>>,
        commands: CommandConsumer,
        events: EventProducer,
    ) -> Self {
        Self::with_shared_state(
            config,
            clip_slots,
            clip_generations,
            clip_states,
            commands,
            events,
            Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            Arc::new(Atomic::new(0)),
        )
    }

    /// Builds a transport whose voice-pool occupancy and transport position are published to
    /// `voice_occupancy`/`shared_position`, so a UI-thread `Engine` facade constructed alongside
    /// it (before this transport is moved into an [`crate::rt::audio_callback::AudioCallback`])
    /// can read live values without crossing into audio-thread-owned state.
    pub fn with_shared_state(
        config: EngineConfig,
        clip_slots: Arc<Vec<ClipSlot>>,
        clip_generations: Arc<Vec<AtomicU32>>,
        clip_states: Arc<Vec<Atomic<u8>>>,
        commands: CommandConsumer,
        events: EventProducer,
        voice_occupancy: Arc<std::sync::atomic::AtomicUsize>,
        shared_position: Arc<Atomic<i64>>,
    ) -> Self {
        let routing = RoutingMatrix::new(
            config.num_groups,
            config.num_output_channels,
            config.buffer_size,
            config.sample_rate,
            config.smoothing_time_ms,
        );
        let voices = VoicePool::with_shared_occupancy(config.max_voices, voice_occupancy);
        let scratch = vec![0.0; crate::config::MAX_CHANNELS * config.buffer_size];
        shared_position.store(0, Ordering::Relaxed);
        Self {
            config,
            clip_slots,
            clip_generations,
            clip_states,
            voices,
            routing,
            commands,
            events,
            position_samples: 0,
            shared_position,
            scratch,
        }
    }

    /// Resolves `clip_id` to a slot index, rejecting it if its slot has since been recycled for
    /// a different clip (`ClipId`'s generation no longer matches the slot's current one) — the
    /// audio-thread side of the same check `ClipRegistry::index_of` performs on the UI thread.
    fn slot_index(&self, clip_id: ClipId) -> Option<usize> {
        if !clip_id.is_valid() {
            return None;
        }
        let index = clip_id.index() as usize;
        if index >= self.clip_slots.len() {
            return None;
        }
        if self.clip_generations[index].load(Ordering::Relaxed) != clip_id.generation() {
            return None;
        }
        Some(index)
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartClip {
                clip_id,
                at_sample_offset,
            } => {
                // Audio-thread-discovered failures (unknown clip, exhausted voice pool) are
                // dropped silently here: the audio thread cannot report an error back through
                // this channel, and the UI-thread `start_clip` API already performs the same
                // checks synchronously before enqueuing (§7).
                if let Some(index) = self.slot_index(clip_id) {
                    if let Some(record) = self.clip_slots[index].load_full() {
                        let voice = Voice::start(
                            clip_id,
                            record,
                            at_sample_offset,
                            self.config.sample_rate,
                            self.config.smoothing_time_ms,
                        );
                        let _ = self.voices.allocate(voice);
                    }
                }
            }
            Command::StopClip { clip_id } => {
                for voice in self.voices.iter_mut_for_clip(clip_id) {
                    voice.request_stop(self.config.sample_rate);
                }
            }
            Command::StopAll => {
                for voice in self.voices.iter_mut() {
                    voice.request_stop(self.config.sample_rate);
                }
            }
            Command::StopAllInGroup { group_index } => {
                for voice in self.voices.iter_mut_for_group(group_index) {
                    voice.request_stop(self.config.sample_rate);
                }
            }
            Command::UpdateGain {
                clip_id,
                gain_linear,
            } => {
                for voice in self.voices.iter_mut_for_clip(clip_id) {
                    voice.update_gain_target(gain_linear);
                }
            }
            Command::Seek {
                clip_id,
                to_source_sample,
            } => {
                for voice in self.voices.iter_mut_for_clip(clip_id) {
                    voice.seek(to_source_sample);
                }
            }
            Command::SetGroupGain {
                group_index,
                gain_linear,
            } => {
                if let Ok(group) = self.routing.group(group_index) {
                    group.set_gain_target(gain_linear);
                }
            }
            Command::SetGroupMute {
                group_index,
                muted,
            } => {
                if let Ok(group) = self.routing.group(group_index) {
                    group.set_muted(muted);
                }
            }
            Command::SetGroupSolo {
                group_index,
                soloed,
            } => {
                if let Ok(group) = self.routing.group(group_index) {
                    group.set_soloed(soloed);
                }
            }
        }
    }

    fn refresh_clip_states(&self) {
        for state in self.clip_states.iter() {
            state.store(0, Ordering::Relaxed);
        }
        for voice in self.voices.iter() {
            if let Some(index) = self.slot_index(voice.clip_id) {
                // Playing must outrank Stopping in this fold: a clip with one voice retriggered
                // (Starting/Playing) while an older voice of the same clip is still releasing
                // (Stopping) is, per this type's doc comment, `Playing` overall.
                let value = match voice.state {
                    crate::rt::voice::VoiceState::Starting
                    | crate::rt::voice::VoiceState::Playing => 2u8,
                    crate::rt::voice::VoiceState::Stopping => 1u8,
                    crate::rt::voice::VoiceState::Done => 0u8,
                };
                let slot = &self.clip_states[index];
                let current = slot.load(Ordering::Relaxed);
                if value > current {
                    slot.store(value, Ordering::Relaxed);
                }
            }
        }
    }

    fn refresh_clip_counts(&self) {
        let num_groups = self.routing.num_groups();
        let mut counts = vec![0usize; num_groups];
        for voice in self.voices.iter() {
            let g = voice.record.group_index as usize;
            if g < num_groups {
                counts[g] += 1;
            }
        }
        for (index, count) in counts.into_iter().enumerate() {
            if let Ok(group) = self.routing.group(index as u8) {
                group.set_clip_count(count);
            }
        }
    }

    /// Produces `frames` frames of output (§4.8, step-by-step):
    /// reclaim finished voices, drain commands, render each active voice into its group (or
    /// direct-to-master if unassigned), mix groups into master, advance the transport position,
    /// and emit any events observed along the way.
    ///
    /// Wrapped in [`assert_no_alloc`] (§5 "Pre-allocation discipline"): everything this method
    /// touches is pre-sized at [`Self::new`]/`with_shared_state` time, so a heap allocation
    /// anywhere in here is a bug, not a rare-but-acceptable event. The audit only fires where a
    /// `#[global_allocator]` routes through `assert_no_alloc`'s own `AllocDisabler` — this crate
    /// installs one for its own test binary (`src/lib.rs`), but an embedding application must
    /// install its own to get the same guarantee in its release build.
    pub fn process(&mut self, frames: usize) -> AudioBuf {
        assert!(frames <= self.config.buffer_size, "buffer overrun");

        assert_no_alloc::assert_no_alloc(|| {
            self.voices.reclaim_done();
            while let Some(command) = self.commands.pop() {
                self.handle_command(command);
            }

            self.routing.zero_buffers(frames);

            let channel_stride = crate::config::MAX_CHANNELS;
            for voice in self.voices.iter_mut() {
                let record = Arc::clone(&voice.record);
                let source = Arc::clone(&record.source);
                let channels = source.metadata().channel_count.min(channel_stride);
                let region = &mut self.scratch[..channels * frames];
                region.fill(0.0);
                let rendered =
                    voice.render(source.as_ref(), region, channels, frames, &mut self.events);
                if rendered == 0 {
                    continue;
                }
                let view = AudioBuf::from_slice(region, channels, rendered)
                    .expect("scratch region sized for channels * rendered");
                if record.group_index == UNASSIGNED_GROUP {
                    self.routing.accumulate_direct(&view, rendered);
                } else {
                    let _ = self.routing.accumulate_voice(
                        record.group_index,
                        record.output_bus,
                        &view,
                        rendered,
                    );
                }
            }

            self.routing.mix_groups_to_master(frames);
            self.refresh_clip_states();
            self.refresh_clip_counts();
            self.position_samples += frames as i64;
            self.shared_position
                .store(self.position_samples, Ordering::Relaxed);
        });
        self.routing.master(frames)
    }

    pub fn position_handle(&self) -> Arc<Atomic<i64>> {
        Arc::clone(&self.shared_position)
    }

    pub fn voice_occupancy_handle(&self) -> Arc<std::sync::atomic::AtomicUsize> {
        self.voices.occupancy_handle()
    }

    /// Shared handles into the routing matrix's externally-readable state, cloned once at engine
    /// construction time (see [`crate::base::Engine::init`]) before this transport is moved into
    /// an [`crate::rt::audio_callback::AudioCallback`].
    pub fn group_atomics(&self, group_index: u8) -> Result<Arc<GroupAtomics>, EngineError> {
        self.routing.group_atomics(group_index)
    }

    pub fn master_atomics(&self) -> Arc<MasterAtomics> {
        self.routing.master_atomics()
    }

    pub fn current_position(&self) -> TransportPosition {
        let seconds = crate::conversion_util::convert_duration_in_frames_to_seconds(
            self.position_samples,
            self.config.sample_rate,
        );
        TransportPosition {
            samples: self.position_samples,
            seconds,
            beats: seconds * self.config.tempo_bpm as f64 / 60.0,
        }
    }

    pub fn clip_state(&self, clip_id: ClipId) -> ClipState {
        match self
            .slot_index(clip_id)
            .map(|index| self.clip_states[index].load(Ordering::Relaxed))
        {
            Some(2) => ClipState::Playing,
            Some(1) => ClipState::Stopping,
            _ => ClipState::Stopped,
        }
    }

    pub fn group_meter(&self, group_index: u8) -> Option<GroupMeter> {
        self.routing.group(group_index).ok().map(|g| g.meter())
    }

    pub fn master_meter(&self) -> GroupMeter {
        self.routing.master_meter()
    }
}
