use crate::error::EngineError;
use crate::rt::buffer::{AudioBuf, OwnedAudioBuffer};
use crate::rt::smoother::GainSmoother;
use atomic::Atomic;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Snapshot of a group's meters, returned to the UI thread (§4.8 "Queries").
#[derive(Copy, Clone, Debug)]
pub struct GroupMeter {
    pub peak: f32,
    pub rms: f32,
    pub clip_count: usize,
}

/// The externally-settable/readable half of a group's state (§3 "GroupState"): mute, solo,
/// master-routing and meters. Shared via `Arc` between the audio-thread-owned [`GroupState`]
/// and [`crate::base::Engine`] so UI-thread queries (`group_meter`, and a future mixer UI's
/// mute/solo toggles) never need to reach across into [`RoutingMatrix`] itself, which the audio
/// thread exclusively owns.
pub struct GroupAtomics {
    muted: AtomicBool,
    soloed: AtomicBool,
    routed_to_master: AtomicBool,
    peak: Atomic<f32>,
    rms: Atomic<f32>,
    clip_count: AtomicUsize,
}

impl Default for GroupAtomics {
    fn default() -> Self {
        Self {
            muted: AtomicBool::new(false),
            soloed: AtomicBool::new(false),
            routed_to_master: AtomicBool::new(true),
            peak: Atomic::new(0.0),
            rms: Atomic::new(0.0),
            clip_count: AtomicUsize::new(0),
        }
    }
}

impl GroupAtomics {
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.soloed.store(soloed, Ordering::Release);
    }

    pub fn is_soloed(&self) -> bool {
        self.soloed.load(Ordering::Acquire)
    }

    pub fn meter(&self) -> GroupMeter {
        GroupMeter {
            peak: self.peak.load(Ordering::Relaxed),
            rms: self.rms.load(Ordering::Relaxed),
            clip_count: self.clip_count.load(Ordering::Relaxed),
        }
    }
}

/// Audio-thread-owned mix state for one group (§3 "GroupState", §4.7): the accumulator buffer
/// and gain smoother live here exclusively; externally-visible bits live in the shared
/// [`GroupAtomics`].
pub struct GroupState {
    buffer: OwnedAudioBuffer,
    gain: GainSmoother,
    atomics: Arc<GroupAtomics>,
}

impl GroupState {
    fn new(channels: usize, max_frames: usize, sample_rate: u32, smoothing_time_ms: f32) -> Self {
        Self {
            buffer: OwnedAudioBuffer::new(channels, max_frames),
            gain: GainSmoother::new(sample_rate, smoothing_time_ms),
            atomics: Arc::new(GroupAtomics::default()),
        }
    }

    pub fn set_gain_target(&self, gain_linear: f32) {
        self.gain.set_target(gain_linear);
    }

    pub fn set_muted(&self, muted: bool) {
        self.atomics.set_muted(muted);
    }

    pub fn set_soloed(&self, soloed: bool) {
        self.atomics.set_soloed(soloed);
    }

    pub fn is_soloed(&self) -> bool {
        self.atomics.is_soloed()
    }

    pub fn meter(&self) -> GroupMeter {
        self.atomics.meter()
    }

    pub fn set_clip_count(&self, count: usize) {
        self.atomics.clip_count.store(count, Ordering::Relaxed);
    }

    pub fn atomics(&self) -> Arc<GroupAtomics> {
        Arc::clone(&self.atomics)
    }
}

/// The externally-readable half of master-bus state, shared the same way as [`GroupAtomics`].
pub struct MasterAtomics {
    peak: Atomic<f32>,
    rms: Atomic<f32>,
}

impl Default for MasterAtomics {
    fn default() -> Self {
        Self {
            peak: Atomic::new(0.0),
            rms: Atomic::new(0.0),
        }
    }
}

impl MasterAtomics {
    pub fn meter(&self) -> GroupMeter {
        GroupMeter {
            peak: self.peak.load(Ordering::Relaxed),
            rms: self.rms.load(Ordering::Relaxed),
            clip_count: 0,
        }
    }
}

/// Clip → group → master mixing, with per-group gain smoothing and solo-implicit-mute logic
/// (§4.7).
pub struct RoutingMatrix {
    groups: Vec<GroupState>,
    master: OwnedAudioBuffer,
    channels: usize,
    master_atomics: Arc<MasterAtomics>,
}

impl RoutingMatrix {
    pub fn new(
        num_groups: usize,
        channels: usize,
        max_frames: usize,
        sample_rate: u32,
        smoothing_time_ms: f32,
    ) -> Self {
        let groups = (0..num_groups)
            .map(|_| GroupState::new(channels, max_frames, sample_rate, smoothing_time_ms))
            .collect();
        Self {
            groups,
            master: OwnedAudioBuffer::new(channels, max_frames),
            channels,
            master_atomics: Arc::new(MasterAtomics::default()),
        }
    }

    /// Shared handle to master peak/RMS, cloned once at engine init and handed to
    /// [`crate::base::Engine`] so `master_meter()` queries never need to reach into the
    /// audio-thread-owned [`RoutingMatrix`] itself.
    pub fn master_atomics(&self) -> Arc<MasterAtomics> {
        Arc::clone(&self.master_atomics)
    }

    /// Shared handle to group `group_index`'s externally-readable state (meters, mute, solo),
    /// for the same reason as [`Self::master_atomics`].
    pub fn group_atomics(&self, group_index: u8) -> Result<Arc<GroupAtomics>, EngineError> {
        Ok(self.groups[self.group_index(group_index)?].atomics())
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn group_index(&self, group_index: u8) -> Result<usize, EngineError> {
        let index = group_index as usize;
        if index >= self.groups.len() {
            return Err(EngineError::InvalidParameter("unknown group index"));
        }
        Ok(index)
    }

    pub fn group(&self, group_index: u8) -> Result<&GroupState, EngineError> {
        Ok(&self.groups[self.group_index(group_index)?])
    }

    /// Step 1: zeroes every group buffer and the master bus for the upcoming `frames`-frame
    /// buffer.
    pub fn zero_buffers(&mut self, frames: usize) {
        for group in &mut self.groups {
            group.buffer.to_buf_mut().slice_mut(0..frames).clear();
        }
        self.master.to_buf_mut().slice_mut(0..frames).clear();
    }

    /// Step 2: mixes `voice_output` (already fade/gain-applied) into group `group_index`'s
    /// buffer, applying the voice's channel mapping (§4.7 "Channel mapping"): a voice with
    /// `output_bus = b` and `C` channels writes into channels `[2b, 2b+C)` of the group buffer,
    /// wrapping modulo the group's channel count if that range would run past it.
    pub fn accumulate_voice(
        &mut self,
        group_index: u8,
        output_bus: u8,
        voice_output: &AudioBuf,
        frames: usize,
    ) -> Result<(), EngineError> {
        let index = self.group_index(group_index)?;
        let group = &mut self.groups[index];
        let dest_channels = self.channels;
        let src_channels = voice_output.channel_count();
        let base = (2 * output_bus as usize) % dest_channels;
        let mut dest = group.buffer.to_buf_mut().slice_mut(0..frames);
        for frame in 0..frames {
            for ch in 0..src_channels {
                let dest_ch = (base + ch) % dest_channels;
                let sample = voice_output.data_as_slice()[frame * src_channels + ch];
                dest.data_as_mut_slice()[frame * dest_channels + dest_ch] += sample;
            }
        }
        Ok(())
    }

    /// Steps 3–5: applies smoothed group gain and sample-accurate mute/solo, sums routed groups
    /// into the master bus, and updates peak/RMS meters.
    ///
    /// `solo_active` and each group's `effective_solo_mute` are computed once per buffer (§4.7
    /// "Solo logic"), but the multiplier itself (`muted || effective_solo_mute`) is applied
    /// sample-by-sample so a mute/unmute command that lands mid-buffer still produces a
    /// sample-accurate edge rather than a buffer-granular one.
    pub fn mix_groups_to_master(&mut self, frames: usize) {
        let solo_active = self.groups.iter().any(|g| g.is_soloed());
        for group in &mut self.groups {
            let effective_solo_mute = solo_active && !group.is_soloed();
            let muted = group.atomics.muted.load(Ordering::Acquire) || effective_solo_mute;
            let routed = group.atomics.routed_to_master.load(Ordering::Acquire);
            let mut peak = 0f32;
            let mut sum_squares = 0f64;
            {
                let mut buf = group.buffer.to_buf_mut().slice_mut(0..frames);
                for frame in 0..frames {
                    let g = group.gain.process();
                    let factor = if muted { 0.0 } else { g };
                    for ch in 0..self.channels {
                        let sample = &mut buf.data_as_mut_slice()[frame * self.channels + ch];
                        *sample *= factor;
                        peak = peak.max(sample.abs());
                        sum_squares += (*sample as f64) * (*sample as f64);
                    }
                }
            }
            let rms = if frames * self.channels > 0 {
                (sum_squares / (frames * self.channels) as f64).sqrt() as f32
            } else {
                0.0
            };
            group.atomics.peak.store(peak, Ordering::Relaxed);
            group.atomics.rms.store(rms, Ordering::Relaxed);
            if routed {
                let group_buf = group.buffer.to_buf().slice(0..frames);
                self.master.to_buf_mut().slice_mut(0..frames).add_from(&group_buf);
            }
        }
        let master_data = self.master.to_buf().slice(0..frames);
        let master_data = master_data.data_as_slice();
        let master_peak = master_data.iter().fold(0f32, |acc, s| acc.max(s.abs()));
        let master_rms = if master_data.is_empty() {
            0.0
        } else {
            (master_data.iter().map(|s| (*s as f64) * (*s as f64)).sum::<f64>()
                / master_data.len() as f64)
                .sqrt() as f32
        };
        self.master_atomics.peak.store(master_peak, Ordering::Relaxed);
        self.master_atomics.rms.store(master_rms, Ordering::Relaxed);
    }

    /// Step 4: unassigned voices (`group_index == UNASSIGNED_GROUP`) sum directly into master
    /// at unity, bypassing group gain/mute/solo entirely (§4.7).
    pub fn accumulate_direct(&mut self, voice_output: &AudioBuf, frames: usize) {
        let channels = self.channels;
        let src_channels = voice_output.channel_count();
        let mut dest = self.master.to_buf_mut().slice_mut(0..frames);
        for frame in 0..frames {
            for ch in 0..src_channels.min(channels) {
                let sample = voice_output.data_as_slice()[frame * src_channels + ch];
                dest.data_as_mut_slice()[frame * channels + ch] += sample;
            }
        }
    }

    pub fn master(&self, frames: usize) -> AudioBuf {
        self.master.to_buf().slice(0..frames)
    }

    /// Peak/RMS over the master bus as it stood after the last [`Self::mix_groups_to_master`]
    /// call. Master has no mute/solo/clip_count of its own (§3 "GroupState" only applies
    /// per-group), and the meter is read from an atomic snapshot rather than the live buffer
    /// since a UI-thread query can race the audio thread's next `process` call.
    pub fn master_meter(&self) -> GroupMeter {
        GroupMeter {
            peak: self.master_atomics.peak.load(Ordering::Relaxed),
            rms: self.master_atomics.rms.load(Ordering::Relaxed),
            clip_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rt::buffer::OwnedAudioBuffer as Buf;

    fn matrix() -> RoutingMatrix {
        RoutingMatrix::new(2, 2, 512, 48_000, 10.0)
    }

    #[test]
    fn unsoloed_groups_sum_into_master() {
        let mut m = matrix();
        let mut voice_buf = Buf::new(2, 4);
        voice_buf.to_buf_mut().modify_frames(|_| 1.0);
        m.zero_buffers(4);
        m.accumulate_voice(0, 0, &voice_buf.to_buf(), 4).unwrap();
        m.accumulate_voice(1, 0, &voice_buf.to_buf(), 4).unwrap();
        m.mix_groups_to_master(4);
        let master = m.master(4);
        assert!((master.data_as_slice()[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn solo_silences_other_groups() {
        let mut m = matrix();
        m.group(1).unwrap().set_soloed(true);
        let mut voice_buf = Buf::new(2, 4);
        voice_buf.to_buf_mut().modify_frames(|_| 1.0);
        m.zero_buffers(4);
        m.accumulate_voice(0, 0, &voice_buf.to_buf(), 4).unwrap();
        m.accumulate_voice(1, 0, &voice_buf.to_buf(), 4).unwrap();
        m.mix_groups_to_master(4);
        let master = m.master(4);
        assert!((master.data_as_slice()[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn unknown_group_index_rejected() {
        let mut m = matrix();
        let voice_buf = Buf::new(2, 4);
        assert!(matches!(
            m.accumulate_voice(9, 0, &voice_buf.to_buf(), 4),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn mute_silences_group_immediately() {
        let mut m = matrix();
        m.group(0).unwrap().set_muted(true);
        let mut voice_buf = Buf::new(2, 4);
        voice_buf.to_buf_mut().modify_frames(|_| 1.0);
        m.zero_buffers(4);
        m.accumulate_voice(0, 0, &voice_buf.to_buf(), 4).unwrap();
        m.mix_groups_to_master(4);
        let master = m.master(4);
        assert_eq!(master.data_as_slice()[0], 0.0);
    }
}
