use crate::base::record::ClipRecord;
use crate::ids::ClipId;
use crate::rt::event::{Event, EventProducer};
use crate::rt::smoother::GainSmoother;
use crate::source::{ChannelLayout, Source};
use std::sync::Arc;

/// Where a [`Voice`] sits in its lifecycle (§4.6).
///
/// `Starting` and `Playing` are both externally "playing" — `Starting` exists only so the
/// `ClipStarted` event is emitted exactly once, on the first buffer actually processed, rather
/// than at enqueue time.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VoiceState {
    Starting,
    Playing,
    Stopping,
    Done,
}

/// A requested-stop release envelope, always linear, always counted in elapsed samples rather
/// than source position (so it runs independently of where in the clip the stop landed).
#[derive(Copy, Clone, Debug)]
struct Release {
    elapsed: u32,
    total: u32,
}

impl Release {
    fn gain_at(&self, extra_elapsed: u32) -> f32 {
        let elapsed = self.elapsed + extra_elapsed;
        (1.0 - elapsed as f32 / self.total as f32).clamp(0.0, 1.0)
    }
}

/// The runtime instance of a single playing clip (§3, §4.6).
///
/// Allocated from a fixed pool on `StartClip`, released back to the pool once it reaches
/// [`VoiceState::Done`]. Holds its own clone of the [`ClipRecord`] `Arc` captured at start time —
/// later registry updates to trim/fades/loop/bus/group do not affect an already-running voice
/// (§4.1 "takes-effect semantics"); only gain updates reach it, and only via an explicit
/// `UpdateGain` command driving its smoother.
pub struct Voice {
    pub clip_id: ClipId,
    pub record: Arc<ClipRecord>,
    pub state: VoiceState,
    position: i64,
    fade_in_elapsed: u32,
    release: Option<Release>,
    gain: GainSmoother,
}

impl Voice {
    /// Allocates a voice for `record`, starting at `trim_in + at_sample_offset` (clamped into
    /// the trim window). The gain smoother snaps immediately to the clip's configured gain
    /// (rather than ramping up from unity) so the very first buffer is already at steady state,
    /// matching the exact-envelope testable property (§8 invariant 5).
    pub fn start(
        clip_id: ClipId,
        record: Arc<ClipRecord>,
        at_sample_offset: i64,
        sample_rate: u32,
        smoothing_time_ms: f32,
    ) -> Self {
        let position = (record.trim_in_samples + at_sample_offset)
            .clamp(record.trim_in_samples, record.trim_out_samples);
        let mut gain = GainSmoother::new(sample_rate, smoothing_time_ms);
        gain.reset(record.gain_linear);
        Self {
            clip_id,
            record,
            state: VoiceState::Starting,
            position,
            fade_in_elapsed: 0,
            release: None,
            gain,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == VoiceState::Done
    }

    /// Retargets the voice's gain smoother. Called when an `UpdateGain` command for this voice's
    /// clip is drained, so the change is audible immediately (click-free) rather than waiting
    /// for the next `StartClip` (§4.1).
    pub fn update_gain_target(&mut self, gain_linear: f32) {
        self.gain.set_target(gain_linear);
    }

    /// Jumps `read_position` to `to_source_sample`, clamped into the trim window. The fade-in
    /// counter is left untouched — a seek is a jump, not a restart (§4.6 edge case).
    pub fn seek(&mut self, to_source_sample: i64) {
        self.position = to_source_sample.clamp(self.record.trim_in_samples, self.record.trim_out_samples);
    }

    /// Initiates the release fade. A no-op (no state change, no event) if a release is already
    /// in progress or the voice is already `Done` — idempotence required by §8 invariant 8. A
    /// release triggered while the voice is already in its *natural* fade-out window (no prior
    /// explicit stop) still installs the release envelope: §4.6's overlap rule takes the
    /// multiplicative minimum of the two envelopes, so both must be tracked.
    pub fn request_stop(&mut self, sample_rate: u32) {
        if self.release.is_some() || self.state == VoiceState::Done {
            return;
        }
        let total = ((self.record.release_ms / 1000.0) * sample_rate as f32)
            .ceil()
            .max(1.0) as u32;
        self.release = Some(Release { elapsed: 0, total });
        if self.state != VoiceState::Done {
            self.state = VoiceState::Stopping;
        }
    }

    fn fade_in_gain(&self, extra_elapsed: u32) -> f32 {
        let fade_in_samples = self.record.fade_in_samples;
        if fade_in_samples == 0 {
            return 1.0;
        }
        let elapsed = self.fade_in_elapsed + extra_elapsed;
        if elapsed >= fade_in_samples {
            1.0
        } else {
            self.record
                .fade_in_curve
                .eval(elapsed as f32 / fade_in_samples as f32)
        }
    }

    fn natural_fade_out_gain(&self, position: i64) -> f32 {
        let fade_out_samples = self.record.fade_out_samples;
        if fade_out_samples == 0 {
            return 1.0;
        }
        let remaining = self.record.trim_out_samples - position;
        if remaining >= fade_out_samples as i64 {
            1.0
        } else {
            self.record
                .fade_out_curve
                .eval(remaining.max(0) as f32 / fade_out_samples as f32)
        }
    }

    fn in_natural_fade_out_window(&self, position: i64) -> bool {
        !self.record.looped
            && self.record.fade_out_samples > 0
            && (self.record.trim_out_samples - position) <= self.record.fade_out_samples as i64
    }

    /// Renders up to `frames` frames (interleaved, `channels` wide) into `dest`, which must
    /// already be large enough and is *not* pre-cleared by this call — callers own buffer
    /// clearing so group/master accumulation can `add_from` directly.
    ///
    /// Returns the number of frames actually written; once the voice reaches
    /// [`VoiceState::Done`] mid-buffer, rendering stops and the remaining frames are left
    /// untouched (the caller must treat them as silence).
    pub fn render(
        &mut self,
        source: &dyn Source,
        dest: &mut [f32],
        channels: usize,
        frames: usize,
        events: &mut EventProducer,
    ) -> usize {
        if self.state == VoiceState::Starting {
            events.push(Event::ClipStarted {
                id: self.clip_id,
                position: self.position,
            });
            self.state = VoiceState::Playing;
        }

        let mut produced = 0usize;
        let layout = ChannelLayout {
            channel_count: channels,
        };

        while produced < frames {
            if self.in_natural_fade_out_window(self.position) && self.state == VoiceState::Playing
            {
                self.state = VoiceState::Stopping;
            }

            let natural_distance = self.record.trim_out_samples - self.position;
            if natural_distance <= 0 {
                if self.record.looped && self.release.is_none() {
                    self.position = self.record.trim_in_samples;
                    events.push(Event::ClipLooped {
                        id: self.clip_id,
                        position: self.position,
                    });
                    continue;
                } else {
                    self.state = VoiceState::Done;
                    events.push(Event::ClipStopped {
                        id: self.clip_id,
                        position: self.position,
                    });
                    break;
                }
            }
            if let Some(release) = &self.release {
                if release.elapsed >= release.total {
                    self.state = VoiceState::Done;
                    events.push(Event::ClipStopped {
                        id: self.clip_id,
                        position: self.position,
                    });
                    break;
                }
            }

            let release_remaining = self
                .release
                .map(|r| (r.total - r.elapsed) as i64)
                .unwrap_or(i64::MAX);
            let sub_len = (frames - produced)
                .min(natural_distance as usize)
                .min(release_remaining as usize)
                .max(1);

            let dest_slice = &mut dest[produced * channels..(produced + sub_len) * channels];
            let got = source.read_into(dest_slice, self.position, sub_len, layout);
            if got < sub_len {
                dest_slice[got * channels..].fill(0.0);
                events.push(Event::BufferUnderrun {
                    position: self.position + got as i64,
                });
            }

            for i in 0..sub_len {
                let fade_in = self.fade_in_gain(i as u32);
                let natural = self.natural_fade_out_gain(self.position + i as i64);
                let release_gain = self
                    .release
                    .map(|r| r.gain_at(i as u32))
                    .unwrap_or(1.0);
                let envelope = fade_in * natural.min(release_gain);
                let smoothed_gain = self.gain.process();
                let factor = envelope * smoothed_gain;
                let frame = &mut dest_slice[i * channels..(i + 1) * channels];
                for sample in frame.iter_mut() {
                    *sample *= factor;
                }
            }

            self.fade_in_elapsed = (self.fade_in_elapsed + sub_len as u32).min(self.record.fade_in_samples);
            self.position += sub_len as i64;
            if let Some(release) = &mut self.release {
                release.elapsed += sub_len as u32;
            }
            produced += sub_len;
        }
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::record::FadeCurve;
    use crate::source::MemorySource;

    fn make_record(trim_out: i64, fade_in: u32, fade_out: u32, looped: bool) -> Arc<ClipRecord> {
        let src = Arc::new(MemorySource::constant(1.0, trim_out as usize + 1000, 48_000));
        let mut r = ClipRecord::new(ClipId::from_raw(1), src, 10.0);
        r.trim_out_samples = trim_out;
        r.fade_in_samples = fade_in;
        r.fade_out_samples = fade_out;
        r.looped = looped;
        r.fade_in_curve = FadeCurve::Linear;
        r.fade_out_curve = FadeCurve::Linear;
        Arc::new(r)
    }

    #[test]
    fn linear_fade_in_matches_formula() {
        let record = make_record(48_000, 4800, 0, false);
        let source = MemorySource::constant(1.0, 49_000, 48_000);
        let mut voice = Voice::start(ClipId::from_raw(1), record, 0, 48_000, 10.0);
        let (mut p, mut c) = crate::rt::event::event_channel(1024);
        let mut dest = vec![0f32; 5000];
        voice.render(&source, &mut dest, 1, 5000, &mut p);
        c.drain_events(|_| {});
        for k in 0..4800usize {
            let expected = k as f32 / 4800.0;
            assert!((dest[k] - expected).abs() < 1e-4, "k={k} got={}", dest[k]);
        }
        for k in 4800..4999usize {
            assert!((dest[k] - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn stop_then_release_reaches_zero_and_stays() {
        let record = make_record(48_000, 0, 0, false);
        let source = MemorySource::constant(1.0, 49_000, 48_000);
        let mut voice = Voice::start(ClipId::from_raw(1), record, 0, 48_000, 10.0);
        let (mut p, mut c) = crate::rt::event::event_channel(1024);
        let mut dest = vec![0f32; 10_000];
        voice.render(&source, &mut dest, 1, 10_000, &mut p);
        voice.request_stop(48_000);
        let mut dest2 = vec![0f32; 1000];
        voice.render(&source, &mut dest2, 1, 1000, &mut p);
        // 10ms release at 48kHz = 480 samples; the ramp never quite reaches zero within its
        // own window (last step is 1/480), but the voice is cut to exact silence once the
        // release completes on the following sample.
        assert!(dest2[479].abs() < 1.0 / 480.0 + 1e-6);
        assert!(dest2[999].abs() < 1e-6);
        c.drain_events(|_| {});
    }

    #[test]
    fn idempotent_stop_emits_single_event() {
        let record = make_record(48_000, 0, 0, false);
        let source = MemorySource::constant(1.0, 49_000, 48_000);
        let mut voice = Voice::start(ClipId::from_raw(1), record, 0, 48_000, 10.0);
        let (mut p, mut c) = crate::rt::event::event_channel(1024);
        voice.render(&source, &mut vec![0f32; 10], 1, 10, &mut p);
        voice.request_stop(48_000);
        voice.request_stop(48_000);
        voice.request_stop(48_000);
        let mut dest = vec![0f32; 1000];
        voice.render(&source, &mut dest, 1, 1000, &mut p);
        let mut stopped_count = 0;
        c.drain_events(|e| {
            if matches!(e, Event::ClipStopped { .. }) {
                stopped_count += 1;
            }
        });
        assert_eq!(stopped_count, 1);
    }

    #[test]
    fn loop_emits_event_and_wraps_to_trim_in() {
        let record = make_record(1000, 0, 0, true);
        let source = MemorySource::ramp(1000, 48_000);
        let mut voice = Voice::start(ClipId::from_raw(1), record, 0, 48_000, 10.0);
        let (mut p, mut c) = crate::rt::event::event_channel(1024);
        let mut dest = vec![0f32; 3200];
        voice.render(&source, &mut dest, 1, 3200, &mut p);
        let mut loop_count = 0;
        c.drain_events(|e| {
            if matches!(e, Event::ClipLooped { .. }) {
                loop_count += 1;
            }
        });
        assert_eq!(loop_count, 3);
        assert!((dest[0] - 0.0).abs() < 1e-6);
        assert!((dest[3199] - 199.0 / 1000.0).abs() < 1e-4);
    }

    #[test]
    fn overlap_takes_shorter_remaining_gain() {
        // Natural fade-out window is long (1000 samples); explicit stop installs a short
        // 10ms (480 sample) linear release — the release should dominate once shorter.
        let record = make_record(2000, 0, 1000, false);
        let source = MemorySource::constant(1.0, 3000, 48_000);
        let mut voice = Voice::start(ClipId::from_raw(1), record, 0, 48_000, 10.0);
        let (mut p, mut c) = crate::rt::event::event_channel(1024);
        // Run until just inside the natural fade-out window (position 1500, 500 left -> 0.5).
        voice.render(&source, &mut vec![0f32; 1500], 1, 1500, &mut p);
        voice.request_stop(48_000);
        let mut dest = vec![0f32; 600];
        voice.render(&source, &mut dest, 1, 600, &mut p);
        // After 480 more samples the release has fully closed even though natural fade-out
        // still has 20 samples left (500 - 480); last ramp step is 1/480, not exactly zero.
        assert!(dest[479].abs() < 1.0 / 480.0 + 1e-6);
        c.drain_events(|_| {});
    }
}
