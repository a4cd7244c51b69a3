//! The decoded-audio-file contract the core consumes but never implements.
//!
//! Real decoders (file-backed, streaming, network) live outside this crate; see §4.5 and §1's
//! Out-of-scope list. [`MemorySource`] is the one concrete implementation this crate ships: a
//! deterministic, always-ready in-memory buffer used by the offline driver and by the test
//! suite, not a decoder.

use std::sync::Arc;

/// Channel layout hint passed to [`Source::read_into`]. The core never resamples or remixes on
/// behalf of the Source; this only tells the Source which of its own channels to write where.
#[derive(Copy, Clone, Debug)]
pub struct ChannelLayout {
    pub channel_count: usize,
}

/// Static facts about a Source, queried once at registration time.
#[derive(Copy, Clone, Debug)]
pub struct SourceMetadata {
    pub channel_count: usize,
    pub sample_rate: u32,
    pub duration_frames: i64,
}

/// Abstract seekable PCM provider.
///
/// Implementations must make `read_into` safe to call from the audio thread: non-blocking, no
/// allocation, no locking that could stall. If the backing storage isn't ready for the requested
/// range, a short read (or zero frames) is an acceptable answer — the Transport fills the
/// remainder with silence and emits `Event::BufferUnderrun`. Background streaming to keep pace
/// with playback is the Source's own concern, invisible to the core.
pub trait Source: Send + Sync {
    fn metadata(&self) -> SourceMetadata;

    /// Writes up to `frames` frames starting at `start_frame` (in source-frame units) into
    /// `dest`, interleaved according to `layout`. Returns the number of frames actually written,
    /// which may be less than `frames` (a short read) but never more.
    fn read_into(
        &self,
        dest: &mut [f32],
        start_frame: i64,
        frames: usize,
        layout: ChannelLayout,
    ) -> usize;
}

pub type SourceRef = Arc<dyn Source>;

/// A trivial, always-ready Source backed by an in-memory sample buffer.
///
/// Not a decoder. This is the deterministic "external collaborator" stand-in called for by the
/// spec's testable-properties section: every scenario and property test in this crate drives
/// playback through one of these rather than a real file.
pub struct MemorySource {
    data: Vec<f32>,
    channel_count: usize,
    sample_rate: u32,
}

impl MemorySource {
    /// `data` is interleaved, `channel_count` channels wide.
    pub fn new(data: Vec<f32>, channel_count: usize, sample_rate: u32) -> Self {
        assert!(channel_count > 0, "channel_count must be positive");
        assert_eq!(
            data.len() % channel_count,
            0,
            "data length must be a multiple of channel_count"
        );
        Self {
            data,
            channel_count,
            sample_rate,
        }
    }

    /// Builds a mono constant-value source of the given frame count. Handy for fade/trim tests.
    pub fn constant(value: f32, frame_count: usize, sample_rate: u32) -> Self {
        Self::new(vec![value; frame_count], 1, sample_rate)
    }

    /// Builds a mono identity ramp `i / frame_count` source. Handy for loop-boundary tests.
    pub fn ramp(frame_count: usize, sample_rate: u32) -> Self {
        let data = (0..frame_count)
            .map(|i| i as f32 / frame_count as f32)
            .collect();
        Self::new(data, 1, sample_rate)
    }

    fn frame_count(&self) -> usize {
        self.data.len() / self.channel_count
    }
}

impl Source for MemorySource {
    fn metadata(&self) -> SourceMetadata {
        SourceMetadata {
            channel_count: self.channel_count,
            sample_rate: self.sample_rate,
            duration_frames: self.frame_count() as i64,
        }
    }

    fn read_into(
        &self,
        dest: &mut [f32],
        start_frame: i64,
        frames: usize,
        layout: ChannelLayout,
    ) -> usize {
        let total_frames = self.frame_count() as i64;
        if start_frame < 0 || start_frame >= total_frames {
            return 0;
        }
        let available = (total_frames - start_frame) as usize;
        let frames_to_read = frames.min(available);
        let out_channels = layout.channel_count;
        for frame in 0..frames_to_read {
            let src_frame_index = (start_frame as usize + frame) * self.channel_count;
            for ch in 0..out_channels {
                let src_ch = ch.min(self.channel_count - 1);
                let value = self.data[src_frame_index + src_ch];
                dest[frame * out_channels + ch] = value;
            }
        }
        frames_to_read
    }
}
