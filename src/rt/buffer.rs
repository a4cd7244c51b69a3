use crate::error::EngineError;
use std::collections::Bound;
use std::ops::RangeBounds;

/// Owned, pre-allocated audio storage: one `f32` per (frame, channel), interleaved.
///
/// Pre-allocated once at engine init and reused buffer after buffer so no allocation happens on
/// the audio thread.
pub struct OwnedAudioBuffer {
    data: Vec<f32>,
    channel_count: usize,
    frame_count: usize,
}

impl std::fmt::Debug for OwnedAudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedAudioBuffer")
            .field("channel_count", &self.channel_count)
            .field("frame_count", &self.frame_count)
            .finish()
    }
}

impl OwnedAudioBuffer {
    /// Creates an owned audio buffer with the given topology.
    pub fn new(channel_count: usize, frame_count: usize) -> Self {
        Self {
            data: vec![0.0; channel_count * frame_count],
            channel_count,
            frame_count,
        }
    }

    pub fn to_buf(&self) -> AudioBuf {
        AudioBuf {
            data: self.data.as_slice(),
            frame_count: self.frame_count,
            channel_count: self.channel_count,
        }
    }

    pub fn to_buf_mut(&mut self) -> AudioBufMut {
        AudioBufMut {
            data: self.data.as_mut_slice(),
            frame_count: self.frame_count,
            channel_count: self.channel_count,
        }
    }
}

// TODO-medium Replace this with one of the audio buffer types in the Rust ecosystem
//  (dasp_slice, audio, fon, ...)
#[derive(Copy, Clone, Debug)]
pub struct AbstractAudioBuf<T: AsRef<[f32]>> {
    data: T,
    frame_count: usize,
    channel_count: usize,
}

pub type AudioBuf<'a> = AbstractAudioBuf<&'a [f32]>;
pub type AudioBufMut<'a> = AbstractAudioBuf<&'a mut [f32]>;

impl<'a> AudioBuf<'a> {
    /// # Panics
    ///
    /// Panics if requested frame count is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the size of the given data chunk isn't large enough.
    pub fn from_slice(
        chunk: &'a [f32],
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self, EngineError> {
        if frame_count == 0 {
            panic!("attempt to create buffer from sliced data with a frame count of zero");
        }
        let required_slice_length = channel_count * frame_count;
        if chunk.len() < required_slice_length {
            return Err(EngineError::InvalidParameter("given slice not large enough"));
        }
        Ok(AudioBuf {
            data: &chunk[0..required_slice_length],
            frame_count,
            channel_count,
        })
    }
}

impl<'a> AudioBufMut<'a> {
    /// # Panics
    ///
    /// Panics if requested frame count is zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the size of the given data chunk isn't large enough.
    pub fn from_slice(
        chunk: &'a mut [f32],
        channel_count: usize,
        frame_count: usize,
    ) -> Result<Self, EngineError> {
        if frame_count == 0 {
            panic!("attempt to create buffer from sliced data with a frame count of zero");
        }
        let required_slice_length = channel_count * frame_count;
        if chunk.len() < required_slice_length {
            return Err(EngineError::InvalidParameter("given slice not large enough"));
        }
        let buf = AudioBufMut {
            data: &mut chunk[0..required_slice_length],
            frame_count,
            channel_count,
        };
        Ok(buf)
    }

    /// # Safety
    ///
    /// The driver owns `data` and must guarantee it is valid for `channel_count * frame_count`
    /// contiguous `f32`s for the duration of the call.
    ///
    /// # Panics
    ///
    /// Panics if requested frame count is zero.
    pub unsafe fn from_raw(data: *mut f32, channel_count: usize, frame_count: usize) -> Self {
        if frame_count == 0 {
            panic!("attempt to create buffer from raw data with a frame count of zero");
        }
        AudioBufMut {
            data: std::slice::from_raw_parts_mut(data, channel_count * frame_count),
            frame_count,
            channel_count,
        }
    }
}

impl<T: AsRef<[f32]>> AbstractAudioBuf<T> {
    /// Destination buffer must have the same number of channels and frames.
    pub fn copy_to(&self, dest: &mut AudioBufMut) {
        assert_eq!(dest.channel_count(), self.channel_count(), "different channel counts");
        assert_eq!(dest.frame_count(), self.frame_count(), "different frame counts");
        dest.data_as_mut_slice().copy_from_slice(self.data.as_ref());
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn data_as_slice(&self) -> &[f32] {
        self.data.as_ref()
    }

    pub fn sample_value_at(&self, index: SampleIndex) -> Option<f32> {
        self.data
            .as_ref()
            .get(index.frame * self.channel_count + index.channel)
            .copied()
    }

    pub fn slice(&self, bounds: impl RangeBounds<usize>) -> AudioBuf {
        let desc = self.prepare_slice(bounds);
        AudioBuf {
            data: &self.data.as_ref()[desc.data_start_index..desc.data_end_index],
            frame_count: desc.new_frame_count,
            channel_count: desc.channel_count,
        }
    }

    fn prepare_slice(&self, bounds: impl RangeBounds<usize>) -> SliceDescriptor {
        use Bound::*;
        let start_frame = match bounds.start_bound() {
            Included(i) => *i,
            Excluded(i) => *i + 1,
            Unbounded => 0,
        };
        let end_frame = match bounds.end_bound() {
            Included(i) => *i + 1,
            Excluded(i) => *i,
            Unbounded => self.frame_count,
        };
        assert!(
            start_frame <= end_frame && end_frame <= self.frame_count,
            "slice range out of bounds"
        );
        SliceDescriptor {
            new_frame_count: end_frame - start_frame,
            data_start_index: start_frame * self.channel_count,
            data_end_index: end_frame * self.channel_count,
            channel_count: self.channel_count,
        }
    }
}

struct SliceDescriptor {
    new_frame_count: usize,
    data_start_index: usize,
    data_end_index: usize,
    channel_count: usize,
}

impl<T: AsRef<[f32]> + AsMut<[f32]>> AbstractAudioBuf<T> {
    pub fn data_as_mut_slice(&mut self) -> &mut [f32] {
        self.data.as_mut()
    }

    pub fn slice_mut(&mut self, bounds: impl RangeBounds<usize>) -> AudioBufMut {
        let desc = self.prepare_slice(bounds);
        AudioBufMut {
            data: &mut self.data.as_mut()[desc.data_start_index..desc.data_end_index],
            frame_count: desc.new_frame_count,
            channel_count: desc.channel_count,
        }
    }

    /// Adds `other`'s samples into `self`, sample by sample. Used to sum voices into a group
    /// bus and groups into the master bus.
    pub fn add_from(&mut self, other: &AudioBuf) {
        assert_eq!(self.channel_count(), other.channel_count());
        assert_eq!(self.frame_count(), other.frame_count());
        for (dst, src) in self.data.as_mut().iter_mut().zip(other.data_as_slice()) {
            *dst += src;
        }
    }

    /// Multiplies every sample by `factor`.
    pub fn scale(&mut self, factor: f32) {
        for sample in self.data.as_mut().iter_mut() {
            *sample *= factor;
        }
    }

    pub fn modify_frames(&mut self, mut f: impl FnMut(SampleDescriptor) -> f32) {
        for frame_index in 0..self.frame_count {
            for ch in 0..self.channel_count {
                let sample_value = &mut self.data.as_mut()[frame_index * self.channel_count + ch];
                let descriptor = SampleDescriptor {
                    index: SampleIndex {
                        frame: frame_index,
                        channel: ch,
                    },
                    value: *sample_value,
                };
                *sample_value = f(descriptor);
            }
        }
    }

    /// Fills the buffer with zero samples.
    pub fn clear(&mut self) {
        self.data.as_mut().fill(0.0);
    }
}

pub struct SampleDescriptor {
    pub index: SampleIndex,
    pub value: f32,
}

#[derive(Copy, Clone)]
pub struct SampleIndex {
    pub channel: usize,
    pub frame: usize,
}

impl SampleIndex {
    pub fn new(channel: usize, frame: usize) -> Self {
        Self { channel, frame }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_and_scale() {
        let mut buf = OwnedAudioBuffer::new(2, 4);
        {
            let mut m = buf.to_buf_mut();
            m.modify_frames(|d| (d.index.frame + 1) as f32);
            m.scale(2.0);
        }
        let b = buf.to_buf();
        assert_eq!(b.sample_value_at(SampleIndex::new(0, 0)), Some(2.0));
        assert_eq!(b.sample_value_at(SampleIndex::new(1, 3)), Some(8.0));
    }

    #[test]
    fn add_from_sums_samples() {
        let mut a = OwnedAudioBuffer::new(1, 3);
        let mut b = OwnedAudioBuffer::new(1, 3);
        a.to_buf_mut().modify_frames(|_| 1.0);
        b.to_buf_mut().modify_frames(|_| 2.0);
        a.to_buf_mut().add_from(&b.to_buf());
        assert_eq!(a.to_buf().sample_value_at(SampleIndex::new(0, 0)), Some(3.0));
    }

    #[test]
    fn slice_bounds() {
        let mut buf = OwnedAudioBuffer::new(1, 10);
        buf.to_buf_mut().modify_frames(|d| d.index.frame as f32);
        let s = buf.to_buf().slice(2..5);
        assert_eq!(s.frame_count(), 3);
        assert_eq!(s.sample_value_at(SampleIndex::new(0, 0)), Some(2.0));
    }
}
