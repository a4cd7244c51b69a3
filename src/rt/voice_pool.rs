use crate::error::EngineError;
use crate::ids::ClipId;
use crate::rt::voice::Voice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-size, pre-allocated storage for active [`Voice`]s (§5 "Pre-allocation discipline").
///
/// Never grows past the capacity it was built with. `StartClip` either finds a free slot or the
/// caller gets `NoVoiceAvailable` — this can surface both synchronously, if the UI thread checks
/// occupancy before enqueuing via the shared `occupancy` counter, and from the audio thread
/// itself when the command is drained and the pool turns out to be full (§7) — the latter can
/// happen because the UI-side check and the audio-side drain are not atomic with each other: two
/// `start_clip` calls can both observe a free slot and both enqueue, but only one wins the race
/// once the audio thread actually drains them.
pub struct VoicePool {
    slots: Vec<Option<Voice>>,
    occupancy: Arc<AtomicUsize>,
}

impl VoicePool {
    pub fn new(capacity: usize) -> Self {
        Self::with_shared_occupancy(capacity, Arc::new(AtomicUsize::new(0)))
    }

    /// Builds a pool sharing its occupancy counter with `occupancy`, so a UI-thread handle (see
    /// [`crate::base::Engine::start_clip`]) can read it without reaching into audio-thread-owned
    /// state.
    pub fn with_shared_occupancy(capacity: usize, occupancy: Arc<AtomicUsize>) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        occupancy.store(0, Ordering::Relaxed);
        Self { slots, occupancy }
    }

    pub fn occupancy_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.occupancy)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.slots.iter().any(|s| s.is_none())
    }

    /// Inserts `voice` into the first free slot, returning its index.
    pub fn allocate(&mut self, voice: Voice) -> Result<usize, EngineError> {
        let index = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(EngineError::NoVoiceAvailable)?;
        self.slots[index] = Some(voice);
        self.occupancy.store(self.active_count(), Ordering::Relaxed);
        Ok(index)
    }

    /// Drops every slot whose voice has reached `VoiceState::Done`, freeing it for reuse.
    pub fn reclaim_done(&mut self) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|v| v.is_done()) {
                *slot = None;
            }
        }
        self.occupancy.store(self.active_count(), Ordering::Relaxed);
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Voice> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    /// Every voice currently playing `clip_id` — `StopClip`, `UpdateGain` and `Seek` commands
    /// target all of them at once, since a soundboard clip can be playing as several concurrent
    /// voices (§3 "Multiple Starts of the same clip are permitted concurrently").
    pub fn iter_mut_for_clip(&mut self, clip_id: ClipId) -> impl Iterator<Item = &mut Voice> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .filter(move |v| v.clip_id == clip_id)
    }

    pub fn iter_mut_for_group(&mut self, group_index: u8) -> impl Iterator<Item = &mut Voice> {
        self.slots
            .iter_mut()
            .filter_map(|s| s.as_mut())
            .filter(move |v| v.record.group_index == group_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::record::ClipRecord;
    use crate::source::MemorySource;
    use std::sync::Arc;

    fn make_voice(clip_id: ClipId) -> Voice {
        let src = Arc::new(MemorySource::constant(1.0, 1000, 48_000));
        let record = Arc::new(ClipRecord::new(clip_id, src, 10.0));
        Voice::start(clip_id, record, 0, 48_000, 10.0)
    }

    #[test]
    fn allocate_until_exhausted_then_rejects() {
        let mut pool = VoicePool::new(2);
        pool.allocate(make_voice(ClipId::from_raw(1))).unwrap();
        pool.allocate(make_voice(ClipId::from_raw(2))).unwrap();
        assert!(matches!(
            pool.allocate(make_voice(ClipId::from_raw(3))),
            Err(EngineError::NoVoiceAvailable)
        ));
    }

    #[test]
    fn reclaim_frees_done_slots_for_reuse() {
        let mut pool = VoicePool::new(1);
        let idx = pool.allocate(make_voice(ClipId::from_raw(1))).unwrap();
        pool.slots[idx].as_mut().unwrap().state = crate::rt::voice::VoiceState::Done;
        pool.reclaim_done();
        assert_eq!(pool.active_count(), 0);
        pool.allocate(make_voice(ClipId::from_raw(2))).unwrap();
    }

    #[test]
    fn iter_mut_for_clip_finds_all_concurrent_voices() {
        let mut pool = VoicePool::new(4);
        pool.allocate(make_voice(ClipId::from_raw(1))).unwrap();
        pool.allocate(make_voice(ClipId::from_raw(1))).unwrap();
        pool.allocate(make_voice(ClipId::from_raw(2))).unwrap();
        let count = pool.iter_mut_for_clip(ClipId::from_raw(1)).count();
        assert_eq!(count, 2);
    }
}
