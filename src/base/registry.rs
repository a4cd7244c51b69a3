use crate::base::record::{ClipRecord, CuePoint, FadeCurve};
use crate::error::EngineError;
use crate::ids::{ClipId, UNASSIGNED_GROUP};
use crate::source::SourceRef;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Maximum number of *concurrently* registered clips. A fixed ceiling keeps the registry's
/// backing storage (one [`ArcSwapOption`] slot per clip) pre-allocated, same discipline as the
/// rest of the real-time-adjacent state in this crate. Slot indices are recycled on
/// [`ClipRegistry::unregister`] (see `free_indices`), so this bounds clips alive at once, not
/// registrations over the process's lifetime.
pub const MAX_REGISTERED_CLIPS: usize = 4096;

/// Published, per-clip slot. Each holds the current [`ClipRecord`] snapshot (or `None` if the
/// clip was never registered / has been unregistered).
///
/// [`ArcSwapOption`] is the atomic-pointer-publish-plus-reclaim-via-refcounting primitive this
/// type is built on: the UI thread calls `store`, the audio thread calls `load` (or simply
/// clones the `Arc` once at `StartClip` time and keeps it for the voice's lifetime — see
/// `rt::Transport`). Because the audio thread only ever holds a cloned `Arc`, not a borrowed
/// reference into the slot, a record can be swapped out and its old `Arc` dropped by the UI
/// thread without ever blocking, and without a voice's already-captured snapshot becoming
/// invalid mid-flight.
pub type ClipSlot = ArcSwapOption<ClipRecord>;

/// Owns the published [`ClipRecord`] snapshots and enforces validation at the UI-thread
/// boundary (§4.1).
///
/// `slots` is shared (via `Arc`) with the audio thread so that resolving a `ClipId` to its
/// current snapshot on `StartClip` never requires a lock: it's a direct index into a
/// pre-allocated vector of atomics. `generations` is shared alongside it so the audio thread can
/// reject a `ClipId` whose slot has since been recycled for a different clip (see
/// [`crate::ids::ClipId`]) without ever needing to consult the registry itself.
///
/// `free_indices` and `next_fresh_index` are UI-thread-only bookkeeping (registration only ever
/// happens there); a `Mutex` is fine here, unlike anywhere on the audio path, since nothing here
/// is real-time.
pub struct ClipRegistry {
    slots: Arc<Vec<ClipSlot>>,
    generations: Arc<Vec<AtomicU32>>,
    free_indices: Mutex<Vec<u32>>,
    next_fresh_index: AtomicU32,
    num_groups: u8,
    default_release_ms: f32,
    sample_rate: u32,
}

impl ClipRegistry {
    /// `sample_rate` must match the engine's configured rate (§9 "Source rate mismatch"): a
    /// `Source` reporting any other rate is rejected at [`Self::register`] rather than resampled,
    /// since this core has no SRC stage.
    pub fn new(num_groups: u8, default_release_ms: f32, sample_rate: u32) -> Self {
        let mut slots = Vec::with_capacity(MAX_REGISTERED_CLIPS);
        slots.resize_with(MAX_REGISTERED_CLIPS, || ArcSwapOption::from(None));
        let mut generations = Vec::with_capacity(MAX_REGISTERED_CLIPS);
        generations.resize_with(MAX_REGISTERED_CLIPS, || AtomicU32::new(0));
        Self {
            slots: Arc::new(slots),
            generations: Arc::new(generations),
            free_indices: Mutex::new(Vec::new()),
            next_fresh_index: AtomicU32::new(0),
            num_groups,
            default_release_ms,
            sample_rate,
        }
    }

    /// Shared handle into the backing slots, given to the audio thread at engine init so it can
    /// resolve `ClipId -> ClipRecord` without ever locking.
    pub fn slots(&self) -> Arc<Vec<ClipSlot>> {
        Arc::clone(&self.slots)
    }

    /// Shared handle into the per-slot generation counters, given to the audio thread alongside
    /// [`Self::slots`] so it can validate a `ClipId` against slot recycling on its own.
    pub fn generations(&self) -> Arc<Vec<AtomicU32>> {
        Arc::clone(&self.generations)
    }

    /// Claims a free slot index, preferring a recycled one over growing into a never-used slot.
    fn alloc_index(&self) -> Result<u32, EngineError> {
        if let Some(index) = self.free_indices.lock().unwrap().pop() {
            return Ok(index);
        }
        let index = self.next_fresh_index.fetch_add(1, Ordering::Relaxed);
        if index as usize >= self.slots.len() {
            tracing::warn!(capacity = self.slots.len(), "clip registry is full");
            return Err(EngineError::RegistryFull);
        }
        Ok(index)
    }

    pub(crate) fn index_of(&self, id: ClipId) -> Result<usize, EngineError> {
        if !id.is_valid() {
            return Err(EngineError::InvalidHandle);
        }
        let index = id.index() as usize;
        if index >= self.slots.len() {
            return Err(EngineError::InvalidHandle);
        }
        if self.generations[index].load(Ordering::Relaxed) != id.generation() {
            return Err(EngineError::InvalidHandle);
        }
        Ok(index)
    }

    fn current(&self, id: ClipId) -> Result<Arc<ClipRecord>, EngineError> {
        let index = self.index_of(id)?;
        self.slots[index].load_full().ok_or(EngineError::ClipNotRegistered)
    }

    fn publish(&self, index: usize, record: ClipRecord) -> Result<(), EngineError> {
        if let Err(err) = record.validate() {
            tracing::warn!(clip = %record.id, error = %err, "rejected clip record update");
            return Err(err);
        }
        self.slots[index].store(Some(Arc::new(record)));
        Ok(())
    }

    /// Registers a new clip against `source`, returning its [`ClipId`].
    ///
    /// Rejects `source` synchronously if its reported sample rate does not match the engine's
    /// configured rate (§9): there is no implicit sample-rate conversion in this core.
    pub fn register(&self, source: SourceRef) -> Result<ClipId, EngineError> {
        if source.metadata().sample_rate != self.sample_rate {
            tracing::warn!(
                source_rate = source.metadata().sample_rate,
                engine_rate = self.sample_rate,
                "rejected clip registration: sample rate mismatch"
            );
            return Err(EngineError::InvalidParameter(
                "source sample rate does not match the engine's configured sample rate",
            ));
        }
        let index = self.alloc_index()?;
        let generation = self.generations[index as usize].load(Ordering::Relaxed);
        let id = ClipId::new(index, generation);
        if self.slots[index as usize].load().is_some() {
            // Should never happen: a fresh index starts empty, and a recycled one was cleared
            // by unregister before being pushed onto the free list.
            tracing::error!(clip = %id, "clip id collision during registration");
            return Err(EngineError::InternalError("clip id collision"));
        }
        let record = ClipRecord::new(id, source, self.default_release_ms);
        self.publish(index as usize, record)?;
        tracing::debug!(clip = %id, "clip registered");
        Ok(id)
    }

    /// Retires a clip's snapshot and returns its slot index to the free list for reuse. Voices
    /// that already captured the old snapshot's `Arc` keep playing it to completion; the slot's
    /// generation is bumped first so any `ClipId` captured before this call — including by a
    /// still-running voice's audio-thread-side resolution — stops resolving to this slot the
    /// instant it's reused, rather than aliasing whatever clip gets registered into it next.
    pub fn unregister(&self, id: ClipId) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        if self.slots[index].swap(None).is_none() {
            return Err(EngineError::ClipNotRegistered);
        }
        self.generations[index].fetch_add(1, Ordering::Relaxed);
        self.free_indices.lock().unwrap().push(index as u32);
        tracing::debug!(clip = %id, "clip unregistered");
        Ok(())
    }

    pub fn snapshot(&self, id: ClipId) -> Result<Arc<ClipRecord>, EngineError> {
        self.current(id)
    }

    pub fn update_trim(&self, id: ClipId, trim_in: i64, trim_out: i64) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        record.trim_in_samples = trim_in;
        record.trim_out_samples = trim_out;
        self.publish(index, record)
    }

    pub fn update_fades(
        &self,
        id: ClipId,
        fade_in_samples: u32,
        fade_out_samples: u32,
        fade_in_curve: FadeCurve,
        fade_out_curve: FadeCurve,
    ) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        record.fade_in_samples = fade_in_samples;
        record.fade_out_samples = fade_out_samples;
        record.fade_in_curve = fade_in_curve;
        record.fade_out_curve = fade_out_curve;
        self.publish(index, record)
    }

    /// Updates the clip's configured gain. Per §4.1 this takes effect immediately for currently
    /// playing voices — but that is accomplished by the caller also pushing an
    /// `UpdateGain` [`crate::rt::Command`] into the audio thread's queue; this method only
    /// updates what future `StartClip`s will pick up.
    pub fn update_gain_db(&self, id: ClipId, gain_db: f32) -> Result<f32, EngineError> {
        if !gain_db.is_finite() {
            return Err(EngineError::InvalidParameter("gain_db must be finite"));
        }
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        let linear = crate::conversion_util::db_to_linear(gain_db);
        record.gain_linear = linear;
        self.publish(index, record)?;
        Ok(linear)
    }

    pub fn set_loop(&self, id: ClipId, looped: bool) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        record.looped = looped;
        self.publish(index, record)
    }

    pub fn assign_group(&self, id: ClipId, group_index: u8) -> Result<(), EngineError> {
        if group_index != UNASSIGNED_GROUP && group_index >= self.num_groups {
            tracing::warn!(clip = %id, group_index, "rejected group assignment: unknown group index");
            return Err(EngineError::InvalidParameter("unknown group index"));
        }
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        record.group_index = group_index;
        self.publish(index, record)
    }

    pub fn set_output_bus(&self, id: ClipId, bus: u8) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        record.output_bus = bus;
        self.publish(index, record)
    }

    /// Clamps `position_frames` into `[0, source_duration]` and inserts it in sorted order,
    /// returning its index.
    pub fn add_cue_point(
        &self,
        id: ClipId,
        position_frames: i64,
        name: String,
        color: u32,
    ) -> Result<usize, EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        let duration = record.source.metadata().duration_frames;
        let clamped = position_frames.clamp(0, duration);
        let mut cues = (*record.cue_points).clone();
        let insert_at = cues
            .partition_point(|c| c.position_frames < clamped);
        cues.insert(
            insert_at,
            CuePoint {
                position_frames: clamped,
                name,
                color,
            },
        );
        record.cue_points = Arc::new(cues);
        self.publish(index, record)?;
        Ok(insert_at)
    }

    pub fn remove_cue_point(&self, id: ClipId, cue_index: usize) -> Result<(), EngineError> {
        let index = self.index_of(id)?;
        let mut record = (*self.current(id)?).clone();
        let mut cues = (*record.cue_points).clone();
        if cue_index >= cues.len() {
            return Err(EngineError::InvalidParameter("cue point index out of range"));
        }
        cues.remove(cue_index);
        record.cue_points = Arc::new(cues);
        self.publish(index, record)
    }

    /// Looks up the source-frame position of a cue point, for the caller to turn into a `Seek`
    /// command (§4.1: "a convenience that emits a Seek command").
    pub fn cue_point_position(&self, id: ClipId, cue_index: usize) -> Result<i64, EngineError> {
        let record = self.current(id)?;
        record
            .cue_points
            .get(cue_index)
            .map(|c| c.position_frames)
            .ok_or(EngineError::InvalidParameter("cue point index out of range"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn registry() -> ClipRegistry {
        ClipRegistry::new(4, 10.0, 48_000)
    }

    fn source() -> SourceRef {
        Arc::new(MemorySource::constant(1.0, 48_000, 48_000))
    }

    /// A single-frame source, kept tiny since the capacity tests below register thousands at
    /// once.
    fn tiny_source() -> SourceRef {
        Arc::new(MemorySource::constant(1.0, 1, 48_000))
    }

    #[test]
    fn register_rejects_mismatched_sample_rate() {
        let reg = registry();
        let mismatched = Arc::new(MemorySource::constant(1.0, 48_000, 44_100));
        assert!(matches!(
            reg.register(mismatched),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn register_then_query_matches_defaults() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        let snap = reg.snapshot(id).unwrap();
        assert_eq!(snap.trim_in_samples, 0);
        assert_eq!(snap.trim_out_samples, 48_000);
        assert_eq!(snap.gain_linear, 1.0);
    }

    #[test]
    fn update_then_query_reflects_last_write() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        reg.update_trim(id, 100, 2000).unwrap();
        let snap = reg.snapshot(id).unwrap();
        assert_eq!(snap.trim_in_samples, 100);
        assert_eq!(snap.trim_out_samples, 2000);
    }

    #[test]
    fn invalid_trim_is_rejected_and_state_unchanged() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        let before = reg.snapshot(id).unwrap();
        let err = reg.update_trim(id, 5000, 10).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTrimPoints(_)));
        let after = reg.snapshot(id).unwrap();
        assert_eq!(before.trim_in_samples, after.trim_in_samples);
        assert_eq!(before.trim_out_samples, after.trim_out_samples);
    }

    #[test]
    fn invalid_handle_on_unknown_clip() {
        let reg = registry();
        assert!(matches!(
            reg.snapshot(ClipId::from_raw(999_999)),
            Err(EngineError::InvalidHandle)
        ));
    }

    #[test]
    fn unregister_then_not_registered() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        reg.unregister(id).unwrap();
        assert!(matches!(
            reg.snapshot(id),
            Err(EngineError::ClipNotRegistered)
        ));
    }

    #[test]
    fn cue_points_stay_sorted_and_clamped() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        reg.add_cue_point(id, 1000, "b".into(), 0).unwrap();
        let idx_a = reg.add_cue_point(id, 10, "a".into(), 0).unwrap();
        assert_eq!(idx_a, 0);
        let idx_over = reg.add_cue_point(id, 1_000_000, "over".into(), 0).unwrap();
        let pos = reg.cue_point_position(id, idx_over).unwrap();
        assert_eq!(pos, 48_000);
    }

    #[test]
    fn assign_unknown_group_rejected() {
        let reg = registry();
        let id = reg.register(source()).unwrap();
        assert!(matches!(
            reg.assign_group(id, 9),
            Err(EngineError::InvalidParameter(_))
        ));
    }

    #[test]
    fn unregister_recycles_the_slot_index() {
        let reg = registry();
        let id = reg.register(tiny_source()).unwrap();
        reg.unregister(id).unwrap();
        // A fresh registration should reuse the vacated slot rather than growing past it, so
        // MAX_REGISTERED_CLIPS bounds clips alive at once, not registrations over the process's
        // lifetime.
        for _ in 0..MAX_REGISTERED_CLIPS {
            let fresh = reg.register(tiny_source()).unwrap();
            reg.unregister(fresh).unwrap();
        }
    }

    #[test]
    fn stale_handle_into_a_recycled_slot_is_rejected() {
        let reg = registry();
        let old_id = reg.register(tiny_source()).unwrap();
        reg.unregister(old_id).unwrap();
        let new_id = reg.register(tiny_source()).unwrap();
        assert_ne!(old_id, new_id, "recycled slot must mint a distinguishable handle");
        assert!(matches!(
            reg.snapshot(old_id),
            Err(EngineError::InvalidHandle)
        ));
        assert!(reg.snapshot(new_id).is_ok());
    }

    #[test]
    fn registering_past_capacity_returns_registry_full() {
        let reg = registry();
        let mut ids = Vec::with_capacity(MAX_REGISTERED_CLIPS);
        for _ in 0..MAX_REGISTERED_CLIPS {
            ids.push(reg.register(tiny_source()).unwrap());
        }
        assert!(matches!(
            reg.register(tiny_source()),
            Err(EngineError::RegistryFull)
        ));
        // Freeing one slot makes room for exactly one more registration.
        reg.unregister(ids.pop().unwrap()).unwrap();
        assert!(reg.register(tiny_source()).is_ok());
    }
}
