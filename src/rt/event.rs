use crate::ids::ClipId;
use rtrb::RingBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An observable occurrence emitted by the audio thread (§4.3).
#[derive(Copy, Clone, Debug)]
pub enum Event {
    ClipStarted { id: ClipId, position: i64 },
    ClipStopped { id: ClipId, position: i64 },
    ClipLooped { id: ClipId, position: i64 },
    BufferUnderrun { position: i64 },
    DeviceChanged,
}

/// Audio-thread handle for emitting [`Event`]s. If the ring is full, the event is dropped and
/// [`dropped`] is incremented instead of blocking — the audio thread must never block on a full
/// event queue.
pub struct EventProducer {
    inner: rtrb::Producer<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventProducer {
    pub fn push(&mut self, event: Event) {
        if self.inner.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// UI-thread handle for draining [`Event`]s.
pub struct EventConsumer {
    inner: rtrb::Consumer<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventConsumer {
    /// Drains every currently pending event, invoking `callback` for each in emission order.
    ///
    /// `BufferUnderrun` is logged at `warn!` here (UI thread, never the audio thread that
    /// emitted it) per the audio-path-degradation handling in §7.
    pub fn drain_events(&mut self, mut callback: impl FnMut(Event)) {
        while let Ok(event) = self.inner.pop() {
            if let Event::BufferUnderrun { position } = event {
                tracing::warn!(position, "buffer underrun");
            }
            callback(event);
        }
    }

    /// Number of events dropped so far because the ring was full when the audio thread tried to
    /// emit one.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub fn event_channel(capacity: usize) -> (EventProducer, EventConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventProducer {
            inner: producer,
            dropped: Arc::clone(&dropped),
        },
        EventConsumer {
            inner: consumer,
            dropped,
        },
    )
}
