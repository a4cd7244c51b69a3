use crate::error::EngineError;
use crate::ids::ClipId;
use rtrb::{PushError, RingBuffer};

/// A single UI-thread instruction for the audio thread (§4.2).
///
/// Commands enqueued before the audio thread's next `process` call are observed during that
/// call, in enqueue order; commands enqueued during a `process` call are observed no later than
/// the following call.
#[derive(Copy, Clone, Debug)]
pub enum Command {
    StartClip { clip_id: ClipId, at_sample_offset: i64 },
    StopClip { clip_id: ClipId },
    StopAll,
    StopAllInGroup { group_index: u8 },
    UpdateGain { clip_id: ClipId, gain_linear: f32 },
    Seek { clip_id: ClipId, to_source_sample: i64 },
    SetGroupGain { group_index: u8, gain_linear: f32 },
    SetGroupMute { group_index: u8, muted: bool },
    SetGroupSolo { group_index: u8, soloed: bool },
}

/// UI-thread handle for enqueuing [`Command`]s. The single producer half of a bounded SPSC ring.
pub struct CommandProducer {
    inner: rtrb::Producer<Command>,
}

impl CommandProducer {
    /// Enqueues `command`. Fails with [`EngineError::QueueFull`] if the ring has no free slot;
    /// already-enqueued commands are left intact and will still run on the next `process` call
    /// (§8 scenario F).
    pub fn push(&mut self, command: Command) -> Result<(), EngineError> {
        self.inner.push(command).map_err(|PushError::Full(_)| EngineError::QueueFull)
    }
}

/// Audio-thread handle for draining [`Command`]s. The single consumer half of the ring.
pub struct CommandConsumer {
    inner: rtrb::Consumer<Command>,
}

impl CommandConsumer {
    /// Pops the next pending command, if any. Never blocks.
    pub fn pop(&mut self) -> Option<Command> {
        self.inner.pop().ok()
    }
}

/// Creates a bounded SPSC command channel with room for `capacity` pending commands.
///
/// `capacity` should be a power of two sized so ordinary UI burst traffic cannot overflow it
/// under expected usage (§4.2); when it does overflow, [`CommandProducer::push`] returns
/// [`EngineError::QueueFull`] rather than blocking or silently dropping anything already queued.
pub fn command_channel(capacity: usize) -> (CommandProducer, CommandConsumer) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (
        CommandProducer { inner: producer },
        CommandConsumer { inner: consumer },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_observed_in_enqueue_order() {
        let (mut p, mut c) = command_channel(4);
        p.push(Command::StopAll).unwrap();
        p.push(Command::StopAllInGroup { group_index: 2 }).unwrap();
        assert!(matches!(c.pop(), Some(Command::StopAll)));
        assert!(matches!(
            c.pop(),
            Some(Command::StopAllInGroup { group_index: 2 })
        ));
        assert!(c.pop().is_none());
    }

    #[test]
    fn overflow_returns_queue_full_and_keeps_existing() {
        let (mut p, mut c) = command_channel(2);
        p.push(Command::StopAll).unwrap();
        p.push(Command::StopAll).unwrap();
        let err = p.push(Command::StopAll).unwrap_err();
        assert!(matches!(err, EngineError::QueueFull));
        assert!(c.pop().is_some());
        assert!(c.pop().is_some());
        assert!(c.pop().is_none());
    }
}
