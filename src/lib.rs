//! Transport and routing core for a cue-driven soundboard audio engine: fixed-size clip/voice
//! pools, a lock-free command/event bridge to a real-time audio callback, and a clip → group →
//! master mixing matrix (see `SPEC_FULL.md` for the full module breakdown).
//!
//! Platform audio drivers, file decoding, a persistence layer and a GUI are all out of scope —
//! this crate is the engine core an embedding application builds those around.

pub mod base;
pub mod config;
mod conversion_util;
pub mod error;
pub mod ids;
pub mod rt;
pub mod source;

pub use base::Engine;
pub use config::EngineConfig;
pub use error::{ClipEngineResult, EngineError, ErrorCode};
pub use ids::ClipId;

/// Installs `assert_no_alloc`'s allocator so the `assert_no_alloc` block in
/// [`crate::rt::transport::Transport::process`] actually audits something for this crate's own
/// test suite, the same test-scoped install the teacher's own allocator crate uses (see its
/// `#[cfg(test)] mod tests`'s `#[global_allocator]`). A library crate has no business forcing a
/// global allocator on every downstream consumer, so this is `#[cfg(test)]`-only: an embedding
/// application that wants the same audit in its own binary needs to install one itself.
#[cfg(all(test, debug_assertions))]
#[global_allocator]
static TEST_ALLOC_DISABLER: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

/// Must be called once, as early as possible and before [`Engine::init`] — preferably from the
/// embedding application's main thread.
///
/// There is no metrics or logging subscriber wired up here: that is left to the embedding
/// application, same as the teacher crate this one is descended from leaves subscriber setup to
/// its host. This function only primes process-wide ambient state — currently nothing beyond a
/// sanity check that the crate's size invariants hold, but kept as the single call site future
/// ambient state (e.g. a process-wide clip-id namespace shared across multiple engines) would
/// hang off of.
pub fn init() {
    static_assertions::const_assert!(config::MAX_VOICES <= u16::MAX as usize);
    static_assertions::const_assert!(config::MAX_BUFFER_FRAMES >= 1);
}

/// Installs a `tracing` subscriber for test output, controlled by `CLIPCORE_LOG` (e.g.
/// `CLIPCORE_LOG=debug`). Safe to call from multiple tests; only the first call wins.
#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("CLIPCORE_LOG"))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic() {
        init_test_tracing();
        init();
    }
}
