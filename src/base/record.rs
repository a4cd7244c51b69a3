use crate::error::EngineError;
use crate::ids::{ClipId, UNASSIGNED_GROUP};
use crate::source::SourceRef;
use std::sync::Arc;

/// Shape of a fade-in or fade-out envelope, evaluated over a normalized `x ∈ [0, 1]` where `x=0`
/// is the start of a fade-in and the end of a fade-out.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FadeCurve {
    Linear,
    EqualPower,
    Exponential,
}

impl FadeCurve {
    /// Evaluates the curve at `x`, clamped to `[0, 1]` first.
    pub fn eval(self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => x,
            FadeCurve::EqualPower => (x * std::f32::consts::FRAC_PI_2).sin(),
            FadeCurve::Exponential => x * x,
        }
    }
}

/// A single named, colored marker position within a clip's source.
#[derive(Clone, Debug)]
pub struct CuePoint {
    pub position_frames: i64,
    pub name: String,
    pub color: u32,
}

/// Immutable snapshot of a clip's configuration, published to the audio thread by
/// [`super::ClipRegistry`].
///
/// Never mutated in place: every `update_*` call builds a new `ClipRecord` derived from the
/// current one with a single field replaced, validates it, and republishes it (§4.1).
#[derive(Clone, Debug)]
pub struct ClipRecord {
    pub id: ClipId,
    pub source: SourceRef,
    pub trim_in_samples: i64,
    pub trim_out_samples: i64,
    pub fade_in_samples: u32,
    pub fade_out_samples: u32,
    pub fade_in_curve: FadeCurve,
    pub fade_out_curve: FadeCurve,
    pub gain_linear: f32,
    pub looped: bool,
    pub group_index: u8,
    pub output_bus: u8,
    pub release_ms: f32,
    pub cue_points: Arc<Vec<CuePoint>>,
}

impl ClipRecord {
    pub fn new(id: ClipId, source: SourceRef, default_release_ms: f32) -> Self {
        let duration = source.metadata().duration_frames;
        Self {
            id,
            source,
            trim_in_samples: 0,
            trim_out_samples: duration,
            fade_in_samples: 0,
            fade_out_samples: 0,
            fade_in_curve: FadeCurve::Linear,
            fade_out_curve: FadeCurve::Linear,
            gain_linear: 1.0,
            looped: false,
            group_index: UNASSIGNED_GROUP,
            output_bus: 0,
            release_ms: default_release_ms,
            cue_points: Arc::new(Vec::new()),
        }
    }

    pub fn trim_duration(&self) -> i64 {
        self.trim_out_samples - self.trim_in_samples
    }

    /// Validates the invariants from §3: ordered, in-bounds trim points and a fade budget that
    /// fits within the trim window.
    pub fn validate(&self) -> Result<(), EngineError> {
        let duration = self.source.metadata().duration_frames;
        if self.trim_in_samples < 0 || self.trim_in_samples >= duration {
            return Err(EngineError::InvalidTrimPoints(
                "trim_in must be >= 0 and < source duration",
            ));
        }
        if self.trim_out_samples <= self.trim_in_samples || self.trim_out_samples > duration {
            return Err(EngineError::InvalidTrimPoints(
                "trim_out must be > trim_in and <= source duration",
            ));
        }
        if !self.gain_linear.is_finite() || self.gain_linear < 0.0 {
            return Err(EngineError::InvalidParameter("gain must be finite and non-negative"));
        }
        let trim_duration = self.trim_duration();
        let fade_sum = self.fade_in_samples as i64 + self.fade_out_samples as i64;
        if fade_sum > trim_duration {
            return Err(EngineError::InvalidFadeDuration(
                "fade_in + fade_out must not exceed the trim window",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn record() -> ClipRecord {
        let src: SourceRef = Arc::new(MemorySource::constant(1.0, 48_000, 48_000));
        ClipRecord::new(ClipId::from_raw(1), src, 10.0)
    }

    #[test]
    fn fresh_record_is_valid() {
        assert!(record().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_trim() {
        let mut r = record();
        r.trim_in_samples = 100;
        r.trim_out_samples = 50;
        assert!(matches!(
            r.validate(),
            Err(EngineError::InvalidTrimPoints(_))
        ));
    }

    #[test]
    fn rejects_fade_sum_overflow() {
        let mut r = record();
        r.trim_out_samples = 2000;
        r.fade_in_samples = 1500;
        r.fade_out_samples = 1500;
        assert!(matches!(
            r.validate(),
            Err(EngineError::InvalidFadeDuration(_))
        ));
    }

    #[test]
    fn fade_curve_endpoints() {
        for curve in [FadeCurve::Linear, FadeCurve::EqualPower, FadeCurve::Exponential] {
            assert_eq!(curve.eval(0.0), 0.0);
            assert!((curve.eval(1.0) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn linear_curve_is_identity() {
        assert!((FadeCurve::Linear.eval(0.3) - 0.3).abs() < 1e-6);
    }
}
