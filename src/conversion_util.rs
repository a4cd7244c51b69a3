/// Converts a duration in seconds to a frame count at the given sample rate, rounding to the
/// nearest frame.
pub fn convert_duration_in_seconds_to_frames(seconds: f64, sample_rate: u32) -> i64 {
    (seconds * sample_rate as f64).round() as i64
}

/// Converts a frame count to a duration in seconds at the given sample rate.
pub fn convert_duration_in_frames_to_seconds(frames: i64, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64
}

/// Converts a gain expressed in decibels to a linear amplitude factor.
///
/// `-inf dB` and any non-finite input map to `0.0`; the corpus treats `-inf` as the spelling
/// for silence rather than rejecting it.
pub fn db_to_linear(db: f32) -> f32 {
    if !db.is_finite() {
        return 0.0;
    }
    10f32.powf(db / 20.0)
}

/// Converts a linear amplitude factor to decibels. `0.0` (or below) maps to negative infinity.
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_roundtrip() {
        for db in [-60.0, -6.0, 0.0, 6.0, 12.0] {
            let linear = db_to_linear(db);
            assert!((linear_to_db(linear) - db).abs() < 1e-3);
        }
    }

    #[test]
    fn unity_gain() {
        assert!((db_to_linear(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn non_finite_db_is_silence() {
        assert_eq!(db_to_linear(f32::NAN), 0.0);
        assert_eq!(db_to_linear(f32::NEG_INFINITY), 0.0);
    }

    #[test]
    fn frame_second_roundtrip() {
        let frames = convert_duration_in_seconds_to_frames(1.5, 48_000);
        assert_eq!(frames, 72_000);
        let seconds = convert_duration_in_frames_to_seconds(72_000, 48_000);
        assert!((seconds - 1.5).abs() < 1e-9);
    }
}
