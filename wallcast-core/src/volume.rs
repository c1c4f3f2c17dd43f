//! Perceptual-loudness volume curve.
//!
//! The control plane speaks volume percentages in [0, 100]; media players and
//! mixers speak millibels. A perceived-loudness doubling corresponds to
//! +10 dB, so `db = 10 * log2(pct / 100)`, floored at the mixer's hardware
//! minimum and capped at 0 dB to avoid clipping.

/// Hardware minimum attenuation, in millibels.
pub const GLOBAL_MIN_VOL_MB: i64 = -10_239;

/// Anything above 0 dB may clip.
pub const LIMITED_MAX_VOL_MB: i64 = 0;

/// Clamp a requested percentage to the valid range.
pub fn normalize_pct(vol_pct: f64) -> f64 {
    vol_pct.clamp(0.0, 100.0)
}

/// Perceptual percentage to millibels. Monotonically nondecreasing and
/// saturating at the configured min/max.
pub fn pct_to_millibels(vol_pct: f64) -> i64 {
    let vol_pct = normalize_pct(vol_pct);
    if vol_pct <= 0.0 {
        return GLOBAL_MIN_VOL_MB;
    }
    let db = 10.0 * (vol_pct / 100.0).log2();
    let db = db.clamp(GLOBAL_MIN_VOL_MB as f64 / 100.0, LIMITED_MAX_VOL_MB as f64);
    (db * 100.0).round() as i64
}

/// Millibels back to a perceptual percentage in [0, 100].
pub fn millibels_to_pct(mb: i64) -> f64 {
    if mb <= GLOBAL_MIN_VOL_MB {
        return 0.0;
    }
    let db = mb as f64 / 100.0;
    (2f64.powf(db / 10.0) * 100.0).clamp(0.0, 100.0)
}

/// The linear 0..1 volume a media player expects for a millibel level.
pub fn player_volume_fraction(mb: i64) -> f64 {
    10f64.powf(mb as f64 / 2000.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_saturate() {
        assert_eq!(pct_to_millibels(0.0), GLOBAL_MIN_VOL_MB);
        assert_eq!(pct_to_millibels(-5.0), GLOBAL_MIN_VOL_MB);
        assert_eq!(pct_to_millibels(100.0), 0);
        assert_eq!(pct_to_millibels(150.0), 0);
    }

    #[test]
    fn curve_is_monotonically_nondecreasing() {
        let mut last = i64::MIN;
        for i in 0..=1000 {
            let mb = pct_to_millibels(i as f64 / 10.0);
            assert!(mb >= last, "curve decreased at {}%", i as f64 / 10.0);
            last = mb;
        }
    }

    #[test]
    fn half_volume_is_minus_ten_db() {
        assert_eq!(pct_to_millibels(50.0), -1000);
    }

    #[test]
    fn round_trips_within_rounding_error() {
        for pct in [5.0, 25.0, 50.0, 75.0, 100.0] {
            let back = millibels_to_pct(pct_to_millibels(pct));
            assert!((back - pct).abs() < 0.5, "{pct} round-tripped to {back}");
        }
        assert_eq!(millibels_to_pct(GLOBAL_MIN_VOL_MB), 0.0);
    }

    #[test]
    fn player_fraction_matches_the_player_curve() {
        assert!((player_volume_fraction(0) - 1.0).abs() < f64::EPSILON);
        assert!((player_volume_fraction(-2000) - 0.1).abs() < 1e-9);
        assert_eq!(player_volume_fraction(GLOBAL_MIN_VOL_MB), 10f64.powf(-10_239.0 / 2000.0));
    }
}
