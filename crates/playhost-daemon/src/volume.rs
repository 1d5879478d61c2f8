//! Mapping between the client-facing 0–100 volume scale and a backend's
//! native range.

/// Inclusive native volume range declared by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeRange {
    pub min: i64,
    pub max: i64,
}

impl VolumeRange {
    pub const PERCENT: VolumeRange = VolumeRange { min: 0, max: 100 };

    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    pub fn normalize(&self, native: i64) -> u8 {
        normalize(native, self.min, self.max)
    }

    pub fn denormalize(&self, percent: u8) -> i64 {
        denormalize(percent, self.min, self.max)
    }
}

/// Native value → percent, rounded to nearest.  Values outside `[lo, hi]`
/// are clamped first, so a backend reporting -1 reads as 0.
pub fn normalize(native: i64, lo: i64, hi: i64) -> u8 {
    if hi <= lo {
        return 0;
    }
    let native = native.clamp(lo, hi);
    let pct = ((native - lo) as f64 * 100.0 / (hi - lo) as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

/// Percent → native value, rounded to nearest and kept inside `[lo, hi]`.
pub fn denormalize(percent: u8, lo: i64, hi: i64) -> i64 {
    if hi <= lo {
        return lo;
    }
    let percent = percent.min(100) as f64;
    let native = lo as f64 + (percent * (hi - lo) as f64 / 100.0).round();
    (native as i64).clamp(lo, hi)
}
