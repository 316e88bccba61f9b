//! Post-hoc probability calibration

/// Raw probabilities above this are compressed
pub const HIGH_KNEE: f64 = 0.8;

/// Raw probabilities below this are stretched
pub const LOW_KNEE: f64 = 0.2;

/// Slope applied above [`HIGH_KNEE`]; maps 1.0 to 0.94
pub const HIGH_SLOPE: f64 = 0.7;

/// Gain applied below [`LOW_KNEE`]
pub const LOW_GAIN: f64 = 1.3;

/// Piecewise calibration of raw model output.
///
/// - `p > 0.8`: `0.8 + (p - 0.8) * 0.7`
/// - `p < 0.2`: `p * 1.3`
/// - otherwise identity
///
/// The low branch overshoots its own knee for `p` in roughly
/// `(0.154, 0.2)`, e.g. `0.19 -> 0.247`. That is kept by default; set
/// `clamp_low_branch` to cap the branch at 0.2, which makes the whole curve
/// monotonic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calibrator {
    clamp_low_branch: bool,
}

impl Calibrator {
    pub fn new(clamp_low_branch: bool) -> Self {
        Self { clamp_low_branch }
    }

    pub fn clamps_low_branch(&self) -> bool {
        self.clamp_low_branch
    }

    /// Calibrate a raw probability in [0, 1]
    pub fn calibrate(&self, p: f64) -> f64 {
        if p > HIGH_KNEE {
            HIGH_KNEE + (p - HIGH_KNEE) * HIGH_SLOPE
        } else if p < LOW_KNEE {
            let stretched = p * LOW_GAIN;
            if self.clamp_low_branch {
                stretched.min(LOW_KNEE)
            } else {
                stretched
            }
        } else {
            p
        }
    }
}
