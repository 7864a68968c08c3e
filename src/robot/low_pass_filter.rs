// Copyright (c) 2023 armctl developers
// Licensed under the EUPL-1.2-or-later

//! First-order low-pass filtering of commanded signals.

use std::f64::consts::PI;

use crate::robot::control_tools::array_to_isometry;

/// Maximum cutoff frequency: 1000 Hz. At this cutoff the filter passes the
/// signal through unchanged.
pub static MAX_CUTOFF_FREQUENCY: f64 = 1000.0;
/// Default cutoff frequency: 100 Hz
pub static DEFAULT_CUTOFF_FREQUENCY: f64 = 100.0;

/// Applies a first-order low-pass filter to one sample.
///
/// # Panics
/// If `y` or `y_last` are not finite, or `sample_time`/`cutoff_frequency`
/// are not positive finite numbers.
pub fn low_pass_filter(sample_time: f64, y: f64, y_last: f64, cutoff_frequency: f64) -> f64 {
    assert!(sample_time.is_sign_positive() && sample_time.is_finite());
    assert!(cutoff_frequency.is_sign_positive() && cutoff_frequency.is_finite());
    assert!(y.is_finite() && y_last.is_finite());
    let gain = sample_time / (sample_time + 1.0 / (2.0 * PI * cutoff_frequency));
    gain * y + (1.0 - gain) * y_last
}

/// Filters a Cartesian pose: first-order low-pass on the translation,
/// spherical linear interpolation on the rotation.
///
/// # Panics
/// Like [`low_pass_filter`], for any element of the two poses.
pub fn cartesian_low_pass_filter(
    sample_time: f64,
    y: &[f64; 16],
    y_last: &[f64; 16],
    cutoff_frequency: f64,
) -> [f64; 16] {
    assert!(sample_time.is_sign_positive() && sample_time.is_finite());
    assert!(cutoff_frequency.is_sign_positive() && cutoff_frequency.is_finite());
    y.iter()
        .zip(y_last.iter())
        .for_each(|(a, b)| assert!(a.is_finite() && b.is_finite()));
    let mut transform = array_to_isometry(y);
    let transform_last = array_to_isometry(y_last);
    let gain = sample_time / (sample_time + 1.0 / (2.0 * PI * cutoff_frequency));
    transform.translation.vector =
        gain * transform.translation.vector + (1.0 - gain) * transform_last.translation.vector;
    transform.rotation = transform_last.rotation.slerp(&transform.rotation, gain);
    let mut out = [0.; 16];
    for (i, &x) in transform.to_homogeneous().iter().enumerate() {
        out[i] = x;
    }
    out
}
