//! Fan curves: per-fan, per-sensor temperature-to-duty mappings.
//!
//! Each fan has one curve per temperature sensor. A curve is a list of
//! points; duty lookup interpolates linearly between the two
//! surrounding points and extrapolates flat beyond the ends. Nothing
//! enforces sort order when the editing side mutates a curve, so lookup
//! sorts lazily.

use serde::{Deserialize, Serialize};

/// Number of fan headers driven by the controller.
pub const NUM_FANS: usize = 4;

/// Temperature sensors feeding the curves: CPU and GPU.
pub const NUM_SENSORS: usize = 2;

/// A single point on a fan curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Temperature in Celsius
    pub temp_c: f32,
    /// Duty cycle percentage (0-100)
    pub duty: f32,
}

impl CurvePoint {
    pub fn new(temp_c: f32, duty: f32) -> Self {
        Self { temp_c, duty }
    }
}

/// Curve points indexed `[fan][sensor]`.
pub type CurveSet = [[Vec<CurvePoint>; NUM_SENSORS]; NUM_FANS];

/// Default curve set: every curve starts as the single point (60 °C, 40 %).
pub fn default_curves() -> CurveSet {
    std::array::from_fn(|_| std::array::from_fn(|_| vec![CurvePoint::new(60.0, 40.0)]))
}

/// Look up the duty cycle for `temp` on one curve.
///
/// - Returns `None` for an empty curve
/// - Flat extrapolation below the first and above the last point
/// - Linear interpolation between the surrounding points otherwise
pub fn duty_for(points: &[CurvePoint], temp: f32) -> Option<f32> {
    if points.is_empty() {
        return None;
    }

    let sorted;
    let points = if points.windows(2).all(|w| w[0].temp_c <= w[1].temp_c) {
        points
    } else {
        sorted = {
            let mut copy = points.to_vec();
            copy.sort_by(|a, b| a.temp_c.total_cmp(&b.temp_c));
            copy
        };
        sorted.as_slice()
    };

    let below = points.iter().rev().find(|p| p.temp_c <= temp);
    let above = points.iter().find(|p| temp < p.temp_c);

    match (below, above) {
        (None, Some(above)) => Some(above.duty),
        (Some(below), None) => Some(below.duty),
        (Some(below), Some(above)) => Some(
            below.duty
                + (above.duty - below.duty) * (temp - below.temp_c)
                    / (above.temp_c - below.temp_c),
        ),
        (None, None) => None,
    }
}

/// Duty for one fan: the maximum demanded across its sensor curves.
///
/// Each sensor with a reading contributes its own curve lookup;
/// whichever sensor demands more cooling wins. Returns `None` when no
/// sensor produced a value.
pub fn fan_duty(
    curves: &[Vec<CurvePoint>; NUM_SENSORS],
    temps: &[Option<f32>; NUM_SENSORS],
) -> Option<f32> {
    let mut duty: Option<f32> = None;
    for (points, temp) in curves.iter().zip(temps.iter()) {
        if let Some(temp) = *temp {
            if let Some(value) = duty_for(points, temp) {
                duty = Some(match duty {
                    Some(current) if current >= value => current,
                    _ => value,
                });
            }
        }
    }
    duty
}
