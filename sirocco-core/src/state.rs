//! Live state shared with the presentation layer.
//!
//! Plain mutex-guarded data: the worker thread publishes readings and
//! computed duties, the presentation thread reads them and feeds back
//! the manual controls. Absent readings stay `None`; rendering "N/A"
//! is the display's business.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::curve::{NUM_FANS, NUM_SENSORS};

/// Manual duty controls, one per fan.
///
/// `holding` mirrors "the user is currently dragging this control":
/// while held, the manual value overrides any curve result.
pub struct ManualControls {
    values: Mutex<[f32; NUM_FANS]>,
    holding: [AtomicBool; NUM_FANS],
}

impl Default for ManualControls {
    fn default() -> Self {
        Self {
            values: Mutex::new([0.0; NUM_FANS]),
            holding: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }
}

impl ManualControls {
    pub fn with_values(values: [f32; NUM_FANS]) -> Self {
        Self {
            values: Mutex::new(values),
            ..Self::default()
        }
    }

    pub fn value(&self, fan: usize) -> f32 {
        self.values.lock().unwrap()[fan]
    }

    pub fn set_value(&self, fan: usize, duty: f32) {
        self.values.lock().unwrap()[fan] = duty;
    }

    pub fn is_holding(&self, fan: usize) -> bool {
        self.holding[fan].load(Ordering::Relaxed)
    }

    pub fn set_holding(&self, fan: usize, holding: bool) {
        self.holding[fan].store(holding, Ordering::Relaxed);
    }
}

/// Read-outs published by the worker thread.
#[derive(Default)]
pub struct Readouts {
    /// Latest raw temperature per sensor, as parsed from the helper
    raw_temps: Mutex<[Option<f32>; NUM_SENSORS]>,
    /// Temperatures after optional smoothing, for display
    display_temps: Mutex<[Option<f32>; NUM_SENSORS]>,
    /// Duty cycle currently commanded per fan
    duties: Mutex<[f32; NUM_FANS]>,
    /// Latest RPM report per fan
    rpms: Mutex<[i32; NUM_FANS]>,
}

impl Readouts {
    pub fn set_raw_temps(&self, temps: [Option<f32>; NUM_SENSORS]) {
        *self.raw_temps.lock().unwrap() = temps;
    }

    pub fn raw_temps(&self) -> [Option<f32>; NUM_SENSORS] {
        *self.raw_temps.lock().unwrap()
    }

    pub fn set_display_temps(&self, temps: [Option<f32>; NUM_SENSORS]) {
        *self.display_temps.lock().unwrap() = temps;
    }

    pub fn display_temps(&self) -> [Option<f32>; NUM_SENSORS] {
        *self.display_temps.lock().unwrap()
    }

    pub fn set_duties(&self, duties: [f32; NUM_FANS]) {
        *self.duties.lock().unwrap() = duties;
    }

    pub fn duties(&self) -> [f32; NUM_FANS] {
        *self.duties.lock().unwrap()
    }

    pub fn set_rpms(&self, rpms: [i32; NUM_FANS]) {
        *self.rpms.lock().unwrap() = rpms;
    }

    pub fn rpms(&self) -> [i32; NUM_FANS] {
        *self.rpms.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_controls_roundtrip() {
        let controls = ManualControls::with_values([5.0, 10.0, 15.0, 20.0]);
        assert_eq!(controls.value(1), 10.0);

        controls.set_value(1, 42.0);
        assert_eq!(controls.value(1), 42.0);

        assert!(!controls.is_holding(1));
        controls.set_holding(1, true);
        assert!(controls.is_holding(1));
    }

    #[test]
    fn test_readouts_default_to_absent() {
        let readouts = Readouts::default();
        assert_eq!(readouts.raw_temps(), [None, None]);
        assert_eq!(readouts.display_temps(), [None, None]);
        assert_eq!(readouts.rpms(), [0; NUM_FANS]);
    }

    #[test]
    fn test_readouts_publish() {
        let readouts = Readouts::default();
        readouts.set_raw_temps([Some(55.0), None]);
        readouts.set_display_temps([Some(54.2), None]);
        readouts.set_duties([40.0, 40.0, 0.0, 100.0]);
        readouts.set_rpms([1200, 900, 0, 2500]);

        assert_eq!(readouts.raw_temps(), [Some(55.0), None]);
        assert_eq!(readouts.display_temps()[0], Some(54.2));
        assert_eq!(readouts.duties()[3], 100.0);
        assert_eq!(readouts.rpms()[0], 1200);
    }
}
