//! Persisted settings, shared between the control loop and the
//! presentation layer.
//!
//! One mutex guards the whole record: the curve editor mutates points
//! while the control loop reads them, and both go through the
//! callback-style accessors here. Mutating accessors leave the dirty
//! flag to the caller ([`Settings::mark_dirty`]) since the UI batches
//! edits; the save trigger itself is the owner's business via
//! [`Settings::save_if_dirty`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::curve::{default_curves, CurveSet, NUM_FANS};
use crate::error::{Error, Result};

/// The serialized settings record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsData {
    /// Name of the serial port that last carried a valid status record
    #[serde(default)]
    pub last_port: String,

    /// Curve points indexed `[fan][sensor]`
    #[serde(default = "default_curves")]
    pub curves: CurveSet,

    /// Smooth temperatures with a moving average before curve lookup
    #[serde(default = "default_smooth_temps")]
    pub smooth_temps: bool,

    /// Manual duty cycle per fan, used when no curve produces a value
    #[serde(default)]
    pub manual_duties: [f32; NUM_FANS],
}

fn default_smooth_temps() -> bool {
    true
}

impl Default for SettingsData {
    fn default() -> Self {
        Self {
            last_port: String::new(),
            curves: default_curves(),
            smooth_temps: true,
            manual_duties: [0.0; NUM_FANS],
        }
    }
}

impl SettingsData {
    /// Parse from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid settings: {}", e)))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))
    }
}

/// Thread-safe settings handle.
pub struct Settings {
    data: Mutex<SettingsData>,
    dirty: AtomicBool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(SettingsData::default())
    }
}

impl Settings {
    pub fn new(data: SettingsData) -> Self {
        Self {
            data: Mutex::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::new(SettingsData::from_toml(&content)?))
    }

    /// Write settings back if anything was marked dirty.
    pub fn save_if_dirty(&self, path: &Path) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let content = {
            let data = self.data.lock().unwrap();
            data.to_toml()?
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Flag the settings as needing a save.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Access the last working port name under the settings lock.
    pub fn access_last_port<R>(&self, accessor: impl FnOnce(&mut String) -> R) -> R {
        let mut data = self.data.lock().unwrap();
        accessor(&mut data.last_port)
    }

    /// Access the curve table under the settings lock.
    ///
    /// The lock covers the whole read-modify-write cycle; the editing
    /// side and the control loop both serialize through it.
    pub fn access_curves<R>(&self, accessor: impl FnOnce(&mut CurveSet) -> R) -> R {
        let mut data = self.data.lock().unwrap();
        accessor(&mut data.curves)
    }

    pub fn smooth_temps(&self) -> bool {
        self.data.lock().unwrap().smooth_temps
    }

    pub fn set_smooth_temps(&self, value: bool) {
        self.data.lock().unwrap().smooth_temps = value;
        self.mark_dirty();
    }

    pub fn manual_duty(&self, fan: usize) -> f32 {
        self.data.lock().unwrap().manual_duties[fan]
    }

    pub fn set_manual_duty(&self, fan: usize, duty: f32) {
        self.data.lock().unwrap().manual_duties[fan] = duty;
        self.mark_dirty();
    }
}
