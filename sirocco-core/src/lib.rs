//! Sirocco Core Library
//!
//! Shared types, parsing, and state for the sirocco fan controller:
//! the line framer and token scanner both transports feed, the curve
//! table and its lookup, the persisted settings record, the
//! non-blocking log queue, and the injected pacing trait.

pub mod curve;
pub mod error;
pub mod framing;
pub mod log_queue;
pub mod paths;
pub mod scan;
pub mod settings;
pub mod state;
pub mod ticker;

// Re-export commonly used types
pub use curve::{default_curves, duty_for, fan_duty, CurvePoint, CurveSet, NUM_FANS, NUM_SENSORS};
pub use error::{Error, Result};
pub use framing::LineFramer;
pub use log_queue::{log_queue, LogDrain, LogQueue, LogRecord};
pub use paths::default_settings_path;
pub use scan::Scanner;
pub use settings::{Settings, SettingsData};
pub use state::{ManualControls, Readouts};
pub use ticker::{Ticker, TokioTicker};
