//! Sirocco Hardware Library
//!
//! Asynchronous transports for the sirocco fan controller: the serial
//! channel to the controller, the pipe to the temperature helper
//! process, the single-operation-per-direction machinery both share,
//! the port-probing session, and the recreate-on-failure wrapper that
//! keeps the helper alive.

pub mod channel;
pub mod helper;
pub mod link;
pub mod op_slot;
pub mod recover;
pub mod serial;

// Re-export commonly used types
pub use channel::{ReadCallback, ReadChannel, WriteChannel};
pub use helper::HelperChannel;
pub use link::{format_duty_command, ControllerLink};
pub use op_slot::OpSlot;
pub use recover::{Factory, RecreateOnFailure};
pub use serial::{NativeBackend, PortChannel, SerialBackend, SerialChannel};
