//! Multi-node lifecycle management
//!
//! The node manager holds the fixed roster and starts/stops nodes at
//! runtime; the control loop turns operator commands into manager calls.

pub mod control;
pub mod roster;

pub use control::{spawn_line_reader, CommandSource, ControlCommand, ControlLoop, ControlReport};
pub use roster::{NodeInfo, NodeManager, StartClaim, StartOutcome, StopOutcome};
