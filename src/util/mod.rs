//! Process plumbing shared by the binary: shutdown signals and telemetry setup.

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
