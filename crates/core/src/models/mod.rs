//! Data models for Pointroom

mod change;
mod participant;
mod room;
mod round;
mod selection;

pub use change::*;
pub use participant::*;
pub use room::*;
pub use round::*;
pub use selection::*;
