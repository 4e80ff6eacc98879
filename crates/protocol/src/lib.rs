//! Card-reader serial protocol.
//!
//! Pure byte-level code: frame model, the incremental decoder used on the read
//! side of the serial line, and the fixed-size poll command written to the
//! reader. No IO lives here; the infra crate owns the port.

pub mod card;
pub mod command;
pub mod decoder;
pub mod frame;

pub use card::CardEvent;
pub use command::ReaderCommand;
pub use decoder::{Expect, FrameDecoder, Frames};
pub use frame::{FrameError, HEADER, HardwareFrame, MAX_PAYLOAD, checksum};
