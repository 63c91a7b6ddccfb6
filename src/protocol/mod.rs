//! Wire Protocol
//!
//! Little-endian binary framing shared with the backup client:
//! - 23-byte request header, 7-byte response header
//! - Fixed 255-byte NUL-padded string fields
//! - A dispatcher that routes decoded requests into the session layer

pub mod codec;
pub mod codes;
pub mod handler;

pub use codec::*;
pub use codes::{RequestCode, ResponseCode};
pub use handler::{Dispatcher, HandlerError};

/// Version byte written into every response header
pub const SERVER_VERSION: u8 = 3;
