//! Client Sessions
//!
//! The session and transfer state machine:
//! - Key exchange bookkeeping (RSA public key, AES session key)
//! - Sequence-addressed chunk reassembly with CRC verification
//! - A registry indexed by client id and by name
//!
//! Flow for one client:
//! 1. Register a name, receive an id
//! 2. Send the RSA public key, receive an AES key wrapped for it
//! 3. Send files as numbered packets; the server announces the CRC
//! 4. Confirm, retry or abort each file

pub mod client;
pub mod registry;
pub mod transfer;
pub mod types;

pub use client::{ClientSession, SessionState};
pub use registry::SessionRegistry;
pub use transfer::{SealJob, SealStep, TransferState, TransferTable};
pub use types::*;
