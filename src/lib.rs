//! Backup Server
//!
//! Multi-client encrypted file backup over a plain TCP socket. Clients
//! register, exchange an RSA public key for an AES session key, and send
//! files as numbered packets that the server reassembles, decrypts,
//! checksums and stores.

pub mod config;
pub mod crc;
pub mod crypto;
pub mod db;
pub mod error;
pub mod maintenance;
pub mod protocol;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod storage;
