//! Session and transfer types

use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Stable 16-byte client identifier
pub type ClientId = Uuid;

/// Exact length of the DER-encoded client public key on the wire
pub const PUBLIC_KEY_LEN: usize = 160;

/// Exact length of the AES-256 session key
pub const AES_KEY_LEN: usize = 32;

/// Maximum client name length in bytes
pub const MAX_NAME_LEN: usize = 100;

/// Maximum file name length in bytes
pub const MAX_FILE_NAME_LEN: usize = 250;

/// Default cap on a declared transfer size (256 MiB)
///
/// Transfers are buffered in memory until verified, so this bounds what one
/// file can cost.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default number of unfinished transfers one session may hold at once
pub const DEFAULT_MAX_TRANSFERS: usize = 8;

// ============================================================================
// Crypto Readiness
// ============================================================================

/// Where a session stands in the key exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CryptoState {
    /// Registered, no public key yet
    NoKey,
    /// Public key stored, no AES key issued
    HasPublicKey,
    /// AES key issued; file transfer allowed
    HasSessionKey,
}

// ============================================================================
// Chunks
// ============================================================================

/// Limits applied to incoming transfers
#[derive(Debug, Clone, Copy)]
pub struct TransferLimits {
    /// Largest `content_size` a client may declare
    pub max_file_size: u64,
    /// Transfers a session may have open at the same time
    pub max_transfers: usize,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_transfers: DEFAULT_MAX_TRANSFERS,
        }
    }
}

/// One packet of a sequence-addressed transfer
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    /// Total wire bytes of the transfer (encrypted size)
    pub content_size: u64,
    /// Plaintext size the client expects after decryption
    pub original_size: u64,
    /// 1-based packet index
    pub packet_number: u16,
    pub total_packets: u16,
    pub data: &'a [u8],
}

/// What happened to an accepted chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    pub packets_received: u16,
    pub total_packets: u16,
    pub bytes_received: u64,
    pub content_size: u64,
    /// The packet had already been received and was ignored
    pub duplicate: bool,
    /// This chunk restarted a finished transfer in place
    pub restarted: bool,
    /// All packets are present
    pub complete: bool,
}

/// A transfer that passed verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    pub file_name: String,
    pub content: Vec<u8>,
    pub crc: u32,
    /// Times the file was sent before it verified
    pub attempts: u32,
}

/// Outcome of comparing a finished transfer against a checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Checksums agree
    Verified(CompletedFile),
    /// Checksums differ; the transfer state is kept for a retry
    CrcMismatch { expected: u32, actual: u32 },
}

// ============================================================================
// Error Types
// ============================================================================

/// Broad class of a session failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or size-violating input; the session survives
    Protocol,
    /// The session or transfer no longer exists
    StaleResource,
}

/// Session, handshake and transfer errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Public key must be 160 bytes, got {0}")]
    InvalidPublicKeyLength(usize),

    #[error("Public key rejected: {0}")]
    InvalidPublicKey(String),

    #[error("AES key must be 32 bytes, got {0}")]
    InvalidAesKeyLength(usize),

    #[error("Invalid client name: {0}")]
    InvalidName(String),

    #[error("Client name already registered: {0}")]
    NameTaken(String),

    #[error("Invalid file name: {0}")]
    InvalidFileName(String),

    #[error("Transfer too large: {size} bytes (max: {max})")]
    TransferTooLarge { size: u64, max: u64 },

    #[error("Too many transfers in progress (max: {limit})")]
    TooManyTransfers { limit: usize },

    #[error("Invalid packet {packet_number} of {total_packets}")]
    InvalidPacketNumber { packet_number: u16, total_packets: u16 },

    #[error("Chunk overflows {file_name}: {received} + {chunk} bytes exceeds {total}")]
    ChunkOverflow {
        file_name: String,
        received: u64,
        chunk: u64,
        total: u64,
    },

    #[error("Final packet leaves {file_name} short: {received} of {total} bytes")]
    TruncatedTransfer {
        file_name: String,
        received: u64,
        total: u64,
    },

    #[error("Out-of-order packet for {file_name}: expected {expected}, got {actual}")]
    OutOfOrderChunk {
        file_name: String,
        expected: u16,
        actual: u16,
    },

    #[error("Duplicate packet {packet_number} for {file_name} differs from the original")]
    ConflictingDuplicate { file_name: String, packet_number: u16 },

    #[error("Chunk header for {0} disagrees with the transfer in progress")]
    TransferShapeChanged(String),

    #[error("Transfer not complete: {file_name} ({received} of {total} bytes)")]
    TransferIncomplete {
        file_name: String,
        received: u64,
        total: u64,
    },

    #[error("Decoded size mismatch for {file_name}: expected {expected}, got {actual}")]
    DecodedSizeMismatch {
        file_name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Failed to decode {file_name}: {reason}")]
    DecodeFailed { file_name: String, reason: String },

    #[error("Transfer {0} was restarted while it was being decoded")]
    TransferRestarted(String),

    #[error("No such transfer: {0}")]
    NoSuchTransfer(String),

    #[error("Session not found: {0}")]
    SessionNotFound(ClientId),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchTransfer(_) | Self::TransferRestarted(_) | Self::SessionNotFound(_) => {
                ErrorKind::StaleResource
            }
            _ => ErrorKind::Protocol,
        }
    }
}
