//! Binary codec for requests and responses

use crate::session::{Chunk, ClientId};

use super::codes::{RequestCode, ResponseCode};
use super::SERVER_VERSION;

// ============================================================================
// Layout
// ============================================================================

pub const REQUEST_HEADER_LEN: usize = 23;
pub const RESPONSE_HEADER_LEN: usize = 7;

/// Fixed width of every name and file-name field
pub const STRING_FIELD_LEN: usize = 255;

/// content_size, original_size, packet_number, total_packets, file_name
pub const FILE_PACKET_HEADER_LEN: usize = 4 + 4 + 2 + 2 + STRING_FIELD_LEN;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Truncated {what}: need {needed} bytes, got {actual}")]
    Truncated {
        what: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("Unknown request code {0}")]
    UnknownRequestCode(u16),

    #[error("Unknown response code {0}")]
    UnknownResponseCode(u16),

    #[error("Payload of {size} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("String of {0} bytes does not fit a 255-byte field")]
    FieldOverflow(usize),
}

/// Sequential little-endian reader over a borrowed buffer
struct Reader<'a> {
    buf: &'a [u8],
    what: &'static str,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, what }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < n {
            return Err(CodecError::Truncated {
                what: self.what,
                needed: n,
                actual: self.buf.len(),
            });
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn client_id(&mut self) -> Result<ClientId, CodecError> {
        let mut id = [0u8; 16];
        id.copy_from_slice(self.take(16)?);
        Ok(ClientId::from_bytes(id))
    }

    fn string(&mut self) -> Result<String, CodecError> {
        read_string_field(self.take(STRING_FIELD_LEN)?)
    }

    fn rest(self) -> &'a [u8] {
        self.buf
    }
}

/// Text up to the first NUL, or the whole field if there is none
pub fn read_string_field(field: &[u8]) -> Result<String, CodecError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8(field[..end].to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Append `value` NUL-padded to the fixed field width
///
/// At least one NUL always follows the text.
pub fn write_string_field(out: &mut Vec<u8>, value: &str) -> Result<(), CodecError> {
    if value.len() >= STRING_FIELD_LEN {
        return Err(CodecError::FieldOverflow(value.len()));
    }
    out.extend_from_slice(value.as_bytes());
    out.resize(out.len() + STRING_FIELD_LEN - value.len(), 0);
    Ok(())
}

// ============================================================================
// Headers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub client_id: ClientId,
    pub version: u8,
    /// Raw code; unknown codes are rejected when the payload is decoded
    pub code: u16,
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes, "request header");
        Ok(Self {
            client_id: r.client_id()?,
            version: r.u8()?,
            code: r.u16()?,
            payload_size: r.u32()?,
        })
    }

    pub fn encode(&self) -> [u8; REQUEST_HEADER_LEN] {
        let mut out = [0u8; REQUEST_HEADER_LEN];
        out[..16].copy_from_slice(self.client_id.as_bytes());
        out[16] = self.version;
        out[17..19].copy_from_slice(&self.code.to_le_bytes());
        out[19..23].copy_from_slice(&self.payload_size.to_le_bytes());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub code: u16,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut r = Reader::new(bytes, "response header");
        Ok(Self {
            version: r.u8()?,
            code: r.u16()?,
            payload_size: r.u32()?,
        })
    }
}

// ============================================================================
// Requests
// ============================================================================

/// One packet of an encrypted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePacket {
    pub content_size: u32,
    pub original_size: u32,
    pub packet_number: u16,
    pub total_packets: u16,
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FilePacket {
    pub fn chunk(&self) -> Chunk<'_> {
        Chunk {
            content_size: u64::from(self.content_size),
            original_size: u64::from(self.original_size),
            packet_number: self.packet_number,
            total_packets: self.total_packets,
            data: &self.content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register { name: String },
    /// The key is everything after the name; its length is checked by the session
    SendPublicKey { name: String, public_key: Vec<u8> },
    Reconnect { name: String },
    SendFile(FilePacket),
    CrcOk { file_name: String },
    CrcRetry { file_name: String },
    CrcAbort { file_name: String },
}

impl Request {
    pub fn decode(header: &RequestHeader, payload: &[u8]) -> Result<Self, CodecError> {
        let code = RequestCode::try_from(header.code)?;
        let mut r = Reader::new(payload, "request payload");

        let request = match code {
            RequestCode::Register => Self::Register { name: r.string()? },
            RequestCode::SendPublicKey => {
                let name = r.string()?;
                Self::SendPublicKey {
                    name,
                    public_key: r.rest().to_vec(),
                }
            }
            RequestCode::Reconnect => Self::Reconnect { name: r.string()? },
            RequestCode::SendFile => {
                let content_size = r.u32()?;
                let original_size = r.u32()?;
                let packet_number = r.u16()?;
                let total_packets = r.u16()?;
                let file_name = r.string()?;
                Self::SendFile(FilePacket {
                    content_size,
                    original_size,
                    packet_number,
                    total_packets,
                    file_name,
                    content: r.rest().to_vec(),
                })
            }
            RequestCode::CrcOk => Self::CrcOk { file_name: r.string()? },
            RequestCode::CrcRetry => Self::CrcRetry { file_name: r.string()? },
            RequestCode::CrcAbort => Self::CrcAbort { file_name: r.string()? },
        };

        Ok(request)
    }

    pub fn code(&self) -> RequestCode {
        match self {
            Self::Register { .. } => RequestCode::Register,
            Self::SendPublicKey { .. } => RequestCode::SendPublicKey,
            Self::Reconnect { .. } => RequestCode::Reconnect,
            Self::SendFile(_) => RequestCode::SendFile,
            Self::CrcOk { .. } => RequestCode::CrcOk,
            Self::CrcRetry { .. } => RequestCode::CrcRetry,
            Self::CrcAbort { .. } => RequestCode::CrcAbort,
        }
    }

    /// Header and payload as the client sends them
    pub fn encode(&self, client_id: ClientId) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        match self {
            Self::Register { name } | Self::Reconnect { name } => {
                write_string_field(&mut payload, name)?;
            }
            Self::SendPublicKey { name, public_key } => {
                write_string_field(&mut payload, name)?;
                payload.extend_from_slice(public_key);
            }
            Self::SendFile(packet) => {
                payload.reserve(FILE_PACKET_HEADER_LEN + packet.content.len());
                payload.extend_from_slice(&packet.content_size.to_le_bytes());
                payload.extend_from_slice(&packet.original_size.to_le_bytes());
                payload.extend_from_slice(&packet.packet_number.to_le_bytes());
                payload.extend_from_slice(&packet.total_packets.to_le_bytes());
                write_string_field(&mut payload, &packet.file_name)?;
                payload.extend_from_slice(&packet.content);
            }
            Self::CrcOk { file_name }
            | Self::CrcRetry { file_name }
            | Self::CrcAbort { file_name } => {
                write_string_field(&mut payload, file_name)?;
            }
        }

        let header = RequestHeader {
            client_id,
            version: SERVER_VERSION,
            code: self.code() as u16,
            payload_size: payload.len() as u32,
        };

        let mut out = Vec::with_capacity(REQUEST_HEADER_LEN + payload.len());
        out.extend_from_slice(&header.encode());
        out.extend_from_slice(&payload);
        Ok(out)
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Registered { client_id: ClientId },
    RegistrationFailed,
    KeyIssued { client_id: ClientId, encrypted_key: Vec<u8> },
    FileReceived {
        client_id: ClientId,
        content_size: u32,
        file_name: String,
        crc: u32,
    },
    Acknowledged { client_id: ClientId },
    ReconnectAccepted { client_id: ClientId, encrypted_key: Vec<u8> },
    ReconnectRejected { client_id: ClientId },
    GeneralError,
}

impl Response {
    pub fn code(&self) -> ResponseCode {
        match self {
            Self::Registered { .. } => ResponseCode::Registered,
            Self::RegistrationFailed => ResponseCode::RegistrationFailed,
            Self::KeyIssued { .. } => ResponseCode::KeyIssued,
            Self::FileReceived { .. } => ResponseCode::FileReceived,
            Self::Acknowledged { .. } => ResponseCode::Acknowledged,
            Self::ReconnectAccepted { .. } => ResponseCode::ReconnectAccepted,
            Self::ReconnectRejected { .. } => ResponseCode::ReconnectRejected,
            Self::GeneralError => ResponseCode::GeneralError,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut payload = Vec::new();
        match self {
            Self::Registered { client_id }
            | Self::Acknowledged { client_id }
            | Self::ReconnectRejected { client_id } => {
                payload.extend_from_slice(client_id.as_bytes());
            }
            Self::KeyIssued {
                client_id,
                encrypted_key,
            }
            | Self::ReconnectAccepted {
                client_id,
                encrypted_key,
            } => {
                payload.extend_from_slice(client_id.as_bytes());
                payload.extend_from_slice(encrypted_key);
            }
            Self::FileReceived {
                client_id,
                content_size,
                file_name,
                crc,
            } => {
                payload.extend_from_slice(client_id.as_bytes());
                payload.extend_from_slice(&content_size.to_le_bytes());
                write_string_field(&mut payload, file_name)?;
                payload.extend_from_slice(&crc.to_le_bytes());
            }
            Self::RegistrationFailed | Self::GeneralError => {}
        }

        let mut out = Vec::with_capacity(RESPONSE_HEADER_LEN + payload.len());
        out.push(SERVER_VERSION);
        out.extend_from_slice(&(self.code() as u16).to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Client-side decoding of a response payload
    pub fn decode(header: &ResponseHeader, payload: &[u8]) -> Result<Self, CodecError> {
        let code = ResponseCode::try_from(header.code)?;
        let mut r = Reader::new(payload, "response payload");

        let response = match code {
            ResponseCode::Registered => Self::Registered {
                client_id: r.client_id()?,
            },
            ResponseCode::RegistrationFailed => Self::RegistrationFailed,
            ResponseCode::KeyIssued => {
                let client_id = r.client_id()?;
                Self::KeyIssued {
                    client_id,
                    encrypted_key: r.rest().to_vec(),
                }
            }
            ResponseCode::FileReceived => Self::FileReceived {
                client_id: r.client_id()?,
                content_size: r.u32()?,
                file_name: r.string()?,
                crc: r.u32()?,
            },
            ResponseCode::Acknowledged => Self::Acknowledged {
                client_id: r.client_id()?,
            },
            ResponseCode::ReconnectAccepted => {
                let client_id = r.client_id()?;
                Self::ReconnectAccepted {
                    client_id,
                    encrypted_key: r.rest().to_vec(),
                }
            }
            ResponseCode::ReconnectRejected => Self::ReconnectRejected {
                client_id: r.client_id()?,
            },
            ResponseCode::GeneralError => Self::GeneralError,
        };

        Ok(response)
    }
}

// ============================================================================
// Tests
// ============================================================================
