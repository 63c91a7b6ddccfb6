//! Request and response operation codes

use super::codec::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCode {
    Register = 825,
    SendPublicKey = 826,
    Reconnect = 827,
    SendFile = 828,
    /// Client's CRC matched the one announced
    CrcOk = 900,
    /// CRC mismatch, the client will resend the file
    CrcRetry = 901,
    /// CRC mismatch, the client gives up on the file
    CrcAbort = 902,
}

impl TryFrom<u16> for RequestCode {
    type Error = CodecError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            825 => Self::Register,
            826 => Self::SendPublicKey,
            827 => Self::Reconnect,
            828 => Self::SendFile,
            900 => Self::CrcOk,
            901 => Self::CrcRetry,
            902 => Self::CrcAbort,
            other => return Err(CodecError::UnknownRequestCode(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    Registered = 1600,
    RegistrationFailed = 1601,
    KeyIssued = 1602,
    FileReceived = 1603,
    Acknowledged = 1604,
    ReconnectAccepted = 1605,
    ReconnectRejected = 1606,
    GeneralError = 1607,
}

impl TryFrom<u16> for ResponseCode {
    type Error = CodecError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            1600 => Self::Registered,
            1601 => Self::RegistrationFailed,
            1602 => Self::KeyIssued,
            1603 => Self::FileReceived,
            1604 => Self::Acknowledged,
            1605 => Self::ReconnectAccepted,
            1606 => Self::ReconnectRejected,
            1607 => Self::GeneralError,
            other => return Err(CodecError::UnknownResponseCode(other)),
        })
    }
}
