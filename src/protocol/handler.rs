//! Request Dispatcher
//!
//! Routes decoded requests into the session layer. Session locks are taken
//! in short synchronous blocks. Decryption runs on the blocking pool, and
//! vault writes and persistence happen after the lock is released. Every
//! failure is logged here and answered with a general error.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::crypto::{CryptoError, CryptoProvider, PublicKey};
use crate::error::AppError;
use crate::session::{
    ClientId, ClientSession, CryptoState, ErrorKind, SealJob, SealStep, SessionError,
    SessionRegistry, SessionState, TransferLimits, Verdict, AES_KEY_LEN,
};
use crate::storage::{CompletedFileRecord, FileVault, Persistence};

use super::codec::{FilePacket, Request, RequestHeader, Response};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Storage(#[from] AppError),

    #[error("Client {client_id} cannot transfer files yet ({state:?})")]
    NotReady { client_id: ClientId, state: CryptoState },

    #[error("Name {claimed:?} does not belong to client {client_id}")]
    NameMismatch { client_id: ClientId, claimed: String },

    #[error("Transfer {0} was never acknowledged with a checksum")]
    NotSealed(String),

    #[error(
        "Stored contents of {file_name} no longer match checksum {expected:08x} (now {actual:08x})"
    )]
    ChecksumMismatch {
        file_name: String,
        expected: u32,
        actual: u32,
    },

    #[error("Decryption task failed: {0}")]
    BlockingTask(#[from] tokio::task::JoinError),
}

impl HandlerError {
    /// Whether the client sent something it should not have
    fn is_client_fault(&self) -> bool {
        match self {
            Self::Session(e) => e.kind() == ErrorKind::Protocol,
            Self::NotReady { .. } | Self::NameMismatch { .. } | Self::NotSealed(_) => true,
            Self::Crypto(CryptoError::Decrypt) => true,
            _ => false,
        }
    }
}

type HandlerResult = Result<Option<Response>, HandlerError>;

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    registry: SessionRegistry,
    crypto: Arc<dyn CryptoProvider>,
    persistence: Arc<dyn Persistence>,
    vault: FileVault,
    limits: TransferLimits,
}

impl Dispatcher {
    pub fn new(
        registry: SessionRegistry,
        crypto: Arc<dyn CryptoProvider>,
        persistence: Arc<dyn Persistence>,
        vault: FileVault,
        limits: TransferLimits,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                registry,
                crypto,
                persistence,
                vault,
                limits,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Handle one request; `None` means the protocol expects no reply
    pub async fn handle(&self, header: &RequestHeader, request: Request) -> Option<Response> {
        let client_id = header.client_id;
        let code = request.code();

        tracing::debug!(
            client_id = %client_id,
            code = ?code,
            version = header.version,
            "Handling request"
        );

        let result = match request {
            Request::Register { name } => self.register(&name).await,
            Request::SendPublicKey { name, public_key } => {
                self.exchange_keys(client_id, &name, &public_key).await
            }
            Request::Reconnect { name } => self.reconnect(client_id, &name).await,
            Request::SendFile(packet) => self.receive_packet(client_id, packet).await,
            Request::CrcOk { file_name } => self.confirm_file(client_id, &file_name).await,
            Request::CrcRetry { file_name } => self.expect_resend(client_id, &file_name),
            Request::CrcAbort { file_name } => self.abandon_file(client_id, &file_name).await,
        };

        match result {
            Ok(response) => response,
            Err(e) if e.is_client_fault() => {
                tracing::warn!(
                    client_id = %client_id,
                    code = ?code,
                    error = %e,
                    "Request rejected"
                );
                Some(Response::GeneralError)
            }
            Err(e) => {
                tracing::error!(client_id = %client_id, code = ?code, error = %e, "Request failed");
                Some(Response::GeneralError)
            }
        }
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    async fn register(&self, name: &str) -> HandlerResult {
        let session = match self.inner.registry.register(name) {
            Ok(session) => session,
            Err(e @ (SessionError::NameTaken(_) | SessionError::InvalidName(_))) => {
                tracing::info!(name = %name, error = %e, "Registration rejected");
                return Ok(Some(Response::RegistrationFailed));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.inner.persistence.save_session(&session.record()).await {
            self.inner.registry.remove(session.id());
            tracing::error!(name = %name, error = %e, "Failed to persist registration");
            return Ok(Some(Response::RegistrationFailed));
        }

        tracing::info!(client_id = %session.id(), name = %name, "Registered client");

        Ok(Some(Response::Registered {
            client_id: session.id(),
        }))
    }

    async fn exchange_keys(&self, client_id: ClientId, name: &str, der: &[u8]) -> HandlerResult {
        let session = self.touch(client_id)?;
        if session.name() != name {
            return Err(HandlerError::NameMismatch {
                client_id,
                claimed: name.to_string(),
            });
        }

        let public_key = session.set_public_key(der)?;
        let encrypted_key = self.issue_session_key(&session, &public_key)?;
        self.inner.persistence.save_session(&session.record()).await?;

        tracing::info!(
            client_id = %client_id,
            fingerprint = %public_key.fingerprint(),
            "Issued session key"
        );

        Ok(Some(Response::KeyIssued {
            client_id,
            encrypted_key,
        }))
    }

    async fn reconnect(&self, client_id: ClientId, name: &str) -> HandlerResult {
        let rejected = Ok(Some(Response::ReconnectRejected { client_id }));

        let Some(session) = self.inner.registry.find_by_id(client_id) else {
            tracing::info!(client_id = %client_id, name = %name, "Reconnect from unknown client");
            return rejected;
        };
        session.update_last_seen();

        if session.name() != name {
            tracing::warn!(
                client_id = %client_id,
                name = %name,
                "Reconnect under a different name"
            );
            return rejected;
        }

        let public_key = session.lock().public_key().cloned();
        let Some(public_key) = public_key else {
            tracing::info!(client_id = %client_id, "Reconnect before any public key was sent");
            return rejected;
        };

        let encrypted_key = self.issue_session_key(&session, &public_key)?;
        self.inner.persistence.save_session(&session.record()).await?;

        tracing::info!(client_id = %client_id, name = %name, "Client reconnected");

        Ok(Some(Response::ReconnectAccepted {
            client_id,
            encrypted_key,
        }))
    }

    /// Generate a fresh AES key, wrap it, and install it only once wrapping succeeded
    fn issue_session_key(
        &self,
        session: &ClientSession,
        public_key: &PublicKey,
    ) -> Result<Vec<u8>, HandlerError> {
        let aes_key = self.inner.crypto.generate_random_bytes(AES_KEY_LEN);
        let encrypted = self.inner.crypto.encrypt_for_transport(&aes_key, public_key)?;

        let dropped = session.set_aes_key(&aes_key)?;
        if dropped > 0 {
            tracing::info!(
                client_id = %session.id(),
                dropped = dropped,
                "Dropped transfers buffered under the previous session key"
            );
        }
        Ok(encrypted)
    }

    // ========================================================================
    // File Transfer
    // ========================================================================

    async fn receive_packet(&self, client_id: ClientId, packet: FilePacket) -> HandlerResult {
        let session = self.touch(client_id)?;

        let (step, aes_key) = {
            let mut state = session.lock();
            let aes_key = *require_session_key(client_id, &state)?;

            let progress = state.transfers_mut().accept_chunk(
                &packet.file_name,
                packet.chunk(),
                &self.inner.limits,
                Instant::now(),
            )?;

            tracing::debug!(
                client_id = %client_id,
                file_name = %packet.file_name,
                packet = packet.packet_number,
                total_packets = progress.total_packets,
                bytes_received = progress.bytes_received,
                duplicate = progress.duplicate,
                restarted = progress.restarted,
                "Accepted packet"
            );

            if !progress.complete {
                return Ok(None);
            }
            (state.transfers().begin_seal(&packet.file_name)?, aes_key)
        };

        let crc = match step {
            SealStep::Sealed(crc) => crc,
            SealStep::Pending(job) => self.decrypt_and_seal(&session, job, aes_key).await?,
        };

        tracing::info!(
            client_id = %client_id,
            file_name = %packet.file_name,
            content_size = packet.content_size,
            original_size = packet.original_size,
            crc = crc,
            "File received"
        );

        Ok(Some(Response::FileReceived {
            client_id,
            content_size: packet.content_size,
            file_name: packet.file_name,
            crc,
        }))
    }

    /// Decrypt a complete payload on the blocking pool, then record the result
    async fn decrypt_and_seal(
        &self,
        session: &ClientSession,
        job: SealJob,
        aes_key: [u8; AES_KEY_LEN],
    ) -> Result<u32, HandlerError> {
        let crypto = Arc::clone(&self.inner.crypto);
        let (job, decoded) = tokio::task::spawn_blocking(move || {
            let decoded = crypto.decrypt_from_transport(job.payload(), &aes_key);
            (job, decoded)
        })
        .await?;

        let mut state = session.lock();
        Ok(state.transfers_mut().finish_seal(job, decoded)?)
    }

    async fn confirm_file(&self, client_id: ClientId, file_name: &str) -> HandlerResult {
        let session = self.touch(client_id)?;

        // the transfer stays in the table until the vault has the file, so a
        // failed write can be confirmed again
        let (file, announced) = {
            let state = session.lock();
            require_session_key(client_id, &state)?;

            let announced = state
                .transfers()
                .get(file_name)
                .ok_or_else(|| SessionError::NoSuchTransfer(file_name.to_string()))?
                .announced_crc()
                .ok_or_else(|| HandlerError::NotSealed(file_name.to_string()))?;

            match state.transfers().verify(file_name, announced)? {
                Verdict::Verified(file) => (file, announced),
                Verdict::CrcMismatch { expected, actual } => {
                    return Err(HandlerError::ChecksumMismatch {
                        file_name: file_name.to_string(),
                        expected,
                        actual,
                    })
                }
            }
        };

        let path = self
            .inner
            .vault
            .store(client_id, &file.file_name, &file.content)
            .await?;

        if !session.lock().transfers_mut().release_sealed(file_name, announced) {
            tracing::debug!(
                client_id = %client_id,
                file_name = %file_name,
                "Transfer changed while it was being stored"
            );
        }

        let record = CompletedFileRecord {
            client_id,
            file_name: file.file_name,
            path: Some(path),
            verified: true,
            size: file.content.len() as u64,
            mtime: Utc::now(),
            crc: file.crc,
        };
        self.inner.persistence.save_completed_file(&record).await?;

        tracing::info!(
            client_id = %client_id,
            file_name = %record.file_name,
            size = record.size,
            attempts = file.attempts,
            "File verified and stored"
        );

        Ok(Some(Response::Acknowledged { client_id }))
    }

    /// The client resends from packet 1, which restarts the transfer in place
    fn expect_resend(&self, client_id: ClientId, file_name: &str) -> HandlerResult {
        let session = self.touch(client_id)?;
        let state = session.lock();
        require_session_key(client_id, &state)?;

        let transfer = state
            .transfers()
            .get(file_name)
            .ok_or_else(|| SessionError::NoSuchTransfer(file_name.to_string()))?;

        tracing::info!(
            client_id = %client_id,
            file_name = %file_name,
            attempts = transfer.attempts(),
            "Checksum rejected by client, awaiting resend"
        );

        Ok(None)
    }

    async fn abandon_file(&self, client_id: ClientId, file_name: &str) -> HandlerResult {
        let session = self.touch(client_id)?;

        let abandoned = {
            let mut state = session.lock();
            require_session_key(client_id, &state)?;
            state
                .transfers_mut()
                .clear_transfer(file_name)
                .ok_or_else(|| SessionError::NoSuchTransfer(file_name.to_string()))?
        };

        let record = CompletedFileRecord {
            client_id,
            file_name: file_name.to_string(),
            path: None,
            verified: false,
            size: abandoned.original_size(),
            mtime: Utc::now(),
            crc: abandoned.announced_crc().unwrap_or_default(),
        };
        self.inner.persistence.save_completed_file(&record).await?;

        tracing::warn!(
            client_id = %client_id,
            file_name = %file_name,
            attempts = abandoned.attempts(),
            "Client abandoned file after checksum failures"
        );

        Ok(Some(Response::Acknowledged { client_id }))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Resolve the session and refresh its activity clock
    fn touch(&self, client_id: ClientId) -> Result<Arc<ClientSession>, HandlerError> {
        let session = self
            .inner
            .registry
            .find_by_id(client_id)
            .ok_or(SessionError::SessionNotFound(client_id))?;
        session.update_last_seen();
        Ok(session)
    }
}

fn require_session_key(
    client_id: ClientId,
    state: &SessionState,
) -> Result<&[u8; AES_KEY_LEN], HandlerError> {
    match (state.crypto_state(), state.aes_key()) {
        (CryptoState::HasSessionKey, Some(key)) => Ok(key),
        (current, _) => Err(HandlerError::NotReady {
            client_id,
            state: current,
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
