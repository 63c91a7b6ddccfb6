//! Transfer Reassembly
//!
//! Files arrive as numbered packets (1-based) that are appended strictly in
//! sequence. Every packet repeats the transfer's `content_size` and
//! `total_packets`, which lets the table tell apart:
//! - the next packet (appended)
//! - a packet it already has (ignored if the bytes match, rejected otherwise)
//! - a packet from the future (rejected as out of order)
//! - packet 1 of a finished or reshaped transfer (restart in place)
//!
//! Nothing is mutated when a chunk is rejected.
//!
//! Decoding a complete payload can be split in two so the caller can run it
//! without holding the session lock: [`TransferTable::begin_seal`] copies the
//! payload out, [`TransferTable::finish_seal`] records the result if the
//! transfer was not restarted in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::crc::crc32;

use super::types::{
    Chunk, ChunkProgress, CompletedFile, SessionError, TransferLimits, Verdict,
    MAX_FILE_NAME_LEN,
};

// ============================================================================
// Transfer State
// ============================================================================

/// One file being received for one client
#[derive(Debug, Clone)]
pub struct TransferState {
    file_name: String,
    content_size: u64,
    original_size: u64,
    total_packets: u16,
    /// Every accepted packet, in order
    packets: Vec<PacketMark>,
    bytes_received: u64,
    payload: Vec<u8>,
    /// Plaintext, once the complete payload has been sealed
    decoded: Option<Vec<u8>>,
    announced_crc: Option<u32>,
    attempts: u32,
    /// Changes whenever the transfer is created or restarted
    generation: u64,
    last_activity: Instant,
}

/// Length and CRC of one accepted packet, for duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacketMark {
    len: u64,
    crc: u32,
}

impl PacketMark {
    fn of(data: &[u8]) -> Self {
        Self {
            len: data.len() as u64,
            crc: crc32(data),
        }
    }
}

impl TransferState {
    fn new(
        file_name: &str,
        chunk: &Chunk<'_>,
        attempts: u32,
        generation: u64,
        now: Instant,
    ) -> Self {
        Self {
            file_name: file_name.to_string(),
            content_size: chunk.content_size,
            original_size: chunk.original_size,
            total_packets: chunk.total_packets,
            packets: Vec::new(),
            bytes_received: 0,
            payload: Vec::new(),
            decoded: None,
            announced_crc: None,
            attempts,
            generation,
            last_activity: now,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    pub fn original_size(&self) -> u64 {
        self.original_size
    }

    pub fn total_packets(&self) -> u16 {
        self.total_packets
    }

    pub fn packets_received(&self) -> u16 {
        // bounded by total_packets, which is a u16
        self.packets.len() as u16
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// CRC reported to the client when the transfer was sealed
    pub fn announced_crc(&self) -> Option<u32> {
        self.announced_crc
    }

    pub fn is_complete(&self) -> bool {
        self.packets_received() == self.total_packets
    }

    pub fn is_sealed(&self) -> bool {
        self.announced_crc.is_some()
    }

    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }

    fn same_shape(&self, chunk: &Chunk<'_>) -> bool {
        self.content_size == chunk.content_size
            && self.total_packets == chunk.total_packets
            && self.original_size == chunk.original_size
    }

    fn contents(&self) -> &[u8] {
        self.decoded.as_deref().unwrap_or(&self.payload)
    }

    fn progress(&self, duplicate: bool, restarted: bool) -> ChunkProgress {
        ChunkProgress {
            packets_received: self.packets_received(),
            total_packets: self.total_packets,
            bytes_received: self.bytes_received,
            content_size: self.content_size,
            duplicate,
            restarted,
            complete: self.is_complete(),
        }
    }

    fn accept(
        &mut self,
        chunk: &Chunk<'_>,
        generation: u64,
        now: Instant,
    ) -> Result<ChunkProgress, SessionError> {
        if chunk.packet_number == 1 && (self.is_complete() || !self.same_shape(chunk)) {
            let attempts = if self.same_shape(chunk) { self.attempts + 1 } else { 1 };
            let mut fresh = TransferState::new(&self.file_name, chunk, attempts, generation, now);
            fresh.append(chunk, now)?;
            *self = fresh;
            return Ok(self.progress(false, true));
        }

        if !self.same_shape(chunk) {
            return Err(SessionError::TransferShapeChanged(self.file_name.clone()));
        }

        if chunk.packet_number <= self.packets_received() {
            let recorded = self.packets[usize::from(chunk.packet_number) - 1];
            if recorded != PacketMark::of(chunk.data) {
                return Err(SessionError::ConflictingDuplicate {
                    file_name: self.file_name.clone(),
                    packet_number: chunk.packet_number,
                });
            }
            self.last_activity = now;
            return Ok(self.progress(true, false));
        }

        self.append(chunk, now)?;
        Ok(self.progress(false, false))
    }

    fn append(&mut self, chunk: &Chunk<'_>, now: Instant) -> Result<(), SessionError> {
        let expected = self.packets_received() + 1;
        if chunk.packet_number != expected {
            return Err(SessionError::OutOfOrderChunk {
                file_name: self.file_name.clone(),
                expected,
                actual: chunk.packet_number,
            });
        }

        let incoming = chunk.data.len() as u64;
        let total = self.bytes_received + incoming;
        if total > self.content_size {
            return Err(SessionError::ChunkOverflow {
                file_name: self.file_name.clone(),
                received: self.bytes_received,
                chunk: incoming,
                total: self.content_size,
            });
        }
        if chunk.packet_number == self.total_packets && total != self.content_size {
            return Err(SessionError::TruncatedTransfer {
                file_name: self.file_name.clone(),
                received: total,
                total: self.content_size,
            });
        }

        self.payload.extend_from_slice(chunk.data);
        self.packets.push(PacketMark::of(chunk.data));
        self.bytes_received = total;
        self.last_activity = now;
        Ok(())
    }
}

// ============================================================================
// Transfer Table
// ============================================================================

/// All in-flight transfers of one session, keyed by file name
#[derive(Debug, Default)]
pub struct TransferTable {
    transfers: HashMap<String, TransferState>,
    /// Last generation handed to a transfer
    generations: u64,
}

/// Complete payload copied out of the table for decoding
#[derive(Debug)]
pub struct SealJob {
    file_name: String,
    generation: u64,
    payload: Vec<u8>,
}

impl SealJob {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// First half of sealing a transfer
#[derive(Debug)]
pub enum SealStep {
    /// Already sealed; carries the CRC that was announced
    Sealed(u32),
    /// Needs decoding before [`TransferTable::finish_seal`]
    Pending(SealJob),
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transfer or add the next packet to it
    pub fn accept_chunk(
        &mut self,
        file_name: &str,
        chunk: Chunk<'_>,
        limits: &TransferLimits,
        now: Instant,
    ) -> Result<ChunkProgress, SessionError> {
        validate_file_name(file_name)?;
        validate_chunk_header(&chunk, limits)?;

        let generation = self.generations + 1;
        if let Some(state) = self.transfers.get_mut(file_name) {
            let progress = state.accept(&chunk, generation, now)?;
            if progress.restarted {
                self.generations = generation;
            }
            return Ok(progress);
        }

        if chunk.packet_number != 1 {
            return Err(SessionError::OutOfOrderChunk {
                file_name: file_name.to_string(),
                expected: 1,
                actual: chunk.packet_number,
            });
        }
        if self.transfers.len() >= limits.max_transfers {
            return Err(SessionError::TooManyTransfers {
                limit: limits.max_transfers,
            });
        }

        let mut state = TransferState::new(file_name, &chunk, 1, generation, now);
        state.append(&chunk, now)?;
        let progress = state.progress(false, false);
        self.transfers.insert(file_name.to_string(), state);
        self.generations = generation;

        Ok(progress)
    }

    pub fn is_complete(&self, file_name: &str) -> Result<bool, SessionError> {
        Ok(self.get_existing(file_name)?.is_complete())
    }

    /// Decode a complete payload and record the CRC announced to the client
    ///
    /// Sealing twice returns the CRC from the first call without decoding again.
    pub fn seal<F, E>(&mut self, file_name: &str, decode: F) -> Result<u32, SessionError>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>, E>,
        E: std::fmt::Display,
    {
        match self.begin_seal(file_name)? {
            SealStep::Sealed(crc) => Ok(crc),
            SealStep::Pending(job) => {
                let decoded = decode(job.payload());
                self.finish_seal(job, decoded)
            }
        }
    }

    /// Copy out a complete, unsealed payload so it can be decoded elsewhere
    pub fn begin_seal(&self, file_name: &str) -> Result<SealStep, SessionError> {
        let state = self.get_existing(file_name)?;
        require_complete(state)?;

        if let Some(crc) = state.announced_crc {
            return Ok(SealStep::Sealed(crc));
        }

        Ok(SealStep::Pending(SealJob {
            file_name: file_name.to_string(),
            generation: state.generation,
            payload: state.payload.clone(),
        }))
    }

    /// Record the decoded contents of a [`SealJob`]
    ///
    /// Fails with `TransferRestarted` if packet 1 arrived again (or the
    /// transfer was dropped and begun anew) after the job was taken.
    pub fn finish_seal<E>(
        &mut self,
        job: SealJob,
        decoded: Result<Vec<u8>, E>,
    ) -> Result<u32, SessionError>
    where
        E: std::fmt::Display,
    {
        let file_name = job.file_name;
        let state = self
            .transfers
            .get_mut(&file_name)
            .ok_or_else(|| SessionError::NoSuchTransfer(file_name.clone()))?;
        if state.generation != job.generation {
            return Err(SessionError::TransferRestarted(file_name));
        }
        if let Some(crc) = state.announced_crc {
            return Ok(crc);
        }

        let decoded = decoded.map_err(|e| SessionError::DecodeFailed {
            file_name: file_name.clone(),
            reason: e.to_string(),
        })?;

        if decoded.len() as u64 != state.original_size {
            return Err(SessionError::DecodedSizeMismatch {
                file_name,
                expected: state.original_size,
                actual: decoded.len() as u64,
            });
        }

        let crc = crc32(&decoded);
        state.payload = Vec::new();
        state.decoded = Some(decoded);
        state.announced_crc = Some(crc);

        Ok(crc)
    }

    /// CRC over the reassembled contents
    pub fn checksum(&self, file_name: &str) -> Result<u32, SessionError> {
        let state = self.get_existing(file_name)?;
        require_complete(state)?;
        Ok(crc32(state.contents()))
    }

    /// Compare a complete transfer against `expected_crc` and copy its
    /// contents on a match, leaving the transfer in place
    pub fn verify(&self, file_name: &str, expected_crc: u32) -> Result<Verdict, SessionError> {
        let state = self.get_existing(file_name)?;
        require_complete(state)?;

        let actual = crc32(state.contents());
        if actual != expected_crc {
            return Ok(Verdict::CrcMismatch {
                expected: expected_crc,
                actual,
            });
        }

        Ok(Verdict::Verified(CompletedFile {
            file_name: state.file_name.clone(),
            content: state.contents().to_vec(),
            crc: actual,
            attempts: state.attempts,
        }))
    }

    /// Drop a transfer that is still sealed under `crc`
    ///
    /// Returns false if it is gone or was restarted since.
    pub fn release_sealed(&mut self, file_name: &str, crc: u32) -> bool {
        let sealed = self
            .transfers
            .get(file_name)
            .is_some_and(|state| state.announced_crc == Some(crc));
        if sealed {
            self.transfers.remove(file_name);
        }
        sealed
    }

    /// Compare a complete transfer against `expected_crc`
    ///
    /// A match releases the transfer and hands its contents back. A mismatch
    /// keeps it so the client can resend in place.
    pub fn finalize_and_verify(
        &mut self,
        file_name: &str,
        expected_crc: u32,
    ) -> Result<Verdict, SessionError> {
        let state = self.get_existing(file_name)?;
        require_complete(state)?;

        let actual = crc32(state.contents());
        if actual != expected_crc {
            return Ok(Verdict::CrcMismatch {
                expected: expected_crc,
                actual,
            });
        }

        let state = self
            .transfers
            .remove(file_name)
            .ok_or_else(|| SessionError::NoSuchTransfer(file_name.to_string()))?;
        let attempts = state.attempts;
        let content = match state.decoded {
            Some(decoded) => decoded,
            None => state.payload,
        };

        Ok(Verdict::Verified(CompletedFile {
            file_name: state.file_name,
            content,
            crc: actual,
            attempts,
        }))
    }

    pub fn clear_transfer(&mut self, file_name: &str) -> Option<TransferState> {
        self.transfers.remove(file_name)
    }

    /// Drop every transfer that has not been sealed yet
    ///
    /// Sealed transfers already hold plaintext and survive a key change.
    pub fn clear_unsealed(&mut self) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, state| state.is_sealed());
        before - self.transfers.len()
    }

    /// Drop every transfer idle for longer than `timeout`
    pub fn sweep_stale(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, state| !state.is_stale(now, timeout));
        before - self.transfers.len()
    }

    pub fn get(&self, file_name: &str) -> Option<&TransferState> {
        self.transfers.get(file_name)
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn get_existing(&self, file_name: &str) -> Result<&TransferState, SessionError> {
        self.transfers
            .get(file_name)
            .ok_or_else(|| SessionError::NoSuchTransfer(file_name.to_string()))
    }
}

// ============================================================================
// Validation
// ============================================================================

pub fn validate_file_name(file_name: &str) -> Result<(), SessionError> {
    if file_name.is_empty() {
        return Err(SessionError::InvalidFileName("empty".to_string()));
    }
    if file_name.len() > MAX_FILE_NAME_LEN {
        return Err(SessionError::InvalidFileName(format!(
            "{} bytes (max: {})",
            file_name.len(),
            MAX_FILE_NAME_LEN
        )));
    }
    if file_name.contains('\0') {
        return Err(SessionError::InvalidFileName("embedded NUL".to_string()));
    }
    Ok(())
}

fn validate_chunk_header(chunk: &Chunk<'_>, limits: &TransferLimits) -> Result<(), SessionError> {
    if chunk.content_size > limits.max_file_size {
        return Err(SessionError::TransferTooLarge {
            size: chunk.content_size,
            max: limits.max_file_size,
        });
    }
    if chunk.total_packets == 0
        || chunk.packet_number == 0
        || chunk.packet_number > chunk.total_packets
    {
        return Err(SessionError::InvalidPacketNumber {
            packet_number: chunk.packet_number,
            total_packets: chunk.total_packets,
        });
    }
    Ok(())
}

fn require_complete(state: &TransferState) -> Result<(), SessionError> {
    if state.is_complete() {
        Ok(())
    } else {
        Err(SessionError::TransferIncomplete {
            file_name: state.file_name.clone(),
            received: state.bytes_received,
            total: state.content_size,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::DEFAULT_MAX_FILE_SIZE;

    fn chunk(data: &[u8], packet_number: u16, total_packets: u16, content_size: u64) -> Chunk<'_> {
        Chunk {
            content_size,
            original_size: content_size,
            packet_number,
            total_packets,
            data,
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// Feed `data` as `parts` packets of roughly equal size
    fn send_all(table: &mut TransferTable, name: &str, data: &[u8], parts: u16, now: Instant) {
        let size = data.len().div_ceil(usize::from(parts));
        for (i, piece) in data.chunks(size).enumerate() {
            table
                .accept_chunk(
                    name,
                    chunk(piece, i as u16 + 1, parts, data.len() as u64),
                    &TransferLimits::default(),
                    now,
                )
                .unwrap();
        }
    }

    #[test]
    fn test_complete_exactly_after_last_chunk() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();
        let data = sample(9000);

        for (i, piece) in data.chunks(3000).enumerate() {
            let number = i as u16 + 1;
            let progress = table
                .accept_chunk("report.pdf", chunk(piece, number, 3, 9000), &limits, now)
                .unwrap();

            assert_eq!(progress.packets_received, number);
            assert_eq!(progress.complete, number == 3);
            assert_eq!(table.is_complete("report.pdf").unwrap(), number == 3);
        }

        assert_eq!(table.get("report.pdf").unwrap().bytes_received(), 9000);
    }

    #[test]
    fn test_uneven_chunk_sizes() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();
        let data = sample(10);

        table.accept_chunk("a", chunk(&data[..1], 1, 3, 10), &limits, now).unwrap();
        table.accept_chunk("a", chunk(&data[1..8], 2, 3, 10), &limits, now).unwrap();
        assert!(!table.is_complete("a").unwrap());
        table.accept_chunk("a", chunk(&data[8..], 3, 3, 10), &limits, now).unwrap();
        assert!(table.is_complete("a").unwrap());
    }

    #[test]
    fn test_overflowing_chunk_rejected_without_mutation() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[1; 60], 1, 2, 100), &limits, now).unwrap();
        let result = table.accept_chunk("f", chunk(&[2; 50], 2, 2, 100), &limits, now);

        assert!(matches!(
            result,
            Err(SessionError::ChunkOverflow { received: 60, chunk: 50, total: 100, .. })
        ));
        let state = table.get("f").unwrap();
        assert_eq!(state.bytes_received(), 60);
        assert_eq!(state.packets_received(), 1);
    }

    #[test]
    fn test_first_chunk_overflow_creates_nothing() {
        let mut table = TransferTable::new();
        let result = table.accept_chunk(
            "f",
            chunk(&[0; 20], 1, 2, 10),
            &TransferLimits::default(),
            Instant::now(),
        );

        assert!(matches!(result, Err(SessionError::ChunkOverflow { .. })));
        assert!(table.is_empty());
    }

    #[test]
    fn test_short_final_packet_rejected() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[0; 10], 1, 2, 30), &limits, now).unwrap();
        let result = table.accept_chunk("f", chunk(&[0; 10], 2, 2, 30), &limits, now);

        assert!(matches!(
            result,
            Err(SessionError::TruncatedTransfer { received: 20, total: 30, .. })
        ));
        assert!(!table.is_complete("f").unwrap());
    }

    #[test]
    fn test_declared_size_over_limit_rejected() {
        let mut table = TransferTable::new();
        let limits = TransferLimits {
            max_file_size: 1024,
            ..TransferLimits::default()
        };

        let result =
            table.accept_chunk("big", chunk(&[0; 16], 1, 100, 4096), &limits, Instant::now());

        assert!(matches!(result, Err(SessionError::TransferTooLarge { size: 4096, max: 1024 })));
        assert!(table.get("big").is_none());
    }

    #[test]
    fn test_default_size_cap_applies() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let declared = u64::from(u32::MAX);

        let result =
            table.accept_chunk("huge", chunk(&[0; 16], 1, 1000, declared), &limits, Instant::now());

        assert!(matches!(
            result,
            Err(SessionError::TransferTooLarge { max, .. }) if max == DEFAULT_MAX_FILE_SIZE
        ));
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_transfer_limit() {
        let mut table = TransferTable::new();
        let limits = TransferLimits {
            max_transfers: 2,
            ..TransferLimits::default()
        };
        let now = Instant::now();

        table.accept_chunk("a", chunk(&[0; 5], 1, 2, 10), &limits, now).unwrap();
        table.accept_chunk("b", chunk(&[0; 5], 1, 2, 10), &limits, now).unwrap();

        let result = table.accept_chunk("c", chunk(&[0; 5], 1, 2, 10), &limits, now);
        assert!(matches!(result, Err(SessionError::TooManyTransfers { limit: 2 })));
        assert_eq!(table.len(), 2);

        // open transfers keep accepting packets at the limit
        let progress = table.accept_chunk("a", chunk(&[0; 5], 2, 2, 10), &limits, now).unwrap();
        assert!(progress.complete);

        table.clear_transfer("b");
        assert!(table.accept_chunk("c", chunk(&[0; 5], 1, 2, 10), &limits, now).is_ok());
    }

    #[test]
    fn test_invalid_packet_numbers_rejected() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        for (number, total) in [(0, 3), (4, 3), (1, 0)] {
            let result = table.accept_chunk("f", chunk(&[0; 4], number, total, 12), &limits, now);
            assert!(matches!(result, Err(SessionError::InvalidPacketNumber { .. })));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_file_name_bounds() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        let longest = "n".repeat(MAX_FILE_NAME_LEN);
        let result = table.accept_chunk(&longest, chunk(&[1], 1, 1, 1), &limits, now);
        assert!(result.is_ok());

        let too_long = "n".repeat(MAX_FILE_NAME_LEN + 1);
        let result = table.accept_chunk(&too_long, chunk(&[1], 1, 1, 1), &limits, now);
        assert!(matches!(result, Err(SessionError::InvalidFileName(_))));

        let result = table.accept_chunk("", chunk(&[1], 1, 1, 1), &limits, now);
        assert!(matches!(result, Err(SessionError::InvalidFileName(_))));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        let result = table.accept_chunk("f", chunk(&[0; 10], 2, 3, 30), &limits, now);
        assert!(matches!(
            result,
            Err(SessionError::OutOfOrderChunk { expected: 1, actual: 2, .. })
        ));

        table.accept_chunk("f", chunk(&[0; 10], 1, 3, 30), &limits, now).unwrap();
        let result = table.accept_chunk("f", chunk(&[0; 10], 3, 3, 30), &limits, now);
        assert!(matches!(
            result,
            Err(SessionError::OutOfOrderChunk { expected: 2, actual: 3, .. })
        ));
        assert_eq!(table.get("f").unwrap().packets_received(), 1);
    }

    #[test]
    fn test_duplicate_chunk_is_idempotent() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[1; 10], 1, 3, 30), &limits, now).unwrap();
        table.accept_chunk("f", chunk(&[2; 10], 2, 3, 30), &limits, now).unwrap();

        let progress = table.accept_chunk("f", chunk(&[2; 10], 2, 3, 30), &limits, now).unwrap();
        assert!(progress.duplicate);
        assert_eq!(progress.bytes_received, 20);

        let progress = table.accept_chunk("f", chunk(&[1; 10], 1, 3, 30), &limits, now).unwrap();
        assert!(progress.duplicate);
        assert_eq!(progress.packets_received, 2);

        let result = table.accept_chunk("f", chunk(&[2; 7], 2, 3, 30), &limits, now);
        assert!(matches!(
            result,
            Err(SessionError::ConflictingDuplicate { packet_number: 2, .. })
        ));
    }

    #[test]
    fn test_same_length_duplicate_with_other_bytes_conflicts() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[1; 10], 1, 3, 30), &limits, now).unwrap();
        table.accept_chunk("f", chunk(&[2; 10], 2, 3, 30), &limits, now).unwrap();

        let result = table.accept_chunk("f", chunk(&[7; 10], 1, 3, 30), &limits, now);
        assert!(matches!(
            result,
            Err(SessionError::ConflictingDuplicate { packet_number: 1, .. })
        ));

        let state = table.get("f").unwrap();
        assert_eq!(state.packets_received(), 2);
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_changed_header_mid_transfer_rejected() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[0; 10], 1, 3, 30), &limits, now).unwrap();
        let result = table.accept_chunk("f", chunk(&[0; 10], 2, 4, 40), &limits, now);

        assert!(matches!(result, Err(SessionError::TransferShapeChanged(_))));
    }

    #[test]
    fn test_packet_one_with_new_shape_replaces_transfer() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        table.accept_chunk("f", chunk(&[0; 10], 1, 3, 30), &limits, now).unwrap();
        let progress = table.accept_chunk("f", chunk(&[9; 5], 1, 2, 10), &limits, now).unwrap();

        assert!(progress.restarted);
        let state = table.get("f").unwrap();
        assert_eq!(state.content_size(), 10);
        assert_eq!(state.bytes_received(), 5);
        assert_eq!(state.attempts(), 1);
    }

    #[test]
    fn test_verify_match_releases_transfer() {
        let mut table = TransferTable::new();
        let data = sample(5000);
        send_all(&mut table, "f", &data, 4, Instant::now());

        let verdict = table.finalize_and_verify("f", crc32(&data)).unwrap();

        match verdict {
            Verdict::Verified(file) => {
                assert_eq!(file.content, data);
                assert_eq!(file.crc, crc32(&data));
                assert_eq!(file.attempts, 1);
            }
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert!(matches!(table.is_complete("f"), Err(SessionError::NoSuchTransfer(_))));
    }

    #[test]
    fn test_single_bit_corruption_is_mismatch() {
        let data = sample(3000);
        let expected = crc32(&data);

        for position in [0usize, 1500, 2999] {
            let mut corrupted = data.clone();
            corrupted[position] ^= 0x10;

            let mut table = TransferTable::new();
            send_all(&mut table, "f", &corrupted, 3, Instant::now());

            let verdict = table.finalize_and_verify("f", expected).unwrap();
            assert!(matches!(verdict, Verdict::CrcMismatch { expected: e, .. } if e == expected));
            assert!(table.is_complete("f").unwrap());
        }
    }

    #[test]
    fn test_verify_incomplete_transfer_fails() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        table.accept_chunk("f", chunk(&[0; 10], 1, 2, 20), &limits, Instant::now()).unwrap();

        let result = table.finalize_and_verify("f", 0);
        assert!(matches!(
            result,
            Err(SessionError::TransferIncomplete { received: 10, total: 20, .. })
        ));
        assert!(matches!(table.checksum("f"), Err(SessionError::TransferIncomplete { .. })));
    }

    #[test]
    fn test_seal_decodes_and_announces_crc() {
        let mut table = TransferTable::new();
        let wire = sample(64);
        send_all(&mut table, "f", &wire, 2, Instant::now());

        // shorter plaintext than the wire bytes, as with padded ciphertext
        let state_original = 60u64;
        table.transfers.get_mut("f").unwrap().original_size = state_original;

        let crc = table
            .seal("f", |bytes| Ok::<_, String>(bytes[..60].to_vec()))
            .unwrap();

        assert_eq!(crc, crc32(&wire[..60]));
        assert_eq!(table.get("f").unwrap().announced_crc(), Some(crc));
        assert_eq!(table.checksum("f").unwrap(), crc);

        // second seal does not decode again
        let again = table
            .seal("f", |_| Err::<Vec<u8>, _>("must not be called"))
            .unwrap();
        assert_eq!(again, crc);
    }

    #[test]
    fn test_seal_rejects_size_mismatch_and_decode_errors() {
        let mut table = TransferTable::new();
        let wire = sample(32);
        send_all(&mut table, "f", &wire, 1, Instant::now());

        let result = table.seal("f", |bytes| Ok::<_, String>(bytes[..10].to_vec()));
        assert!(matches!(
            result,
            Err(SessionError::DecodedSizeMismatch { expected: 32, actual: 10, .. })
        ));

        let result = table.seal("f", |_| Err::<Vec<u8>, _>("bad padding"));
        assert!(matches!(result, Err(SessionError::DecodeFailed { .. })));

        assert!(table.get("f").unwrap().announced_crc().is_none());
    }

    #[test]
    fn test_split_seal_records_result() {
        let mut table = TransferTable::new();
        let data = sample(40);
        send_all(&mut table, "f", &data, 2, Instant::now());

        let job = match table.begin_seal("f").unwrap() {
            SealStep::Pending(job) => job,
            other => panic!("unexpected step: {:?}", other),
        };
        assert_eq!(job.payload(), &data[..]);

        let decoded = job.payload().to_vec();
        let crc = table.finish_seal(job, Ok::<_, String>(decoded)).unwrap();

        assert_eq!(crc, crc32(&data));
        assert!(matches!(table.begin_seal("f").unwrap(), SealStep::Sealed(c) if c == crc));
    }

    #[test]
    fn test_finish_seal_after_restart_is_discarded() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();
        let old = sample(20);
        send_all(&mut table, "f", &old, 2, now);

        let job = match table.begin_seal("f").unwrap() {
            SealStep::Pending(job) => job,
            other => panic!("unexpected step: {:?}", other),
        };

        // packet 1 of a resend lands while the old payload is being decoded
        table.accept_chunk("f", chunk(&[5; 10], 1, 2, 20), &limits, now).unwrap();

        let decoded = job.payload().to_vec();
        let result = table.finish_seal(job, Ok::<_, String>(decoded));
        assert!(matches!(result, Err(SessionError::TransferRestarted(_))));

        let state = table.get("f").unwrap();
        assert!(!state.is_sealed());
        assert_eq!(state.packets_received(), 1);
    }

    #[test]
    fn test_finish_seal_after_clear_and_recreate_is_discarded() {
        let mut table = TransferTable::new();
        let now = Instant::now();
        send_all(&mut table, "f", &sample(20), 1, now);

        let job = match table.begin_seal("f").unwrap() {
            SealStep::Pending(job) => job,
            other => panic!("unexpected step: {:?}", other),
        };
        table.clear_transfer("f");
        send_all(&mut table, "f", &sample(20), 1, now);

        let decoded = job.payload().to_vec();
        let result = table.finish_seal(job, Ok::<_, String>(decoded));
        assert!(matches!(result, Err(SessionError::TransferRestarted(_))));
    }

    #[test]
    fn test_verify_keeps_transfer_until_released() {
        let mut table = TransferTable::new();
        let data = sample(50);
        send_all(&mut table, "f", &data, 2, Instant::now());
        let crc = table.seal("f", |bytes| Ok::<_, String>(bytes.to_vec())).unwrap();

        match table.verify("f", crc).unwrap() {
            Verdict::Verified(file) => assert_eq!(file.content, data),
            other => panic!("unexpected verdict: {:?}", other),
        }
        assert!(table.is_complete("f").unwrap());

        assert!(!table.release_sealed("f", crc ^ 1));
        assert!(table.release_sealed("f", crc));
        assert!(table.is_empty());
        assert!(!table.release_sealed("f", crc));
    }

    #[test]
    fn test_clear_unsealed_keeps_sealed_transfers() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();

        send_all(&mut table, "sealed", &sample(10), 1, now);
        table.seal("sealed", |bytes| Ok::<_, String>(bytes.to_vec())).unwrap();
        send_all(&mut table, "complete", &sample(10), 1, now);
        table.accept_chunk("partial", chunk(&[0; 5], 1, 2, 10), &limits, now).unwrap();

        assert_eq!(table.clear_unsealed(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.get("sealed").is_some());
    }

    #[test]
    fn test_resend_after_mismatch_restarts_in_place() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let now = Instant::now();
        let data = sample(300);
        let expected = crc32(&data);

        let mut corrupted = data.clone();
        corrupted[299] ^= 0xFF;
        send_all(&mut table, "f", &corrupted, 3, now);
        let verdict = table.finalize_and_verify("f", expected).unwrap();
        assert!(matches!(verdict, Verdict::CrcMismatch { .. }));

        for (i, piece) in data.chunks(100).enumerate() {
            let progress = table
                .accept_chunk("f", chunk(piece, i as u16 + 1, 3, 300), &limits, now)
                .unwrap();
            assert_eq!(progress.restarted, i == 0);
            assert_eq!(progress.complete, i == 2);
        }

        match table.finalize_and_verify("f", expected).unwrap() {
            Verdict::Verified(file) => assert_eq!(file.attempts, 2),
            other => panic!("unexpected verdict: {:?}", other),
        }
    }

    #[test]
    fn test_sweep_stale_removes_idle_transfers() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let start = Instant::now();
        let timeout = Duration::from_secs(60);

        table.accept_chunk("old", chunk(&[0; 5], 1, 2, 10), &limits, start).unwrap();
        let later = start + Duration::from_secs(50);
        table.accept_chunk("fresh", chunk(&[0; 5], 1, 2, 10), &limits, later).unwrap();

        assert_eq!(table.sweep_stale(start + Duration::from_secs(60), timeout), 0);
        assert_eq!(table.sweep_stale(start + Duration::from_secs(61), timeout), 1);

        assert!(matches!(table.is_complete("old"), Err(SessionError::NoSuchTransfer(_))));
        let result = table.finalize_and_verify("old", 0);
        assert!(matches!(result, Err(SessionError::NoSuchTransfer(_))));
        assert!(!table.is_complete("fresh").unwrap());
    }

    #[test]
    fn test_chunk_refreshes_activity() {
        let mut table = TransferTable::new();
        let limits = TransferLimits::default();
        let start = Instant::now();
        let timeout = Duration::from_secs(10);

        table.accept_chunk("f", chunk(&[0; 5], 1, 3, 15), &limits, start).unwrap();
        table
            .accept_chunk("f", chunk(&[0; 5], 2, 3, 15), &limits, start + Duration::from_secs(8))
            .unwrap();

        assert_eq!(table.sweep_stale(start + Duration::from_secs(15), timeout), 0);
    }

    #[test]
    fn test_clear_transfer() {
        let mut table = TransferTable::new();
        send_all(&mut table, "f", &sample(10), 1, Instant::now());

        assert!(table.clear_transfer("f").is_some());
        assert!(table.clear_transfer("f").is_none());
        assert!(table.is_empty());
    }
}
