//! Append-only journal with per-record checksums.
//!
//! Binary format per record:
//! ```text
//! [body_len:  u32]
//! [sequence:  u64]
//! [timestamp: i64]
//! [kind_len: u16][kind: bytes]
//! [payload_len: u32][payload: bytes]
//! [checksum: u32]  // CRC32C over sequence+timestamp+kind+payload
//! ```
//! Segments rotate at a size limit and are named `journal-NNNNNN.bin`.

use crc32c::crc32c;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

use types::execution::Execution;
use types::ids::OrderId;
use types::order::{Order, OrderStatus};

use crate::memory::MemoryStore;
use crate::reader;
use crate::store::{ExchangeStore, StoreError, StoreStats};

/// Record kind labels.
pub const KIND_ORDER: &str = "order";
pub const KIND_EXECUTION: &str = "execution";

/// One persisted journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub sequence: u64,
    /// Unix nanoseconds when the record was written.
    pub timestamp: i64,
    pub kind: String,
    pub payload: Vec<u8>,
    pub checksum: u32,
}

impl JournalRecord {
    pub fn new(sequence: u64, timestamp: i64, kind: impl Into<String>, payload: Vec<u8>) -> Self {
        let kind = kind.into();
        let checksum = Self::compute_checksum(sequence, timestamp, &kind, &payload);
        Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        }
    }

    pub fn compute_checksum(sequence: u64, timestamp: i64, kind: &str, payload: &[u8]) -> u32 {
        let mut buf = Vec::with_capacity(16 + kind.len() + payload.len());
        buf.extend_from_slice(&sequence.to_le_bytes());
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(kind.as_bytes());
        buf.extend_from_slice(payload);
        crc32c(&buf)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum
            == Self::compute_checksum(self.sequence, self.timestamp, &self.kind, &self.payload)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let kind = self.kind.as_bytes();
        let body_len =
            (8 + 8 + 2 + kind.len() + 4 + self.payload.len() + 4) as u32;

        let mut buf = Vec::with_capacity(4 + body_len as usize);
        buf.extend_from_slice(&body_len.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.extend_from_slice(&(kind.len() as u16).to_le_bytes());
        buf.extend_from_slice(kind);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Parse one record; returns `(record, bytes_consumed)`.
    pub fn from_bytes(data: &[u8]) -> Result<(Self, usize), StoreError> {
        let corrupt = |msg: &str| StoreError::Corrupt(msg.to_string());

        if data.len() < 4 {
            return Err(corrupt("short length prefix"));
        }
        let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
        // 8 seq + 8 ts + 2 kind_len + 4 payload_len + 4 crc
        if body_len < 26 || body_len > 100_000_000 {
            return Err(corrupt("implausible body length"));
        }
        let total = 4 + body_len;
        if data.len() < total {
            return Err(corrupt("truncated record"));
        }

        let body = &data[4..total];
        let mut pos = 0usize;

        let sequence = u64::from_le_bytes(body[pos..pos + 8].try_into().unwrap_or_default());
        pos += 8;
        let timestamp = i64::from_le_bytes(body[pos..pos + 8].try_into().unwrap_or_default());
        pos += 8;

        let kind_len =
            u16::from_le_bytes(body[pos..pos + 2].try_into().unwrap_or_default()) as usize;
        pos += 2;
        if pos + kind_len > body.len() {
            return Err(corrupt("kind length out of bounds"));
        }
        let kind = String::from_utf8(body[pos..pos + kind_len].to_vec())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        pos += kind_len;

        if pos + 4 > body.len() {
            return Err(corrupt("missing payload length"));
        }
        let payload_len =
            u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap_or_default()) as usize;
        pos += 4;
        if pos + payload_len + 4 > body.len() {
            return Err(corrupt("payload length out of bounds"));
        }
        let payload = body[pos..pos + payload_len].to_vec();
        pos += payload_len;

        let checksum = u32::from_le_bytes(body[pos..pos + 4].try_into().unwrap_or_default());

        let record = Self {
            sequence,
            timestamp,
            kind,
            payload,
            checksum,
        };
        if !record.verify_checksum() {
            return Err(corrupt("checksum mismatch"));
        }
        Ok((record, total))
    }
}

/// When to fsync the segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPolicy {
    EveryWrite,
    EveryN(usize),
}

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub dir: PathBuf,
    /// Segment rotation threshold in bytes.
    pub max_file_size: u64,
    pub sync_policy: SyncPolicy,
}

impl JournalConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_file_size: 64 * 1024 * 1024,
            sync_policy: SyncPolicy::EveryWrite,
        }
    }
}

/// Appends records to rotating segment files.
pub struct JournalWriter {
    config: JournalConfig,
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_file_size: u64,
    file_index: u64,
    next_sequence: u64,
    writes_since_sync: usize,
}

impl JournalWriter {
    pub fn open(config: JournalConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.dir)?;
        let file_index = reader::latest_segment_index(&config.dir);
        let current_file = segment_path(&config.dir, file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&current_file)?;
        let current_file_size = file.metadata()?.len();

        Ok(Self {
            config,
            writer: BufWriter::new(file),
            current_file,
            current_file_size,
            file_index,
            next_sequence: 1,
            writes_since_sync: 0,
        })
    }

    /// Continue numbering after a replay.
    pub fn set_next_sequence(&mut self, seq: u64) {
        self.next_sequence = seq;
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn current_file_path(&self) -> &Path {
        &self.current_file
    }

    /// Append a new record with the next sequence number.
    pub fn append(
        &mut self,
        timestamp: i64,
        kind: &str,
        payload: Vec<u8>,
    ) -> Result<JournalRecord, StoreError> {
        if self.current_file_size >= self.config.max_file_size {
            self.rotate()?;
        }

        let record = JournalRecord::new(self.next_sequence, timestamp, kind, payload);
        let bytes = record.to_bytes();
        self.writer.write_all(&bytes)?;
        self.writer.flush()?;

        self.current_file_size += bytes.len() as u64;
        self.next_sequence += 1;
        self.writes_since_sync += 1;

        let should_sync = match self.config.sync_policy {
            SyncPolicy::EveryWrite => true,
            SyncPolicy::EveryN(n) => self.writes_since_sync >= n,
        };
        if should_sync {
            self.writer.get_ref().sync_all()?;
            self.writes_since_sync = 0;
        }
        Ok(record)
    }

    /// Flush and fsync; called before shutdown and rotation.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.writes_since_sync = 0;
        Ok(())
    }

    fn rotate(&mut self) -> Result<(), StoreError> {
        self.sync()?;
        self.file_index += 1;
        self.current_file = segment_path(&self.config.dir, self.file_index);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.current_file)?;
        self.writer = BufWriter::new(file);
        self.current_file_size = 0;
        Ok(())
    }
}

pub(crate) fn segment_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("journal-{index:06}.bin"))
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

/// Journal-backed store: queries hit the in-memory indexes, writes append
/// to the journal first and update the indexes after.
pub struct JournalStore {
    memory: MemoryStore,
    writer: Mutex<JournalWriter>,
    replayed: AtomicU64,
}

impl JournalStore {
    /// Open the journal directory, replaying existing segments.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_config(JournalConfig::new(dir))
    }

    pub fn open_with_config(config: JournalConfig) -> Result<Self, StoreError> {
        fs::create_dir_all(&config.dir)?;
        let records = reader::replay_and_repair(&config.dir)?;
        let memory = MemoryStore::new();
        let mut last_seq = 0;
        let mut replayed = 0u64;

        for record in &records {
            match record.kind.as_str() {
                KIND_ORDER => {
                    let order: Order = serde_json::from_slice(&record.payload)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    memory.save_order(&order)?;
                }
                KIND_EXECUTION => {
                    let execution: Execution = serde_json::from_slice(&record.payload)
                        .map_err(|e| StoreError::Serialization(e.to_string()))?;
                    memory.save_execution(&execution)?;
                }
                other => {
                    warn!(kind = other, sequence = record.sequence, "skipping unknown journal record");
                }
            }
            last_seq = record.sequence;
            replayed += 1;
        }

        let mut writer = JournalWriter::open(config)?;
        writer.set_next_sequence(last_seq + 1);

        Ok(Self {
            memory,
            writer: Mutex::new(writer),
            replayed: AtomicU64::new(replayed),
        })
    }

    /// Records rebuilt from disk at open time.
    pub fn replayed_records(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    pub fn sync(&self) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.sync()
    }

    fn append(&self, kind: &str, payload: Vec<u8>) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.append(now_nanos(), kind, payload)?;
        Ok(())
    }
}

impl ExchangeStore for JournalStore {
    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(order)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.append(KIND_ORDER, payload)?;
        self.memory.save_order(order)
    }

    fn save_execution(&self, execution: &Execution) -> Result<(), StoreError> {
        let payload = serde_json::to_vec(execution)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.append(KIND_EXECUTION, payload)?;
        self.memory.save_execution(execution)
    }

    fn find_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        self.memory.find_order(order_id)
    }

    fn orders_by_symbol(&self, symbol: &str) -> Result<Vec<Order>, StoreError> {
        self.memory.orders_by_symbol(symbol)
    }

    fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, StoreError> {
        self.memory.orders_by_status(status)
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<Execution>, StoreError> {
        self.memory.recent_executions(limit)
    }

    fn count_orders(&self) -> Result<usize, StoreError> {
        self.memory.count_orders()
    }

    fn stats(&self) -> Result<StoreStats, StoreError> {
        self.memory.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use types::numeric::Price;
    use types::order::{OrdKind, Side};

    fn sample_order(id: u64, status: OrderStatus) -> Order {
        let mut o = Order::new(
            OrderId::new(id),
            format!("CL-{id}"),
            "AAPL",
            Side::Buy,
            OrdKind::Limit,
            100,
            Some(Price::from_u64(150)),
            id,
            0,
        );
        o.status = status;
        o
    }

    fn sample_record(seq: u64) -> JournalRecord {
        JournalRecord::new(seq, 1_708_123_456_789_000_000, KIND_ORDER, vec![1, 2, 3])
    }

    #[test]
    fn record_checksum_roundtrip() {
        let record = sample_record(1);
        assert!(record.verify_checksum());

        let bytes = record.to_bytes();
        let (decoded, consumed) = JournalRecord::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn tampered_payload_detected() {
        let record = sample_record(1);
        let mut bytes = record.to_bytes();
        // Flip a payload byte (last payload byte sits before the 4 crc bytes).
        let idx = bytes.len() - 5;
        bytes[idx] ^= 0xFF;
        assert!(matches!(
            JournalRecord::from_bytes(&bytes),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_record_detected() {
        let bytes = sample_record(1).to_bytes();
        assert!(JournalRecord::from_bytes(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn writer_assigns_monotonic_sequences() {
        let tmp = TempDir::new().unwrap();
        let mut writer = JournalWriter::open(JournalConfig::new(tmp.path())).unwrap();
        let a = writer.append(1, KIND_ORDER, vec![1]).unwrap();
        let b = writer.append(2, KIND_ORDER, vec![2]).unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(writer.next_sequence(), 3);
    }

    #[test]
    fn rotation_at_size_limit() {
        let tmp = TempDir::new().unwrap();
        let config = JournalConfig {
            max_file_size: 100,
            ..JournalConfig::new(tmp.path())
        };
        let mut writer = JournalWriter::open(config).unwrap();
        for i in 0..20 {
            writer.append(i, KIND_ORDER, vec![0; 16]).unwrap();
        }

        let segments = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("journal-"))
            .count();
        assert!(segments > 1, "expected rotation to create multiple segments");
    }

    #[test]
    fn store_replays_on_open() {
        let tmp = TempDir::new().unwrap();
        {
            let store = JournalStore::open(tmp.path()).unwrap();
            store.save_order(&sample_order(1, OrderStatus::New)).unwrap();
            store.save_order(&sample_order(1, OrderStatus::Filled)).unwrap();
            store.save_order(&sample_order(2, OrderStatus::New)).unwrap();
            store
                .save_execution(&Execution::new(
                    types::ids::ExecId::new(1),
                    OrderId::new(1),
                    OrderId::new(2),
                    "AAPL",
                    100,
                    Price::from_u64(150),
                    7,
                ))
                .unwrap();
        }

        let store = JournalStore::open(tmp.path()).unwrap();
        assert_eq!(store.replayed_records(), 4);
        assert_eq!(store.count_orders().unwrap(), 2);
        let o1 = store.find_order(OrderId::new(1)).unwrap().unwrap();
        assert_eq!(o1.status, OrderStatus::Filled);
        assert_eq!(store.recent_executions(10).unwrap().len(), 1);
        assert_eq!(store.stats().unwrap().total_volume, 100);
    }

    #[test]
    fn store_survives_corrupt_tail() {
        let tmp = TempDir::new().unwrap();
        {
            let store = JournalStore::open(tmp.path()).unwrap();
            store.save_order(&sample_order(1, OrderStatus::New)).unwrap();
            store.save_order(&sample_order(2, OrderStatus::New)).unwrap();
        }

        // Simulate a crash mid-write: append garbage to the segment.
        let segment = segment_path(tmp.path(), 0);
        let mut bytes = fs::read(&segment).unwrap();
        bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE]);
        fs::write(&segment, bytes).unwrap();

        let store = JournalStore::open(tmp.path()).unwrap();
        assert_eq!(store.count_orders().unwrap(), 2);
    }

    #[test]
    fn new_writes_continue_sequence_after_replay() {
        let tmp = TempDir::new().unwrap();
        {
            let store = JournalStore::open(tmp.path()).unwrap();
            store.save_order(&sample_order(1, OrderStatus::New)).unwrap();
        }
        let store = JournalStore::open(tmp.path()).unwrap();
        store.save_order(&sample_order(2, OrderStatus::New)).unwrap();

        let records = reader::replay_dir(tmp.path()).unwrap();
        let seqs: Vec<u64> = records.iter().map(|r| r.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
