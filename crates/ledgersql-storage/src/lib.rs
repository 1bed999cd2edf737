//! Key/value storage layout for LedgerSQL.
//!
//! The engine reads and writes 32-byte words in an externally-owned slot
//! store (the enclosing ledger). This crate owns everything below the VM's
//! LOAD/INSERT/UPDATE/DELETE opcodes: deterministic slot addressing
//! ([`slot`]), the minimal RLP used in slot preimages ([`rlp`]), the
//! per-table column packing ([`TableLayout`]), dynamic-bytes chains, the
//! row-id and index-key registries, and sequence counters ([`TableStore`]).
//!
//! Absent slots read as zero. There is no internal caching across calls;
//! the only cache is the short-lived per-row [`RowReader`] inside one LOAD.

pub mod rlp;
mod slot;
mod table;

pub use slot::{
    add_offset, chain_start, index_bucket_slot, index_registry_slot, keccak256, row_base_slot,
    rows_registry_slot, sequence_slot, ColumnSlot, TableLayout, Word,
};
pub use table::{decode_index_key, encode_index_key, RowReader, TableStore};

/// The slot store contract.
///
/// Reads of never-written slots return the zero word. Writes are visible to
/// subsequent reads within the same statement; the engine never caches
/// across instructions.
pub trait StorageBackend {
    /// Read the word at `slot`.
    fn read(&self, slot: &Word) -> Word;

    /// Write the word at `slot`.
    fn write(&mut self, slot: &Word, value: &Word);
}

/// An in-memory backend for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    slots: std::collections::BTreeMap<Word, Word>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-zero slots currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot was ever written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, slot: &Word) -> Word {
        self.slots.get(slot).copied().unwrap_or([0u8; 32])
    }

    fn write(&mut self, slot: &Word, value: &Word) {
        if *value == [0u8; 32] {
            self.slots.remove(slot);
        } else {
            self.slots.insert(*slot, *value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_reads_zero_for_absent() {
        let mut backend = MemoryBackend::new();
        let key = keccak256(b"missing");
        assert_eq!(backend.read(&key), [0u8; 32]);

        let mut value = [0u8; 32];
        value[0] = 1;
        backend.write(&key, &value);
        assert_eq!(backend.read(&key), value);

        backend.write(&key, &[0u8; 32]);
        assert_eq!(backend.read(&key), [0u8; 32]);
        assert!(backend.is_empty());
    }
}
