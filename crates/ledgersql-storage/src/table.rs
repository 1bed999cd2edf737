//! Row, index, and sequence storage for one table.
//!
//! [`TableStore`] wraps a backend with one table's schema and layout and
//! provides the operations the VM's storage opcodes are built on:
//!
//! - the row-id registry (REPEATPK enumeration),
//! - per-column reads/writes, including dynamic-bytes chains,
//! - index key buckets and the distinct-key registry (REPEATIDX/REPEATIDXV),
//! - AUTOINCREMENT sequence counters.
//!
//! Registries store a count word at their base slot and entries in the
//! chain starting at `Keccak256(base)`. Removal swap-pops, so enumeration
//! order is not insertion order; the VM sorts wherever order is observable.

use std::collections::BTreeMap;

use ledgersql_schema::Table;
use ledgersql_types::{ColumnRef, SequenceRef, TypeFamily};

use crate::slot::{
    add_offset, chain_start, index_bucket_slot, index_registry_slot, row_base_slot,
    rows_registry_slot, sequence_slot, TableLayout, Word,
};
use crate::{rlp, StorageBackend};

/// Encode an index key from per-column encoded values.
#[must_use]
pub fn encode_index_key(values: &[Vec<u8>]) -> Vec<u8> {
    let refs: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
    rlp::list_of_strings(&refs)
}

/// Decode an index key back into per-column encoded values.
#[must_use]
pub fn decode_index_key(key: &[u8]) -> Option<Vec<Vec<u8>>> {
    rlp::decode_list_of_strings(key)
}

fn word_to_u64(word: &Word) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    u64::from_be_bytes(bytes)
}

fn u64_to_word(v: u64) -> Word {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&v.to_be_bytes());
    word
}

/// Per-row slot cache used inside a single LOAD invocation.
///
/// Caches the fixed slots of one row so adjacent columns in the same slot
/// cost one storage read. Must not outlive a write to the row; one LOAD
/// never interleaves with writes, so the cache is valid for its lifetime.
#[derive(Debug)]
pub struct RowReader {
    base: Word,
    cache: BTreeMap<u64, Word>,
}

impl RowReader {
    /// Position a reader on one row.
    #[must_use]
    pub fn new(table_name: &str, row_id: u64) -> Self {
        Self {
            base: row_base_slot(table_name, row_id),
            cache: BTreeMap::new(),
        }
    }

    fn word(&mut self, backend: &dyn StorageBackend, slot_offset: u64) -> Word {
        *self
            .cache
            .entry(slot_offset)
            .or_insert_with(|| backend.read(&add_offset(&self.base, slot_offset)))
    }
}

/// One table's view of the slot store.
pub struct TableStore<'a> {
    backend: &'a mut dyn StorageBackend,
    table: &'a Table,
    layout: TableLayout,
}

impl<'a> TableStore<'a> {
    /// Open a table over a backend.
    pub fn new(backend: &'a mut dyn StorageBackend, table: &'a Table) -> Self {
        let layout = TableLayout::new(table);
        Self {
            backend,
            table,
            layout,
        }
    }

    /// The table this store operates on.
    #[must_use]
    pub fn table(&self) -> &Table {
        self.table
    }

    // -- generic count + chain lists ----------------------------------------

    fn list_len(&self, base: &Word) -> u64 {
        word_to_u64(&self.backend.read(base))
    }

    fn list_entry_slot(base: &Word, i: u64) -> Word {
        add_offset(&chain_start(base), i)
    }

    fn list_push_u64(&mut self, base: &Word, value: u64) {
        let len = self.list_len(base);
        self.backend
            .write(&Self::list_entry_slot(base, len), &u64_to_word(value));
        self.backend.write(base, &u64_to_word(len + 1));
    }

    fn list_u64s(&self, base: &Word) -> Vec<u64> {
        let len = self.list_len(base);
        (0..len)
            .map(|i| word_to_u64(&self.backend.read(&Self::list_entry_slot(base, i))))
            .collect()
    }

    /// Swap-pop removal; returns whether the value was present.
    fn list_remove_u64(&mut self, base: &Word, value: u64) -> bool {
        let len = self.list_len(base);
        for i in 0..len {
            let slot = Self::list_entry_slot(base, i);
            if word_to_u64(&self.backend.read(&slot)) == value {
                let last_slot = Self::list_entry_slot(base, len - 1);
                let last = self.backend.read(&last_slot);
                self.backend.write(&slot, &last);
                self.backend.write(&last_slot, &[0u8; 32]);
                self.backend.write(base, &u64_to_word(len - 1));
                return true;
            }
        }
        false
    }

    // -- row registry --------------------------------------------------------

    /// All stored row ids, ascending.
    #[must_use]
    pub fn row_ids(&self) -> Vec<u64> {
        let mut ids = self.list_u64s(&rows_registry_slot(&self.table.name));
        ids.sort_unstable();
        ids
    }

    /// Whether a row id is present.
    #[must_use]
    pub fn has_row(&self, row_id: u64) -> bool {
        self.list_u64s(&rows_registry_slot(&self.table.name))
            .contains(&row_id)
    }

    /// Register a row id.
    pub fn insert_row_id(&mut self, row_id: u64) {
        self.list_push_u64(&rows_registry_slot(&self.table.name), row_id);
    }

    /// Unregister a row id. Returns whether it was present.
    pub fn remove_row_id(&mut self, row_id: u64) -> bool {
        self.list_remove_u64(&rows_registry_slot(&self.table.name), row_id)
    }

    // -- sequences -----------------------------------------------------------

    /// Advance an AUTOINCREMENT counter and return the issued value.
    /// Counters start at 1.
    pub fn next_sequence(&mut self, seq: SequenceRef) -> u64 {
        let slot = sequence_slot(&self.table.name, seq.index() as u8);
        let next = word_to_u64(&self.backend.read(&slot)) + 1;
        self.backend.write(&slot, &u64_to_word(next));
        next
    }

    // -- dynamic bytes -------------------------------------------------------

    /// Read a dynamic-bytes value whose header sits at `slot`.
    fn read_dyn_at(&self, slot: &Word) -> Vec<u8> {
        let header = self.backend.read(slot);
        if header[31] & 1 == 0 {
            // inline: last byte = 2 * length, data left-aligned
            let len = (header[31] / 2) as usize;
            header[..len.min(31)].to_vec()
        } else {
            let len = ((word_to_u64(&header) - 1) / 2) as usize;
            let mut out = Vec::with_capacity(len);
            let start = chain_start(slot);
            let mut i = 0u64;
            while out.len() < len {
                let chunk = self.backend.read(&add_offset(&start, i));
                let take = (len - out.len()).min(32);
                out.extend_from_slice(&chunk[..take]);
                i += 1;
            }
            out
        }
    }

    /// Write a dynamic-bytes value whose header sits at `slot`.
    fn write_dyn_at(&mut self, slot: &Word, data: &[u8]) {
        // clear any previous long-form chain before switching representation
        let prev = self.backend.read(slot);
        if prev[31] & 1 == 1 {
            let prev_len = ((word_to_u64(&prev) - 1) / 2) as usize;
            let start = chain_start(slot);
            for i in 0..prev_len.div_ceil(32) {
                self.backend.write(&add_offset(&start, i as u64), &[0u8; 32]);
            }
        }
        if data.len() <= 31 {
            let mut header = [0u8; 32];
            header[..data.len()].copy_from_slice(data);
            header[31] = (data.len() * 2) as u8;
            self.backend.write(slot, &header);
        } else {
            let header = u64_to_word((data.len() * 2 + 1) as u64);
            self.backend.write(slot, &header);
            let start = chain_start(slot);
            for (i, chunk) in data.chunks(32).enumerate() {
                let mut word = [0u8; 32];
                word[..chunk.len()].copy_from_slice(chunk);
                self.backend.write(&add_offset(&start, i as u64), &word);
            }
        }
    }

    // -- columns -------------------------------------------------------------

    /// Read one column of one row through the per-row cache.
    #[must_use]
    pub fn read_column(&self, reader: &mut RowReader, col: ColumnRef) -> Vec<u8> {
        let cs = self.layout.column(col);
        let dtype = self.table.columns[col.index()].dtype;
        if matches!(dtype.family(), TypeFamily::DynamicBytes) {
            let header_slot = add_offset(&reader.base, cs.slot_offset);
            self.read_dyn_at(&header_slot)
        } else {
            let word = reader.word(&*self.backend, cs.slot_offset);
            word[cs.byte_offset..cs.byte_offset + cs.width].to_vec()
        }
    }

    /// Write one column of one row.
    pub fn write_column(&mut self, row_id: u64, col: ColumnRef, data: &[u8]) {
        let cs = self.layout.column(col);
        let dtype = self.table.columns[col.index()].dtype;
        let base = row_base_slot(&self.table.name, row_id);
        let slot = add_offset(&base, cs.slot_offset);
        if matches!(dtype.family(), TypeFamily::DynamicBytes) {
            self.write_dyn_at(&slot, data);
        } else {
            debug_assert_eq!(data.len(), cs.width, "column width mismatch");
            let mut word = self.backend.read(&slot);
            word[cs.byte_offset..cs.byte_offset + cs.width].copy_from_slice(data);
            self.backend.write(&slot, &word);
        }
    }

    /// Zero every slot of one row (long-form chains included).
    pub fn clear_row(&mut self, row_id: u64) {
        let base = row_base_slot(&self.table.name, row_id);
        for (i, col) in self.table.columns.iter().enumerate() {
            if matches!(col.dtype.family(), TypeFamily::DynamicBytes) {
                let cs = self.layout.column(ColumnRef::new(i as u8));
                self.write_dyn_at(&add_offset(&base, cs.slot_offset), &[]);
            }
        }
        for offset in 0..self.layout.slots_used() {
            self.backend.write(&add_offset(&base, offset), &[0u8; 32]);
        }
    }

    // -- indices -------------------------------------------------------------

    /// Row ids currently stored under `key` of the named index, ascending.
    #[must_use]
    pub fn index_rows(&self, index_name: &str, key: &[u8]) -> Vec<u64> {
        let bucket = index_bucket_slot(&self.table.name, index_name, key);
        let mut rows = self.list_u64s(&bucket);
        rows.sort_unstable();
        rows
    }

    /// All distinct encoded keys currently present under the named index,
    /// sorted bytewise.
    #[must_use]
    pub fn index_keys(&self, index_name: &str) -> Vec<Vec<u8>> {
        let registry = index_registry_slot(&self.table.name, index_name);
        let len = self.list_len(&registry);
        let mut keys: Vec<Vec<u8>> = (0..len)
            .map(|i| self.read_dyn_at(&TableStore::list_entry_slot(&registry, i)))
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Add `row_id` under `key`, registering the key on first use.
    pub fn index_insert(&mut self, index_name: &str, key: &[u8], row_id: u64) {
        let bucket = index_bucket_slot(&self.table.name, index_name, key);
        if self.list_len(&bucket) == 0 {
            let registry = index_registry_slot(&self.table.name, index_name);
            let len = self.list_len(&registry);
            self.write_dyn_at(&TableStore::list_entry_slot(&registry, len), key);
            self.backend.write(&registry, &u64_to_word(len + 1));
        }
        self.list_push_u64(&bucket, row_id);
    }

    /// Remove `row_id` from under `key`, unregistering the key when its
    /// bucket empties.
    pub fn index_remove(&mut self, index_name: &str, key: &[u8], row_id: u64) {
        let bucket = index_bucket_slot(&self.table.name, index_name, key);
        if !self.list_remove_u64(&bucket, row_id) {
            return;
        }
        if self.list_len(&bucket) > 0 {
            return;
        }
        let registry = index_registry_slot(&self.table.name, index_name);
        let len = self.list_len(&registry);
        for i in 0..len {
            let slot = TableStore::list_entry_slot(&registry, i);
            if self.read_dyn_at(&slot) == key {
                let last_slot = TableStore::list_entry_slot(&registry, len - 1);
                let last = self.read_dyn_at(&last_slot);
                self.write_dyn_at(&last_slot, &[]);
                if i != len - 1 {
                    self.write_dyn_at(&slot, &last);
                }
                self.backend.write(&registry, &u64_to_word(len - 1));
                return;
            }
        }
    }
}
