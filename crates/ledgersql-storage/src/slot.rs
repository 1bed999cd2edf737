//! Deterministic slot addressing.
//!
//! A row's base slot is `Keccak256(RLP(["tables", table, "primary",
//! uint(row_id)]))`. Column data lives at `base + slot_offset`, byte-sliced
//! at the column's byte offset. Registry and index buckets hang off
//! analogous preimages; long-form payloads chain from `Keccak256(slot)`.

use ledgersql_schema::Table;
use ledgersql_types::{ColumnRef, TypeFamily};
use sha3::{Digest, Keccak256};

use crate::rlp;

/// A 32-byte slot address or stored word.
pub type Word = [u8; 32];

/// Keccak-256 of arbitrary bytes.
#[must_use]
pub fn keccak256(data: &[u8]) -> Word {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Base slot of one row of a table.
#[must_use]
pub fn row_base_slot(table: &str, row_id: u64) -> Word {
    keccak256(&rlp::list_of_strings(&[
        b"tables",
        table.as_bytes(),
        b"primary",
        &rlp::uint_be(row_id),
    ]))
}

/// Base slot of the row-id registry of a table.
#[must_use]
pub fn rows_registry_slot(table: &str) -> Word {
    keccak256(&rlp::list_of_strings(&[
        b"tables",
        table.as_bytes(),
        b"rows",
    ]))
}

/// Base slot of the distinct-key registry of an index.
#[must_use]
pub fn index_registry_slot(table: &str, index: &str) -> Word {
    keccak256(&rlp::list_of_strings(&[
        b"tables",
        table.as_bytes(),
        b"indices",
        index.as_bytes(),
    ]))
}

/// Base slot of one key bucket of an index.
#[must_use]
pub fn index_bucket_slot(table: &str, index: &str, key: &[u8]) -> Word {
    keccak256(&rlp::list_of_strings(&[
        b"tables",
        table.as_bytes(),
        b"indices",
        index.as_bytes(),
        key,
    ]))
}

/// Slot of one AUTOINCREMENT sequence counter of a table.
#[must_use]
pub fn sequence_slot(table: &str, seq: u8) -> Word {
    keccak256(&rlp::list_of_strings(&[
        b"tables",
        table.as_bytes(),
        b"sequences",
        &rlp::uint_be(u64::from(seq)),
    ]))
}

/// `slot + offset`, treating the slot as a 256-bit big-endian integer.
#[must_use]
pub fn add_offset(slot: &Word, offset: u64) -> Word {
    let mut out = *slot;
    let mut carry = offset;
    for byte in out.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = u64::from(*byte) + (carry & 0xff);
        *byte = (sum & 0xff) as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    out
}

/// First slot of a long-form payload chain: `Keccak256(slot)`.
#[must_use]
pub fn chain_start(slot: &Word) -> Word {
    keccak256(slot)
}

// ---------------------------------------------------------------------------
// Column layout
// ---------------------------------------------------------------------------

/// Precomputed position of one column within its row's slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSlot {
    /// Slot offset from the row base slot.
    pub slot_offset: u64,
    /// Byte offset inside that slot.
    pub byte_offset: usize,
    /// Byte width occupied (the 32-byte header for dynamic bytes).
    pub width: usize,
}

/// Per-table column packing: fixed-width columns pack left-to-right into
/// 32-byte slots in declaration order; a column never straddles a slot
/// boundary, and dynamic-bytes headers take a whole slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
    columns: Vec<ColumnSlot>,
    slots_used: u64,
}

impl TableLayout {
    /// Compute the layout of a table.
    #[must_use]
    pub fn new(table: &Table) -> Self {
        let mut columns = Vec::with_capacity(table.columns.len());
        let mut slot: u64 = 0;
        let mut byte: usize = 0;
        for col in &table.columns {
            let width = col.dtype.size();
            if byte + width > 32 {
                slot += 1;
                byte = 0;
            }
            columns.push(ColumnSlot {
                slot_offset: slot,
                byte_offset: byte,
                width,
            });
            byte += width;
            debug_assert!(byte <= 32);
            // dynamic-bytes headers own their slot outright
            if matches!(col.dtype.family(), TypeFamily::DynamicBytes) {
                slot += 1;
                byte = 0;
            }
        }
        let slots_used = if byte > 0 { slot + 1 } else { slot };
        Self {
            columns,
            slots_used,
        }
    }

    /// Position of one column.
    #[must_use]
    pub fn column(&self, r: ColumnRef) -> ColumnSlot {
        self.columns[r.index()]
    }

    /// Number of slots a row occupies (excluding long-form chains).
    #[must_use]
    pub const fn slots_used(&self) -> u64 {
        self.slots_used
    }
}
