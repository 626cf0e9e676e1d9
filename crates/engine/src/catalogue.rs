//! Class/instruction catalogue (stream 0).
//!
//! Every instrumented class reserves a contiguous range of global
//! instruction indices. Records are queued while tracing and written once,
//! at session finish.
//!
//! ## Record layout
//!
//! ```text
//! ┌──────────────┬───────────────┬─────────────┬──────────────┐
//! │ name (u32+N) │ first (u32)   │ end (u32)   │ flags (u32)  │
//! └──────────────┴───────────────┴─────────────┴──────────────┘
//! ```
//!
//! Records follow each other without a count; the stream ends after the
//! last one.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::io::Cursor;
use tracestore_core::encoding::{read_string, truncated, write_string};
use tracestore_core::{Error, Result};

/// One instrumented class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord {
    /// Internal class name
    pub name: String,
    /// First global instruction index
    pub first_instruction: u32,
    /// One past the last instruction index
    pub end_instruction: u32,
    /// Access flags of the class
    pub access_flags: u32,
}

impl ClassRecord {
    /// Number of instructions covered.
    pub fn instruction_count(&self) -> u32 {
        self.end_instruction - self.first_instruction
    }

    /// Whether global instruction `index` belongs to this class.
    pub fn contains(&self, index: u32) -> bool {
        (self.first_instruction..self.end_instruction).contains(&index)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(16 + self.name.len());
        write_string(&mut out, &self.name)?;
        out.write_u32::<LittleEndian>(self.first_instruction)?;
        out.write_u32::<LittleEndian>(self.end_instruction)?;
        out.write_u32::<LittleEndian>(self.access_flags)?;
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct CatalogueState {
    next_instruction: u32,
    queued: Vec<ClassRecord>,
}

/// Queue of class records with the global instruction counter.
#[derive(Debug, Default)]
pub struct ClassCatalogue {
    state: Mutex<CatalogueState>,
}

impl ClassCatalogue {
    /// Create an empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `instruction_count` indices for class `name`.
    ///
    /// Fails with `Capacity` once the 32-bit index space is exhausted.
    pub fn register(
        &self,
        name: impl Into<String>,
        access_flags: u32,
        instruction_count: u32,
    ) -> Result<ClassRecord> {
        let name = name.into();
        let mut state = self.state.lock();
        let first = state.next_instruction;
        let end = first.checked_add(instruction_count).ok_or_else(|| {
            Error::capacity(format!(
                "instruction index space exhausted registering {}",
                name
            ))
        })?;
        state.next_instruction = end;
        let record = ClassRecord {
            name,
            first_instruction: first,
            end_instruction: end,
            access_flags,
        };
        state.queued.push(record.clone());
        Ok(record)
    }

    /// Total instructions reserved so far.
    pub fn instruction_count(&self) -> u32 {
        self.state.lock().next_instruction
    }

    /// Number of queued classes.
    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    /// Whether no class has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take all queued records in registration order.
    pub(crate) fn drain(&self) -> Vec<ClassRecord> {
        std::mem::take(&mut self.state.lock().queued)
    }
}

/// Parse the uncompressed contents of the catalogue stream.
pub fn decode_catalogue(bytes: &[u8]) -> Result<Vec<ClassRecord>> {
    let ctx = "class record";
    let mut input = Cursor::new(bytes);
    let mut records = Vec::new();
    while (input.position() as usize) < bytes.len() {
        let name = read_string(&mut input)?;
        let first_instruction = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
        let end_instruction = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
        let access_flags = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
        if end_instruction < first_instruction {
            return Err(Error::corrupt(format!(
                "class {} ends before it starts ({}..{})",
                name, first_instruction, end_instruction
            )));
        }
        records.push(ClassRecord {
            name,
            first_instruction,
            end_instruction,
            access_flags,
        });
    }
    Ok(records)
}
