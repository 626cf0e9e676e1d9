//! Persisted rule table.
//!
//! ```text
//! ┌────────────┬────────────────┬────────────────┬──────────────────────┐
//! │ Magic (4)  │ Total len (8)  │ Rule count (4) │ Rules...             │
//! └────────────┴────────────────┴────────────────┴──────────────────────┘
//!
//! Rule:     symbol count (4), then symbols
//! Symbol:   tag 0 = terminal: value (8), run length (8)
//!           tag 1 = rule reference: rule index (4)
//! ```
//!
//! The table is gzip-wrapped when stored in the grammar stream.

use super::Symbol;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use tracestore_core::encoding::truncated;
use tracestore_core::{Error, Result};

/// Magic bytes opening a rule table: "SQTR"
pub const GRAMMAR_MAGIC: [u8; 4] = *b"SQTR";

const TAG_TERMINAL: u8 = 0;
const TAG_RULE: u8 = 1;

/// Write a rule table whose root expands to `total` values.
pub fn encode_rules<W: Write + ?Sized>(out: &mut W, rules: &[Vec<Symbol>], total: u64) -> Result<()> {
    out.write_all(&GRAMMAR_MAGIC)?;
    out.write_u64::<LittleEndian>(total)?;
    out.write_u32::<LittleEndian>(rules.len() as u32)?;
    for body in rules {
        out.write_u32::<LittleEndian>(body.len() as u32)?;
        for sym in body {
            match *sym {
                Symbol::Terminal { value, count } => {
                    out.write_u8(TAG_TERMINAL)?;
                    out.write_i64::<LittleEndian>(value)?;
                    out.write_u64::<LittleEndian>(count)?;
                }
                Symbol::Rule(r) => {
                    out.write_u8(TAG_RULE)?;
                    out.write_u32::<LittleEndian>(r)?;
                }
            }
        }
    }
    Ok(())
}

/// Read a rule table written by [`encode_rules`].
///
/// Only the layout is checked here; structural validation happens when the
/// table is loaded.
pub fn decode_rules<R: Read + ?Sized>(input: &mut R) -> Result<(Vec<Vec<Symbol>>, u64)> {
    let ctx = "grammar rule table";
    let mut magic = [0u8; 4];
    input.read_exact(&mut magic).map_err(truncated(ctx))?;
    if magic != GRAMMAR_MAGIC {
        return Err(Error::corrupt("invalid grammar magic"));
    }
    let total = input.read_u64::<LittleEndian>().map_err(truncated(ctx))?;
    let rule_count = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
    if rule_count == 0 {
        return Err(Error::corrupt("grammar without a root rule"));
    }

    let mut rules = Vec::with_capacity((rule_count as usize).min(1 << 16));
    for _ in 0..rule_count {
        let len = input.read_u32::<LittleEndian>().map_err(truncated(ctx))?;
        let mut body = Vec::with_capacity((len as usize).min(1 << 16));
        for _ in 0..len {
            let sym = match input.read_u8().map_err(truncated(ctx))? {
                TAG_TERMINAL => Symbol::Terminal {
                    value: input.read_i64::<LittleEndian>().map_err(truncated(ctx))?,
                    count: input.read_u64::<LittleEndian>().map_err(truncated(ctx))?,
                },
                TAG_RULE => Symbol::Rule(input.read_u32::<LittleEndian>().map_err(truncated(ctx))?),
                tag => return Err(Error::corrupt(format!("unknown grammar symbol tag {}", tag))),
            };
            body.push(sym);
        }
        rules.push(body);
    }
    Ok((rules, total))
}
