//! Grammar codec.
//!
//! All grammar sequences of a session feed one [`SharedGrammar`]. Each
//! sequence buffers its deltas privately and appends them in one critical
//! section at finish, claiming a disjoint range of the shared output.
//!
//! # Modules
//!
//! - `compressor`: online Sequitur with run-length terminals
//! - `format`: persisted rule table
//! - `expansion`: loaded grammar and lazy forward/backward expansion
//! - `sequence`: the per-element [`GrammarSequence`]

mod compressor;
mod expansion;
mod format;
mod sequence;
mod shared;

pub use compressor::{GrammarCompressor, GrammarStats};
pub use expansion::{Expansion, LoadedGrammar};
pub use format::{decode_rules, encode_rules, GRAMMAR_MAGIC};
pub use sequence::GrammarSequence;
pub use shared::SharedGrammar;

/// One grammar symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    /// A value repeated `count` times
    Terminal {
        /// Value
        value: i64,
        /// Run length, at least 1
        count: u64,
    },
    /// Reference to another rule
    Rule(u32),
}

/// Fully expand rule 0 of a rule table into a vector.
///
/// Reference expansion for tests; readers use [`Expansion`].
#[cfg(test)]
pub(crate) fn expand_all(rules: &[Vec<Symbol>]) -> Vec<i64> {
    let mut out = Vec::new();
    if rules.is_empty() {
        return out;
    }
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    while let Some((rule, pos)) = stack.pop() {
        let body = &rules[rule];
        if pos == body.len() {
            continue;
        }
        stack.push((rule, pos + 1));
        match body[pos] {
            Symbol::Terminal { value, count } => {
                out.extend(std::iter::repeat(value).take(count as usize));
            }
            Symbol::Rule(r) => stack.push((r as usize, 0)),
        }
    }
    out
}
