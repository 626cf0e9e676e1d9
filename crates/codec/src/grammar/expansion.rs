//! Loaded grammar and lazy expansion.

use super::format::decode_rules;
use super::Symbol;
use flate2::read::GzDecoder;
use std::sync::Arc;
use tracestore_core::{Error, Result};

/// A validated, immutable rule table with per-rule expanded lengths.
#[derive(Debug, Clone)]
pub struct LoadedGrammar {
    rules: Vec<Vec<Symbol>>,
    lengths: Vec<u64>,
}

impl LoadedGrammar {
    /// Load a gzip-wrapped rule table.
    pub fn decode(compressed: &[u8]) -> Result<Self> {
        let mut decoder = GzDecoder::new(compressed);
        let (rules, total) = decode_rules(&mut decoder)?;
        let grammar = Self::from_rules(rules)?;
        if grammar.len() != total {
            return Err(Error::corrupt(format!(
                "grammar expands to {} values, header says {}",
                grammar.len(),
                total
            )));
        }
        Ok(grammar)
    }

    /// Validate a rule table and compute expanded lengths.
    ///
    /// Rejects dangling references, cycles, empty rules other than the root,
    /// zero run lengths and lengths overflowing `u64`.
    pub fn from_rules(rules: Vec<Vec<Symbol>>) -> Result<Self> {
        if rules.is_empty() {
            return Err(Error::corrupt("grammar without a root rule"));
        }
        for (i, body) in rules.iter().enumerate() {
            if i != 0 && body.is_empty() {
                return Err(Error::corrupt(format!("grammar rule {} is empty", i)));
            }
            for sym in body {
                match *sym {
                    Symbol::Terminal { count: 0, .. } => {
                        return Err(Error::corrupt("grammar terminal with zero run length"))
                    }
                    Symbol::Rule(r) if r as usize >= rules.len() || r == 0 => {
                        return Err(Error::corrupt(format!("grammar references invalid rule {}", r)))
                    }
                    _ => {}
                }
            }
        }
        let lengths = expanded_lengths(&rules)?;
        Ok(LoadedGrammar { rules, lengths })
    }

    /// Number of values the root expands to.
    pub fn len(&self) -> u64 {
        self.lengths[0]
    }

    /// Whether the grammar expands to nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rules, root included.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Expanded length of a single symbol.
    #[inline]
    fn symbol_len(&self, sym: Symbol) -> u64 {
        match sym {
            Symbol::Terminal { count, .. } => count,
            Symbol::Rule(r) => self.lengths[r as usize],
        }
    }
}

/// Post-order walk computing each rule's expanded length.
fn expanded_lengths(rules: &[Vec<Symbol>]) -> Result<Vec<u64>> {
    const UNVISITED: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    let mut state = vec![UNVISITED; rules.len()];
    let mut lengths = vec![0u64; rules.len()];
    for start in 0..rules.len() {
        if state[start] == DONE {
            continue;
        }
        let mut stack = vec![start];
        while let Some(&rule) = stack.last() {
            if state[rule] == UNVISITED {
                state[rule] = IN_PROGRESS;
                for sym in &rules[rule] {
                    if let Symbol::Rule(r) = *sym {
                        match state[r as usize] {
                            UNVISITED => stack.push(r as usize),
                            IN_PROGRESS => return Err(Error::corrupt("grammar rules form a cycle")),
                            _ => {}
                        }
                    }
                }
                continue;
            }
            stack.pop();
            if state[rule] == DONE {
                continue;
            }
            let mut total: u64 = 0;
            for sym in &rules[rule] {
                let len = match *sym {
                    Symbol::Terminal { count, .. } => count,
                    Symbol::Rule(r) => lengths[r as usize],
                };
                total = total
                    .checked_add(len)
                    .ok_or_else(|| Error::corrupt("grammar length overflows"))?;
            }
            lengths[rule] = total;
            state[rule] = DONE;
        }
    }
    Ok(lengths)
}

/// Lazy depth-first expansion of a range of the root rule.
///
/// Forward expansions yield positions `offset..offset + count`; backward
/// expansions yield `end - 1` down to `end - count`. Seeking uses the
/// per-rule expanded lengths, so cost is proportional to grammar depth plus
/// values produced.
#[derive(Debug, Clone)]
pub struct Expansion {
    grammar: Arc<LoadedGrammar>,
    // (rule, cursor); forward cursors count consumed symbols, backward
    // cursors count symbols still to the left
    stack: Vec<(u32, usize)>,
    run: Option<(i64, u64)>,
    remaining: u64,
    reverse: bool,
}

impl Expansion {
    /// Expand `count` values starting at `offset`.
    pub fn forward(grammar: Arc<LoadedGrammar>, offset: u64, count: u64) -> Result<Self> {
        check_range(&grammar, offset, count)?;
        let mut expansion = Expansion::start(grammar, count, false);
        expansion.skip_values(offset);
        Ok(expansion)
    }

    /// Expand the `count` values ending just before `end`, last first.
    pub fn backward(grammar: Arc<LoadedGrammar>, end: u64, count: u64) -> Result<Self> {
        let offset = end
            .checked_sub(count)
            .ok_or_else(|| Error::corrupt("grammar range starts before zero"))?;
        check_range(&grammar, offset, count)?;
        let skip = grammar.len() - end;
        let mut expansion = Expansion::start(grammar, count, true);
        expansion.skip_values(skip);
        Ok(expansion)
    }

    fn start(grammar: Arc<LoadedGrammar>, count: u64, reverse: bool) -> Self {
        let root_cursor = if reverse { grammar.rules[0].len() } else { 0 };
        Expansion {
            grammar,
            stack: vec![(0, root_cursor)],
            run: None,
            remaining: count,
            reverse,
        }
    }

    fn push_rule(&mut self, rule: u32) {
        let cursor = if self.reverse {
            self.grammar.rules[rule as usize].len()
        } else {
            0
        };
        self.stack.push((rule, cursor));
    }

    fn next_symbol(&mut self) -> Option<Symbol> {
        loop {
            let (rule, cursor) = self.stack.last_mut()?;
            let body = &self.grammar.rules[*rule as usize];
            if self.reverse {
                if *cursor == 0 {
                    self.stack.pop();
                    continue;
                }
                *cursor -= 1;
                return Some(body[*cursor]);
            }
            if *cursor == body.len() {
                self.stack.pop();
                continue;
            }
            *cursor += 1;
            return Some(body[*cursor - 1]);
        }
    }

    /// Discard `n` values from the current end without producing them.
    fn skip_values(&mut self, mut n: u64) {
        while n > 0 {
            let sym = match self.next_symbol() {
                Some(sym) => sym,
                None => return,
            };
            let len = self.grammar.symbol_len(sym);
            if n >= len {
                n -= len;
                continue;
            }
            match sym {
                Symbol::Terminal { value, count } => {
                    self.run = Some((value, count - n));
                    n = 0;
                }
                Symbol::Rule(r) => self.push_rule(r),
            }
        }
    }
}

impl Iterator for Expansion {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            if let Some((value, left)) = self.run.as_mut() {
                if *left > 0 {
                    *left -= 1;
                    self.remaining -= 1;
                    return Some(*value);
                }
                self.run = None;
            }
            match self.next_symbol()? {
                Symbol::Terminal { value, count } => self.run = Some((value, count)),
                Symbol::Rule(r) => self.push_rule(r),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

fn check_range(grammar: &LoadedGrammar, offset: u64, count: u64) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= grammar.len() => Ok(()),
        _ => Err(Error::corrupt(format!(
            "grammar range {}+{} exceeds {} values",
            offset,
            count,
            grammar.len()
        ))),
    }
}
