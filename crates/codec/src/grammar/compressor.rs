//! Online grammar induction (Sequitur) with run-length terminals.
//!
//! Rule bodies are circular doubly linked lists of nodes held in one arena.
//! Each list starts at a guard node. Two invariants hold after every append:
//!
//! - **digram uniqueness**: no pair of adjacent symbols occurs twice
//! - **rule utility**: every rule except the root is referenced at least twice
//!
//! The digram table maps a pair of symbols to the first node of its single
//! occurrence.

use super::Symbol;
use rustc_hash::FxHashMap;

type NodeId = u32;
type RuleId = u32;

const NIL: NodeId = u32::MAX;
const ROOT: RuleId = 0;

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Guard(RuleId),
    Symbol(Symbol),
}

#[derive(Debug, Clone, Copy)]
struct Node {
    kind: NodeKind,
    prev: NodeId,
    next: NodeId,
}

#[derive(Debug, Clone, Copy)]
struct Rule {
    guard: NodeId,
    uses: u32,
}

/// Size figures of a grammar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrammarStats {
    /// Live rules, root included
    pub rules: usize,
    /// Symbols across all rule bodies
    pub symbols: usize,
    /// Values appended
    pub len: u64,
}

/// Incrementally built grammar over `i64` values.
#[derive(Debug)]
pub struct GrammarCompressor {
    nodes: Vec<Node>,
    free_nodes: Vec<NodeId>,
    rules: Vec<Option<Rule>>,
    free_rules: Vec<RuleId>,
    digrams: FxHashMap<(Symbol, Symbol), NodeId>,
    len: u64,
}

impl Default for GrammarCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarCompressor {
    /// Create an empty grammar holding only the root rule.
    pub fn new() -> Self {
        let mut grammar = GrammarCompressor {
            nodes: Vec::new(),
            free_nodes: Vec::new(),
            rules: Vec::new(),
            free_rules: Vec::new(),
            digrams: FxHashMap::default(),
            len: 0,
        };
        let root = grammar.new_rule();
        debug_assert_eq!(root, ROOT);
        grammar
    }

    /// Number of values appended so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append one value to the root rule.
    ///
    /// A value equal to the root's last terminal extends that terminal's run.
    pub fn append(&mut self, value: i64) {
        self.len += 1;
        let last = self.last(ROOT);
        if let NodeKind::Symbol(Symbol::Terminal { value: v, count }) = self.nodes[last as usize].kind
        {
            if v == value {
                // The digram ending at `last` is keyed by the old count
                let prev = self.prev(last);
                self.delete_digram(prev);
                self.nodes[last as usize].kind = NodeKind::Symbol(Symbol::Terminal {
                    value,
                    count: count + 1,
                });
                self.check(prev);
                return;
            }
        }
        let node = self.new_symbol(Symbol::Terminal { value, count: 1 });
        self.insert_after(last, node);
        self.check(last);
    }

    /// Live rules, numbered densely in breadth-first order from the root.
    ///
    /// `Symbol::Rule` indices in the result refer to positions in the
    /// returned vector; index 0 is the root.
    pub fn rules(&self) -> Vec<Vec<Symbol>> {
        let mut numbering: FxHashMap<RuleId, u32> = FxHashMap::default();
        numbering.insert(ROOT, 0);
        let mut order = vec![ROOT];
        let mut out = Vec::new();
        let mut i = 0;
        while i < order.len() {
            let rule = order[i];
            i += 1;
            let mut body = Vec::new();
            for sym in self.body(rule) {
                match sym {
                    Symbol::Rule(r) => {
                        let next_index = order.len() as u32;
                        let index = *numbering.entry(r).or_insert_with(|| {
                            order.push(r);
                            next_index
                        });
                        body.push(Symbol::Rule(index));
                    }
                    terminal => body.push(terminal),
                }
            }
            out.push(body);
        }
        out
    }

    /// Current size figures.
    pub fn stats(&self) -> GrammarStats {
        let live: Vec<RuleId> = (0..self.rules.len() as RuleId)
            .filter(|&r| self.rules[r as usize].is_some())
            .collect();
        GrammarStats {
            rules: live.len(),
            symbols: live.iter().map(|&r| self.body(r).len()).sum(),
            len: self.len,
        }
    }

    // ------------------------------------------------------------------
    // Arena
    // ------------------------------------------------------------------

    fn alloc_node(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            prev: NIL,
            next: NIL,
        };
        match self.free_nodes.pop() {
            Some(id) => {
                self.nodes[id as usize] = node;
                id
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as NodeId
            }
        }
    }

    fn new_rule(&mut self) -> RuleId {
        let id = match self.free_rules.pop() {
            Some(id) => id,
            None => {
                self.rules.push(None);
                (self.rules.len() - 1) as RuleId
            }
        };
        let guard = self.alloc_node(NodeKind::Guard(id));
        self.nodes[guard as usize].prev = guard;
        self.nodes[guard as usize].next = guard;
        self.rules[id as usize] = Some(Rule { guard, uses: 0 });
        id
    }

    fn new_symbol(&mut self, sym: Symbol) -> NodeId {
        if let Symbol::Rule(r) = sym {
            self.rule_mut(r).uses += 1;
        }
        self.alloc_node(NodeKind::Symbol(sym))
    }

    fn rule(&self, r: RuleId) -> Rule {
        match self.rules[r as usize] {
            Some(rule) => rule,
            None => unreachable!("reference to deleted rule {}", r),
        }
    }

    fn rule_mut(&mut self, r: RuleId) -> &mut Rule {
        match self.rules[r as usize].as_mut() {
            Some(rule) => rule,
            None => unreachable!("reference to deleted rule {}", r),
        }
    }

    fn body(&self, r: RuleId) -> Vec<Symbol> {
        let guard = self.rule(r).guard;
        let mut out = Vec::new();
        let mut node = self.next(guard);
        while node != guard {
            if let Some(sym) = self.symbol(node) {
                out.push(sym);
            }
            node = self.next(node);
        }
        out
    }

    #[inline]
    fn prev(&self, n: NodeId) -> NodeId {
        self.nodes[n as usize].prev
    }

    #[inline]
    fn next(&self, n: NodeId) -> NodeId {
        self.nodes[n as usize].next
    }

    #[inline]
    fn first(&self, r: RuleId) -> NodeId {
        self.next(self.rule(r).guard)
    }

    #[inline]
    fn last(&self, r: RuleId) -> NodeId {
        self.prev(self.rule(r).guard)
    }

    #[inline]
    fn symbol(&self, n: NodeId) -> Option<Symbol> {
        match self.nodes[n as usize].kind {
            NodeKind::Symbol(sym) => Some(sym),
            NodeKind::Guard(_) => None,
        }
    }

    #[inline]
    fn is_guard(&self, n: NodeId) -> bool {
        matches!(self.nodes[n as usize].kind, NodeKind::Guard(_))
    }

    fn same_symbol(&self, a: NodeId, b: NodeId) -> bool {
        match (self.symbol(a), self.symbol(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    fn digram_key(&self, n: NodeId) -> Option<(Symbol, Symbol)> {
        let next = self.next(n);
        if next == NIL {
            return None;
        }
        Some((self.symbol(n)?, self.symbol(next)?))
    }

    // ------------------------------------------------------------------
    // Linking
    // ------------------------------------------------------------------

    fn join(&mut self, left: NodeId, right: NodeId) {
        if self.next(left) != NIL {
            self.delete_digram(left);

            // In a run like `a a a` only the first digram is indexed; when
            // the run is broken the surviving pair must be re-indexed.
            let (rp, rn) = (self.prev(right), self.next(right));
            if rp != NIL && rn != NIL && self.same_symbol(right, rp) && self.same_symbol(right, rn)
            {
                self.index_digram(right);
            }
            let (lp, ln) = (self.prev(left), self.next(left));
            if lp != NIL && ln != NIL && self.same_symbol(left, ln) && self.same_symbol(left, lp) {
                self.index_digram(lp);
            }
        }
        self.nodes[left as usize].next = right;
        self.nodes[right as usize].prev = left;
    }

    fn insert_after(&mut self, at: NodeId, node: NodeId) {
        let next = self.next(at);
        self.join(node, next);
        self.join(at, node);
    }

    /// Unlink and free a symbol node, releasing its rule reference.
    fn remove_node(&mut self, n: NodeId) {
        let (prev, next) = (self.prev(n), self.next(n));
        self.join(prev, next);
        self.delete_digram(n);
        if let Some(Symbol::Rule(r)) = self.symbol(n) {
            self.rule_mut(r).uses -= 1;
        }
        self.free_nodes.push(n);
    }

    fn index_digram(&mut self, n: NodeId) {
        if let Some(key) = self.digram_key(n) {
            self.digrams.insert(key, n);
        }
    }

    fn delete_digram(&mut self, n: NodeId) {
        if self.is_guard(n) || self.is_guard(self.next(n)) {
            return;
        }
        if let Some(key) = self.digram_key(n) {
            if self.digrams.get(&key) == Some(&n) {
                self.digrams.remove(&key);
            }
        }
    }

    // ------------------------------------------------------------------
    // Invariant enforcement
    // ------------------------------------------------------------------

    /// Look up the digram starting at `n`; index it if new, fold it if
    /// repeated. Returns whether the digram already existed.
    fn check(&mut self, n: NodeId) -> bool {
        if self.is_guard(n) || self.is_guard(self.next(n)) {
            return false;
        }
        let key = match self.digram_key(n) {
            Some(key) => key,
            None => return false,
        };
        match self.digrams.get(&key).copied() {
            None => {
                self.digrams.insert(key, n);
                false
            }
            Some(found) if found == n => false,
            Some(found) => {
                // Overlapping occurrences (`a a a`) are left alone
                if self.next(found) != n {
                    self.fold(n, found);
                }
                true
            }
        }
    }

    /// Replace the repeated digram at `new` (whose first occurrence is at
    /// `existing`) with a rule.
    fn fold(&mut self, new: NodeId, existing: NodeId) {
        let before = self.prev(existing);
        let after = self.next(self.next(existing));
        let whole_rule = match self.nodes[before as usize].kind {
            NodeKind::Guard(r) if r != ROOT && self.is_guard(after) => Some(r),
            _ => None,
        };

        let rule = match whole_rule {
            Some(r) => {
                self.substitute(new, r);
                r
            }
            None => {
                let r = self.new_rule();
                let (a, b) = match self.digram_key(new) {
                    Some(pair) => pair,
                    None => unreachable!("folding a digram that touches a guard"),
                };
                let na = self.new_symbol(a);
                let last = self.last(r);
                self.insert_after(last, na);
                let nb = self.new_symbol(b);
                let last = self.last(r);
                self.insert_after(last, nb);

                self.substitute(existing, r);
                self.substitute(new, r);
                let first = self.first(r);
                self.index_digram(first);
                r
            }
        };

        // A rule now referenced only from inside `rule` is inlined
        for end in [true, false] {
            if self.rules[rule as usize].is_none() {
                break;
            }
            let node = if end { self.first(rule) } else { self.last(rule) };
            if let Some(Symbol::Rule(inner)) = self.symbol(node) {
                if self.rule(inner).uses == 1 {
                    self.expand(node);
                }
            }
        }
    }

    /// Replace the digram starting at `n` with a reference to `r`.
    fn substitute(&mut self, n: NodeId, r: RuleId) {
        let q = self.prev(n);
        self.remove_node(self.next(q));
        self.remove_node(self.next(q));
        let node = self.new_symbol(Symbol::Rule(r));
        self.insert_after(q, node);
        if !self.check(q) {
            let next = self.next(q);
            self.check(next);
        }
    }

    /// Inline the body of the once-used rule referenced at `n`.
    fn expand(&mut self, n: NodeId) {
        let inner = match self.symbol(n) {
            Some(Symbol::Rule(r)) => r,
            _ => return,
        };
        let (left, right) = (self.prev(n), self.next(n));
        let (first, last) = (self.first(inner), self.last(inner));
        let guard = self.rule(inner).guard;

        self.delete_digram(n);
        self.join(left, right);
        self.free_nodes.push(n);
        self.free_nodes.push(guard);
        self.rules[inner as usize] = None;
        self.free_rules.push(inner);

        self.join(left, first);
        self.join(last, right);
        self.index_digram(last);
    }
}
