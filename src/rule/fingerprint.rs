//! Stable rule fingerprints.
//!
//! Two rules that differ only in body literal order or variable numbering get
//! the same fingerprint. Body literals are grouped by their variable-blind
//! shape; within a group every ordering is tried and the lexicographically
//! smallest encoding wins. The encoding is hashed with blake3.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::model::{Argument, Literal, Rule, VarId};

/// Orderings tried before falling back to the shape-sorted order.
const MAX_ORDERINGS: usize = 5040;

/// Order-independent identity of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Computes the fingerprint of a rule.
    #[must_use]
    pub fn of(rule: &Rule) -> Self {
        let encoding = canonical_encoding(rule);
        let mut hasher = blake3::Hasher::new();
        for word in &encoding {
            hasher.update(&word.to_le_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

type ShapeKey = (usize, Vec<(u8, u32)>);

fn shape(lit: &Literal) -> ShapeKey {
    let args = lit
        .args
        .iter()
        .map(|a| match a {
            Argument::Empty => (0, 0),
            Argument::Variable(_) => (1, 0),
            Argument::Constant(c) => (2, *c),
        })
        .collect();
    (lit.relation, args)
}

fn encode(rule: &Rule, order: &[usize]) -> Vec<u64> {
    let mut renumber: Vec<(VarId, u64)> = Vec::new();
    let mut out = Vec::new();
    let mut push_literal = |lit: &Literal, out: &mut Vec<u64>| {
        out.push(lit.relation as u64);
        for arg in &lit.args {
            match arg {
                Argument::Empty => out.push(0),
                Argument::Constant(c) => {
                    out.push(1);
                    out.push(u64::from(*c));
                }
                Argument::Variable(v) => {
                    let id = match renumber.iter().find(|(old, _)| old == v) {
                        Some(&(_, id)) => id,
                        None => {
                            let id = renumber.len() as u64;
                            renumber.push((*v, id));
                            id
                        }
                    };
                    out.push(2);
                    out.push(id);
                }
            }
        }
    };
    push_literal(rule.head(), &mut out);
    for &idx in order {
        push_literal(&rule.body()[idx], &mut out);
    }
    out
}

fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let first = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, first);
            out.push(tail);
        }
    }
    out
}

fn canonical_encoding(rule: &Rule) -> Vec<u64> {
    let mut indexed: Vec<(ShapeKey, usize)> = rule
        .body()
        .iter()
        .enumerate()
        .map(|(i, lit)| (shape(lit), i))
        .collect();
    indexed.sort();

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut last: Option<&ShapeKey> = None;
    for (key, idx) in &indexed {
        if last == Some(key) {
            if let Some(group) = groups.last_mut() {
                group.push(*idx);
            }
        } else {
            groups.push(vec![*idx]);
        }
        last = Some(key);
    }

    let total: usize = groups
        .iter()
        .map(|g| (1..=g.len()).product::<usize>())
        .try_fold(1usize, |acc, n| acc.checked_mul(n))
        .unwrap_or(usize::MAX);
    let sorted: Vec<usize> = indexed.iter().map(|(_, i)| *i).collect();
    if total > MAX_ORDERINGS {
        return encode(rule, &sorted);
    }

    let mut orders: Vec<Vec<usize>> = vec![Vec::new()];
    for group in &groups {
        let perms = permutations(group);
        let mut next = Vec::with_capacity(orders.len() * perms.len());
        for prefix in &orders {
            for perm in &perms {
                let mut order = prefix.clone();
                order.extend_from_slice(perm);
                next.push(order);
            }
        }
        orders = next;
    }
    orders
        .iter()
        .map(|order| encode(rule, order))
        .min()
        .unwrap_or_else(|| encode(rule, &sorted))
}
