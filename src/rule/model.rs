//! Horn rule structure and the three specialization operators.
//!
//! Literal 0 is the head; literals `1..` form the body. Every variable id in
//! `0..var_count` occurs at least twice; an argument used once is `Empty`.
//! Specialization always keeps the rule connected: a new literal is linked to
//! the existing rule through exactly one argument.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::RuleError;

/// Variable id, scoped to one rule.
pub type VarId = u32;

/// Index of the head literal.
pub const HEAD: usize = 0;

/// One argument slot of a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Argument {
    /// Unnamed variable occurring once.
    Empty,
    /// Variable shared by two or more slots.
    Variable(VarId),
    /// Bound constant id.
    Constant(u32),
}

impl Argument {
    /// True for [`Argument::Empty`].
    #[must_use]
    pub const fn is_empty(self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// A predicate applied to arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    /// Relation id in the KB.
    pub relation: usize,
    /// Arguments, one per column.
    pub args: Vec<Argument>,
}

impl Literal {
    /// Literal with all arguments empty.
    #[must_use]
    pub fn empty(relation: usize, arity: usize) -> Self {
        Self {
            relation,
            args: vec![Argument::Empty; arity],
        }
    }
}

/// Position of an argument inside a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArgLoc {
    /// Literal index (0 is the head).
    pub literal: usize,
    /// Argument index.
    pub position: usize,
}

impl ArgLoc {
    /// Creates a location.
    #[must_use]
    pub const fn new(literal: usize, position: usize) -> Self {
        Self { literal, position }
    }
}

/// What a specialization links an argument to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Link {
    /// An existing variable.
    Var(VarId),
    /// Another empty slot; both become a fresh variable.
    Slot(ArgLoc),
}

/// A single specialization step. Each step adds exactly one to the rule
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecOp {
    /// Turn the empty slot `target` into a variable shared with `with`.
    UnifyVariables {
        /// Empty slot being filled.
        target: ArgLoc,
        /// Existing variable, or a second empty slot.
        with: Link,
    },
    /// Append a body literal whose only non-empty argument is `position`,
    /// linked to `link`.
    AddLiteral {
        /// Relation id.
        relation: usize,
        /// Relation arity.
        arity: usize,
        /// Linked argument of the new literal.
        position: usize,
        /// Existing variable, or an existing empty slot.
        link: Link,
    },
    /// Bind the empty slot `loc` to a constant.
    BindConstant {
        /// Empty slot being bound.
        loc: ArgLoc,
        /// Constant id.
        constant: u32,
    },
}

/// Horn rule: head literal plus ordered body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    literals: Vec<Literal>,
    var_count: u32,
}

impl Rule {
    /// `h(?,...,?) :-`, the root of every search.
    #[must_use]
    pub fn most_general(relation: usize, arity: usize) -> Self {
        Self {
            literals: vec![Literal::empty(relation, arity)],
            var_count: 0,
        }
    }

    /// Builds a rule from literals, renumbering variables densely by first
    /// occurrence and turning variables used only once into empty slots.
    ///
    /// # Errors
    /// Returns [`RuleError::InvalidStructure`] if there is no head.
    pub fn from_literals(literals: Vec<Literal>) -> Result<Self, RuleError> {
        if literals.is_empty() {
            return Err(RuleError::InvalidStructure {
                reason: "rule has no head".to_string(),
            });
        }
        let mut counts: HashMap<VarId, usize> = HashMap::new();
        for arg in literals.iter().flat_map(|l| &l.args) {
            if let Argument::Variable(v) = arg {
                *counts.entry(*v).or_default() += 1;
            }
        }
        let mut renumber: HashMap<VarId, VarId> = HashMap::new();
        let mut literals = literals;
        for arg in literals.iter_mut().flat_map(|l| l.args.iter_mut()) {
            if let Argument::Variable(v) = *arg {
                if counts.get(&v).copied().unwrap_or(0) < 2 {
                    *arg = Argument::Empty;
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    let next = renumber.len() as VarId;
                    *arg = Argument::Variable(*renumber.entry(v).or_insert(next));
                }
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let var_count = renumber.len() as u32;
        Ok(Self { literals, var_count })
    }

    /// Head literal.
    #[must_use]
    pub fn head(&self) -> &Literal {
        &self.literals[HEAD]
    }

    /// Body literals.
    #[must_use]
    pub fn body(&self) -> &[Literal] {
        &self.literals[1..]
    }

    /// Head followed by body.
    #[must_use]
    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    /// Number of variables.
    #[must_use]
    pub const fn var_count(&self) -> u32 {
        self.var_count
    }

    /// Argument at `loc`, if it exists.
    #[must_use]
    pub fn arg(&self, loc: ArgLoc) -> Option<Argument> {
        self.literals
            .get(loc.literal)
            .and_then(|l| l.args.get(loc.position))
            .copied()
    }

    /// Rule length: specialization steps needed to build the rule, i.e.
    /// variable occurrences minus variables, plus constants.
    #[must_use]
    pub fn length(&self) -> usize {
        let mut occurrences = 0usize;
        let mut constants = 0usize;
        for arg in self.literals.iter().flat_map(|l| &l.args) {
            match arg {
                Argument::Variable(_) => occurrences += 1,
                Argument::Constant(_) => constants += 1,
                Argument::Empty => {}
            }
        }
        occurrences - self.var_count as usize + constants
    }

    /// Empty slots in literal/position order.
    #[must_use]
    pub fn empty_slots(&self) -> Vec<ArgLoc> {
        let mut slots = Vec::new();
        for (li, lit) in self.literals.iter().enumerate() {
            for (pi, arg) in lit.args.iter().enumerate() {
                if arg.is_empty() {
                    slots.push(ArgLoc::new(li, pi));
                }
            }
        }
        slots
    }

    /// Every location holding variable `var`, in literal/position order.
    #[must_use]
    pub fn var_locations(&self, var: VarId) -> Vec<ArgLoc> {
        let mut locs = Vec::new();
        for (li, lit) in self.literals.iter().enumerate() {
            for (pi, arg) in lit.args.iter().enumerate() {
                if *arg == Argument::Variable(var) {
                    locs.push(ArgLoc::new(li, pi));
                }
            }
        }
        locs
    }

    /// Variables occurring in the head.
    #[must_use]
    pub fn head_vars(&self) -> Vec<VarId> {
        let mut vars: Vec<VarId> = Vec::new();
        for arg in &self.head().args {
            if let Argument::Variable(v) = arg {
                if !vars.contains(v) {
                    vars.push(*v);
                }
            }
        }
        vars
    }

    /// True if every head argument is a constant or a variable that also
    /// occurs in the body. Empty head arguments count as unrestricted.
    #[must_use]
    pub fn is_range_restricted(&self) -> bool {
        let body_vars: HashSet<VarId> = self
            .body()
            .iter()
            .flat_map(|l| &l.args)
            .filter_map(|a| match a {
                Argument::Variable(v) => Some(*v),
                _ => None,
            })
            .collect();
        self.head().args.iter().all(|arg| match arg {
            Argument::Empty => false,
            Argument::Constant(_) => true,
            Argument::Variable(v) => body_vars.contains(v),
        })
    }

    fn empty_at(&self, loc: ArgLoc) -> Result<(), RuleError> {
        match self.arg(loc) {
            None => Err(RuleError::BadLocation {
                literal: loc.literal,
                position: loc.position,
            }),
            Some(Argument::Empty) => Ok(()),
            Some(_) => Err(RuleError::SlotOccupied {
                literal: loc.literal,
                position: loc.position,
            }),
        }
    }

    fn known_var(&self, var: VarId) -> Result<(), RuleError> {
        if var < self.var_count {
            Ok(())
        } else {
            Err(RuleError::UnknownVariable { var })
        }
    }

    fn set(&mut self, loc: ArgLoc, arg: Argument) {
        self.literals[loc.literal].args[loc.position] = arg;
    }

    /// Applies one specialization, returning the new rule.
    ///
    /// # Errors
    /// Returns an error if the operator does not fit the rule (occupied slot,
    /// unknown variable, bad location) or if the result is structurally
    /// invalid (see [`Rule::check_structure`]).
    pub fn apply(&self, op: &SpecOp) -> Result<Self, RuleError> {
        let next = self.step(op)?;
        next.check_structure()?;
        Ok(next)
    }

    /// Applies one specialization without the structural check. Used when
    /// replaying a construction sequence whose intermediate rules may look
    /// degenerate even though the final rule is not.
    pub(crate) fn step(&self, op: &SpecOp) -> Result<Self, RuleError> {
        let mut next = self.clone();
        match *op {
            SpecOp::UnifyVariables { target, with } => {
                self.empty_at(target)?;
                match with {
                    Link::Var(var) => {
                        self.known_var(var)?;
                        next.set(target, Argument::Variable(var));
                    }
                    Link::Slot(other) => {
                        self.empty_at(other)?;
                        if other == target {
                            return Err(RuleError::InvalidStructure {
                                reason: "cannot unify a slot with itself".to_string(),
                            });
                        }
                        let var = next.var_count;
                        next.var_count += 1;
                        next.set(target, Argument::Variable(var));
                        next.set(other, Argument::Variable(var));
                    }
                }
            }
            SpecOp::AddLiteral {
                relation,
                arity,
                position,
                link,
            } => {
                if position >= arity {
                    return Err(RuleError::BadLocation {
                        literal: self.literals.len(),
                        position,
                    });
                }
                let mut literal = Literal::empty(relation, arity);
                match link {
                    Link::Var(var) => {
                        self.known_var(var)?;
                        literal.args[position] = Argument::Variable(var);
                        next.literals.push(literal);
                    }
                    Link::Slot(slot) => {
                        self.empty_at(slot)?;
                        let var = next.var_count;
                        next.var_count += 1;
                        literal.args[position] = Argument::Variable(var);
                        next.set(slot, Argument::Variable(var));
                        next.literals.push(literal);
                    }
                }
            }
            SpecOp::BindConstant { loc, constant } => {
                self.empty_at(loc)?;
                next.set(loc, Argument::Constant(constant));
            }
        }
        Ok(next)
    }

    /// A sequence of specializations that builds this rule (up to variable
    /// numbering and body order) from [`Rule::most_general`] of its head.
    ///
    /// Body literals are added in an order that keeps the rule connected;
    /// remaining variable occurrences and constants are filled afterwards.
    ///
    /// # Errors
    /// Returns [`RuleError::InvalidStructure`] if some body literal shares no
    /// variable with the rest of the rule.
    pub fn construction(&self) -> Result<Vec<SpecOp>, RuleError> {
        let head = self.head();
        let mut built = Self::most_general(head.relation, head.args.len());
        let mut ops = Vec::new();
        // target literal index -> literal index in `built`
        let mut placed: Vec<Option<usize>> = vec![None; self.literals.len()];
        placed[HEAD] = Some(HEAD);
        // target variable -> variable in `built`
        let mut vars: HashMap<VarId, VarId> = HashMap::new();

        let push = |built: &mut Self, ops: &mut Vec<SpecOp>, op: SpecOp| -> Result<(), RuleError> {
            *built = built.step(&op)?;
            ops.push(op);
            Ok(())
        };

        let mut remaining: Vec<usize> = (1..self.literals.len()).collect();
        while !remaining.is_empty() {
            let mut progress = None;
            'search: for (ri, &li) in remaining.iter().enumerate() {
                for (position, arg) in self.literals[li].args.iter().enumerate() {
                    let Argument::Variable(v) = *arg else { continue };
                    let anchor = self.var_locations(v).into_iter().find(|loc| placed[loc.literal].is_some());
                    if let Some(loc) = anchor {
                        progress = Some((ri, li, position, v, loc));
                        break 'search;
                    }
                }
            }
            let Some((ri, li, position, v, loc)) = progress else {
                return Err(RuleError::InvalidStructure {
                    reason: "body is not connected to the head".to_string(),
                });
            };
            let link = match vars.get(&v) {
                Some(&bv) => Link::Var(bv),
                None => {
                    let at = ArgLoc::new(placed[loc.literal].unwrap_or(HEAD), loc.position);
                    vars.insert(v, built.var_count);
                    Link::Slot(at)
                }
            };
            let lit = &self.literals[li];
            push(
                &mut built,
                &mut ops,
                SpecOp::AddLiteral {
                    relation: lit.relation,
                    arity: lit.args.len(),
                    position,
                    link,
                },
            )?;
            placed[li] = Some(built.literals.len() - 1);
            remaining.remove(ri);
        }

        for (li, lit) in self.literals.iter().enumerate() {
            let Some(bl) = placed[li] else { continue };
            for (position, arg) in lit.args.iter().enumerate() {
                let target = ArgLoc::new(bl, position);
                if built.arg(target) != Some(Argument::Empty) {
                    continue;
                }
                match *arg {
                    Argument::Empty => {}
                    Argument::Constant(constant) => {
                        push(&mut built, &mut ops, SpecOp::BindConstant { loc: target, constant })?;
                    }
                    Argument::Variable(v) => {
                        let with = if let Some(&bv) = vars.get(&v) {
                            Link::Var(bv)
                        } else {
                            let other = self
                                .var_locations(v)
                                .into_iter()
                                .filter_map(|loc| placed[loc.literal].map(|b| ArgLoc::new(b, loc.position)))
                                .find(|&loc| loc != target && built.arg(loc) == Some(Argument::Empty))
                                .ok_or_else(|| RuleError::InvalidStructure {
                                    reason: format!("variable X{v} occurs only once"),
                                })?;
                            vars.insert(v, built.var_count);
                            Link::Slot(other)
                        };
                        push(&mut built, &mut ops, SpecOp::UnifyVariables { target, with })?;
                    }
                }
            }
        }
        Ok(ops)
    }

    /// True if this rule is at least as general as `other`: one substitution
    /// of this rule's variables maps its head onto `other`'s head and each of
    /// its body literals onto some body literal of `other`. Every head tuple
    /// `other` entails is then entailed by this rule too.
    #[must_use]
    pub fn subsumes(&self, other: &Self) -> bool {
        let mut binding = HashMap::new();
        unify(self.head(), other.head(), HEAD, &mut binding) && self.subsumes_body(other, 0, &binding)
    }

    fn subsumes_body(&self, other: &Self, next: usize, binding: &HashMap<VarId, Term>) -> bool {
        let Some(lit) = self.body().get(next) else {
            return true;
        };
        other.body().iter().enumerate().any(|(idx, target)| {
            let mut extended = binding.clone();
            unify(lit, target, idx + 1, &mut extended) && self.subsumes_body(other, next + 1, &extended)
        })
    }

    /// Rejects rules with a body literal identical to the head or two
    /// identical body literals.
    ///
    /// # Errors
    /// Returns [`RuleError::InvalidStructure`] describing the violation.
    pub fn check_structure(&self) -> Result<(), RuleError> {
        let head = self.head();
        let mut seen: HashSet<&Literal> = HashSet::new();
        for lit in self.body() {
            if lit == head {
                return Err(RuleError::InvalidStructure {
                    reason: "body literal equals the head".to_string(),
                });
            }
            if !seen.insert(lit) {
                return Err(RuleError::InvalidStructure {
                    reason: "duplicate body literal".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// What a variable of the more general rule stands for in the other rule.
/// Each empty slot there is a distinct single-use variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    Var(VarId),
    Constant(u32),
    Slot(usize, usize),
}

fn unify(general: &Literal, specific: &Literal, literal: usize, binding: &mut HashMap<VarId, Term>) -> bool {
    if general.relation != specific.relation || general.args.len() != specific.args.len() {
        return false;
    }
    for (position, (g, s)) in general.args.iter().zip(&specific.args).enumerate() {
        let term = match *s {
            Argument::Empty => Term::Slot(literal, position),
            Argument::Variable(v) => Term::Var(v),
            Argument::Constant(c) => Term::Constant(c),
        };
        match *g {
            Argument::Empty => {}
            Argument::Constant(c) => {
                if term != Term::Constant(c) {
                    return false;
                }
            }
            Argument::Variable(v) => {
                if *binding.entry(v).or_insert(term) != term {
                    return false;
                }
            }
        }
    }
    true
}
