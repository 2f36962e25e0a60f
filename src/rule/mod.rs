//! Horn rules: structure, text form, fingerprints and the indexed lifecycle.

mod fingerprint;
mod indexed;
mod model;
mod text;

pub use fingerprint::Fingerprint;
pub use indexed::{IndexedRule, UnindexedRule};
pub use model::{ArgLoc, Argument, Link, Literal, Rule, SpecOp, VarId, HEAD};
pub use text::{RuleParser, RuleText};
