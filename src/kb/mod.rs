//! Knowledge base storage.
//!
//! Relations are immutable sorted tuple arrays; the only mutation during
//! mining is marking rows entailed, which is monotonic.

pub mod codec;
pub mod dictionary;
pub mod relation;
pub mod store;

pub use dictionary::Dictionary;
pub use relation::Relation;
pub use store::{ColumnRef, KnowledgeBase};
