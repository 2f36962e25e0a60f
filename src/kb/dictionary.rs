//! Constant dictionary: symbol names mapped onto dense ids `1..=n`.

use std::collections::HashMap;

/// Bijective map between constant names and numeric ids.
///
/// Id 0 is reserved and never handed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    names: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Dictionary {
    /// Creates an empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dictionary from names ordered by id (first name gets id 1).
    ///
    /// Returns the offending name if it appears twice.
    pub fn from_names(names: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut dict = Self::new();
        for name in names {
            if dict.ids.contains_key(&name) {
                return Err(name);
            }
            dict.intern(&name);
        }
        Ok(dict)
    }

    /// Returns the id of `name`, assigning the next free id if it is new.
    #[allow(clippy::cast_possible_truncation)]
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        self.names.push(name.to_string());
        let id = self.names.len() as u32;
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Id of a known constant.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    /// Name of a constant id.
    #[must_use]
    pub fn name(&self, id: u32) -> Option<&str> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.names.get(idx).map(String::as_str)
    }

    /// Number of constants; also the largest valid id.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn len(&self) -> u32 {
        self.names.len() as u32
    }

    /// True if no constant is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names ordered by id.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_start_at_one() {
        let mut dict = Dictionary::new();
        assert_eq!(dict.intern("alice"), 1);
        assert_eq!(dict.intern("bob"), 2);
        assert_eq!(dict.intern("alice"), 1);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.name(1), Some("alice"));
        assert_eq!(dict.name(0), None);
        assert_eq!(dict.name(3), None);
    }

    #[test]
    fn test_from_names_rejects_duplicates() {
        let dict = Dictionary::from_names(["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(dict.id("b"), Some(2));
        let dup = Dictionary::from_names(["a".to_string(), "a".to_string()]).unwrap_err();
        assert_eq!(dup, "a");
    }
}
