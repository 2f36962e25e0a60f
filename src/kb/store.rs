//! The in-memory knowledge base and its on-disk layout.
//!
//! A KB directory holds:
//! - `map.tsv`: one constant name per line, line `i` (1-based) is id `i`;
//! - `Relations.tsv`: `name\tarity\trows`, line `k` (0-based) is relation `k`;
//! - `<k>.rel`: the rows of relation `k` (see [`codec`](super::codec)).

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use super::codec;
use super::dictionary::Dictionary;
use super::relation::Relation;
use crate::error::KbError;

/// Constant dictionary file.
pub const MAP_FILE: &str = "map.tsv";
/// Relation metadata file.
pub const RELATIONS_FILE: &str = "Relations.tsv";
/// Extension of relation data files.
pub const REL_EXT: &str = "rel";

/// Location of one column: `(relation id, column)`.
pub type ColumnRef = (usize, usize);

/// Dictionary plus relations.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    name: String,
    dictionary: Dictionary,
    relations: Vec<Relation>,
    by_name: HashMap<String, usize>,
}

impl KnowledgeBase {
    /// Creates an empty KB.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates a KB from an existing dictionary and relations (ids are
    /// reassigned by position).
    ///
    /// # Errors
    /// Returns an error on duplicate relation names or on constants outside
    /// the dictionary.
    pub fn from_parts(
        name: impl Into<String>,
        dictionary: Dictionary,
        relations: Vec<(String, usize, Vec<u32>)>,
    ) -> Result<Self, KbError> {
        let mut kb = Self {
            name: name.into(),
            dictionary,
            ..Self::default()
        };
        for (rel_name, arity, data) in relations {
            kb.check_constants(&data)?;
            let id = kb.relations.len();
            if kb.by_name.insert(rel_name.clone(), id).is_some() {
                return Err(KbError::DuplicateRelation { name: rel_name });
            }
            kb.relations.push(Relation::from_flat(id, rel_name, arity, data));
        }
        Ok(kb)
    }

    fn check_constants(&self, data: &[u32]) -> Result<(), KbError> {
        let max = self.dictionary.len();
        match data.iter().find(|&&c| c == 0 || c > max) {
            Some(&id) => Err(KbError::UnknownConstant { id, max }),
            None => Ok(()),
        }
    }

    /// KB name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constant dictionary.
    #[must_use]
    pub const fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Number of constants.
    #[must_use]
    pub fn constant_count(&self) -> u32 {
        self.dictionary.len()
    }

    /// All relations, indexed by id.
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Relation by id.
    #[must_use]
    pub fn relation(&self, id: usize) -> Option<&Relation> {
        self.relations.get(id)
    }

    /// Mutable relation by id.
    pub fn relation_mut(&mut self, id: usize) -> Option<&mut Relation> {
        self.relations.get_mut(id)
    }

    /// Relation by name.
    #[must_use]
    pub fn relation_by_name(&self, name: &str) -> Option<&Relation> {
        self.by_name.get(name).and_then(|&id| self.relations.get(id))
    }

    /// Id of a relation name.
    #[must_use]
    pub fn relation_id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Total number of facts.
    #[must_use]
    pub fn total_facts(&self) -> usize {
        self.relations.iter().map(Relation::len).sum()
    }

    /// All rows of a relation, row-major.
    ///
    /// # Errors
    /// Returns [`KbError::UnknownRelation`] for an unknown name.
    pub fn all_rows(&self, name: &str) -> Result<&[u32], KbError> {
        self.relation_by_name(name)
            .map(Relation::data)
            .ok_or_else(|| KbError::UnknownRelation {
                name: name.to_string(),
            })
    }

    /// Marks rows of relation `id` entailed; returns the newly marked count.
    pub fn mark_entailed(&mut self, id: usize, rows: impl IntoIterator<Item = usize>) -> usize {
        self.relations
            .get_mut(id)
            .map_or(0, |rel| rel.mark_entailed(rows))
    }

    /// Adds named records to a relation, creating relation and constants as
    /// needed. Returns the number of new rows.
    ///
    /// # Errors
    /// Returns [`KbError::ArityMismatch`] if the records do not fit the
    /// relation's arity.
    pub fn add_records<S: AsRef<str>>(&mut self, relation: &str, records: &[Vec<S>]) -> Result<usize, KbError> {
        let arity = match (self.relation_by_name(relation), records.first()) {
            (Some(rel), _) => rel.arity(),
            (None, Some(first)) => first.len(),
            (None, None) => return Ok(0),
        };
        let numeric: Vec<Vec<u32>> = records
            .iter()
            .map(|record| record.iter().map(|c| self.dictionary.intern(c.as_ref())).collect())
            .collect();
        let id = match self.relation_id(relation) {
            Some(id) => id,
            None => {
                let id = self.relations.len();
                self.by_name.insert(relation.to_string(), id);
                self.relations.push(Relation::from_flat(id, relation, arity, Vec::new()));
                id
            }
        };
        self.relations[id].add_records(numeric)
    }

    /// Maps every constant value to the columns it occurs in.
    ///
    /// Used to find structurally related column pairs without joining.
    #[must_use]
    pub fn column_index(&self) -> HashMap<u32, Vec<ColumnRef>> {
        let mut index: HashMap<u32, Vec<ColumnRef>> = HashMap::new();
        for rel in &self.relations {
            for col in 0..rel.arity() {
                for value in rel.column_values(col) {
                    index.entry(value).or_default().push((rel.id(), col));
                }
            }
        }
        index
    }

    /// Loads a KB from `dir`; the directory name becomes the KB name.
    ///
    /// # Errors
    /// Returns an error if any file is missing, malformed or corrupted.
    pub fn load(dir: &Path) -> Result<Self, KbError> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dictionary = read_dictionary(&dir.join(MAP_FILE))?;
        let metas = read_relation_meta(&dir.join(RELATIONS_FILE))?;

        let mut relations = Vec::with_capacity(metas.len());
        for (id, (rel_name, arity, rows)) in metas.into_iter().enumerate() {
            let path = dir.join(format!("{id}.{REL_EXT}"));
            let data = read_rel_file(&path, arity, rows)?;
            relations.push((rel_name, arity, data));
        }

        let kb = Self::from_parts(name, dictionary, relations)?;
        info!(
            kb = kb.name(),
            relations = kb.relations.len(),
            constants = kb.constant_count(),
            facts = kb.total_facts(),
            "loaded knowledge base"
        );
        Ok(kb)
    }

    /// Writes the whole KB (all rows, entailed or not) into `dir`.
    ///
    /// # Errors
    /// Returns an error if any file cannot be written.
    pub fn dump(&self, dir: &Path) -> Result<(), KbError> {
        fs::create_dir_all(dir).map_err(|e| KbError::io(dir, e))?;
        write_dictionary(&dir.join(MAP_FILE), &self.dictionary)?;
        let metas: Vec<(&str, usize, usize)> = self
            .relations
            .iter()
            .map(|r| (r.name(), r.arity(), r.len()))
            .collect();
        write_relation_meta(&dir.join(RELATIONS_FILE), &metas)?;
        for rel in &self.relations {
            let path = dir.join(format!("{}.{REL_EXT}", rel.id()));
            write_rel_file(&path, rel.arity(), rel.data())?;
        }
        debug!(dir = %dir.display(), "dumped knowledge base");
        Ok(())
    }
}

/// Reads `map.tsv`.
pub(crate) fn read_dictionary(path: &Path) -> Result<Dictionary, KbError> {
    let file = File::open(path).map_err(|e| KbError::io(path, e))?;
    let mut names = Vec::new();
    for line in BufReader::new(file).lines() {
        names.push(line.map_err(|e| KbError::io(path, e))?);
    }
    Dictionary::from_names(names).map_err(|dup| {
        KbError::malformed(MAP_FILE, 0, format!("constant '{dup}' appears twice"))
    })
}

/// Writes `map.tsv`.
pub(crate) fn write_dictionary(path: &Path, dictionary: &Dictionary) -> Result<(), KbError> {
    let file = File::create(path).map_err(|e| KbError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for name in dictionary.names() {
        writeln!(writer, "{name}").map_err(|e| KbError::io(path, e))?;
    }
    writer.flush().map_err(|e| KbError::io(path, e))
}

/// Reads `Relations.tsv` into `(name, arity, rows)` triples.
pub(crate) fn read_relation_meta(path: &Path) -> Result<Vec<(String, usize, usize)>, KbError> {
    let file = File::open(path).map_err(|e| KbError::io(path, e))?;
    let mut metas = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| KbError::io(path, e))?;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let [name, arity, rows] = fields[..] else {
            return Err(KbError::malformed(RELATIONS_FILE, idx + 1, "expected name, arity and rows"));
        };
        let arity = arity
            .parse()
            .map_err(|_| KbError::malformed(RELATIONS_FILE, idx + 1, format!("bad arity '{arity}'")))?;
        let rows = rows
            .parse()
            .map_err(|_| KbError::malformed(RELATIONS_FILE, idx + 1, format!("bad row count '{rows}'")))?;
        metas.push((name.to_string(), arity, rows));
    }
    Ok(metas)
}

/// Writes `Relations.tsv`.
pub(crate) fn write_relation_meta(path: &Path, metas: &[(&str, usize, usize)]) -> Result<(), KbError> {
    let file = File::create(path).map_err(|e| KbError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (name, arity, rows) in metas {
        writeln!(writer, "{name}\t{arity}\t{rows}").map_err(|e| KbError::io(path, e))?;
    }
    writer.flush().map_err(|e| KbError::io(path, e))
}

/// Reads one framed relation file, checking it against its metadata.
pub(crate) fn read_rel_file(path: &Path, arity: usize, rows: usize) -> Result<Vec<u32>, KbError> {
    let file = File::open(path).map_err(|e| KbError::io(path, e))?;
    let (file_arity, data) =
        codec::decode_relation(&mut BufReader::new(file)).map_err(|e| KbError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if file_arity != arity || data.len() != arity * rows {
        return Err(KbError::Corrupted {
            path: path.to_path_buf(),
            reason: format!(
                "expected {rows} rows of arity {arity}, found {} values of arity {file_arity}",
                data.len()
            ),
        });
    }
    Ok(data)
}

/// Writes one framed relation file.
pub(crate) fn write_rel_file(path: &Path, arity: usize, data: &[u32]) -> Result<(), KbError> {
    let file = File::create(path).map_err(|e| KbError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    codec::encode_relation(&mut writer, arity, data).map_err(|e| KbError::io(path, e))?;
    writer.flush().map_err(|e| KbError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KnowledgeBase {
        let mut kb = KnowledgeBase::new("family");
        kb.add_records("parent", &[vec!["ann", "bob"], vec!["bob", "cat"], vec!["ann", "bob"]])
            .unwrap();
        kb.add_records("male", &[vec!["bob"]]).unwrap();
        kb
    }

    #[test]
    fn test_add_records_interns_constants() {
        let kb = sample();
        assert_eq!(kb.constant_count(), 3);
        assert_eq!(kb.relation_by_name("parent").unwrap().len(), 2);
        assert_eq!(kb.relation_id("male"), Some(1));
        assert_eq!(kb.total_facts(), 3);
        assert_eq!(kb.all_rows("male").unwrap(), &[2]);
        assert!(kb.all_rows("female").is_err());
    }

    #[test]
    fn test_add_records_arity_mismatch() {
        let mut kb = sample();
        let err = kb.add_records("parent", &[vec!["ann"]]).unwrap_err();
        assert!(matches!(err, KbError::ArityMismatch { .. }));
    }

    #[test]
    fn test_column_index() {
        let kb = sample();
        let bob = kb.dictionary().id("bob").unwrap();
        let mut cols = kb.column_index().remove(&bob).unwrap();
        cols.sort_unstable();
        assert_eq!(cols, vec![(0, 0), (0, 1), (1, 0)]);
    }

    #[test]
    fn test_dump_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family");
        let kb = sample();
        kb.dump(&path).unwrap();

        let loaded = KnowledgeBase::load(&path).unwrap();
        assert_eq!(loaded.name(), "family");
        assert_eq!(loaded.dictionary(), kb.dictionary());
        assert_eq!(loaded.relations().len(), 2);
        assert_eq!(loaded.all_rows("parent").unwrap(), kb.all_rows("parent").unwrap());
    }

    #[test]
    fn test_load_rejects_corrupted_relation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family");
        sample().dump(&path).unwrap();

        let rel = path.join("0.rel");
        let mut bytes = fs::read(&rel).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0x01;
        fs::write(&rel, bytes).unwrap();

        let err = KnowledgeBase::load(&path).unwrap_err();
        assert!(matches!(err, KbError::Corrupted { .. }));
    }

    #[test]
    fn test_load_rejects_unknown_constant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MAP_FILE), "a\n").unwrap();
        fs::write(path.join(RELATIONS_FILE), "r\t1\t1\n").unwrap();
        write_rel_file(&path.join("0.rel"), 1, &[5]).unwrap();

        let err = KnowledgeBase::load(&path).unwrap_err();
        assert!(matches!(err, KbError::UnknownConstant { id: 5, max: 1 }));
    }

    #[test]
    fn test_load_rejects_malformed_meta() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join(MAP_FILE), "a\n").unwrap();
        fs::write(path.join(RELATIONS_FILE), "r\tx\t1\n").unwrap();

        let err = KnowledgeBase::load(&path).unwrap_err();
        assert!(format!("{err}").contains("bad arity"));
    }
}
