use claimline_types::Identifier;
use std::collections::BTreeMap;

/// Fixed predicate-name → node id table, maintained outside the engine.
///
/// Names are matched trimmed and case-insensitively. Ids in the table are
/// treated as existing ledger nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateTable {
    entries: BTreeMap<String, Identifier>,
}

impl PredicateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, id: Identifier) -> Option<Identifier> {
        self.entries.insert(normalize(name), id)
    }

    pub fn resolve(&self, name: &str) -> Option<Identifier> {
        self.entries.get(&normalize(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Identifier)> {
        self.entries.iter().map(|(name, id)| (name.as_str(), id))
    }
}

impl<S: AsRef<str>> FromIterator<(S, Identifier)> for PredicateTable {
    fn from_iter<I: IntoIterator<Item = (S, Identifier)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (name, id) in iter {
            table.insert(name.as_ref(), id);
        }
        table
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_padding() {
        let id = Identifier::from_bytes([3; 32]);
        let table: PredicateTable = [("Like", id)].into_iter().collect();
        assert_eq!(table.resolve(" like "), Some(id));
        assert!(table.contains("LIKE"));
        assert_eq!(table.resolve("follow"), None);
    }
}
