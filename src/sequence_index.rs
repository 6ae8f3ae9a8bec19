/// Sequence name interning for the bin index partitions
use std::collections::HashMap;

/// Maps sequence names to dense integer ids, which double as partition slots
#[derive(Debug, Clone, Default)]
pub struct SequenceIndex {
    /// Interned names, the id is the position in this vec
    names: Vec<String>,
    name_to_id: HashMap<String, u32>,
}

impl SequenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `name`, interning it on first sight
    pub fn get_or_insert(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.name_to_id.get(name) {
            id
        } else {
            let id = self.names.len() as u32;
            self.names.push(name.to_string());
            self.name_to_id.insert(name.to_string(), id);
            id
        }
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let mut index = SequenceIndex::new();

        assert_eq!(index.get_or_insert("chr1"), 0);
        assert_eq!(index.get_or_insert("chr1"), 0);
        assert_eq!(index.get_or_insert("scaffold_7"), 1);

        assert_eq!(index.get_id("chr1"), Some(0));
        assert_eq!(index.get_id("chrM"), None);
        assert_eq!(index.len(), 2);
    }
}
