//! Index-preserving collections of network entities.

use crate::error::NetworkError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An entity stored in an [`IndexedArray`].
pub trait Entry {
    /// External (1-based) index of the entity.
    fn index(&self) -> usize;

    fn set_index(&mut self, index: usize);

    /// Unique name, if the entity is addressable by name.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Named scalar used for species and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub name: String,
    pub value: f64,
    pub index: usize,
    /// Boundary condition: value is never changed by the dynamics.
    pub fixed: bool,
}

impl Element {
    pub fn new(name: impl Into<String>, value: f64, index: usize) -> Self {
        Self {
            name: name.into(),
            value,
            index,
            fixed: false,
        }
    }
}

impl Entry for Element {
    fn index(&self) -> usize {
        self.index
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Dense container mapping an external index to an entity.
///
/// Position `i` holds the entity with index `offset + i`. Appending never
/// changes the index (or position) of an existing entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedArray<T> {
    offset: usize,
    items: Vec<T>,
    names: HashMap<String, usize>,
}

pub type ElementArray = IndexedArray<Element>;

impl<T> Default for IndexedArray<T> {
    fn default() -> Self {
        Self {
            offset: 1,
            items: Vec::new(),
            names: HashMap::new(),
        }
    }
}

impl<T: Entry> IndexedArray<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from entities carrying arbitrary indices.
    ///
    /// The indices must form a contiguous range without duplicates, and names
    /// must be unique. `lines` gives the definition line of each entity for
    /// error reporting and may be empty.
    pub fn from_entries(
        block: &'static str,
        entries: Vec<T>,
        lines: &[usize],
    ) -> Result<Self, NetworkError> {
        let line_of = |pos: usize| lines.get(pos).copied().unwrap_or(0);

        let Some(offset) = entries.iter().map(Entry::index).min() else {
            return Ok(Self::default());
        };
        let max = entries.iter().map(Entry::index).max().unwrap_or(offset);

        let mut slots: Vec<Option<T>> = Vec::new();
        slots.resize_with(max - offset + 1, || None);
        let mut names = HashMap::new();
        for (pos, entry) in entries.into_iter().enumerate() {
            let index = entry.index();
            if let Some(name) = entry.name() {
                if names.insert(name.to_string(), index - offset).is_some() {
                    return Err(NetworkError::DuplicateName {
                        line: line_of(pos),
                        block,
                        name: name.to_string(),
                    });
                }
            }
            let slot = &mut slots[index - offset];
            if slot.is_some() {
                return Err(NetworkError::DuplicateIndex {
                    line: line_of(pos),
                    block,
                    index,
                });
            }
            *slot = Some(entry);
        }

        let mut items = Vec::with_capacity(slots.len());
        for (pos, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(entry) => items.push(entry),
                None => {
                    return Err(NetworkError::IndexGap {
                        block,
                        index: offset + pos,
                    });
                }
            }
        }

        Ok(Self {
            offset,
            items,
            names,
        })
    }

    /// Index the next appended entity will receive.
    pub fn next_index(&self) -> usize {
        self.offset + self.items.len()
    }

    /// Append one entity, assigning it the next index.
    ///
    /// Fails if the entity's name is already taken.
    pub fn push(&mut self, mut entry: T) -> Result<usize, NetworkError> {
        let index = self.next_index();
        entry.set_index(index);
        if let Some(name) = entry.name() {
            if self.names.contains_key(name) {
                return Err(NetworkError::DuplicateName {
                    line: 0,
                    block: "collection",
                    name: name.to_string(),
                });
            }
            self.names.insert(name.to_string(), self.items.len());
        }
        self.items.push(entry);
        Ok(index)
    }

    /// Append all entities of `other`, re-indexed contiguously after the
    /// current last index. Returns the positions of the appended entities.
    pub fn append(
        &mut self,
        other: IndexedArray<T>,
    ) -> Result<std::ops::Range<usize>, NetworkError> {
        let start = self.items.len();
        for entry in other.items {
            self.push(entry)?;
        }
        Ok(start..self.items.len())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Zero-based position of an external index.
    pub fn position(&self, index: usize) -> Option<usize> {
        let pos = index.checked_sub(self.offset)?;
        (pos < self.items.len()).then_some(pos)
    }

    /// Entity with the given external index.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.position(index).map(|pos| &self.items[pos])
    }

    /// Entity at the given zero-based position.
    pub fn at(&self, pos: usize) -> &T {
        &self.items[pos]
    }

    pub fn at_mut(&mut self, pos: usize) -> &mut T {
        &mut self.items[pos]
    }

    /// Zero-based position of the entity with the given name.
    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    pub fn lookup(&self, name: &str) -> Option<&T> {
        self.position_of(name).map(|pos| &self.items[pos])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.items.iter_mut()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl ElementArray {
    /// Value at the given zero-based position.
    pub fn value(&self, pos: usize) -> f64 {
        self.items[pos].value
    }

    pub fn values(&self) -> Vec<f64> {
        self.items.iter().map(|elt| elt.value).collect()
    }

    /// Zero-based positions of the fixed elements.
    pub fn fixed_positions(&self) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(pos, elt)| elt.fixed.then_some(pos))
            .collect()
    }
}

impl<'a, T> IntoIterator for &'a IndexedArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elements(specs: &[(&str, usize)]) -> Vec<Element> {
        specs
            .iter()
            .map(|&(name, index)| Element::new(name, index as f64, index))
            .collect()
    }

    #[test]
    fn test_from_entries_orders_by_index() {
        let entries = elements(&[("B", 2), ("A", 1), ("C", 3)]);
        let arr = ElementArray::from_entries("species", entries, &[]).unwrap();
        assert_eq!(arr.offset(), 1);
        assert_eq!(arr.len(), 3);
        assert_eq!(arr.get(2).unwrap().name, "B");
        assert_eq!(arr.position_of("C"), Some(2));
        assert_eq!(arr.position(0), None);
        assert_eq!(arr.position(4), None);
    }

    #[test]
    fn test_from_entries_rejects_gaps_and_duplicates() {
        let gap = ElementArray::from_entries("species", elements(&[("A", 1), ("C", 3)]), &[]);
        assert!(matches!(gap, Err(NetworkError::IndexGap { index: 2, .. })));

        let dup = ElementArray::from_entries("species", elements(&[("A", 1), ("B", 1)]), &[7, 8]);
        assert!(matches!(
            dup,
            Err(NetworkError::DuplicateIndex { line: 8, index: 1, .. })
        ));

        let dup_name = ElementArray::from_entries("species", elements(&[("A", 1), ("A", 2)]), &[]);
        assert!(matches!(dup_name, Err(NetworkError::DuplicateName { .. })));
    }

    #[test]
    fn test_append_preserves_existing_indices() {
        let mut arr =
            ElementArray::from_entries("species", elements(&[("A", 1), ("B", 2)]), &[]).unwrap();
        // Indices of the appended array are irrelevant: they get renumbered.
        let other =
            ElementArray::from_entries("species", elements(&[("C", 10), ("D", 11)]), &[]).unwrap();

        let range = arr.append(other).unwrap();
        assert_eq!(range, 2..4);
        assert_eq!(arr.get(1).unwrap().name, "A");
        assert_eq!(arr.get(2).unwrap().name, "B");
        assert_eq!(arr.get(3).unwrap().name, "C");
        assert_eq!(arr.get(4).unwrap().name, "D");
        assert_eq!(arr.lookup("D").unwrap().index, 4);
    }

    #[test]
    fn test_push_rejects_taken_name() {
        let mut arr = ElementArray::new();
        assert_eq!(arr.push(Element::new("k1", 1.0, 0)).unwrap(), 1);
        assert!(arr.push(Element::new("k1", 2.0, 0)).is_err());
        assert_eq!(arr.len(), 1);
    }
}
