use std::fmt;
use std::iter::{Enumerate, FromIterator};
use std::ops::Range;
use std::slice::Iter;

/// Number of words a value occupies
pub trait Width {
    fn width(&self) -> usize;
}

/// Word offset into an [`OffsetVec`]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Offset(pub usize);

/// Vector addressed both by entry index and by word offset
///
/// This is how the JVM lays out the operand stack and the local variables: `long` and `double`
/// values take up two words and everything else takes up one. Frames hold one entry per value,
/// but `iload 3` refers to the word at offset 3, which may be the second half of a `long`.
#[derive(Clone)]
pub struct OffsetVec<T> {
    /// Entries, each with the offset of its first word
    entries: Vec<(Offset, T)>,

    /// Total number of words
    offset_len: Offset,
}

/// Result of looking up an entry by word offset
pub enum OffsetResult<'a, T> {
    /// An entry starts at this offset
    Ok(usize, &'a T),

    /// The offset is in the middle of the entry at this index
    InvalidOffset(usize),

    /// The offset is past the last word
    TooLarge,
}

impl<T: Width> OffsetVec<T> {
    pub fn new() -> OffsetVec<T> {
        OffsetVec {
            entries: vec![],
            offset_len: Offset(0),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of words (which is also the offset the next pushed entry will get)
    pub fn offset_len(&self) -> Offset {
        self.offset_len
    }

    /// Add an entry to the end, returning its offset
    pub fn push(&mut self, elem: T) -> Offset {
        let offset = self.offset_len;
        self.offset_len.0 += elem.width();
        self.entries.push((offset, elem));
        offset
    }

    /// Remove the last entry, along with its offset and index
    pub fn pop(&mut self) -> Option<(Offset, usize, T)> {
        let (offset, elem) = self.entries.pop()?;
        self.offset_len = offset;
        Some((offset, self.entries.len(), elem))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.offset_len = Offset(0);
    }

    /// Look up the entry starting at a word offset
    pub fn get_offset(&self, offset: Offset) -> OffsetResult<'_, T> {
        if offset >= self.offset_len {
            return OffsetResult::TooLarge;
        }
        match self.entries.binary_search_by_key(&offset, |(off, _)| *off) {
            Ok(index) => OffsetResult::Ok(index, &self.entries[index].1),
            Err(after) => OffsetResult::InvalidOffset(after - 1),
        }
    }

    /// Index and starting offset of the entry covering a word offset
    ///
    /// Unlike [`OffsetVec::get_offset`], this also finds wide entries from their second word.
    pub fn index_containing(&self, offset: Offset) -> Option<(usize, Offset)> {
        if offset >= self.offset_len {
            return None;
        }
        let index = self
            .entries
            .binary_search_by_key(&offset, |(off, _)| *off)
            .unwrap_or_else(|after| after - 1);
        Some((index, self.entries[index].0))
    }

    /// Entry (and its offset) by index
    pub fn get_index(&self, index: usize) -> Option<(Offset, &T)> {
        let (offset, elem) = self.entries.get(index)?;
        Some((*offset, elem))
    }

    /// Replace a range of entries, recomputing the offsets of everything after it
    pub fn splice(&mut self, range: Range<usize>, replace_with: impl IntoIterator<Item = T>) {
        let tail: Vec<T> = self
            .entries
            .split_off(range.start)
            .into_iter()
            .skip(range.end - range.start)
            .map(|(_, elem)| elem)
            .collect();
        self.offset_len = self
            .entries
            .last()
            .map_or(Offset(0), |(off, elem)| Offset(off.0 + elem.width()));
        self.extend(replace_with);
        self.extend(tail);
    }

    /// Update every entry without changing its width
    pub fn map_in_place(&mut self, mut update: impl FnMut(&mut T)) {
        for (_, elem) in &mut self.entries {
            let width = elem.width();
            update(elem);
            debug_assert_eq!(width, elem.width(), "in place updates must preserve widths");
        }
    }

    /// Entries with their offsets and indices, from first to last
    pub fn iter(&self) -> OffsetVecIter<'_, T> {
        OffsetVecIter(self.entries.iter().enumerate())
    }
}

impl<T: PartialEq> PartialEq for OffsetVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T: Eq> Eq for OffsetVec<T> {}

impl<T: Width> Default for OffsetVec<T> {
    fn default() -> Self {
        OffsetVec::new()
    }
}

pub struct OffsetVecIter<'a, T>(Enumerate<Iter<'a, (Offset, T)>>);

impl<'a, T> Iterator for OffsetVecIter<'a, T> {
    type Item = (Offset, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, (offset, elem)) = self.0.next()?;
        Some((*offset, index, elem))
    }
}

impl<'a, T: Width> IntoIterator for &'a OffsetVec<T> {
    type Item = (Offset, usize, &'a T);
    type IntoIter = OffsetVecIter<'a, T>;

    fn into_iter(self) -> OffsetVecIter<'a, T> {
        self.iter()
    }
}

impl<T: Width> Extend<T> for OffsetVec<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for elem in iter {
            self.push(elem);
        }
    }
}

impl<T: Width> FromIterator<T> for OffsetVec<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut offset_vec = OffsetVec::new();
        offset_vec.extend(iter);
        offset_vec
    }
}

impl<T: Width, const N: usize> From<[T; N]> for OffsetVec<T> {
    fn from(elems: [T; N]) -> Self {
        elems.into_iter().collect()
    }
}

/// Entries are shown as `#offset = value`
impl<T: fmt::Debug> fmt::Debug for OffsetVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(
                self.entries
                    .iter()
                    .map(|(off, elem)| format!("#{} = {:?}", off.0, elem)),
            )
            .finish()
    }
}
