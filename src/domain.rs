//! Index newtypes shared by the mapping, reader and repair modules
//!
//! Slices, files and blocks are all addressed by plain integers in the
//! recovery set; wrapping them keeps a slice index from being passed where a
//! file index is expected.

/// Index into the slice table of a [`crate::mapping::BlockMap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceIndex(usize);

impl SliceIndex {
    pub fn new(index: usize) -> Self {
        SliceIndex(index)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl From<usize> for SliceIndex {
    fn from(index: usize) -> Self {
        SliceIndex::new(index)
    }
}

impl std::fmt::Display for SliceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into the input file table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileIndex(usize);

impl FileIndex {
    pub fn new(index: usize) -> Self {
        FileIndex(index)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl From<usize> for FileIndex {
    fn from(index: usize) -> Self {
        FileIndex::new(index)
    }
}

impl std::fmt::Display for FileIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
