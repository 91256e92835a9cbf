use std::collections::BTreeSet;

/// Per-row progress within one rendered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLoad {
    Unloaded,
    Loading,
    /// Attempted. A row that resolved to nothing is still loaded.
    Loaded,
}

/// Which rows of a rendered list have been attempted.
///
/// A row is in at most one of `loading` and `loaded`, and once loaded it never
/// starts loading again for the lifetime of this state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadState {
    loaded: BTreeSet<usize>,
    loading: BTreeSet<usize>,
}

impl LoadState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `index` from unloaded to loading. Returns false if it was already
    /// loading or loaded.
    pub fn begin(&mut self, index: usize) -> bool {
        if self.loaded.contains(&index) {
            return false;
        }
        self.loading.insert(index)
    }

    /// Moves `index` from loading to loaded. Returns false if it was not loading.
    pub fn finish(&mut self, index: usize) -> bool {
        if !self.loading.remove(&index) {
            return false;
        }
        self.loaded.insert(index);
        true
    }

    pub fn row(&self, index: usize) -> RowLoad {
        if self.loaded.contains(&index) {
            RowLoad::Loaded
        } else if self.loading.contains(&index) {
            RowLoad::Loading
        } else {
            RowLoad::Unloaded
        }
    }

    pub fn loaded(&self) -> impl Iterator<Item = usize> + '_ {
        self.loaded.iter().copied()
    }

    pub fn loading(&self) -> impl Iterator<Item = usize> + '_ {
        self.loading.iter().copied()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }
}
