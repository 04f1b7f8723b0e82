/// Records whether a tree has been mutated since it was built, loaded or
/// last marked as saved.
/// 紀錄專案樹自建立、載入或上次儲存後是否有變動。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    dirty: bool,
    revision: u64,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags a successful mutation and bumps the revision.
    pub fn mark(&mut self) {
        self.dirty = true;
        self.revision = self.revision.wrapping_add(1);
    }

    /// Clears the dirty flag; the revision keeps counting.
    pub fn clear(&mut self) {
        self.dirty = false;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of successful mutations since construction.
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_clear() {
        let mut tracker = ChangeTracker::new();
        assert!(!tracker.is_dirty());
        tracker.mark();
        tracker.mark();
        assert!(tracker.is_dirty());
        assert_eq!(tracker.revision(), 2);
        tracker.clear();
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.revision(), 2);
    }
}
