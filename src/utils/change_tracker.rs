/// Monotonic version counter used to signal resource changes to observers.
///
/// Observers keep the last version they saw and compare; any difference
/// means "changed since".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
}

impl ChangeTracker {
    #[must_use]
    pub fn new() -> Self {
        Self { version: 0 }
    }

    /// Marks as modified, increments version by 1
    pub fn changed(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the tracked resource changed after `seen` was recorded.
    #[must_use]
    pub fn changed_since(&self, seen: u64) -> bool {
        self.version != seen
    }
}
