/// Server-assigned version counter with a sticky change flag
///
/// Changes are detected by inequality only; the server may restart counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation {
    number: i64,
    changed: bool,
}

impl Generation {
    pub const UNKNOWN: i64 = -1;

    pub fn new() -> Self {
        Self::with_number(Self::UNKNOWN)
    }

    pub fn with_number(number: i64) -> Self {
        Self {
            number,
            changed: false,
        }
    }

    pub fn number(&self) -> i64 {
        self.number
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Record an observed value; flags a change when it differs
    pub fn update(&mut self, number: i64) {
        if self.number != number {
            self.number = number;
            self.changed = true;
        }
    }

    /// Overwrite without touching the change flag
    pub fn set(&mut self, number: i64) {
        self.number = number;
    }

    pub fn reset_changed(&mut self) {
        self.changed = false;
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_same_value_keeps_unchanged() {
        let mut gen = Generation::with_number(7);
        gen.update(7);
        assert!(!gen.changed());
        assert_eq!(gen.number(), 7);
    }

    #[test]
    fn test_update_new_value_marks_changed() {
        let mut gen = Generation::new();
        gen.update(1);
        assert!(gen.changed());
        assert_eq!(gen.number(), 1);

        // Lower values count as a change too
        gen.reset_changed();
        gen.update(0);
        assert!(gen.changed());
    }

    #[test]
    fn test_reset_changed_always_clears() {
        let mut gen = Generation::new();
        gen.reset_changed();
        assert!(!gen.changed());

        gen.update(5);
        gen.reset_changed();
        assert!(!gen.changed());
        assert_eq!(gen.number(), 5);
    }

    #[test]
    fn test_set_does_not_flag() {
        let mut gen = Generation::new();
        gen.set(9);
        assert!(!gen.changed());
        assert_eq!(gen.number(), 9);
    }
}
