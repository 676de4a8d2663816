//! Helpers for configuration values.

use std::cmp;

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
///
/// Setters on the configuration types run every value through
/// [`limit`][Self::limit] so that an out-of-range value is capped rather
/// than rejected.
#[derive(Clone, Copy, Debug)]
pub struct DefMinMax<T> {
    /// The default value.
    def: T,

    /// The smallest acceptable value.
    min: T,

    /// The largest acceptable value.
    max: T,
}

impl<T: Copy + Ord> DefMinMax<T> {
    /// Creates a new value.
    pub const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    /// Returns the default value.
    pub fn default(self) -> T {
        self.def
    }

    /// Trims the given value to fit into the minimum/maximum range.
    pub fn limit(self, value: T) -> T {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn limit_caps_both_ends() {
        let range = DefMinMax::new(5u8, 1, 10);
        assert_eq!(range.limit(0), 1);
        assert_eq!(range.limit(7), 7);
        assert_eq!(range.limit(200), 10);
        assert_eq!(range.default(), 5);
    }

    #[test]
    fn limit_durations() {
        let range = DefMinMax::new(
            Duration::from_secs(2),
            Duration::from_millis(1),
            Duration::from_secs(60),
        );
        assert_eq!(range.limit(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(range.limit(Duration::from_secs(90)),
            Duration::from_secs(60));
    }
}
