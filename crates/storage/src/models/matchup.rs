use std::fmt;

use serde::{Deserialize, Serialize};

/// An unordered pair of robots, stored in a normalized order so that
/// (A, B) and (B, A) are the same matchup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Matchup {
    /// The lower robot id
    first: i64,
    /// The higher robot id
    second: i64,
}

impl Matchup {
    /// Creates a normalized matchup from two robot ids.
    /// Returns `None` when both ids are the same robot.
    ///
    /// # Examples
    ///
    /// ```
    /// use storage::models::Matchup;
    ///
    /// let a = Matchup::new(3, 1).unwrap();
    /// let b = Matchup::new(1, 3).unwrap();
    ///
    /// assert_eq!(a, b);
    /// assert!(Matchup::new(2, 2).is_none());
    /// ```
    pub fn new(a: i64, b: i64) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { first: a, second: b }),
            std::cmp::Ordering::Greater => Some(Self { first: b, second: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn first(&self) -> i64 {
        self.first
    }

    pub fn second(&self) -> i64 {
        self.second
    }

    pub fn robot_ids(&self) -> [i64; 2] {
        [self.first, self.second]
    }

    pub fn contains(&self, robot_id: i64) -> bool {
        self.first == robot_id || self.second == robot_id
    }

    /// Builds the matchup for a competitor set of exactly two robots.
    pub fn from_competitors<I>(ids: I) -> Option<Self>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut ids = ids.into_iter();
        let a = ids.next()?;
        let b = ids.next()?;
        if ids.next().is_some() {
            return None;
        }
        Self::new(a, b)
    }
}

impl fmt::Display for Matchup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization_same_order() {
        let m = Matchup::new(1, 2).unwrap();
        assert_eq!(m.first(), 1);
        assert_eq!(m.second(), 2);
    }

    #[test]
    fn test_normalization_reversed_order() {
        let m = Matchup::new(9, 4).unwrap();
        assert_eq!(m.robot_ids(), [4, 9]);
        assert_eq!(m.to_string(), "4-9");
    }

    #[test]
    fn test_self_pairing_rejected() {
        assert!(Matchup::new(5, 5).is_none());
    }

    #[test]
    fn test_from_competitors_requires_exactly_two() {
        assert_eq!(Matchup::from_competitors([2, 1]), Matchup::new(1, 2));
        assert!(Matchup::from_competitors([1]).is_none());
        assert!(Matchup::from_competitors([1, 2, 3]).is_none());
    }
}
