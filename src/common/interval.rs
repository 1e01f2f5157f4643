use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds since the Unix epoch.
pub type Nanos = i64;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Equivalent to `i64::div_ceil` (unstable on signed integers on this toolchain).
pub fn div_ceil_i64(lhs: i64, rhs: i64) -> i64 {
    let d = lhs / rhs;
    let r = lhs % rhs;
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}

/// Closed time interval [begin, end] in epoch nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    begin: Nanos,
    end: Nanos,
}

impl TimeInterval {
    pub fn new(begin: Nanos, end: Nanos) -> Option<Self> {
        if begin > end {
            return None;
        }
        return Some(TimeInterval { begin, end });
    }

    /// Degenerate single-point interval.
    pub fn at(point: Nanos) -> Self {
        return TimeInterval {
            begin: point,
            end: point,
        };
    }

    pub fn begin(&self) -> Nanos {
        return self.begin;
    }

    pub fn end(&self) -> Nanos {
        return self.end;
    }

    /// Closed-interval intersection test (shared endpoints intersect).
    pub fn intersects(&self, other: &TimeInterval) -> bool {
        return self.begin <= other.end && other.begin <= self.end;
    }

    pub fn contains(&self, point: Nanos) -> bool {
        return self.begin <= point && point <= self.end;
    }

    /// Smallest interval covering both operands.
    pub fn union(&self, other: &TimeInterval) -> TimeInterval {
        return TimeInterval {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        };
    }

    pub fn duration(&self) -> TimeDelta {
        return TimeDelta::nanoseconds(self.end - self.begin);
    }

    pub fn duration_nanos(&self) -> i64 {
        return self.end - self.begin;
    }

    /// Whole seconds spanned, rounded up (a sub-second interval counts as one).
    pub fn duration_seconds(&self) -> i64 {
        let span = self.end - self.begin;
        return div_ceil_i64(span, NANOS_PER_SEC);
    }
}

fn format_nanos(nanos: Nanos, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let dt = DateTime::<Utc>::from_timestamp_nanos(nanos);
    return write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.9f"));
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        format_nanos(self.begin, f)?;
        write!(f, ", ")?;
        format_nanos(self.end, f)?;
        return write!(f, "]");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rejects_inverted() {
        assert_eq!(TimeInterval::new(10, 5), None);
        assert!(TimeInterval::new(5, 5).is_some());
    }

    #[test]
    fn test_closed_intersection() {
        let a = TimeInterval::new(0, 10).unwrap();
        let b = TimeInterval::new(10, 20).unwrap();
        let c = TimeInterval::new(11, 20).unwrap();
        // Shared endpoint intersects, adjacency does not.
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
        assert!(!c.intersects(&a));
    }

    #[test]
    fn test_union() {
        let a = TimeInterval::new(0, 10).unwrap();
        let b = TimeInterval::new(5, 20).unwrap();
        assert_eq!(a.union(&b), TimeInterval::new(0, 20).unwrap());
    }

    #[test]
    fn test_duration_seconds_rounds_up() {
        let sub_second = TimeInterval::new(0, 1).unwrap();
        assert_eq!(sub_second.duration_seconds(), 1);
        let ten = TimeInterval::new(0, 10 * NANOS_PER_SEC).unwrap();
        assert_eq!(ten.duration_seconds(), 10);
    }
}
