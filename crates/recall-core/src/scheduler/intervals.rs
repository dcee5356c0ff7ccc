//! Review interval table.

use chrono::{DateTime, Duration, Utc};

use crate::error::ConfigError;

/// Hours until the next review, indexed by the stage just reached.
pub const DEFAULT_INTERVAL_HOURS: [u32; 7] = [1, 4, 24, 72, 168, 720, 2160];

/// Largest hour offset applied to a timestamp (100 years).
pub const MAX_OFFSET_HOURS: u32 = 24 * 365 * 100;

/// `now` plus `hours`, with `hours` capped at [`MAX_OFFSET_HOURS`].
pub fn hours_after(now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
    let offset = Duration::hours(i64::from(hours.min(MAX_OFFSET_HOURS)));
    now.checked_add_signed(offset).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A non-empty table of hour offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalTable {
    hours: Vec<u32>,
}

impl IntervalTable {
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] for an empty table or an entry
    /// above [`MAX_OFFSET_HOURS`].
    pub fn new(hours: Vec<u32>) -> Result<Self, ConfigError> {
        if hours.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.interval_hours".into(),
                message: "interval table must not be empty".into(),
            });
        }
        if let Some(too_long) = hours.iter().find(|h| **h > MAX_OFFSET_HOURS) {
            return Err(ConfigError::InvalidValue {
                key: "scheduler.interval_hours".into(),
                message: format!("{too_long} hours exceeds the limit of {MAX_OFFSET_HOURS}"),
            });
        }
        Ok(Self { hours })
    }

    /// Offset for `stage`, clamped to the last entry.
    pub fn hours_for(&self, stage: u8) -> u32 {
        let idx = usize::from(stage).min(self.hours.len() - 1);
        self.hours[idx]
    }

    pub fn interval(&self, stage: u8) -> Duration {
        Duration::hours(i64::from(self.hours_for(stage)))
    }

    /// `now` plus the interval for `stage`.
    pub fn compute_next_review(&self, stage: u8, now: DateTime<Utc>) -> DateTime<Utc> {
        hours_after(now, self.hours_for(stage))
    }

    pub fn hours(&self) -> &[u32] {
        &self.hours
    }
}

impl Default for IntervalTable {
    fn default() -> Self {
        Self {
            hours: DEFAULT_INTERVAL_HOURS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_canonical_offsets() {
        let table = IntervalTable::default();
        let hours: Vec<u32> = (0..=6).map(|s| table.hours_for(s)).collect();
        assert_eq!(hours, vec![1, 4, 24, 72, 168, 720, 2160]);
    }

    #[test]
    fn stage_beyond_table_clamps_to_last() {
        let table = IntervalTable::new(vec![2, 6]).unwrap();
        assert_eq!(table.hours_for(0), 2);
        assert_eq!(table.hours_for(1), 6);
        assert_eq!(table.hours_for(5), 6);
    }

    #[test]
    fn empty_table_is_rejected() {
        assert!(IntervalTable::new(Vec::new()).is_err());
    }

    #[test]
    fn next_review_adds_hours() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let table = IntervalTable::default();
        assert_eq!(table.compute_next_review(2, now), now + Duration::hours(24));
    }

    #[test]
    fn oversized_entry_is_rejected() {
        let err = IntervalTable::new(vec![1, u32::MAX]).unwrap_err();
        assert!(err.to_string().contains("scheduler.interval_hours"));
        assert!(IntervalTable::new(vec![MAX_OFFSET_HOURS]).is_ok());
    }

    #[test]
    fn offsets_saturate_instead_of_overflowing() {
        let now = DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            hours_after(now, u32::MAX),
            now + Duration::hours(i64::from(MAX_OFFSET_HOURS))
        );
        let near_end = DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        assert_eq!(hours_after(near_end, 4), DateTime::<Utc>::MAX_UTC);
        let table = IntervalTable::new(vec![MAX_OFFSET_HOURS]).unwrap();
        assert_eq!(table.compute_next_review(0, near_end), DateTime::<Utc>::MAX_UTC);
    }
}
