use chrono::{DateTime, SecondsFormat, Utc};

/// A single key-value write unit.
///
/// `timeout` is either empty (no expiry) or an RFC3339 absolute deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Item {
    pub key: String,
    pub value: Vec<u8>,
    pub timeout: String,
}

impl Item {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            timeout: String::new(),
        }
    }

    /// Item carrying only a key and deadline, as used by `mexpire`.
    pub fn expiring(key: impl Into<String>, deadline: DateTime<Utc>) -> Self {
        Self::new(key, Vec::new()).with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.timeout = deadline.to_rfc3339_opts(SecondsFormat::Secs, true);
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn deadline_is_rendered_as_rfc3339_utc() {
        let deadline = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let item = Item::new("a", "aa").with_deadline(deadline);
        assert_eq!(item.timeout, "2026-10-19T12:00:00Z");
        assert_eq!(item.value, b"aa");
    }

    #[test]
    fn expiring_item_has_no_value() {
        let deadline = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let item = Item::expiring("k", deadline);
        assert!(item.value.is_empty());
        assert!(!item.timeout.is_empty());
    }
}
