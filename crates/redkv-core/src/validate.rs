//! Input validation shared by all drivers.
//!
//! Everything here runs before the first backend call. A failing entry
//! aborts the whole call, so a bad key never leaves other keys half-written.

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::{KvError, KvResult, Op};
use crate::item::Item;
use crate::ttl::{expiry_until, parse_deadline};

/// A validated write produced from an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write<'a> {
    pub key: &'a str,
    pub value: &'a [u8],
    /// `None` writes without expiry. Non-positive values are kept as-is.
    pub expiry: Option<TimeDelta>,
}

/// A validated expiry produced from an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry<'a> {
    pub key: &'a str,
    pub expiry: TimeDelta,
}

/// Reject an empty list and any key that is empty after trimming.
pub fn validate_keys<S: AsRef<str>>(op: Op, keys: &[S]) -> KvResult<()> {
    if keys.is_empty() {
        return Err(KvError::NoKeysProvided { op });
    }
    match keys.iter().position(|k| k.as_ref().trim().is_empty()) {
        Some(index) => Err(KvError::EmptyKey { op, index }),
        None => Ok(()),
    }
}

/// Reject a single empty key.
pub fn validate_key(op: Op, key: &str) -> KvResult<()> {
    if key.trim().is_empty() {
        return Err(KvError::EmptyKey { op, index: 0 });
    }
    Ok(())
}

/// Same rules as [`validate_keys`], applied to `item.key`.
pub fn validate_items(op: Op, items: &[Item]) -> KvResult<()> {
    if items.is_empty() {
        return Err(KvError::NoKeysProvided { op });
    }
    match items.iter().position(|i| i.key.trim().is_empty()) {
        Some(index) => Err(KvError::EmptyKey { op, index }),
        None => Ok(()),
    }
}

/// Validate `items` and resolve every timeout against `now`.
pub fn plan_writes(items: &[Item], now: DateTime<Utc>) -> KvResult<Vec<Write<'_>>> {
    validate_items(Op::Set, items)?;
    items
        .iter()
        .map(|item| {
            let expiry = if item.timeout.is_empty() {
                None
            } else {
                let deadline = parse_deadline(Op::Set, &item.timeout)?;
                Some(expiry_until(deadline, now))
            };
            Ok(Write {
                key: &item.key,
                value: &item.value,
                expiry,
            })
        })
        .collect()
}

/// Validate expiry items. An empty list is accepted and yields no work.
pub fn plan_expiries(items: &[Item], now: DateTime<Utc>) -> KvResult<Vec<Expiry<'_>>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            if item.key.trim().is_empty() {
                return Err(KvError::Validation {
                    op: Op::MExpire,
                    reason: format!("item {index}: key is required"),
                });
            }
            if item.timeout.is_empty() {
                return Err(KvError::Validation {
                    op: Op::MExpire,
                    reason: format!("item {index} ('{}'): timeout is required", item.key),
                });
            }
            let deadline = parse_deadline(Op::MExpire, &item.timeout)?;
            Ok(Expiry {
                key: &item.key,
                expiry: expiry_until(deadline, now),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    #[test]
    fn empty_key_list_is_rejected() {
        let keys: [&str; 0] = [];
        assert!(matches!(
            validate_keys(Op::Has, &keys),
            Err(KvError::NoKeysProvided { op: Op::Has })
        ));
    }

    #[rstest]
    #[case(&["a", "", "c"], 1)]
    #[case(&["   ", "b"], 0)]
    #[case(&["a", "b", "\t\n"], 2)]
    fn blank_key_is_reported_by_index(#[case] keys: &[&str], #[case] expected: usize) {
        match validate_keys(Op::Delete, keys) {
            Err(KvError::EmptyKey { op, index }) => {
                assert_eq!(op, Op::Delete);
                assert_eq!(index, expected);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn single_key_validation() {
        assert!(validate_key(Op::Get, "a").is_ok());
        assert!(matches!(
            validate_key(Op::Get, " "),
            Err(KvError::EmptyKey { op: Op::Get, .. })
        ));
    }

    #[test]
    fn writes_resolve_expiry_against_now() {
        let items = vec![
            Item::new("a", "aa"),
            Item::new("b", "bb").with_timeout("2026-10-19T12:00:05Z"),
            Item::new("c", "cc").with_timeout("2026-10-19T11:59:00Z"),
        ];
        let plan = plan_writes(&items, now()).unwrap();
        assert_eq!(plan[0].expiry, None);
        assert_eq!(plan[1].expiry, Some(TimeDelta::seconds(5)));
        assert_eq!(plan[2].expiry, Some(TimeDelta::seconds(-60)));
        assert_eq!(plan[1].value, b"bb");
    }

    #[test]
    fn one_bad_timestamp_rejects_all_writes() {
        let items = vec![
            Item::new("a", "aa"),
            Item::new("b", "bb").with_timeout("not-a-date"),
        ];
        assert!(matches!(
            plan_writes(&items, now()),
            Err(KvError::TimestampParse { op: Op::Set, .. })
        ));
    }

    #[test]
    fn expiries_accept_empty_list() {
        assert!(plan_expiries(&[], now()).unwrap().is_empty());
    }

    #[test]
    fn expiry_without_timeout_is_a_validation_error() {
        let items = vec![
            Item::new("a", "").with_timeout("2026-10-19T12:00:10Z"),
            Item::new("b", ""),
        ];
        match plan_expiries(&items, now()) {
            Err(KvError::Validation { op, reason }) => {
                assert_eq!(op, Op::MExpire);
                assert!(reason.contains("timeout"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn expiry_without_key_is_a_validation_error() {
        let items = vec![Item::new(" ", "").with_timeout("2026-10-19T12:00:10Z")];
        assert!(matches!(
            plan_expiries(&items, now()),
            Err(KvError::Validation { .. })
        ));
    }
}
