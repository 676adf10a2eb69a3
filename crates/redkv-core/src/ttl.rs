//! Conversions between RFC3339 deadlines and relative expiries.
//!
//! Writes turn `deadline - now` into a signed duration; reads turn the
//! remaining duration back into `now + remaining`. Both sides use the wall
//! clock at the moment of the call, so round trips are accurate to about a
//! second.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use crate::error::{KvError, KvResult, Op};

/// Parse an RFC3339 timestamp into a UTC deadline.
pub fn parse_deadline(op: Op, value: &str) -> KvResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| KvError::TimestampParse {
            op,
            value: value.to_string(),
            source,
        })
}

/// Signed time left until `deadline`. Zero or negative when already passed.
pub fn expiry_until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> TimeDelta {
    deadline.signed_duration_since(now)
}

/// Absolute deadline for a key with `remaining` time to live.
pub fn deadline_after(now: DateTime<Utc>, remaining: Duration) -> String {
    let remaining = TimeDelta::from_std(remaining).unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(remaining)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case("2026-10-19T12:00:00Z")]
    #[case("2026-10-19T14:00:00+02:00")]
    #[case("2026-10-19T12:00:00.000Z")]
    fn parses_equivalent_deadlines(#[case] input: &str) {
        let expected = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(parse_deadline(Op::Set, input).unwrap(), expected);
    }

    #[rstest]
    #[case("tomorrow")]
    #[case("2026-10-19 12:00:00")]
    #[case("1760875200")]
    fn rejects_non_rfc3339(#[case] input: &str) {
        let err = parse_deadline(Op::MExpire, input).unwrap_err();
        match err {
            KvError::TimestampParse { op, value, .. } => {
                assert_eq!(op, Op::MExpire);
                assert_eq!(value, input);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn past_deadline_gives_negative_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        let deadline = now - TimeDelta::seconds(3);
        assert_eq!(expiry_until(deadline, now), TimeDelta::seconds(-3));
    }

    #[test]
    fn deadline_after_uses_second_precision() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        assert_eq!(
            deadline_after(now, Duration::from_secs(10)),
            "2026-10-19T12:00:10Z"
        );
    }
}
