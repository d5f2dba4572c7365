use chrono::{DateTime, NaiveDate, Utc};

use crate::error::ReviewError;

/// The report date: an explicit `YYYY-MM-DD`, otherwise today at the configured UTC offset.
pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    utc_offset_hours: i32,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| {
            ReviewError::configuration(format!("invalid as-of date {s:?}: {e}")).into()
        });
    }

    let offset = utc_offset_hours
        .checked_mul(3600)
        .and_then(chrono::FixedOffset::east_opt)
        .ok_or_else(|| {
            ReviewError::configuration(format!("invalid UTC offset: {utc_offset_hours}h"))
        })?;
    Ok(now_utc.with_timezone(&offset).date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_date_wins() {
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
        let d = resolve_as_of_date(Some("2025-12-10"), now, 0).unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2025, 12, 10).unwrap());
    }

    #[test]
    fn offset_can_roll_the_date_forward() {
        // 23:30 UTC is already the next day at UTC+2.
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 23, 30, 0).unwrap();
        assert_eq!(
            resolve_as_of_date(None, now, 0).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 9).unwrap()
        );
        assert_eq!(
            resolve_as_of_date(None, now, 2).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
        );
    }

    #[test]
    fn malformed_date_is_rejected() {
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
        assert!(resolve_as_of_date(Some("10/12/2025"), now, 0).is_err());
    }

    #[test]
    fn out_of_range_offset_is_configuration_error() {
        let now = Utc.with_ymd_and_hms(2026, 1, 3, 8, 0, 0).unwrap();
        for hours in [30, 600_000, i32::MIN] {
            let err = resolve_as_of_date(None, now, hours).unwrap_err();
            assert_eq!(
                ReviewError::kind_of(&err),
                Some(crate::error::ErrorKind::Configuration),
                "{hours}"
            );
        }
    }
}
