use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};

/// `D-M-YY` without zero padding, e.g. 4 March 2025 is `4-3-25`.
pub fn sheet_name_for(date: NaiveDate) -> String {
    format!(
        "{}-{}-{:02}",
        date.day(),
        date.month(),
        date.year().rem_euclid(100)
    )
}

/// The calendar date a run belongs to: an explicit `YYYY-MM-DD` override, or today in the
/// timezone of `now`.
pub fn resolve_run_date<Tz: TimeZone>(
    run_date_arg: Option<&str>,
    now: DateTime<Tz>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = run_date_arg {
        return Ok(NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")?);
    }
    Ok(now.date_naive())
}

pub fn local_run_date(run_date_arg: Option<&str>) -> anyhow::Result<NaiveDate> {
    resolve_run_date(run_date_arg, Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn sheet_name_is_unpadded_day_month_two_digit_year() {
        let d = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
        assert_eq!(sheet_name_for(d), "4-3-25");

        let d = NaiveDate::from_ymd_opt(2025, 8, 18).unwrap();
        assert_eq!(sheet_name_for(d), "18-8-25");

        let d = NaiveDate::from_ymd_opt(2009, 12, 31).unwrap();
        assert_eq!(sheet_name_for(d), "31-12-09");
    }

    #[test]
    fn run_date_follows_timezone_of_now() {
        // 2025-03-04 20:00 UTC is already 2025-03-05 in UTC+9.
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 20, 0, 0).unwrap();
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();

        assert_eq!(
            resolve_run_date(None, now).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()
        );
        assert_eq!(
            resolve_run_date(None, now.with_timezone(&kst)).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()
        );
    }

    #[test]
    fn explicit_run_date_wins() {
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 20, 0, 0).unwrap();
        let d = resolve_run_date(Some("2024-02-29"), now).unwrap();
        assert_eq!(sheet_name_for(d), "29-2-24");
        assert!(resolve_run_date(Some("29/02/2024"), now).is_err());
    }
}
