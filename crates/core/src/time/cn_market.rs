use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

const CST_OFFSET_SECS: i32 = 8 * 3600;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn cst() -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(CST_OFFSET_SECS).context("invalid CST offset")
}

pub fn cst_now(now_utc: DateTime<Utc>) -> anyhow::Result<DateTime<FixedOffset>> {
    Ok(now_utc.with_timezone(&cst()?))
}

/// Market "today" in China Standard Time, unless overridden (YYYY-MM-DD).
/// Whether it is a trading day is left to the trading calendar.
pub fn resolve_today(today_arg: Option<&str>, now_utc: DateTime<Utc>) -> anyhow::Result<NaiveDate> {
    if let Some(s) = today_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid date (expected YYYY-MM-DD): {s}"));
    }
    Ok(cst_now(now_utc)?.date_naive())
}

/// `YYYY-MM-DD HH:MM:SS` in China Standard Time.
pub fn format_cst_timestamp(now_utc: DateTime<Utc>) -> anyhow::Result<String> {
    Ok(cst_now(now_utc)?.format(TIMESTAMP_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn today_rolls_over_at_cst_midnight() {
        // 2024-03-04 15:59 UTC = 23:59 CST
        let before = Utc.with_ymd_and_hms(2024, 3, 4, 15, 59, 0).unwrap();
        assert_eq!(
            resolve_today(None, before).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()
        );
        // 2024-03-04 16:00 UTC = 00:00 CST next day
        let after = Utc.with_ymd_and_hms(2024, 3, 4, 16, 0, 0).unwrap();
        assert_eq!(
            resolve_today(None, after).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
    }

    #[test]
    fn explicit_today_wins_and_is_validated() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 0, 0, 0).unwrap();
        assert_eq!(
            resolve_today(Some("2023-12-29"), now).unwrap(),
            NaiveDate::from_ymd_opt(2023, 12, 29).unwrap()
        );
        assert!(resolve_today(Some("29/12/2023"), now).is_err());
    }

    #[test]
    fn timestamps_render_in_cst() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 10, 30, 5).unwrap();
        assert_eq!(format_cst_timestamp(now).unwrap(), "2024-03-04 18:30:05");
    }
}
