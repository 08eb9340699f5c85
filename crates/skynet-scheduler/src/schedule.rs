use crate::error::{Result, SchedulerError};
use crate::types::Schedule;

/// Parse `"every <N> minute[s]"`. Rejects non-positive `N` and any other
/// unit or phrasing — the scheduler only ever supports minute-granularity
/// intervals.
pub fn parse(input: &str) -> Result<Schedule> {
    let parts: Vec<&str> = input.trim().split_whitespace().collect();
    let [first, count, unit] = parts[..] else {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 'every <N> minute[s]', got: {input:?}"
        )));
    };
    if first != "every" {
        return Err(SchedulerError::InvalidSchedule(format!(
            "expected 'every <N> minute[s]', got: {input:?}"
        )));
    }
    let n: i64 = count
        .parse()
        .map_err(|_| SchedulerError::InvalidSchedule(format!("not a number: {count:?}")))?;
    if n <= 0 {
        return Err(SchedulerError::InvalidSchedule(format!(
            "interval must be positive, got {n}"
        )));
    }
    if unit != "minute" && unit != "minutes" {
        return Err(SchedulerError::InvalidSchedule(format!(
            "unsupported unit {unit:?}, only 'minute'/'minutes' is accepted"
        )));
    }
    Ok(Schedule {
        every_secs: (n as u64) * 60,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn parses_five_minutes_and_advances_next() {
        let schedule = parse("every 5 minutes").unwrap();
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(schedule.next(t), t + chrono::Duration::minutes(5));
    }

    #[test]
    fn singular_minute_is_accepted() {
        assert!(parse("every 1 minute").is_ok());
    }

    #[test]
    fn zero_minutes_is_rejected() {
        assert!(parse("every 0 minutes").is_err());
    }

    #[test]
    fn negative_minutes_is_rejected() {
        assert!(parse("every -5 minutes").is_err());
    }

    #[test]
    fn other_units_are_rejected() {
        assert!(parse("every 5 hours").is_err());
        assert!(parse("every 5 seconds").is_err());
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(parse("not-a-cron").is_err());
        assert!(parse("").is_err());
    }
}
