// Next fire instant for a schedule

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::config::{Frequency, ScheduleConfig};

/// First instant strictly after `after` at which `schedule` fires.
///
/// `None` for disabled schedules and for schedules missing the fields their
/// frequency needs. All times are UTC.
pub fn next_run_after(schedule: &ScheduleConfig, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if !schedule.enabled {
        return None;
    }

    match schedule.frequency {
        Frequency::Hourly => {
            let minute = schedule.time_of_day().map(|(_, m)| m).unwrap_or(0);
            let candidate = at(after.date_naive(), after.hour(), minute)?;
            if candidate > after {
                Some(candidate)
            } else {
                Some(candidate + Duration::hours(1))
            }
        }
        Frequency::Daily => {
            let (hour, minute) = schedule.time_of_day()?;
            let candidate = at(after.date_naive(), hour, minute)?;
            if candidate > after {
                Some(candidate)
            } else {
                Some(candidate + Duration::days(1))
            }
        }
        Frequency::Weekly => {
            let (hour, minute) = schedule.time_of_day()?;
            let target = schedule.day_of_week.filter(|d| *d <= 6)?;
            let today = after.weekday().num_days_from_sunday();
            let days_ahead = (target + 7 - today) % 7;
            let candidate = at(after.date_naive() + Duration::days(i64::from(days_ahead)), hour, minute)?;
            if candidate > after {
                Some(candidate)
            } else {
                Some(candidate + Duration::weeks(1))
            }
        }
        Frequency::Monthly => {
            let (hour, minute) = schedule.time_of_day()?;
            let day = schedule.day_of_month.filter(|d| (1..=31).contains(d))?;
            let (mut year, mut month) = (after.year(), after.month());
            // Two iterations always suffice; the bound guards against bad input.
            for _ in 0..3 {
                let clamped = day.min(days_in_month(year, month)?);
                let candidate = at(NaiveDate::from_ymd_opt(year, month, clamped)?, hour, minute)?;
                if candidate > after {
                    return Some(candidate);
                }
                if month == 12 {
                    year += 1;
                    month = 1;
                } else {
                    month += 1;
                }
            }
            None
        }
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(first_of_next.pred_opt()?.day())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_disabled_never_fires() {
        assert_eq!(next_run_after(&ScheduleConfig::manual(), Utc::now()), None);
    }

    #[test]
    fn test_hourly() {
        let schedule = ScheduleConfig::hourly();
        assert_eq!(
            next_run_after(&schedule, utc(2024, 3, 1, 10, 15)),
            Some(utc(2024, 3, 1, 11, 0))
        );

        let mut schedule = ScheduleConfig::hourly();
        schedule.time = Some("00:30".to_string());
        assert_eq!(
            next_run_after(&schedule, utc(2024, 3, 1, 10, 15)),
            Some(utc(2024, 3, 1, 10, 30))
        );
        assert_eq!(
            next_run_after(&schedule, utc(2024, 3, 1, 23, 30)),
            Some(utc(2024, 3, 2, 0, 30))
        );
    }

    #[test]
    fn test_daily_is_strictly_after() {
        let schedule = ScheduleConfig::daily("02:00");
        assert_eq!(
            next_run_after(&schedule, utc(2024, 3, 1, 1, 59)),
            Some(utc(2024, 3, 1, 2, 0))
        );
        assert_eq!(
            next_run_after(&schedule, utc(2024, 3, 1, 2, 0)),
            Some(utc(2024, 3, 2, 2, 0))
        );
    }

    #[test]
    fn test_weekly_uses_sunday_as_zero() {
        // 2024-03-01 is a Friday
        let sunday = ScheduleConfig::weekly(0, "03:00");
        assert_eq!(
            next_run_after(&sunday, utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 3, 3, 0))
        );

        let friday = ScheduleConfig::weekly(5, "03:00");
        assert_eq!(
            next_run_after(&friday, utc(2024, 3, 1, 12, 0)),
            Some(utc(2024, 3, 8, 3, 0))
        );
    }

    #[test]
    fn test_monthly_clamps_to_short_months() {
        let schedule = ScheduleConfig::monthly(31, "04:00");
        assert_eq!(
            next_run_after(&schedule, utc(2024, 2, 10, 0, 0)),
            Some(utc(2024, 2, 29, 4, 0))
        );
        assert_eq!(
            next_run_after(&schedule, utc(2024, 4, 30, 5, 0)),
            Some(utc(2024, 5, 31, 4, 0))
        );
        assert_eq!(
            next_run_after(&schedule, utc(2024, 12, 31, 5, 0)),
            Some(utc(2025, 1, 31, 4, 0))
        );
    }
}
