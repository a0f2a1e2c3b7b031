//! Recurring work-schedule resolution: which rules apply to a calendar
//! day, what window the day is open for, and where that window sits in
//! UTC milliseconds given the resource's timezone.

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;

use crate::error::CoreError;
use crate::model::{DayHours, Ms, ScheduleKind, Window, WorkSchedule};

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Parsed recurrence rule. Staff-management writes the iCal subset the
/// salon frontend produces: `FREQ=DAILY` and `FREQ=WEEKLY;BYDAY=...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly(Vec<Weekday>),
}

impl Recurrence {
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Recurrence::Daily => true,
            Recurrence::Weekly(days) => days.contains(&date.weekday()),
        }
    }
}

fn parse_byday(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Parse the supported RRULE subset. A rule the core cannot interpret is
/// a data-integrity error, never silently skipped.
pub fn parse_rrule(rule: &str) -> Result<Recurrence, CoreError> {
    let mut freq: Option<&str> = None;
    let mut byday: Option<Vec<Weekday>> = None;

    for part in rule.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let Some((key, value)) = part.split_once('=') else {
            return Err(CoreError::Integrity(format!("malformed rrule part: {part}")));
        };
        match key.to_ascii_uppercase().as_str() {
            "FREQ" => freq = Some(value),
            "BYDAY" => {
                let mut days = Vec::new();
                for code in value.split(',') {
                    let day = parse_byday(code.trim()).ok_or_else(|| {
                        CoreError::Integrity(format!("unknown BYDAY code: {code}"))
                    })?;
                    if !days.contains(&day) {
                        days.push(day);
                    }
                }
                byday = Some(days);
            }
            // INTERVAL/UNTIL etc. never appear in source data
            other => {
                return Err(CoreError::Integrity(format!("unsupported rrule key: {other}")));
            }
        }
    }

    match freq {
        Some(f) if f.eq_ignore_ascii_case("DAILY") => Ok(Recurrence::Daily),
        Some(f) if f.eq_ignore_ascii_case("WEEKLY") => {
            let days = byday.ok_or_else(|| {
                CoreError::Integrity("FREQ=WEEKLY requires BYDAY".to_string())
            })?;
            if days.is_empty() {
                return Err(CoreError::Integrity("BYDAY is empty".to_string()));
            }
            Ok(Recurrence::Weekly(days))
        }
        Some(f) => Err(CoreError::Integrity(format!("unsupported FREQ: {f}"))),
        None => Err(CoreError::Integrity(format!("rrule has no FREQ: {rule}"))),
    }
}

/// Whether a schedule row applies to the given date.
pub fn schedule_applies(schedule: &WorkSchedule, date: NaiveDate) -> Result<bool, CoreError> {
    if date < schedule.date_start || date > schedule.date_end {
        return Ok(false);
    }
    match &schedule.rrule {
        None => Ok(true),
        Some(rule) => Ok(parse_rrule(rule)?.matches(date)),
    }
}

/// What a single calendar day looks like after schedule precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPlan {
    /// A time_off/holiday rule applies — closed regardless of anything else.
    Closed,
    Open(DayHours),
    /// No rule at all; the caller decides between a configured fallback
    /// window and staying closed.
    Unscheduled,
}

fn checked_hours(schedule: &WorkSchedule) -> Result<DayHours, CoreError> {
    let hours = schedule.hours.ok_or_else(|| {
        CoreError::Integrity(format!("schedule {} has no work-hour window", schedule.id))
    })?;
    if hours.close_min <= hours.open_min || hours.close_min > MINUTES_PER_DAY {
        return Err(CoreError::Integrity(format!(
            "schedule {}: close {} not after open {}",
            schedule.id, hours.close_min, hours.open_min
        )));
    }
    Ok(hours)
}

/// Resolve the schedules applicable to one date into a day plan.
///
/// Precedence: time_off/holiday closes the day; an override with
/// `overrides_regular` replaces the regular window; otherwise regular
/// (and unflagged override) rules apply. Among equal-precedence rules
/// the most recently created wins — ulids order by creation time.
pub fn resolve_day(schedules: &[WorkSchedule], date: NaiveDate) -> Result<DayPlan, CoreError> {
    let mut replacing: Option<&WorkSchedule> = None;
    let mut regular: Option<&WorkSchedule> = None;

    for schedule in schedules {
        if !schedule_applies(schedule, date)? {
            continue;
        }
        if schedule.kind.closes_day() {
            return Ok(DayPlan::Closed);
        }
        match schedule.kind {
            ScheduleKind::Override if schedule.overrides_regular => {
                if replacing.is_none_or(|cur| schedule.id > cur.id) {
                    replacing = Some(schedule);
                }
            }
            _ => {
                if regular.is_none_or(|cur| schedule.id > cur.id) {
                    regular = Some(schedule);
                }
            }
        }
    }

    match replacing.or(regular) {
        Some(schedule) => Ok(DayPlan::Open(checked_hours(schedule)?)),
        None => Ok(DayPlan::Unscheduled),
    }
}

// ── Local time ↔ UTC ─────────────────────────────────────────────

fn local_minute_to_utc(tz: Tz, date: NaiveDate, minute: u32) -> Result<Ms, CoreError> {
    // minute == 1440 means close-at-midnight: 00:00 the next day
    let (date, minute) = if minute >= MINUTES_PER_DAY {
        let next = date.succ_opt().ok_or_else(|| {
            CoreError::Integrity(format!("date overflow past {date}"))
        })?;
        (next, minute - MINUTES_PER_DAY)
    } else {
        (date, minute)
    };
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minute * 60, 0)
        .ok_or_else(|| CoreError::Integrity(format!("invalid minute-of-day: {minute}")))?;
    let naive = date.and_time(time);

    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return Ok(dt.timestamp_millis());
    }
    // DST spring-forward gap: the wall time does not exist, fall forward
    let shifted = naive + chrono::Duration::hours(1);
    tz.from_local_datetime(&shifted)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or_else(|| CoreError::Integrity(format!("unresolvable local time {naive} in {tz}")))
}

/// UTC window of one local day's work hours.
pub fn day_window_utc(tz: Tz, date: NaiveDate, hours: DayHours) -> Result<Window, CoreError> {
    let start = local_minute_to_utc(tz, date, hours.open_min)?;
    let end = local_minute_to_utc(tz, date, hours.close_min)?;
    if end <= start {
        return Err(CoreError::Integrity(format!(
            "day window for {date} collapses in {tz}"
        )));
    }
    Ok(Window::new(start, end))
}

/// Local calendar date an instant falls on, in the resource's timezone.
pub fn local_date_of(tz: Tz, at: Ms) -> Result<NaiveDate, CoreError> {
    tz.timestamp_millis_opt(at)
        .earliest()
        .map(|dt| dt.date_naive())
        .ok_or_else(|| CoreError::Integrity(format!("unrepresentable instant {at}")))
}

/// The local calendar dates a UTC window touches, in order.
pub fn local_dates_covering(tz: Tz, window: &Window) -> Result<Vec<NaiveDate>, CoreError> {
    let first = local_date_of(tz, window.start)?;
    let last = local_date_of(tz, window.end - 1)?;
    let mut dates = Vec::new();
    let mut date = first;
    while date <= last {
        dates.push(date);
        date = date.succ_opt().ok_or_else(|| {
            CoreError::Integrity(format!("date overflow past {date}"))
        })?;
    }
    Ok(dates)
}
