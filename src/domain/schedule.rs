//! Schedule rules and the next-fire calculator.
//!
//! A rule is either a weekday set or a month-day set, each paired with an
//! ordered list of wall-clock times. All arithmetic happens in the zone of the
//! `now` argument; the returned instant carries the same zone.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Timelike, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::types::{Cadence, ScheduleKind};
use crate::util::timezone::resolve_local;

const WEEKLY_HORIZON_DAYS: u64 = 7;
const BIWEEKLY_HORIZON_DAYS: u64 = 14;
// A weekday falls in the first week of every month; the longest wait is from
// the 1st of one month to the 7th of the next.
const FIRST_WEEK_HORIZON_DAYS: u64 = 37;
const MONTHLY_HORIZON_MONTHS: u32 = 12;

/// Wall-clock time with minute precision, written `HH:MM` in 24-hour form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WallTime(NaiveTime);

impl WallTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, DomainError> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| DomainError::validation(format!("invalid time {hour:02}:{minute:02}")))
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }

    pub fn as_naive(self) -> NaiveTime {
        self.0
    }
}

impl FromStr for WallTime {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || DomainError::validation(format!("invalid time `{trimmed}`, expected HH:MM"));

        let (hours, minutes) = trimmed.split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if !digits(hours, 2) || minutes.len() != 2 || !digits(minutes, 2) {
            return Err(invalid());
        }

        let hour: u32 = hours.parse().map_err(|_| invalid())?;
        let minute: u32 = minutes.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for WallTime {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WallTime> for String {
    fn from(value: WallTime) -> Self {
        value.to_string()
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeeklyRule {
    week_days: Vec<Weekday>,
    times: Vec<WallTime>,
    cadence: Cadence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthlyRule {
    month_days: Vec<u32>,
    times: Vec<WallTime>,
    cadence: Cadence,
}

/// When a task fires. Construct through [`ScheduleRule::weekly`] or
/// [`ScheduleRule::monthly`]; both normalise and validate their input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleColumns", into = "ScheduleColumns")]
pub enum ScheduleRule {
    Weekly(WeeklyRule),
    Monthly(MonthlyRule),
}

impl ScheduleRule {
    pub fn weekly(
        week_days: impl IntoIterator<Item = Weekday>,
        times: impl IntoIterator<Item = WallTime>,
        cadence: Cadence,
    ) -> Result<Self, DomainError> {
        let mut days: Vec<Weekday> = week_days.into_iter().collect();
        days.sort_by_key(|day| day.num_days_from_monday());
        days.dedup();
        if days.is_empty() {
            return Err(DomainError::validation("at least one weekday is required"));
        }

        Ok(Self::Weekly(WeeklyRule {
            week_days: days,
            times: normalize_times(times)?,
            cadence,
        }))
    }

    pub fn monthly(
        month_days: impl IntoIterator<Item = u32>,
        times: impl IntoIterator<Item = WallTime>,
        cadence: Cadence,
    ) -> Result<Self, DomainError> {
        let days: BTreeSet<u32> = month_days.into_iter().collect();
        if days.is_empty() {
            return Err(DomainError::validation("at least one month day is required"));
        }
        if let Some(day) = days.iter().find(|day| !(1..=31).contains(*day)) {
            return Err(DomainError::validation(format!("invalid month day {day}")));
        }

        Ok(Self::Monthly(MonthlyRule {
            month_days: days.into_iter().collect(),
            times: normalize_times(times)?,
            cadence,
        }))
    }

    /// Parse a list of `HH:MM` strings, as typed by an operator.
    pub fn parse_times<S: AsRef<str>>(values: &[S]) -> Result<Vec<WallTime>, DomainError> {
        values.iter().map(|value| value.as_ref().parse()).collect()
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            ScheduleRule::Weekly(_) => ScheduleKind::Weekly,
            ScheduleRule::Monthly(_) => ScheduleKind::Monthly,
        }
    }

    pub fn times(&self) -> &[WallTime] {
        match self {
            ScheduleRule::Weekly(rule) => &rule.times,
            ScheduleRule::Monthly(rule) => &rule.times,
        }
    }

    pub fn cadence(&self) -> Cadence {
        match self {
            ScheduleRule::Weekly(rule) => rule.cadence,
            ScheduleRule::Monthly(rule) => rule.cadence,
        }
    }

    pub fn week_days(&self) -> &[Weekday] {
        match self {
            ScheduleRule::Weekly(rule) => &rule.week_days,
            ScheduleRule::Monthly(_) => &[],
        }
    }

    pub fn month_days(&self) -> &[u32] {
        match self {
            ScheduleRule::Weekly(_) => &[],
            ScheduleRule::Monthly(rule) => &rule.month_days,
        }
    }

    /// One weekday, one time, plain weekly cadence: the shape test tasks use.
    pub fn is_trivial(&self) -> bool {
        match self {
            ScheduleRule::Weekly(rule) => {
                rule.week_days.len() == 1 && rule.times.len() == 1 && rule.cadence == Cadence::Weekly
            }
            ScheduleRule::Monthly(_) => false,
        }
    }

    pub fn describe(&self) -> String {
        let times = join(self.times().iter().map(ToString::to_string));
        match self {
            ScheduleRule::Weekly(rule) => {
                let days = join(rule.week_days.iter().map(ToString::to_string));
                let cadence = match rule.cadence {
                    Cadence::Weekly => "weekly",
                    Cadence::Biweekly => "odd ISO weeks",
                    Cadence::Monthly => "first week of the month",
                };
                format!("{cadence} on {days} at {times}")
            }
            ScheduleRule::Monthly(rule) => {
                let days = join(rule.month_days.iter().map(ToString::to_string));
                format!("monthly on day {days} at {times}")
            }
        }
    }
}

/// Least instant strictly after `now` that satisfies `rule`, or `None` when the
/// search horizon holds no such instant.
pub fn next_fire(rule: &ScheduleRule, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    match rule {
        ScheduleRule::Weekly(rule) => rule.next_after(now),
        ScheduleRule::Monthly(rule) => rule.next_after(now),
    }
}

impl WeeklyRule {
    fn horizon_days(&self) -> u64 {
        match self.cadence {
            Cadence::Weekly => WEEKLY_HORIZON_DAYS,
            Cadence::Biweekly => BIWEEKLY_HORIZON_DAYS,
            Cadence::Monthly => FIRST_WEEK_HORIZON_DAYS,
        }
    }

    fn accepts(&self, date: NaiveDate) -> bool {
        if !self.week_days.contains(&date.weekday()) {
            return false;
        }
        match self.cadence {
            Cadence::Weekly => true,
            Cadence::Biweekly => date.iso_week().week() % 2 == 1,
            Cadence::Monthly => date.day() <= 7,
        }
    }

    fn next_after(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();

        (0..=self.horizon_days())
            .filter_map(|offset| today.checked_add_days(Days::new(offset)))
            .filter(|date| self.accepts(*date))
            .find_map(|date| first_after(tz, date, &self.times, now))
    }
}

impl MonthlyRule {
    fn next_after(&self, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();
        let (mut year, mut month) = (today.year(), today.month());

        for _ in 0..=MONTHLY_HORIZON_MONTHS {
            // Days the month lacks (31 in April, 30 in February) are skipped.
            let found = self
                .month_days
                .iter()
                .filter_map(|day| NaiveDate::from_ymd_opt(year, month, *day))
                .filter(|date| *date >= today)
                .find_map(|date| first_after(tz, date, &self.times, now));
            if found.is_some() {
                return found;
            }

            (year, month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
        }

        None
    }
}

fn first_after(
    tz: Tz,
    date: NaiveDate,
    times: &[WallTime],
    now: DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    times
        .iter()
        .filter_map(|time| resolve_local(tz, date, time.as_naive()))
        .find(|candidate| *candidate > now)
}

fn normalize_times(times: impl IntoIterator<Item = WallTime>) -> Result<Vec<WallTime>, DomainError> {
    let unique: BTreeSet<WallTime> = times.into_iter().collect();
    if unique.is_empty() {
        return Err(DomainError::validation("at least one time is required"));
    }
    Ok(unique.into_iter().collect())
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

/// Persisted shape of a rule: the `schedule_type`, `times`, `week_days`,
/// `month_days` and `cadence` columns of the `tasks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleColumns {
    pub schedule_type: ScheduleKind,
    pub times: Vec<String>,
    #[serde(default)]
    pub week_days: Vec<u8>,
    #[serde(default)]
    pub month_days: Vec<u32>,
    #[serde(default)]
    pub cadence: Cadence,
}

impl From<ScheduleRule> for ScheduleColumns {
    fn from(rule: ScheduleRule) -> Self {
        Self {
            schedule_type: rule.kind(),
            times: rule.times().iter().map(ToString::to_string).collect(),
            week_days: rule
                .week_days()
                .iter()
                .map(|day| day.num_days_from_monday() as u8)
                .collect(),
            month_days: rule.month_days().to_vec(),
            cadence: rule.cadence(),
        }
    }
}

impl TryFrom<ScheduleColumns> for ScheduleRule {
    type Error = DomainError;

    fn try_from(columns: ScheduleColumns) -> Result<Self, Self::Error> {
        let times = ScheduleRule::parse_times(&columns.times)?;
        match columns.schedule_type {
            ScheduleKind::Weekly => {
                let days = columns
                    .week_days
                    .iter()
                    .map(|index| weekday_from_index(*index))
                    .collect::<Result<Vec<_>, _>>()?;
                ScheduleRule::weekly(days, times, columns.cadence)
            }
            ScheduleKind::Monthly => {
                ScheduleRule::monthly(columns.month_days, times, columns.cadence)
            }
        }
    }
}

/// Monday is 0, Sunday is 6.
pub fn weekday_from_index(index: u8) -> Result<Weekday, DomainError> {
    match index {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        other => Err(DomainError::validation(format!("invalid weekday index {other}"))),
    }
}
