use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{Result, VaultError};

/// Every slot recurs within this many days, including clamped month ends
const SCAN_DAYS: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CadenceKind {
    Daily,
    Weekly,
    Monthly,
}

impl CadenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceKind::Daily => "daily",
            CadenceKind::Weekly => "weekly",
            CadenceKind::Monthly => "monthly",
        }
    }
}

impl FromStr for CadenceKind {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(CadenceKind::Daily),
            "weekly" => Ok(CadenceKind::Weekly),
            "monthly" => Ok(CadenceKind::Monthly),
            other => Err(VaultError::InvalidCadence {
                reason: format!("unknown cadence '{}'", other),
            }),
        }
    }
}

fn invalid(reason: String) -> VaultError {
    VaultError::InvalidCadence { reason }
}

/// Non-empty set of weekdays a weekly cadence runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn single(day: Weekday) -> Self {
        Self(1 << day.num_days_from_monday())
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    fn days(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0u8..7)
            .filter(move |i| self.0 & (1 << i) != 0)
            .filter_map(|i| Weekday::try_from(i).ok())
    }
}

impl Default for WeekdaySet {
    fn default() -> Self {
        Self::single(Weekday::Mon)
    }
}

/// Comma separated days: names (`mon`, `Friday`) or numbers with Monday as 0
impl FromStr for WeekdaySet {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let mut set = WeekdaySet(0);
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            let day = match item.parse::<u8>() {
                Ok(n) => Weekday::try_from(n).map_err(|_| invalid(format!("weekday {} out of range 0-6", n)))?,
                Err(_) => item
                    .parse::<Weekday>()
                    .map_err(|_| invalid(format!("unknown weekday '{}'", item)))?,
            };
            set.insert(day);
        }
        if set.0 == 0 {
            return Err(invalid(format!("no weekday in '{}'", s)));
        }
        Ok(set)
    }
}

impl std::fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .days()
            .map(|d| d.to_string().to_ascii_lowercase())
            .collect();
        f.write_str(&names.join(","))
    }
}

/// Day a monthly cadence runs on
///
/// A day past the end of a short month runs on that month's last day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonthDay {
    Day(u32),
    Last,
}

impl MonthDay {
    /// The calendar day this resolves to in the given month
    pub fn in_month(&self, year: i32, month: u32) -> u32 {
        let last = last_day_of_month(year, month);
        match self {
            MonthDay::Day(d) => (*d).min(last),
            MonthDay::Last => last,
        }
    }
}

impl Default for MonthDay {
    fn default() -> Self {
        MonthDay::Day(1)
    }
}

impl FromStr for MonthDay {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("last") {
            return Ok(MonthDay::Last);
        }
        match s.parse::<u32>() {
            Ok(d) if (1..=31).contains(&d) => Ok(MonthDay::Day(d)),
            _ => Err(invalid(format!("invalid day of month '{}'", s))),
        }
    }
}

impl std::fmt::Display for MonthDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonthDay::Day(d) => write!(f, "{}", d),
            MonthDay::Last => f.write_str("last"),
        }
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(28, |last| last.day())
}

/// Collection cadence: a calendar rule plus a UTC time-of-day slot
///
/// Slots are fixed points on the calendar: every day, the configured
/// weekdays (Monday by default), or one day of the month (the 1st by
/// default). The next run is the first slot after the last success, so a
/// run that finishes a few seconds late does not shift later slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub kind: CadenceKind,
    pub at: NaiveTime,
    #[serde(default)]
    pub weekdays: WeekdaySet,
    #[serde(default)]
    pub month_day: MonthDay,
}

impl Cadence {
    pub fn new(kind: CadenceKind, at: NaiveTime) -> Self {
        Self {
            kind,
            at,
            weekdays: WeekdaySet::default(),
            month_day: MonthDay::default(),
        }
    }

    pub fn with_weekdays(mut self, weekdays: WeekdaySet) -> Self {
        self.weekdays = weekdays;
        self
    }

    pub fn with_month_day(mut self, month_day: MonthDay) -> Self {
        self.month_day = month_day;
        self
    }

    /// Build from catalog columns, e.g. `("daily", "02:30")`
    ///
    /// # Errors
    ///
    /// `InvalidCadence` for an unknown kind or an unparsable time.
    pub fn parse(kind: &str, at: &str) -> Result<Self> {
        Self::parse_with_day(kind, at, None)
    }

    /// Build from catalog columns including the optional day column
    ///
    /// `day` lists weekdays for weekly cadences (`"mon,wed"`, `"0,2"`) and
    /// is a day number or `last` for monthly ones. Daily cadences take no
    /// day.
    ///
    /// # Errors
    ///
    /// `InvalidCadence` for an unknown kind, an unparsable time or a day
    /// that does not fit the kind.
    pub fn parse_with_day(kind: &str, at: &str, day: Option<&str>) -> Result<Self> {
        let kind = kind.parse::<CadenceKind>()?;
        let time = NaiveTime::parse_from_str(at.trim(), "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(at.trim(), "%H:%M:%S"))
            .map_err(|e| invalid(format!("invalid time of day '{}': {}", at, e)))?;
        let cadence = Self::new(kind, time);
        let Some(day) = day.map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(cadence);
        };
        match kind {
            CadenceKind::Daily => Err(invalid(format!("daily cadence takes no day, got '{}'", day))),
            CadenceKind::Weekly => Ok(cadence.with_weekdays(day.parse()?)),
            CadenceKind::Monthly => Ok(cadence.with_month_day(day.parse()?)),
        }
    }

    fn runs_on(&self, date: NaiveDate) -> bool {
        match self.kind {
            CadenceKind::Daily => true,
            CadenceKind::Weekly => self.weekdays.contains(date.weekday()),
            CadenceKind::Monthly => {
                date.day() == self.month_day.in_month(date.year(), date.month())
            }
        }
    }

    fn slot_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        self.runs_on(date)
            .then(|| Utc.from_utc_datetime(&date.and_time(self.at)))
    }

    /// The most recent slot at or before `t`
    pub fn anchor(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let today = t.date_naive();
        (0..=SCAN_DAYS)
            .filter_map(|back| today.checked_sub_days(Days::new(back)))
            .filter_map(|date| self.slot_on(date))
            .find(|slot| *slot <= t)
            .unwrap_or(t)
    }

    /// The first slot strictly after `t`
    pub fn next_slot_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.slots_from(t.date_naive())
            .find(|slot| *slot > t)
            .unwrap_or(t)
    }

    fn slots_from(&self, date: NaiveDate) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        (0..=SCAN_DAYS)
            .filter_map(move |ahead| date.checked_add_days(Days::new(ahead)))
            .filter_map(|date| self.slot_on(date))
    }

    /// Earliest instant at which the next collection becomes due
    ///
    /// A device that never succeeded is due at its first slot on or after
    /// the current day.
    pub fn next_due(
        &self,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        match last_success {
            Some(last) => self.next_slot_after(last),
            None => self.slots_from(now.date_naive()).next().unwrap_or(now),
        }
    }

    pub fn is_due(&self, last_success: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        self.next_due(last_success, now) <= now
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            CadenceKind::Daily => write!(f, "daily")?,
            CadenceKind::Weekly => write!(f, "weekly({})", self.weekdays)?,
            CadenceKind::Monthly => write!(f, "monthly({})", self.month_day)?,
        }
        write!(f, "@{}", self.at.format("%H:%M"))
    }
}
