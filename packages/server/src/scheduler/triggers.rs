//! Trigger evaluation: cron-style and fixed-interval schedules.
//!
//! The cron form is field-wise: any subset of `{year, month, day, week,
//! day_of_week, hour, minute, second}`, each a wildcard (`*`), a literal, a
//! comma-list, or a step (`*/n`). Field matching happens on wall-clock time
//! in the scheduler's configured timezone; results are returned in UTC.
//!
//! `day_of_week` is 0=Monday..6=Sunday and `week` is the ISO week number.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// How far ahead `next_fire` searches before concluding a cron schedule
/// never matches again (e.g. `{month: "2", day: "30"}`).
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TriggerError {
    #[error("trigger_config must be a JSON object")]
    NotAnObject,

    #[error("unknown trigger_config field '{0}'")]
    UnknownField(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("interval trigger period must be greater than zero")]
    ZeroInterval,
}

/// The two trigger kinds, persisted as the Postgres `trigger_type` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "trigger_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    Interval,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "cron",
            TriggerType::Interval => "interval",
        }
    }
}

/// Date bounds a trigger honors: fire times before `start_date` are skipped,
/// times after `end_date` suppress the trigger entirely.
#[derive(Debug, Clone, Copy)]
pub struct FireBounds {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One parsed cron field.
#[derive(Debug, Clone, PartialEq)]
enum CronField {
    Any,
    /// `*/n`: every n-th value counted from the field minimum.
    Step(u32),
    Values(Vec<u32>),
}

impl CronField {
    fn parse(field: &'static str, raw: &str, min: u32, max: u32) -> Result<Self, TriggerError> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(CronField::Any);
        }

        if let Some(step) = raw.strip_prefix("*/") {
            let n: u32 = step.parse().map_err(|_| TriggerError::InvalidField {
                field,
                value: raw.to_string(),
                reason: "step must be a positive integer".to_string(),
            })?;
            if n == 0 {
                return Err(TriggerError::InvalidField {
                    field,
                    value: raw.to_string(),
                    reason: "step must be positive".to_string(),
                });
            }
            return Ok(CronField::Step(n));
        }

        let mut values = Vec::new();
        for part in raw.split(',') {
            let value: u32 = part.trim().parse().map_err(|_| TriggerError::InvalidField {
                field,
                value: raw.to_string(),
                reason: format!("'{part}' is not an integer"),
            })?;
            if value < min || value > max {
                return Err(TriggerError::InvalidField {
                    field,
                    value: raw.to_string(),
                    reason: format!("{value} is outside {min}..={max}"),
                });
            }
            values.push(value);
        }
        values.sort_unstable();
        values.dedup();
        Ok(CronField::Values(values))
    }

    fn matches(&self, value: u32, min: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Step(n) => (value - min) % n == 0,
            CronField::Values(values) => values.contains(&value),
        }
    }

    fn max_value(&self) -> Option<u32> {
        match self {
            CronField::Values(values) => values.last().copied(),
            _ => None,
        }
    }
}

/// Field-wise cron schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    year: CronField,
    month: CronField,
    day: CronField,
    week: CronField,
    day_of_week: CronField,
    hour: CronField,
    minute: CronField,
    second: CronField,
}

impl CronSchedule {
    /// Parse from a trigger_config object. Unset fields more significant
    /// than the most significant set field default to `*`; less significant
    /// ones default to their minimum (`second` to 0). `week` and
    /// `day_of_week` are constraints and default to `*`.
    pub fn parse(config: &serde_json::Map<String, serde_json::Value>) -> Result<Self, TriggerError> {
        let mut fields: [Option<CronField>; 8] = Default::default();
        const SPECS: [(&str, u32, u32); 8] = [
            ("year", 1970, 9999),
            ("month", 1, 12),
            ("day", 1, 31),
            ("week", 1, 53),
            ("day_of_week", 0, 6),
            ("hour", 0, 23),
            ("minute", 0, 59),
            ("second", 0, 59),
        ];

        for (key, value) in config {
            if key == "type" {
                continue;
            }
            let Some(index) = SPECS.iter().position(|(name, _, _)| name == key) else {
                return Err(TriggerError::UnknownField(key.clone()));
            };
            let (name, min, max) = SPECS[index];
            let raw = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(TriggerError::InvalidField {
                        field: name,
                        value: other.to_string(),
                        reason: "expected a string or number".to_string(),
                    })
                }
            };
            fields[index] = Some(CronField::parse(name, &raw, min, max)?);
        }

        // Defaulting, standard cron-field semantics: an unset field more
        // significant than the most significant set field becomes `*`; an
        // unset field at or below it becomes its minimum. `day`, `week`, and
        // `day_of_week` share one significance level and never constrain
        // each other, so unset day-level fields stay `*`.
        // Levels: year=0, month=1, day/week/day_of_week=2, hour=3,
        // minute=4, second=5.
        const LEVELS: [u8; 8] = [0, 1, 2, 2, 2, 3, 4, 5];
        let most_significant_set = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_some())
            .map(|(i, _)| LEVELS[i])
            .min();

        let mut fields = fields;
        let mut resolve = |index: usize| {
            if let Some(field) = fields[index].take() {
                return field;
            }
            // Indexes 2..=4 are the day-level fields (day, week,
            // day_of_week). Unset week/day_of_week stay wildcards, and an
            // unset day does too whenever another day-level field is set.
            if index == 3 || index == 4 {
                return CronField::Any;
            }
            if index == 2 && (fields[3].is_some() || fields[4].is_some()) {
                return CronField::Any;
            }
            match most_significant_set {
                Some(first_set) if LEVELS[index] > first_set => {
                    let (_, min, _) = SPECS[index];
                    CronField::Values(vec![min])
                }
                // Nothing set at all still pins the second to zero.
                None if index == 7 => CronField::Values(vec![0]),
                _ => CronField::Any,
            }
        };

        Ok(CronSchedule {
            year: resolve(0),
            month: resolve(1),
            day: resolve(2),
            week: resolve(3),
            day_of_week: resolve(4),
            hour: resolve(5),
            minute: resolve(6),
            second: resolve(7),
        })
    }

    /// Smallest wall-clock time strictly after `after` matching all fields,
    /// converted to UTC. `None` when no match exists inside the search
    /// horizon (the schedule is exhausted).
    pub fn next_fire(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_after = after.with_timezone(&tz).naive_local();
        let mut t = truncate_to_second(local_after) + Duration::seconds(1);
        let horizon = t + Duration::days(SEARCH_HORIZON_DAYS);

        while t < horizon {
            let date = t.date();

            if !self.year.matches(t.year() as u32, 1970) {
                if let Some(max_year) = self.year.max_value() {
                    if (max_year as i32) <= t.year() {
                        return None;
                    }
                }
                t = NaiveDate::from_ymd_opt(t.year() + 1, 1, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.month.matches(t.month(), 1) {
                t = start_of_next_month(date)?;
                continue;
            }
            if !self.week.matches(date.iso_week().week(), 1) {
                let to_monday = 7 - date.weekday().num_days_from_monday();
                t = (date + Duration::days(to_monday as i64)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day.matches(t.day(), 1)
                || !self.day_of_week.matches(date.weekday().num_days_from_monday(), 0)
            {
                t = date.succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hour.matches(t.hour(), 0) {
                t = date.and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.matches(t.minute(), 0) {
                t = date.and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !self.second.matches(t.second(), 0) {
                t += Duration::seconds(1);
                continue;
            }

            // A nonexistent local time (DST spring-forward) is skipped; an
            // ambiguous one (fall-back) resolves to the earlier instant.
            match tz.from_local_datetime(&t).earliest() {
                Some(resolved) => {
                    let utc = resolved.with_timezone(&Utc);
                    if utc > after {
                        return Some(utc);
                    }
                    t += Duration::seconds(1);
                }
                None => t += Duration::seconds(1),
            }
        }

        None
    }
}

/// Fixed-interval schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSchedule {
    weeks: i64,
    days: i64,
    hours: i64,
    minutes: i64,
    seconds: i64,
    /// Forces the first fire at activation time regardless of `start_date`.
    pub execute_now: bool,
}

impl IntervalSchedule {
    pub fn parse(config: &serde_json::Map<String, serde_json::Value>) -> Result<Self, TriggerError> {
        let mut schedule = IntervalSchedule {
            weeks: 0,
            days: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
            execute_now: false,
        };

        for (key, value) in config {
            match key.as_str() {
                "type" => {}
                "execute_now" => {
                    schedule.execute_now = value.as_bool().ok_or(TriggerError::InvalidField {
                        field: "execute_now",
                        value: value.to_string(),
                        reason: "expected a boolean".to_string(),
                    })?;
                }
                "weeks" | "days" | "hours" | "minutes" | "seconds" => {
                    let amount = value.as_i64().ok_or_else(|| TriggerError::InvalidField {
                        field: "interval",
                        value: value.to_string(),
                        reason: format!("'{key}' must be an integer"),
                    })?;
                    if amount < 0 {
                        return Err(TriggerError::InvalidField {
                            field: "interval",
                            value: value.to_string(),
                            reason: format!("'{key}' must not be negative"),
                        });
                    }
                    match key.as_str() {
                        "weeks" => schedule.weeks = amount,
                        "days" => schedule.days = amount,
                        "hours" => schedule.hours = amount,
                        "minutes" => schedule.minutes = amount,
                        _ => schedule.seconds = amount,
                    }
                }
                other => return Err(TriggerError::UnknownField(other.to_string())),
            }
        }

        if schedule.period() <= Duration::zero() {
            return Err(TriggerError::ZeroInterval);
        }
        Ok(schedule)
    }

    pub fn period(&self) -> Duration {
        Duration::weeks(self.weeks)
            + Duration::days(self.days)
            + Duration::hours(self.hours)
            + Duration::minutes(self.minutes)
            + Duration::seconds(self.seconds)
    }
}

/// A parsed trigger, ready for `next_fire` evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    Cron(CronSchedule),
    Interval(IntervalSchedule),
}

impl Trigger {
    pub fn parse(
        trigger_type: TriggerType,
        config: &serde_json::Value,
    ) -> Result<Self, TriggerError> {
        let object = config.as_object().ok_or(TriggerError::NotAnObject)?;
        match trigger_type {
            TriggerType::Cron => Ok(Trigger::Cron(CronSchedule::parse(object)?)),
            TriggerType::Interval => Ok(Trigger::Interval(IntervalSchedule::parse(object)?)),
        }
    }

    /// Next fire time strictly after `after`, honoring the job's date
    /// bounds. `None` means the trigger is exhausted (one-shot end).
    pub fn next_fire(
        &self,
        after: DateTime<Utc>,
        bounds: &FireBounds,
        tz: Tz,
    ) -> Option<DateTime<Utc>> {
        let next = match self {
            Trigger::Cron(schedule) => {
                let search_after = match bounds.start_date {
                    Some(start) if start - Duration::seconds(1) > after => {
                        start - Duration::seconds(1)
                    }
                    _ => after,
                };
                schedule.next_fire(search_after, tz)?
            }
            Trigger::Interval(schedule) => {
                let anchor = bounds.start_date.unwrap_or(bounds.created_at);
                anchor.max(after) + schedule.period()
            }
        };

        match bounds.end_date {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    /// Whether an interval trigger asked for an immediate first fire.
    pub fn execute_now(&self) -> bool {
        matches!(self, Trigger::Interval(schedule) if schedule.execute_now)
    }
}

fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

fn start_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn arbitrary_schedule() -> impl Strategy<Value = serde_json::Value> {
        (
            proptest::option::of(0u32..24),
            proptest::option::of(0u32..60),
            proptest::option::of(0u32..7),
        )
            .prop_map(|(hour, minute, dow)| {
                let mut config = serde_json::Map::new();
                if let Some(h) = hour {
                    config.insert("hour".into(), serde_json::json!(h.to_string()));
                }
                if let Some(m) = minute {
                    config.insert("minute".into(), serde_json::json!(m.to_string()));
                }
                if let Some(d) = dow {
                    config.insert("day_of_week".into(), serde_json::json!(d.to_string()));
                }
                serde_json::Value::Object(config)
            })
    }

    proptest! {
        #[test]
        fn next_fire_is_strictly_after_and_matches_fields(
            config in arbitrary_schedule(),
            offset_secs in 0i64..(86_400 * 400),
        ) {
            let trigger = Trigger::parse(TriggerType::Cron, &config).unwrap();
            let after = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::seconds(offset_secs);
            let bounds = FireBounds { start_date: None, end_date: None, created_at: after };

            if let Some(next) = trigger.next_fire(after, &bounds, chrono_tz::UTC) {
                prop_assert!(next > after);

                let object = config.as_object().unwrap();
                if let Some(h) = object.get("hour") {
                    prop_assert_eq!(next.hour().to_string(), h.as_str().unwrap());
                }
                if let Some(m) = object.get("minute") {
                    prop_assert_eq!(next.minute().to_string(), m.as_str().unwrap());
                }
                if let Some(d) = object.get("day_of_week") {
                    prop_assert_eq!(
                        next.weekday().num_days_from_monday().to_string(),
                        d.as_str().unwrap()
                    );
                }
                prop_assert_eq!(next.second(), 0);
            }
        }

        #[test]
        fn repeated_next_fire_is_strictly_monotone(
            config in arbitrary_schedule(),
        ) {
            let trigger = Trigger::parse(TriggerType::Cron, &config).unwrap();
            let mut cursor = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
            let bounds = FireBounds { start_date: None, end_date: None, created_at: cursor };

            for _ in 0..5 {
                match trigger.next_fire(cursor, &bounds, chrono_tz::UTC) {
                    Some(next) => {
                        prop_assert!(next > cursor);
                        cursor = next;
                    }
                    None => break,
                }
            }
        }
    }
}
