//! Backup schedule expressions.
//!
//! Accepted forms:
//! - six or seven field cron with a leading seconds field (`0 0 3 * * *`)
//! - five field Unix cron (`30 2 * * *`), run at second zero
//! - cron macros such as `@daily` or `@hourly`
//! - `@every <duration>` for fixed intervals (`@every 6h`, `@every 90m`)
//!
//! Cron expressions are evaluated in the host's local time zone. Numeric
//! days of the week follow Unix cron: 0 and 7 are Sunday, 1 is Monday.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub enum Schedule {
    Cron {
        expression: String,
        schedule: Box<cron::Schedule>,
    },
    Every(Duration),
}

impl Schedule {
    /// First fire time strictly after `now`
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            Schedule::Cron { schedule, .. } => schedule.after(&now).next(),
            Schedule::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                now.checked_add_signed(step)
            }
        }
    }

    /// Time to wait from `now` until the next fire
    pub fn delay_from(&self, now: DateTime<Local>) -> Option<Duration> {
        let next = self.next_after(now)?;
        Some((next - now).to_std().unwrap_or(Duration::ZERO))
    }
}

impl FromStr for Schedule {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let expression = raw.trim();
        let invalid = |reason: String| ConfigError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };

        if let Some(interval) = expression.strip_prefix("@every") {
            let interval = humantime::parse_duration(interval.trim())
                .map_err(|e| invalid(e.to_string()))?;
            if interval.is_zero() {
                return Err(invalid("interval must be greater than zero".to_string()));
            }
            return Ok(Schedule::Every(interval));
        }

        let mut fields: Vec<String> = expression.split_whitespace().map(String::from).collect();
        match fields.len() {
            5 => fields.insert(0, "0".to_string()),
            6 | 7 => {}
            1 if expression.starts_with('@') => {}
            count => {
                return Err(invalid(format!(
                    "expected 5, 6 or 7 fields, found {count}"
                )));
            }
        }
        if let Some(weekdays) = fields.get_mut(5) {
            *weekdays = remap_weekdays(weekdays).map_err(invalid)?;
        }
        let normalized = fields.join(" ");

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Schedule::Cron {
            expression: expression.to_string(),
            schedule: Box::new(schedule),
        })
    }
}

/// Rewrite Unix weekday numbers into the `cron` crate's, where Sunday is 1.
/// Names such as `MON-FRI` pass through unchanged.
fn remap_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    let mut named = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            named.push(item.to_string());
            continue;
        }

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => match step.parse::<usize>() {
                Ok(step) if step > 0 => (base, Some(step)),
                _ => return Err(format!("invalid day-of-week step in '{item}'")),
            },
            None => (item, None),
        };
        let (start, end) = match base.split_once('-') {
            _ if base == "*" => (0, 6),
            Some((start, end)) => (weekday(start)?, weekday(end)?),
            None if step.is_some() => (weekday(base)?, 6),
            None => (weekday(base)?, weekday(base)?),
        };
        if start > end {
            return Err(format!("day-of-week range '{base}' runs backwards"));
        }
        days.extend((start..=end).step_by(step.unwrap_or(1)).map(|day| day % 7 + 1));
    }

    let mut items: Vec<String> = days.iter().map(u32::to_string).collect();
    items.extend(named);
    Ok(items.join(","))
}

fn weekday(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{raw}'")),
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron { expression, .. } => f.write_str(expression),
            Schedule::Every(interval) => {
                write!(f, "@every {}", humantime::format_duration(*interval))
            }
        }
    }
}
