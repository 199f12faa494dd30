use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use rrule::RRuleSet;

/// Does this group's schedule match the current local civil date?
pub fn schedule_matches_today(schedule: Option<&str>) -> Result<bool> {
    schedule_matches_on(schedule, Local::now().date_naive())
}

/// Schedule evaluation against an explicit date. Absent, empty or `"*"`
/// schedules always match. Otherwise the schedule is an RFC 5545 RRULE and
/// matches iff its first occurrence on/after `date` falls on `date` itself.
pub fn schedule_matches_on(schedule: Option<&str>, date: NaiveDate) -> Result<bool> {
    let rule = match schedule {
        None => return Ok(true),
        Some(s) => {
            let t = s.trim();
            if t.is_empty() || t == "*" {
                return Ok(true);
            }
            t.trim_start_matches("RRULE:").to_string()
        }
    };

    let input = format!("DTSTART:{}T000000Z\nRRULE:{}", date.format("%Y%m%d"), rule);
    let set: RRuleSet = input
        .parse()
        .with_context(|| format!("invalid schedule rrule: {rule:?}"))?;

    let first = set.all(1).dates.into_iter().next();
    Ok(first.map(|d| d.date_naive() == date).unwrap_or(false))
}
