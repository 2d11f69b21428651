//! Ledger timestamp format.
//!
//! Ledger lines carry the commit time as two comma-separated fields,
//! `MM/DD/YYYY,HH:MM:SS`, in local time with second precision.

use chrono::{Local, NaiveDateTime, Timelike};

use crate::error::TypeError;

pub const DATE_FORMAT: &str = "%m/%d/%Y";
pub const TIME_FORMAT: &str = "%H:%M:%S";

/// Local wall-clock time truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

/// Render `ts` as the `date,time` pair used in ledger lines.
pub fn format(ts: &NaiveDateTime) -> String {
    format!("{},{}", ts.format(DATE_FORMAT), ts.format(TIME_FORMAT))
}

/// Parse separate date and time fields of a ledger line.
pub fn parse(date: &str, time: &str) -> Result<NaiveDateTime, TypeError> {
    let value = format!("{date},{time}");
    NaiveDateTime::parse_from_str(&value, &format!("{DATE_FORMAT},{TIME_FORMAT}")).map_err(|e| {
        TypeError::InvalidTimestamp {
            value,
            reason: e.to_string(),
        }
    })
}
