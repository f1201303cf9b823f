use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};

/// Half-open time range `[start, end)`. A missing end means "up to now".
#[derive(Debug, Clone, Copy)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
}

impl Window {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && self.end.map_or(true, |end| ts < end)
    }
}

/// Window from the caller's local midnight up to now.
pub fn day_window<Tz: TimeZone>(now: DateTime<Tz>) -> Window {
    Window {
        start: local_start(&now.timezone(), now.date_naive()),
        end: None,
    }
}

/// Window from the first of the caller's local calendar month up to now.
pub fn month_window<Tz: TimeZone>(now: DateTime<Tz>) -> Window {
    let date = now.date_naive();
    let first = date.with_day(1).unwrap_or(date);
    Window {
        start: local_start(&now.timezone(), first),
        end: None,
    }
}

/// First instant of `date` in `tz`, as a UTC timestamp.
fn local_start<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let mut naive = date.and_time(NaiveTime::MIN);
    // Midnight can fall into a DST gap; step forward until the zone maps it.
    for _ in 0..4 {
        match tz.from_local_datetime(&naive).earliest() {
            Some(dt) => return dt.with_timezone(&Utc),
            None => naive += Duration::minutes(30),
        }
    }
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
