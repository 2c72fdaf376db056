use chrono::{Duration, NaiveDate};

/// A half-open `[start, end)` slice of a job's date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl std::fmt::Display for HarvestWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Splits `[since, until)` into consecutive windows no longer than
/// `max_span_days`, oldest first.
///
/// A range that already fits yields exactly one window. An empty or inverted
/// range yields none. `max_span_days` below one is treated as one.
#[must_use]
pub fn plan_windows(since: NaiveDate, until: NaiveDate, max_span_days: u32) -> Vec<HarvestWindow> {
    if until <= since {
        return Vec::new();
    }

    let span = Duration::days(i64::from(max_span_days.max(1)));
    let mut windows = Vec::new();
    let mut start = since;
    while start < until {
        let end = start
            .checked_add_signed(span)
            .map_or(until, |candidate| candidate.min(until));
        windows.push(HarvestWindow { start, end });
        start = end;
    }
    windows
}
