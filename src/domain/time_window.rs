//! Effective query window for a panel.
//!
//! Precedence: caller range (only when time selection is enabled) over the
//! panel's `timeFrom` override over the dashboard default. The result is
//! always absolute epoch milliseconds.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use super::extraction::strategy_for;
use super::{DomainError, PublicDashboardQuery, TimeRangeDto, TimeWindow};

pub const DEFAULT_FROM: &str = "now-6h";
pub const DEFAULT_TO: &str = "now";

/// Points per panel the engine will compute without trusting the caller.
pub const SAFE_RESOLUTION: i64 = 11_000;

/// Upper bounds (inclusive) and the interval they round to, in milliseconds.
const INTERVAL_LADDER: [(i64, i64); 28] = [
    (10, 1),
    (15, 10),
    (35, 20),
    (75, 50),
    (150, 100),
    (350, 200),
    (750, 500),
    (1_500, 1_000),
    (3_500, 2_000),
    (7_500, 5_000),
    (12_500, 10_000),
    (17_500, 15_000),
    (25_000, 20_000),
    (45_000, 30_000),
    (90_000, 60_000),
    (210_000, 120_000),
    (450_000, 300_000),
    (750_000, 600_000),
    (1_050_000, 900_000),
    (1_500_000, 1_200_000),
    (2_700_000, 1_800_000),
    (5_400_000, 3_600_000),
    (9_000_000, 7_200_000),
    (16_200_000, 10_800_000),
    (32_400_000, 21_600_000),
    (86_400_000, 43_200_000),
    (604_800_000, 86_400_000),
    (1_814_400_000, 604_800_000),
];
const MONTH_MS: i64 = 2_592_000_000;
const YEAR_MS: i64 = 31_536_000_000;

/// Resolves the query window for `panel_id`.
pub fn resolve_time_window(
    document: &Value,
    request: &TimeRangeDto,
    panel_id: i64,
    allow_caller_override: bool,
    now: DateTime<Utc>,
) -> TimeWindow {
    let strategy = strategy_for(document);
    let defaults = strategy.document_time(document);

    let mut from = defaults.from;
    let mut to = defaults.to;

    if let Some(time_from) = strategy.panel_time_from(document, panel_id) {
        from = normalize_relative(&time_from);
    }

    if allow_caller_override && !request.from.is_empty() && !request.to.is_empty() {
        from = request.from.clone();
        to = request.to.clone();
    }

    let timezone = resolve_timezone(request, allow_caller_override, &defaults.timezone);

    let from_at = parse_time(&from, now, timezone, false).unwrap_or_else(|e| {
        tracing::warn!(panel_id, "Unparsable window start {:?}, using {}: {}", from, DEFAULT_FROM, e);
        fallback(DEFAULT_FROM, now, timezone, false)
    });
    let to_at = parse_time(&to, now, timezone, true).unwrap_or_else(|e| {
        tracing::warn!(panel_id, "Unparsable window end {:?}, using {}: {}", to, DEFAULT_TO, e);
        fallback(DEFAULT_TO, now, timezone, true)
    });

    TimeWindow {
        from: from_at.timestamp_millis().to_string(),
        to: to_at.timestamp_millis().to_string(),
        timezone,
    }
}

/// Caller timezone wins when allowed and valid; otherwise the dashboard's,
/// and UTC when that is blank or unknown.
pub fn resolve_timezone(request: &TimeRangeDto, allow_caller_override: bool, dashboard_timezone: &str) -> Tz {
    if allow_caller_override && !request.timezone.is_empty() {
        if let Some(tz) = parse_timezone(&request.timezone) {
            return tz;
        }
    }
    parse_timezone(dashboard_timezone).unwrap_or(Tz::UTC)
}

pub fn parse_timezone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    if name.eq_ignore_ascii_case("utc") {
        return Some(Tz::UTC);
    }
    name.parse::<Tz>().ok()
}

/// Window for variable queries: the trailing `span` ending now, in UTC.
pub fn trailing_window(span: &str, now: DateTime<Utc>) -> TimeWindow {
    let from = fallback(span, now, Tz::UTC, false);
    TimeWindow {
        from: from.timestamp_millis().to_string(),
        to: now.timestamp_millis().to_string(),
        timezone: Tz::UTC,
    }
}

fn fallback(expr: &str, now: DateTime<Utc>, tz: Tz, round_up: bool) -> DateTime<Tz> {
    parse_time(expr, now, tz, round_up).unwrap_or_else(|_| now.with_timezone(&tz))
}

/// Panel overrides are written without the `now-` prefix.
fn normalize_relative(time_from: &str) -> String {
    let trimmed = time_from.trim();
    if trimmed.starts_with("now") || trimmed.chars().all(|c| c.is_ascii_digit()) {
        trimmed.to_string()
    } else {
        format!("now-{}", trimmed)
    }
}

/// Parses `now[±N<unit>]*[/<unit>]`, epoch milliseconds or RFC 3339.
///
/// `round_up` selects the end of the rounding unit instead of its start.
pub fn parse_time(expr: &str, now: DateTime<Utc>, tz: Tz, round_up: bool) -> Result<DateTime<Tz>, DomainError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(DomainError::InvalidTimeRange("empty time expression".to_string()));
    }

    if let Some(math) = expr.strip_prefix("now") {
        return apply_math(math, now.with_timezone(&tz), round_up)
            .ok_or_else(|| DomainError::InvalidTimeRange(format!("invalid relative time: {}", expr)));
    }

    if let Ok(epoch_ms) = expr.parse::<i64>() {
        return tz
            .timestamp_millis_opt(epoch_ms)
            .single()
            .ok_or_else(|| DomainError::InvalidTimeRange(format!("epoch out of range: {}", expr)));
    }

    DateTime::parse_from_rfc3339(expr)
        .map(|dt| dt.with_timezone(&tz))
        .map_err(|e| DomainError::InvalidTimeRange(format!("{}: {}", expr, e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

fn split_unit(s: &str) -> Option<(Unit, &str)> {
    if let Some(rest) = s.strip_prefix("ms") {
        return Some((Unit::Millisecond, rest));
    }
    let mut chars = s.chars();
    let unit = match chars.next()? {
        's' => Unit::Second,
        'm' => Unit::Minute,
        'h' => Unit::Hour,
        'd' => Unit::Day,
        'w' => Unit::Week,
        'M' => Unit::Month,
        'y' => Unit::Year,
        _ => return None,
    };
    Some((unit, chars.as_str()))
}

fn apply_math(mut math: &str, mut at: DateTime<Tz>, round_up: bool) -> Option<DateTime<Tz>> {
    while !math.is_empty() {
        let mut chars = math.chars();
        let op = chars.next()?;
        let rest = chars.as_str();

        match op {
            '/' => {
                let (unit, rest) = split_unit(rest)?;
                at = if round_up { end_of(at, unit)? } else { start_of(at, unit)? };
                math = rest;
            }
            '+' | '-' => {
                let digits = rest.chars().take_while(char::is_ascii_digit).count();
                let amount: i64 = if digits == 0 { 1 } else { rest[..digits].parse().ok()? };
                let (unit, rest) = split_unit(&rest[digits..])?;
                let amount = if op == '-' { -amount } else { amount };
                at = shift(at, unit, amount)?;
                math = rest;
            }
            _ => return None,
        }
    }
    Some(at)
}

fn shift(at: DateTime<Tz>, unit: Unit, amount: i64) -> Option<DateTime<Tz>> {
    let months = match unit {
        Unit::Month => amount,
        Unit::Year => amount.checked_mul(12)?,
        _ => {
            let delta = match unit {
                Unit::Millisecond => Duration::try_milliseconds(amount)?,
                Unit::Second => Duration::try_seconds(amount)?,
                Unit::Minute => Duration::try_minutes(amount)?,
                Unit::Hour => Duration::try_hours(amount)?,
                Unit::Day => Duration::try_days(amount)?,
                _ => Duration::try_weeks(amount)?,
            };
            return at.checked_add_signed(delta);
        }
    };
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        at.checked_add_months(magnitude)
    } else {
        at.checked_sub_months(magnitude)
    }
}

fn start_of(at: DateTime<Tz>, unit: Unit) -> Option<DateTime<Tz>> {
    let tz = at.timezone();
    let local = at.naive_local();
    let date = local.date();
    let naive = match unit {
        Unit::Millisecond => return Some(at),
        Unit::Second => local.with_nanosecond(0)?,
        Unit::Minute => local.with_nanosecond(0)?.with_second(0)?,
        Unit::Hour => local.with_nanosecond(0)?.with_second(0)?.with_minute(0)?,
        Unit::Day => date.and_hms_opt(0, 0, 0)?,
        Unit::Week => {
            let monday = date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))?;
            monday.and_hms_opt(0, 0, 0)?
        }
        Unit::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?.and_hms_opt(0, 0, 0)?,
        Unit::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
    };
    // Midnight may not exist on DST transition days.
    tz.from_local_datetime(&naive).earliest().or(Some(at))
}

fn end_of(at: DateTime<Tz>, unit: Unit) -> Option<DateTime<Tz>> {
    if unit == Unit::Millisecond {
        return Some(at);
    }
    let next = shift(start_of(at, unit)?, unit, 1)?;
    next.checked_sub_signed(Duration::milliseconds(1))
}

/// Rounds a raw interval to the nearest standard step.
pub fn round_interval_ms(interval_ms: i64) -> i64 {
    INTERVAL_LADDER
        .iter()
        .find(|(bound, _)| interval_ms <= *bound)
        .map(|(_, rounded)| *rounded)
        .unwrap_or(if interval_ms < 3_628_800_000 { MONTH_MS } else { YEAR_MS })
}

/// Clamps the caller's interval and max data points so a public caller cannot
/// request a finer resolution than `SAFE_RESOLUTION` points per window.
pub fn safe_interval_and_max_data_points(query: &PublicDashboardQuery, window: &TimeWindow) -> (i64, i64) {
    let span = window.span_ms();
    let safe_interval = round_interval_ms(span / SAFE_RESOLUTION).max(1);

    if query.interval_ms <= 0 || query.max_data_points <= 0 {
        return (safe_interval, SAFE_RESOLUTION);
    }

    let requested = query
        .interval_ms
        .max(round_interval_ms(span / query.max_data_points));

    if requested > safe_interval {
        (requested, query.max_data_points)
    } else {
        (safe_interval, SAFE_RESOLUTION)
    }
}
