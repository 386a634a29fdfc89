use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::time_window::parse_time;
use super::{DomainError, PublicDashboard, PublicDashboardQuery};

const MAX_ACCESS_TOKEN_LEN: usize = 64;

pub fn validate_access_token(token: &str) -> Result<(), DomainError> {
    let valid = !token.is_empty()
        && token.len() <= MAX_ACCESS_TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(DomainError::InvalidAccessToken(format!("malformed access token {:?}", token)))
    }
}

pub fn parse_panel_id(raw: &str) -> Result<i64, DomainError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| DomainError::InvalidPanelId(format!("error parsing panelId {:?}", raw)))
}

pub fn validate_variable_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::BadRequest("variable name is required".to_string()));
    }
    Ok(())
}

/// Rejects negative resolution parameters and, when the caller is allowed to
/// pick the range, a range that does not parse.
pub fn validate_query_request(
    query: &PublicDashboardQuery,
    public_dashboard: &PublicDashboard,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if query.interval_ms < 0 {
        return Err(DomainError::BadRequest("intervalMs must not be negative".to_string()));
    }
    if query.max_data_points < 0 {
        return Err(DomainError::BadRequest("maxDataPoints must not be negative".to_string()));
    }

    let range = &query.time_range;
    if public_dashboard.time_selection_enabled && !range.from.is_empty() && !range.to.is_empty() {
        parse_time(&range.from, now, Tz::UTC, false)?;
        parse_time(&range.to, now, Tz::UTC, true)?;
    }

    Ok(())
}
