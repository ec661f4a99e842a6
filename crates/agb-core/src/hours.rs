//! Resolves the open windows for a tenant on a given calendar date.
//!
//! Precedence: a date-specific exception wins entirely over the weekly
//! schedule: an open exception contributes its own windows and the weekly
//! row is not consulted at all; a closed exception yields no windows even if
//! the weekday is normally open. Missing weekly rows read as closed.

use chrono::{Datelike, NaiveDate};

use crate::{
    domain::{TenantId, TimeWindow},
    ports::SchedulingStore,
    Result,
};

/// Pure read; returns zero, one, or two windows, in start order.
pub async fn open_windows_for(
    store: &dyn SchedulingStore,
    tenant: TenantId,
    date: NaiveDate,
) -> Result<Vec<TimeWindow>> {
    if let Some(exception) = store.hours_exception(tenant, date).await? {
        if !exception.is_open {
            return Ok(Vec::new());
        }
        return Ok(sorted(exception.windows));
    }

    let Some(weekly) = store.business_hours(tenant, date.weekday()).await? else {
        return Ok(Vec::new());
    };
    if !weekly.is_open {
        return Ok(Vec::new());
    }
    Ok(sorted(weekly.windows))
}

fn sorted(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort_by_key(|w| w.start);
    windows
}
