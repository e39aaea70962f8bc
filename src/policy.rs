//! Authorization and budget policy.
//!
//! An app with zero permission rows is unrestricted. Once any row exists,
//! every method needs its own row, and the matching row's expiry, per-tx
//! cap and quota apply in that order. Budget windows are computed in the
//! server's local clock.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::db::AppPermission;
use crate::nip47;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetRenewal {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BudgetRenewal {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetRenewal::Never => "never",
            BudgetRenewal::Daily => "daily",
            BudgetRenewal::Weekly => "weekly",
            BudgetRenewal::Monthly => "monthly",
            BudgetRenewal::Yearly => "yearly",
        }
    }

    /// Unknown strings fall back to `never`: the most restrictive window
    /// start (app creation) without refusing service.
    pub fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => BudgetRenewal::Daily,
            "weekly" => BudgetRenewal::Weekly,
            "monthly" => BudgetRenewal::Monthly,
            "yearly" => BudgetRenewal::Yearly,
            _ => BudgetRenewal::Never,
        }
    }
}

/// A denied request, carrying the wire error code for the reply envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub code: &'static str,
    pub message: String,
}

/// Rules 1-3: unrestricted apps pass with `None`; otherwise the method must
/// have an unexpired row, which the caller feeds into the amount checks.
pub fn select_permission<'a>(
    permissions: &'a [AppPermission],
    method: &str,
    now: NaiveDateTime,
) -> Result<Option<&'a AppPermission>, Denial> {
    if permissions.is_empty() {
        return Ok(None);
    }
    let Some(permission) = permissions.iter().find(|p| p.request_method == method) else {
        return Err(Denial {
            code: nip47::ERROR_RESTRICTED,
            message: format!("This app does not have permission to request {method}"),
        });
    };
    if let Some(expires_at) = permission.expires_at {
        if expires_at < now {
            return Err(Denial {
                code: nip47::ERROR_EXPIRED,
                message: "This app has expired".to_string(),
            });
        }
    }
    Ok(Some(permission))
}

/// Rules 4-5. `consumed_sats` is the settled spend inside the current
/// budget window; it is only consulted when a quota is set.
pub fn check_amounts(
    permission: &AppPermission,
    amount_sats: i64,
    consumed_sats: i64,
) -> Result<(), Denial> {
    if permission.max_amount_per_transaction > 0
        && amount_sats > permission.max_amount_per_transaction
    {
        return Err(Denial {
            code: nip47::ERROR_INSUFFICIENT_BALANCE,
            message: "Payment amount is greater than budget allows".to_string(),
        });
    }
    if permission.max_amount > 0 && consumed_sats + amount_sats > permission.max_amount {
        return Err(Denial {
            code: nip47::ERROR_QUOTA_EXCEEDED,
            message: "Insufficient budget remaining to make payment".to_string(),
        });
    }
    Ok(())
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month")
}

fn year_start(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).expect("january first")
}

pub fn start_of_budget(
    renewal: BudgetRenewal,
    app_created_at: NaiveDateTime,
    now: NaiveDateTime,
) -> NaiveDateTime {
    let today = now.date();
    match renewal {
        BudgetRenewal::Never => app_created_at,
        BudgetRenewal::Daily => midnight(today),
        BudgetRenewal::Weekly => {
            // Sunday rolls back six days to the previous Monday.
            let days_from_monday = today.weekday().num_days_from_monday() as i64;
            midnight(today) - Duration::days(days_from_monday)
        }
        BudgetRenewal::Monthly => midnight(month_start(today)),
        BudgetRenewal::Yearly => midnight(year_start(today.year())),
    }
}

/// One window past the start; `never` renews never.
pub fn end_of_budget(
    renewal: BudgetRenewal,
    app_created_at: NaiveDateTime,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let start = start_of_budget(renewal, app_created_at, now);
    match renewal {
        BudgetRenewal::Never => None,
        BudgetRenewal::Daily => Some(start + Duration::days(1)),
        BudgetRenewal::Weekly => Some(start + Duration::days(7)),
        BudgetRenewal::Monthly => {
            let date = start.date();
            let next = if date.month() == 12 {
                year_start(date.year() + 1)
            } else {
                NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
                    .expect("first of next month")
            };
            Some(midnight(next))
        }
        BudgetRenewal::Yearly => Some(midnight(year_start(start.date().year() + 1))),
    }
}

/// Human rendering of the time left in the window, for the admin surface.
pub fn renews_in(end_of_budget: Option<NaiveDateTime>, now: NaiveDateTime) -> String {
    let Some(end) = end_of_budget else {
        return "--".to_string();
    };
    let remaining = end - now;
    let hours = remaining.num_hours();
    if hours < 24 {
        return format!("{} hours and {} minutes", hours, remaining.num_minutes() % 60);
    }
    let days = hours / 24;
    if days < 30 {
        return format!("{days} days");
    }
    let months = days / 30;
    let spare_days = days % 30;
    if spare_days > 0 {
        format!("{months} months {spare_days} days")
    } else {
        format!("{months} months")
    }
}
