//! Due-date resolution for recurring rules.

use chrono::{Datelike, Days, NaiveDate, Weekday};

use crate::model::{Frequency, RecurringRule};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).expect("day 1 exists in every month")
}

/// Last day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("valid first of next month")
        .pred_opt()
        .expect("first of month has a predecessor")
}

/// Shifts Saturday and Sunday back to the preceding Friday.
pub fn business_day_back(date: NaiveDate) -> NaiveDate {
    match date.weekday() {
        Weekday::Sat => date - Days::new(1),
        Weekday::Sun => date - Days::new(2),
        _ => date,
    }
}

/// Resolved due dates for one rule inside the month containing `month`,
/// ascending, before skip and realized filtering. Dates outside the rule's
/// `[start_date, end_date]` window are rejected after any shifting, so a
/// rule can legitimately resolve to nothing for a month.
pub fn due_dates_in_month(rule: &RecurringRule, month: NaiveDate) -> Vec<NaiveDate> {
    let first = month_start(month);
    let last = month_end(month);
    let resolved: Vec<NaiveDate> = match rule.frequency {
        Frequency::Monthly => monthly_due(rule, first, last).into_iter().collect(),
        Frequency::LastBusinessDayOfMonth => vec![business_day_back(last)],
        Frequency::Weekly => cycle_due(rule, first, last, 7),
        Frequency::Biweekly => cycle_due(rule, first, last, 14),
        Frequency::Yearly => yearly_due(rule, first).into_iter().collect(),
    };
    resolved
        .into_iter()
        .filter(|date| in_rule_range(rule, *date))
        .collect()
}

fn in_rule_range(rule: &RecurringRule, date: NaiveDate) -> bool {
    if date < rule.start_date {
        return false;
    }
    match rule.end_date {
        Some(end) => date <= end,
        None => true,
    }
}

/// Day-of-month clamped to the month's length, then business-day shifted.
/// The shift applies to every monthly resolution, clamped or not.
fn monthly_due(rule: &RecurringRule, first: NaiveDate, last: NaiveDate) -> Option<NaiveDate> {
    let day = rule.start_date.day().min(last.day());
    let date = first.with_day(day)?;
    Some(business_day_back(date))
}

fn cycle_due(rule: &RecurringRule, first: NaiveDate, last: NaiveDate, step: i64) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut day = first;
    while day <= last {
        let offset = day.signed_duration_since(rule.start_date).num_days();
        if offset >= 0 && offset % step == 0 {
            dates.push(day);
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    dates
}

/// Strict month-and-day match; a Feb 29 anniversary resolves only in leap
/// years.
fn yearly_due(rule: &RecurringRule, first: NaiveDate) -> Option<NaiveDate> {
    if first.month() != rule.start_date.month() {
        return None;
    }
    first.with_day(rule.start_date.day())
}
