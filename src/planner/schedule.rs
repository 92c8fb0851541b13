//! Accumulation scheduling for the Stacker strategy: recurring and
//! monthly plans of market buys.

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::config::ScheduleOptions;
use crate::domain::{Order, OrderSide, OrderType};

use super::PlannerError;

/// SchedulePlanner produces the next planned buys for an accumulation
/// bot from its schedule options.
pub struct SchedulePlanner<'a> {
    bot_id: &'a str,
    account: &'a str,
    pair: &'a str,
    options: &'a ScheduleOptions,
    volume_quote: Decimal,
}

impl<'a> SchedulePlanner<'a> {
    pub fn new(
        bot_id: &'a str,
        account: &'a str,
        pair: &'a str,
        options: &'a ScheduleOptions,
        volume_quote: Decimal,
    ) -> Self {
        Self {
            bot_id,
            account,
            pair,
            options,
            volume_quote,
        }
    }

    /// Plans `count` market buys spaced by the configured frequency,
    /// starting after `start_date`.
    pub fn recurring_plan(
        &self,
        start_date: DateTime<Utc>,
        frequency_hours: u32,
        count: usize,
    ) -> Vec<Order> {
        (0..count)
            .map(|i| {
                let open_date =
                    start_date + Duration::hours(((i + 1) * frequency_hours as usize) as i64);
                self.market_buy(open_date)
            })
            .collect()
    }

    /// Plans one market buy on the configured day of the month containing
    /// `start_date`, clamped to the month's last day.
    pub fn monthly_plan(
        &self,
        start_date: DateTime<Utc>,
        day: u32,
    ) -> Result<Order, PlannerError> {
        if day == 0 || day > 31 {
            return Err(PlannerError::InvalidSchedule(format!(
                "day of month out of range: {}",
                day
            )));
        }
        let year = start_date.year();
        let month = start_date.month();
        let day = day.min(last_day_of_month(year, month));
        let open_date = Utc
            .with_ymd_and_hms(year, month, day, 0, 0, 0)
            .single()
            .ok_or_else(|| {
                PlannerError::InvalidSchedule(format!("invalid date {}-{}-{}", year, month, day))
            })?;
        Ok(self.market_buy(open_date))
    }

    /// Proposes the order that continues an exhausted plan, anchored on
    /// the last executed order.
    pub fn propose_next(
        &self,
        last_order: Option<&Order>,
        now: DateTime<Utc>,
    ) -> Result<Order, PlannerError> {
        match *self.options {
            ScheduleOptions::Recurring {
                frequency_hours, ..
            } => {
                let anchor = last_order
                    .map(|o| o.close_date().unwrap_or(o.open_date))
                    .unwrap_or(now);
                Ok(self
                    .recurring_plan(anchor, frequency_hours, 1)
                    .remove(0))
            }
            ScheduleOptions::Monthly { day } => {
                let executed_this_month = last_order
                    .and_then(|o| o.close_date())
                    .map(|d| d.year() == now.year() && d.month() == now.month())
                    .unwrap_or(false);
                let anchor = if executed_this_month {
                    first_of_next_month(now)
                } else {
                    now
                };
                self.monthly_plan(anchor, day)
            }
        }
    }

    fn market_buy(&self, open_date: DateTime<Utc>) -> Order {
        Order::planned(
            self.bot_id,
            self.account,
            self.pair,
            OrderSide::Buy,
            OrderType::Market,
            open_date,
            self.volume_quote,
        )
    }
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    for day in (28..=31).rev() {
        if Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single().is_some() {
            return day;
        }
    }
    28
}

fn first_of_next_month(date: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
}
