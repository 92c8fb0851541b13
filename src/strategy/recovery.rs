//! Reconciliation: rebuild a deal from exchange order history when local
//! state has drifted from the exchange.
//!
//! Local state is a cache of intent; the exchange is the source of truth
//! for execution. Recovery re-derives the missing deal deterministically
//! and is idempotent: binding transaction ids is the de-duplication key,
//! so a second run over the same history finds no orphans and creates
//! nothing.

use chrono::Duration;

use crate::domain::{Deal, DealStatus, ExchangeOrder, ExchangeOrderStatus, Order, OrderSide};

use super::{CycleContext, CycleOutcome, StrategyError};

/// Two timestamps within this window count as the same submission.
const MATCH_WINDOW: Duration = Duration::seconds(1);

/// Attempts to rebuild today's deal from the exchange's order history.
///
/// Ambiguous or missing matches are reported and left unresolved for
/// manual inspection; recovery never fabricates a deal from unrelated
/// orders.
pub(crate) async fn recover_deal(
    ctx: &mut CycleContext<'_>,
    outcome: &mut CycleOutcome,
) -> Result<Option<String>, StrategyError> {
    outcome.log("attempting deal recovery from exchange history".to_string());

    // The local snapshot may be the thing that drifted; start from a
    // forced download of the authoritative history.
    ctx.client
        .download_orders(ExchangeOrderStatus::Closed)
        .await?;
    ctx.client
        .download_orders(ExchangeOrderStatus::Open)
        .await?;

    let mut history = ctx.client.cached_orders();
    history.sort_by_key(|o| o.open_date);

    let orphans: Vec<ExchangeOrder> = history
        .into_iter()
        .filter(|o| o.open_date.date_naive() == ctx.now.date_naive())
        .filter(|o| ctx.orders.by_txid(&o.txid).is_none())
        .collect();

    if orphans.is_empty() {
        outcome.log("no candidate orders found, nothing to recover".to_string());
        return Ok(None);
    }

    // Best-effort matching against planned orders. This is a heuristic,
    // not a guaranteed match.
    let mut matches: Vec<(String, String)> = Vec::new();
    let mut unmatched = 0usize;
    for orphan in &orphans {
        let candidate = ctx
            .orders
            .for_bot(ctx.bot_id)
            .into_iter()
            .filter(|planned| planned.is_planned())
            .filter(|planned| {
                (planned.open_date - orphan.open_date).abs() <= MATCH_WINDOW
                    && planned.side == orphan.side
                    && planned.order_type == orphan.order_type
                    && volumes_match(planned, orphan)
            })
            .map(|planned| planned.id.clone())
            .next();

        match candidate {
            Some(planned_id) if matches.iter().all(|(id, _)| id != &planned_id) => {
                matches.push((planned_id, orphan.txid.clone()));
            }
            _ => unmatched += 1,
        }
    }

    if matches.is_empty() {
        outcome.warn(format!(
            "{} orphan exchange orders but no matching planned orders; leaving state unresolved",
            orphans.len()
        ));
        return Ok(None);
    }
    if unmatched > 0 {
        outcome.warn(format!(
            "incomplete matches: {} of {} orphans unaccounted for",
            unmatched,
            orphans.len()
        ));
    } else {
        outcome.log("all orphan orders matched".to_string());
    }

    // Bind every matched pair, then assemble the recovered deal.
    let mut deal = Deal::new(
        ctx.bot_id,
        &ctx.settings.account,
        ctx.deals.next_index(ctx.bot_id),
    );
    let mut status = DealStatus::Closed;

    for (planned_id, txid) in matches {
        let Some(fill) = ctx.client.local_order(&txid) else {
            continue;
        };
        let Some(order) = ctx.orders.get_mut(&planned_id) else {
            continue;
        };

        if fill.is_closed() {
            order.filled(
                txid.clone(),
                fill.volume,
                Some(fill.cost),
                fill.close_date.unwrap_or(fill.open_date),
            )?;
        } else {
            order.submitted(txid.clone(), fill.volume, Some(fill.price))?;
            status = DealStatus::Open;
        }

        outcome.log(format!(
            "bound [{}] to exchange order {} ({})",
            planned_id, txid, order.status()
        ));
        match order.side {
            OrderSide::Buy => deal.push_buy(planned_id),
            OrderSide::Sell => deal.push_sell(planned_id),
        }
    }

    deal.status = status;
    let deal_id = deal.id.clone();
    outcome.log(format!("recovered deal {} ({})", deal_id, deal.status));
    ctx.deals.insert(deal);
    outcome.recovered_deal = Some(deal_id.clone());
    Ok(Some(deal_id))
}

/// Volume equality up to trailing zeroes; planned orders without a sized
/// volume cannot match.
fn volumes_match(planned: &Order, fill: &ExchangeOrder) -> bool {
    planned
        .volume()
        .map(|v| v.normalize() == fill.volume.normalize())
        .unwrap_or(false)
}
