//! Trade matching and execution, the market clock, expiry sweeping, and
//! emergency load shedding.
//!
//! The engine is the single writer of household state. The seller
//! availability check, the price lock-in, and the buyer/seller mutation all
//! run inside one household-registry write section, which is what prevents
//! two concurrent submissions from both passing the availability check
//! against the same unconsumed energy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::TimeSource;
use crate::config::{MarketConfig, SheddingConfig};
use crate::error::{EngineError, ResourceKind};
use crate::events::EngineEvent;
use crate::registry::household::{Household, HouseholdId, HouseholdRegistry, Priority};

use super::pricing::{self, PricingState};
use super::stability::{GridStatus, Stability};
use super::trade::{Cancellation, ExecutionRecord, Trade, TradeStatus};
use super::validate::{self, TradeRequest};

/// Point-in-time view of the market returned by [`MarketEngine::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub grid: GridStatus,
    pub pricing: PricingState,
    /// Open trades awaiting execution or expiry, oldest first.
    pub active_trades: Vec<Trade>,
    /// Tail of the history log, oldest first.
    pub recent_history: Vec<Trade>,
    pub households: Vec<Household>,
}

/// Orchestrates validation, pricing, and atomic trade execution; owns the
/// active-trade set and the history log.
pub struct MarketEngine {
    config: MarketConfig,
    shedding: SheddingConfig,
    households: Arc<HouseholdRegistry>,
    time: Arc<dyn TimeSource>,
    events: broadcast::Sender<EngineEvent>,
    pricing: RwLock<PricingState>,
    grid: RwLock<GridStatus>,
    active: Mutex<HashMap<Uuid, Trade>>,
    history: Mutex<Vec<Trade>>,
}

impl MarketEngine {
    pub fn new(
        config: MarketConfig,
        shedding: SheddingConfig,
        households: Arc<HouseholdRegistry>,
        time: Arc<dyn TimeSource>,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let now = time.now();
        let pricing = PricingState::new(
            config.base_price,
            config.peak_price,
            config.off_peak_price,
            now,
        );
        Self {
            config,
            shedding,
            households,
            time,
            events,
            pricing: RwLock::new(pricing),
            grid: RwLock::new(GridStatus::new(now)),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Current dynamic price per kWh.
    pub fn current_price(&self) -> f64 {
        self.pricing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current_price
    }

    /// Latest pricing figures.
    pub fn pricing_state(&self) -> PricingState {
        self.pricing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Latest grid aggregates.
    pub fn grid_status(&self) -> GridStatus {
        self.grid
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Looks up an open trade in the active set.
    pub fn active_trade(&self, id: Uuid) -> Option<Trade> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Number of open trades.
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Full history log, oldest first.
    pub fn history(&self) -> Vec<Trade> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Submits a trade request: validate, check seller availability, price,
    /// and execute.
    ///
    /// A buyer whose trading policy disables `auto_trade` gets the trade
    /// back in `Pending`; it stays in the active set until
    /// [`MarketEngine::execute_trade`], cancellation, or expiry.
    ///
    /// # Errors
    ///
    /// [`EngineError::Validation`] for a malformed request or a policy
    /// violation, [`EngineError::InsufficientEnergy`] when the seller cannot
    /// cover the amount, [`EngineError::NotFound`] for unknown households,
    /// and [`EngineError::Execution`] when the transfer itself fails (the
    /// failed trade is recorded in history).
    pub fn submit_trade(&self, request: &TradeRequest) -> Result<Trade, EngineError> {
        let req = validate::validate(request)?;
        let now = self.time.now();
        let hour = self.time.hour_of_day();
        let unit_price = self.quote(req.amount_kwh, req.priority, req.max_price_per_kwh);
        let valid_until = now + Duration::seconds(self.config.trade_validity_secs as i64);

        // Availability check, trade creation, and transfer are one critical
        // section over the household registry.
        let (trade, exec_err) = self.households.with_map_mut(
            |map| -> Result<(Trade, Option<EngineError>), EngineError> {
                let seller = map
                    .get(&req.seller)
                    .ok_or_else(|| EngineError::not_found(ResourceKind::Household, &req.seller))?;

                if !seller.policy.is_active_hour(hour) {
                    return Err(EngineError::validation(format!(
                        "seller {} is outside its trading hours",
                        seller.id
                    )));
                }
                if unit_price < seller.policy.min_price_per_kwh {
                    return Err(EngineError::validation(format!(
                        "unit price {unit_price} is below seller {} minimum {}",
                        seller.id, seller.policy.min_price_per_kwh
                    )));
                }

                let available = seller.available_energy_kwh(self.config.storage_discharge_fraction);
                if available < req.amount_kwh {
                    return Err(EngineError::InsufficientEnergy {
                        seller: seller.id.clone(),
                        requested_kwh: req.amount_kwh,
                        available_kwh: available,
                    });
                }

                let buyer = map
                    .get(&req.buyer)
                    .ok_or_else(|| EngineError::not_found(ResourceKind::Household, &req.buyer))?;
                let auto_execute = buyer.policy.auto_trade;

                let mut trade = Trade::new(
                    req.buyer.clone(),
                    req.seller.clone(),
                    req.amount_kwh,
                    unit_price,
                    req.priority,
                    now,
                    valid_until,
                );

                if !auto_execute {
                    return Ok((trade, None));
                }

                trade.transition(TradeStatus::InProgress)?;
                match self.transfer(map, &trade, now) {
                    Ok(record) => {
                        trade.execution = Some(record);
                        trade.transition(TradeStatus::Completed)?;
                        Ok((trade, None))
                    }
                    Err(e) => {
                        trade.failure = Some(e.to_string());
                        let _ = trade.transition(TradeStatus::Failed);
                        Ok((trade, Some(e)))
                    }
                }
            },
        )?;

        self.finish_execution(trade, exec_err)
    }

    /// Executes a trade left `Pending` by a non-auto-trading buyer.
    ///
    /// Seller availability is re-checked under the registry lock; the trade
    /// leaves the active set whatever the outcome.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an id not in the active set,
    /// [`EngineError::Validation`] when the validity window has elapsed, and
    /// [`EngineError::Execution`] when the transfer fails.
    pub fn execute_trade(&self, id: Uuid) -> Result<Trade, EngineError> {
        let now = self.time.now();
        let mut trade = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            active
                .remove(&id)
                .ok_or_else(|| EngineError::not_found(ResourceKind::Trade, id.to_string()))?
        };

        if trade.is_expired_at(now) {
            let _ = trade.transition(TradeStatus::Expired);
            self.append_history(trade.clone());
            self.publish(EngineEvent::TradeExpired { trade_id: trade.id });
            return Err(EngineError::validation(format!(
                "trade {id} expired at {}",
                trade.valid_until
            )));
        }

        trade.transition(TradeStatus::InProgress)?;
        let result = self
            .households
            .with_map_mut(|map| self.transfer(map, &trade, now));

        let exec_err = match result {
            Ok(record) => {
                trade.execution = Some(record);
                trade.transition(TradeStatus::Completed)?;
                None
            }
            Err(e) => {
                trade.failure = Some(e.to_string());
                let _ = trade.transition(TradeStatus::Failed);
                Some(e)
            }
        };

        self.finish_execution(trade, exec_err)
    }

    /// Confirms a pending trade on behalf of its seller, committing the
    /// energy while the trade waits in the active set for execution.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an id not in the active set,
    /// [`EngineError::Forbidden`] when `actor` is not the seller, and
    /// [`EngineError::Execution`] when the trade is past `Pending`.
    pub fn confirm_trade(&self, id: Uuid, actor: &str) -> Result<Trade, EngineError> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let trade = active
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(ResourceKind::Trade, id.to_string()))?;
        if actor != trade.seller {
            return Err(EngineError::Forbidden {
                actor: actor.to_string(),
                action: format!("confirm trade {id}"),
            });
        }
        trade.transition(TradeStatus::Confirmed)?;
        debug!(trade_id = %trade.id, seller = %trade.seller, "trade confirmed");
        Ok(trade.clone())
    }

    /// Cancels an open trade on behalf of one of its parties.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an id not in the active set and
    /// [`EngineError::Forbidden`] when `actor` is neither buyer nor seller.
    pub fn cancel_trade(
        &self,
        id: Uuid,
        actor: &str,
        reason: &str,
    ) -> Result<Trade, EngineError> {
        let now = self.time.now();
        let mut trade = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            let found = active
                .get(&id)
                .ok_or_else(|| EngineError::not_found(ResourceKind::Trade, id.to_string()))?;
            if actor != found.buyer && actor != found.seller {
                return Err(EngineError::Forbidden {
                    actor: actor.to_string(),
                    action: format!("cancel trade {id}"),
                });
            }
            active
                .remove(&id)
                .ok_or_else(|| EngineError::not_found(ResourceKind::Trade, id.to_string()))?
        };

        trade.cancellation = Some(Cancellation {
            actor: actor.to_string(),
            at: now,
            reason: reason.to_string(),
        });
        trade.transition(TradeStatus::Cancelled)?;

        info!(trade_id = %trade.id, actor, reason, "trade cancelled");
        self.publish(EngineEvent::TradeCancelled {
            trade_id: trade.id,
            actor: actor.to_string(),
        });
        self.append_history(trade.clone());
        Ok(trade)
    }

    /// Market tick: recompute aggregates and stability, advance the
    /// peak-load high-water mark, then sweep expired trades.
    pub fn market_tick(&self) {
        let now = self.time.now();
        let (load, supply) = self
            .households
            .online_aggregates(self.config.storage_discharge_fraction);

        {
            let mut grid = self.grid.write().unwrap_or_else(PoisonError::into_inner);
            grid.total_load_kw = load;
            grid.total_supply_kw = supply;
            grid.peak_load_kw = grid.peak_load_kw.max(load);
            grid.stability = Stability::classify(load, supply);
            grid.updated_at = now;
            debug!(
                load_kw = load,
                supply_kw = supply,
                stability = %grid.stability,
                "market tick"
            );
        }

        self.sweep_expired(now);
    }

    /// Pricing tick: recompute the current price from the latest aggregates
    /// and the current hour.
    pub fn pricing_tick(&self) {
        let now = self.time.now();
        let hour = self.time.hour_of_day();
        let (load, supply) = {
            let grid = self.grid.read().unwrap_or_else(PoisonError::into_inner);
            (grid.total_load_kw, grid.total_supply_kw)
        };

        // Aggregate consumption doubles as demand in the pricing inputs.
        let price = pricing::unit_price(self.config.base_price, hour, load, load, supply);

        let mut state = self.pricing.write().unwrap_or_else(PoisonError::into_inner);
        state.current_price = price;
        state.updated_at = now;
        debug!(price, hour, "pricing tick");
    }

    /// Sheds load from online non-critical households while stability stays
    /// critical. Normal/Low priority households are cut before High;
    /// Critical households are never touched. Returns the affected
    /// households.
    pub fn trigger_emergency_shedding(&self) -> Vec<Household> {
        let now = self.time.now();
        let fraction = self.config.storage_discharge_fraction;
        let factor = self.shedding.reduction_factor;

        let (affected, load, supply) = self.households.with_map_mut(|map| {
            let mut load = 0.0;
            let mut supply = 0.0;
            for h in map.values().filter(|h| h.online) {
                load += h.consumption_kw;
                supply += h.generation_kw + h.stored_kwh * fraction;
            }
            let mut stability = Stability::classify(load, supply);
            if stability != Stability::Critical {
                return (Vec::new(), load, supply);
            }

            let mut order: Vec<(u8, HouseholdId)> = map
                .values()
                .filter(|h| h.online && h.priority != Priority::Critical)
                .map(|h| (h.priority.shed_rank(), h.id.clone()))
                .collect();
            order.sort();

            let mut affected = Vec::new();
            for (_, id) in order {
                if stability != Stability::Critical {
                    break;
                }
                if let Some(h) = map.get_mut(&id) {
                    let before = h.consumption_kw;
                    h.consumption_kw *= factor;
                    load -= before - h.consumption_kw;
                    stability = Stability::classify(load, supply);
                    affected.push(h.clone());
                }
            }
            (affected, load, supply)
        });

        if affected.is_empty() {
            return affected;
        }

        {
            let mut grid = self.grid.write().unwrap_or_else(PoisonError::into_inner);
            grid.total_load_kw = load;
            grid.total_supply_kw = supply;
            grid.peak_load_kw = grid.peak_load_kw.max(load);
            grid.stability = Stability::classify(load, supply);
            grid.updated_at = now;
        }

        let ids: Vec<HouseholdId> = affected.iter().map(|h| h.id.clone()).collect();
        warn!(affected = ?ids, factor, "emergency load shedding applied");
        self.publish(EngineEvent::SheddingApplied {
            affected: ids,
            reduction_factor: factor,
        });
        affected
    }

    /// Point-in-time market view. Reads only; two consecutive calls with no
    /// intervening mutation return identical figures.
    pub fn snapshot(&self) -> MarketSnapshot {
        let grid = self.grid_status();
        let pricing = self.pricing_state();

        let mut active_trades: Vec<Trade> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        active_trades.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let recent_history = {
            let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            let start = history.len().saturating_sub(self.config.snapshot_history_len);
            history[start..].to_vec()
        };

        MarketSnapshot {
            grid,
            pricing,
            active_trades,
            recent_history,
            households: self.households.all(),
        }
    }

    /// Evicts `Pending`/`Confirmed` trades whose validity window has
    /// elapsed. Returns the number of trades expired.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<Trade> = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            let ids: Vec<Uuid> = active
                .values()
                .filter(|t| t.is_expired_at(now))
                .map(|t| t.id)
                .collect();
            ids.into_iter()
                .filter_map(|id| active.remove(&id))
                .map(|mut t| {
                    let _ = t.transition(TradeStatus::Expired);
                    t
                })
                .collect()
        };

        let count = expired.len();
        for trade in expired {
            warn!(trade_id = %trade.id, valid_until = %trade.valid_until, "trade expired");
            self.publish(EngineEvent::TradeExpired { trade_id: trade.id });
            self.append_history(trade);
        }
        count
    }

    /// Unit price for a request: market price with the priority premium and
    /// volume discount applied, clamped to the buyer's maximum.
    fn quote(&self, amount_kwh: f64, priority: Priority, max_price: f64) -> f64 {
        let premium = match priority {
            Priority::Critical => self.config.priority_premium_critical,
            Priority::High => self.config.priority_premium_high,
            Priority::Normal | Priority::Low => 1.0,
        };
        let discount = if amount_kwh > self.config.volume_discount_threshold_kwh {
            self.config.volume_discount_factor
        } else {
            1.0
        };
        (self.current_price() * premium * discount).min(max_price)
    }

    /// Moves energy between seller and buyer records. Caller holds the
    /// registry write lock; all checks run before the first mutation so a
    /// failure leaves both records untouched.
    fn transfer(
        &self,
        map: &mut HashMap<HouseholdId, Household>,
        trade: &Trade,
        started_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, EngineError> {
        let factor = self.config.storage_unit_factor;

        let seller = map.get(&trade.seller).ok_or_else(|| {
            EngineError::execution(format!("seller {} left the registry", trade.seller))
        })?;
        let available = seller.available_energy_kwh(self.config.storage_discharge_fraction);
        if available < trade.amount_kwh {
            return Err(EngineError::execution(format!(
                "seller {} no longer covers {} kWh (available {available} kWh)",
                trade.seller, trade.amount_kwh
            )));
        }

        let from_generation = trade.amount_kwh.min(seller.generation_kw);
        let remainder = (trade.amount_kwh - from_generation).max(0.0);
        let storage_draw = remainder * factor;
        if storage_draw > seller.stored_kwh {
            return Err(EngineError::execution(format!(
                "seller {} storage cannot cover the remaining {remainder} kWh",
                trade.seller
            )));
        }
        if !map.contains_key(&trade.buyer) {
            return Err(EngineError::execution(format!(
                "buyer {} left the registry",
                trade.buyer
            )));
        }

        if let Some(seller) = map.get_mut(&trade.seller) {
            seller.generation_kw -= from_generation;
            seller.stored_kwh -= storage_draw;
        }
        if let Some(buyer) = map.get_mut(&trade.buyer) {
            buyer.consumption_kw = (buyer.consumption_kw - trade.amount_kwh).max(0.0);
            buyer.stored_kwh =
                (buyer.stored_kwh + trade.amount_kwh * factor).min(buyer.battery_capacity_kwh);
        }

        Ok(ExecutionRecord {
            started_at,
            completed_at: self.time.now(),
            delivered_kwh: trade.amount_kwh,
            paid_total: trade.total_price,
        })
    }

    /// Routes an executed (or pending) trade to the active set or history
    /// and emits the matching event.
    fn finish_execution(
        &self,
        trade: Trade,
        exec_err: Option<EngineError>,
    ) -> Result<Trade, EngineError> {
        match trade.status {
            TradeStatus::Pending => {
                debug!(trade_id = %trade.id, buyer = %trade.buyer, "trade awaiting execution");
                let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
                active.insert(trade.id, trade.clone());
                Ok(trade)
            }
            TradeStatus::Completed => {
                info!(
                    trade_id = %trade.id,
                    buyer = %trade.buyer,
                    seller = %trade.seller,
                    amount_kwh = trade.amount_kwh,
                    price_per_kwh = trade.price_per_kwh,
                    "trade completed"
                );
                self.publish(EngineEvent::TradeCompleted {
                    trade_id: trade.id,
                    buyer: trade.buyer.clone(),
                    seller: trade.seller.clone(),
                    amount_kwh: trade.amount_kwh,
                    total_price: trade.total_price,
                });
                self.append_history(trade.clone());
                Ok(trade)
            }
            _ => {
                let err =
                    exec_err.unwrap_or_else(|| EngineError::execution("trade execution failed"));
                warn!(trade_id = %trade.id, error = %err, "trade failed");
                self.publish(EngineEvent::TradeFailed {
                    trade_id: trade.id,
                    reason: err.to_string(),
                });
                self.append_history(trade);
                Err(err)
            }
        }
    }

    fn append_history(&self, trade: Trade) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(trade);
    }

    fn publish(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
