//! Order lifecycle: commit, settle, cancel and clear.

use super::core::Engine;
use super::results::{CancelResult, CommitResult, EngineError, SettlementResult};
use crate::events::{CancelReason, EventPayload, OrderCanceledEvent, OrderCommittedEvent, OrderSettledEvent};
use crate::fees::KeeperAction;
use crate::funding::{fill_price, order_fee};
use crate::hooks::SettlementRecord;
use crate::oracle::{PriceOracleAdapter, PriceReport};
use crate::order::{OrderReadiness, OrderRequest, PendingOrder};
use crate::position::{apply_fill, is_increasing, margin_requirement, PositionUpdate};
use crate::registry::{Feature, Permission};
use crate::types::{AccountId, Address, MarketId, Price, Quote, Side, SignedSize};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Outcome of valuing a trade against an account, before anything is written.
#[derive(Debug, Clone)]
pub(super) struct TradeEvaluation {
    pub fill_price: Price,
    pub order_fee: Quote,
    pub update: PositionUpdate,
    pub new_size: SignedSize,
}

impl Engine {
    // ---- 8.7: commit ----

    /// Records intent to trade. Nothing moves until a keeper settles it.
    pub fn commit_order(&mut self, caller: Address, request: OrderRequest) -> Result<CommitResult, EngineError> {
        self.atomically(|engine| engine.commit_order_inner(caller, request))
    }

    fn commit_order_inner(&mut self, caller: Address, request: OrderRequest) -> Result<CommitResult, EngineError> {
        let account_id = request.account_id;
        let market_id = request.market_id;

        self.ensure_feature(Feature::CommitOrder, caller)?;
        self.market_ref(market_id)?;
        self.ensure_account(account_id)?;
        self.ensure_permission(account_id, Permission::CommitOrder, caller)?;

        if self.ledger.order(account_id, market_id).is_some() {
            return Err(EngineError::OrderAlreadyPending {
                account: account_id,
                market: market_id,
            });
        }
        if request.size_delta.is_zero() {
            return Err(EngineError::ZeroSizeOrder);
        }
        self.ensure_order_size(market_id, request.size_delta)?;
        if self.ledger.is_flagged(account_id, market_id) {
            return Err(EngineError::PositionFlagged {
                account: account_id,
                market: market_id,
            });
        }

        let hooks = &self.protocol.hooks;
        if request.hooks.len() > hooks.max_hooks_per_order {
            return Err(EngineError::TooManyHooks {
                requested: request.hooks.len(),
                max: hooks.max_hooks_per_order,
            });
        }
        if let Some(hook_id) = request
            .hooks
            .iter()
            .find(|id| !hooks.whitelisted.contains(*id) || !self.hooks.contains_key(*id))
        {
            return Err(EngineError::HookNotFound(*hook_id));
        }

        let price = self.index_price(market_id)?;
        let keeper_fee = self.keeper_fee_for(KeeperAction::Settle, request.keeper_fee_buffer_usd)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let trade = self.evaluate_trade(
            account_id,
            market_id,
            request.size_delta,
            price,
            keeper_fee,
            accruals.funding_value(),
            accruals.utilization_accrued,
        )?;

        let order = PendingOrder::from_request(request, self.current_time);
        self.ledger.orders.insert((account_id, market_id), order.clone());

        info!(
            account = ?account_id,
            market = ?market_id,
            size_delta = %order.size_delta,
            limit = %order.limit_price,
            estimated_fill = %trade.fill_price,
            "order committed"
        );
        self.emit_event(EventPayload::OrderCommitted(OrderCommittedEvent {
            account_id,
            market_id,
            size_delta: order.size_delta,
            limit_price: order.limit_price,
            keeper_fee_buffer_usd: order.keeper_fee_buffer_usd,
            estimated_fill_price: trade.fill_price,
            commitment_time: order.commitment_time,
        }));

        Ok(CommitResult {
            order,
            estimated_fill_price: trade.fill_price,
            estimated_order_fee: trade.order_fee,
            estimated_keeper_fee: keeper_fee,
        })
    }

    // ---- 8.8: settle ----

    /// Fills a ready order at the skew-adjusted price of a signed report.
    pub fn settle_order(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        report: &PriceReport,
    ) -> Result<SettlementResult, EngineError> {
        self.atomically(|engine| engine.settle_order_inner(caller, account_id, market_id, report))
    }

    fn settle_order_inner(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        report: &PriceReport,
    ) -> Result<SettlementResult, EngineError> {
        self.ensure_feature(Feature::SettleOrder, caller)?;
        let config = self.market_ref(market_id)?.config.clone();
        self.ensure_account(account_id)?;

        let order = self
            .ledger
            .order(account_id, market_id)
            .cloned()
            .ok_or(EngineError::OrderNotFound {
                account: account_id,
                market: market_id,
            })?;

        let (ready_at, expires_at) = order.settlement_window(config.min_order_age_secs, config.max_order_age_secs);
        match order.readiness(self.current_time, config.min_order_age_secs, config.max_order_age_secs) {
            OrderReadiness::TooEarly => return Err(EngineError::OrderNotReady { ready_at }),
            OrderReadiness::Stale => return Err(EngineError::OrderStale { expired_at: expires_at }),
            OrderReadiness::Ready => {}
        }

        let price = PriceOracleAdapter::new(self.services.oracle.as_ref()).verify_for_order(
            &config,
            report,
            order.commitment_time,
        )?;

        let skew = self.market_ref(market_id)?.skew;
        let fill = fill_price(skew, config.skew_scale, order.size_delta, price);
        if !order.is_within_tolerance(fill) {
            return Err(EngineError::PriceToleranceExceeded {
                fill_price: fill,
                limit_price: order.limit_price,
            });
        }

        let keeper_fee = self.keeper_fee_for(KeeperAction::Settle, order.keeper_fee_buffer_usd)?;
        let accruals = self.recompute_market(market_id, price)?;
        let trade = self.evaluate_trade(
            account_id,
            market_id,
            order.size_delta,
            price,
            keeper_fee,
            accruals.funding_value(),
            accruals.utilization_accrued,
        )?;

        // ledger first, collaborators after
        let previous = self.ledger.position(account_id, market_id).cloned();
        let settlement = self.protocol.settlement_collateral;
        let mut margin = self.ledger.margin(account_id, market_id);
        let realized = trade.update.realized.net();
        let realization = margin.realize(realized.sub(trade.order_fee).sub(keeper_fee), settlement);
        let debt = margin.debt;
        self.ledger.store_margin(account_id, market_id, margin);

        self.market_mut(market_id)?
            .apply_position_change(previous.as_ref(), trade.update.new_position.as_ref());
        self.ledger
            .set_position(account_id, market_id, trade.update.new_position.clone());
        self.ledger.take_order(account_id, market_id);
        self.refresh_utilization_rate(market_id, price)?;

        let record = SettlementRecord {
            account_id,
            market_id,
            size_delta: order.size_delta,
            fill_price: trade.fill_price,
            order_fee: trade.order_fee,
            keeper_fee,
            new_size: trade.new_size,
            settled_at: self.current_time,
        };
        for hook_id in &order.hooks {
            let hook = self.hooks.get(hook_id).cloned().ok_or(EngineError::HookNotFound(*hook_id))?;
            hook.on_settle(&record)?;
        }

        if realization.credited.is_positive() {
            self.services
                .credit_pool
                .withdraw_market_usd(market_id, realization.credited.value())?;
        }
        self.pay_keeper(market_id, caller, keeper_fee, KeeperAction::Settle)?;

        info!(
            account = ?account_id,
            market = ?market_id,
            %caller,
            size_delta = %order.size_delta,
            fill = %trade.fill_price,
            new_size = %trade.new_size,
            debt = %debt,
            "order settled"
        );
        self.emit_event(EventPayload::OrderSettled(OrderSettledEvent {
            account_id,
            market_id,
            keeper: caller,
            size_delta: order.size_delta,
            fill_price: trade.fill_price,
            order_fee: trade.order_fee,
            keeper_fee,
            realized,
            new_size: trade.new_size,
            debt,
        }));

        Ok(SettlementResult {
            fill_price: trade.fill_price,
            order_fee: trade.order_fee,
            keeper_fee,
            realized,
            new_size: trade.new_size,
            debt,
        })
    }

    // ---- 8.9: cancel and clear ----

    /// Cancels a stale order, or a ready one whose fill has moved past the limit.
    /// `report` is only needed for the second case.
    pub fn cancel_order(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        report: Option<&PriceReport>,
    ) -> Result<CancelResult, EngineError> {
        self.atomically(|engine| engine.cancel_order_inner(caller, account_id, market_id, report))
    }

    fn cancel_order_inner(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        report: Option<&PriceReport>,
    ) -> Result<CancelResult, EngineError> {
        self.ensure_feature(Feature::CancelOrder, caller)?;
        let market = self.market_ref(market_id)?;
        let config = market.config.clone();
        let skew = market.skew;
        self.ensure_account(account_id)?;

        let order = self
            .ledger
            .order(account_id, market_id)
            .cloned()
            .ok_or(EngineError::OrderNotFound {
                account: account_id,
                market: market_id,
            })?;
        // delegates cancel as third parties
        let is_owner = self.services.registry.owner_of(account_id) == Some(caller);

        let (ready_at, _) = order.settlement_window(config.min_order_age_secs, config.max_order_age_secs);
        let (reason, keeper_fee) =
            match order.readiness(self.current_time, config.min_order_age_secs, config.max_order_age_secs) {
                OrderReadiness::TooEarly => return Err(EngineError::OrderNotReady { ready_at }),
                OrderReadiness::Stale if is_owner => (CancelReason::Stale, Quote::zero()),
                OrderReadiness::Stale => (
                    CancelReason::Stale,
                    self.keeper_fee_for(KeeperAction::Cancel, Quote::zero())?,
                ),
                OrderReadiness::Ready => {
                    if is_owner {
                        return Err(EngineError::OwnerCannotCancelReadyOrder);
                    }
                    let report = report.ok_or(EngineError::MissingPriceReport)?;
                    let price = PriceOracleAdapter::new(self.services.oracle.as_ref()).verify_for_order(
                        &config,
                        report,
                        order.commitment_time,
                    )?;
                    let fill = fill_price(skew, config.skew_scale, order.size_delta, price);
                    if order.is_within_tolerance(fill) {
                        return Err(EngineError::PriceToleranceNotExceeded {
                            fill_price: fill,
                            limit_price: order.limit_price,
                        });
                    }
                    (
                        CancelReason::PriceToleranceExceeded,
                        self.keeper_fee_for(KeeperAction::Cancel, Quote::zero())?,
                    )
                }
            };

        self.ledger.take_order(account_id, market_id);
        if keeper_fee.is_positive() {
            let mut margin = self.ledger.margin(account_id, market_id);
            margin.realize(keeper_fee.negate(), self.protocol.settlement_collateral);
            self.ledger.store_margin(account_id, market_id, margin);
            self.pay_keeper(market_id, caller, keeper_fee, KeeperAction::Cancel)?;
        }

        warn!(account = ?account_id, market = ?market_id, ?reason, %keeper_fee, "order canceled");
        self.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
            account_id,
            market_id,
            reason,
            keeper_fee,
        }));

        Ok(CancelResult { reason, keeper_fee })
    }

    /// Drops an order past its max age. Free, and needs no price.
    pub fn clear_stale_order(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<CancelResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_feature(Feature::ClearStaleOrder, caller)?;
            let config = engine.market_ref(market_id)?.config.clone();
            engine.ensure_account(account_id)?;

            let order = engine
                .ledger
                .order(account_id, market_id)
                .ok_or(EngineError::OrderNotFound {
                    account: account_id,
                    market: market_id,
                })?;
            let (_, expires_at) = order.settlement_window(config.min_order_age_secs, config.max_order_age_secs);
            if order.readiness(engine.current_time, config.min_order_age_secs, config.max_order_age_secs)
                != OrderReadiness::Stale
            {
                return Err(EngineError::OrderNotStale {
                    stale_after: expires_at,
                });
            }

            engine.ledger.take_order(account_id, market_id);

            info!(account = ?account_id, market = ?market_id, %caller, "stale order cleared");
            engine.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                account_id,
                market_id,
                reason: CancelReason::ClearedStale,
                keeper_fee: Quote::zero(),
            }));
            Ok(CancelResult {
                reason: CancelReason::ClearedStale,
                keeper_fee: Quote::zero(),
            })
        })
    }

    // ---- 8.10: trade checks shared by commit and settle ----

    /// No single trade may exceed the market's size cap. Runs before any price math.
    pub(super) fn ensure_order_size(&self, market_id: MarketId, size_delta: Decimal) -> Result<(), EngineError> {
        let max = self.market_ref(market_id)?.config.max_market_size;
        if size_delta.abs() > max {
            return Err(EngineError::MaxMarketSizeExceeded {
                side: if size_delta > Decimal::ZERO { Side::Long } else { Side::Short },
                open_interest: size_delta.abs(),
                max,
            });
        }
        Ok(())
    }

    /// Values a trade against the account's margin. Size caps always apply; margin and leverage
    /// only when the trade adds exposure.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn evaluate_trade(
        &self,
        account_id: AccountId,
        market_id: MarketId,
        size_delta: Decimal,
        price: Price,
        keeper_fee: Quote,
        funding_value: Decimal,
        utilization_accrued: Decimal,
    ) -> Result<TradeEvaluation, EngineError> {
        let market = self.market_ref(market_id)?;
        let config = &market.config;
        let previous = self.ledger.position(account_id, market_id);
        let old_size = previous.map(|p| p.size).unwrap_or_default();
        let new_size = old_size.add(size_delta);

        if let Some((side, open_interest)) = market.exceeds_max_market_size(old_size, new_size) {
            return Err(EngineError::MaxMarketSizeExceeded {
                side,
                open_interest,
                max: config.max_market_size,
            });
        }

        let fill = fill_price(market.skew, config.skew_scale, size_delta, price);
        let fee = order_fee(market.skew, size_delta, fill, config.maker_fee, config.taker_fee);

        if previous.is_none() && !new_size.is_zero() {
            let max = self.protocol.caps.max_positions_per_account;
            if self.ledger.open_position_count(account_id) >= max as usize {
                return Err(EngineError::MaxPositionsPerAccount(max));
            }
        }

        let update = apply_fill(
            previous,
            account_id,
            market_id,
            size_delta,
            fill,
            funding_value,
            utilization_accrued,
            self.current_time,
        );

        if is_increasing(old_size, new_size) {
            let margin = self.ledger.margin(account_id, market_id);
            let collateral_usd = self.collateral_usd(&margin)?;
            // the new position is re-entered at the fill, so mark it back to the oracle price
            let price_impact = Quote::new(new_size.value() * (price.value() - fill.value()));
            let available = collateral_usd
                .sub(margin.debt)
                .add(update.realized.net())
                .sub(fee)
                .sub(keeper_fee)
                .add(price_impact);
            let requirement = margin_requirement(new_size, price, config);

            if !available.is_positive() {
                return Err(EngineError::InsufficientMargin {
                    required: requirement.initial,
                    available,
                });
            }
            let leverage = new_size.abs() * price.value() / available.value();
            if leverage > config.max_leverage {
                return Err(EngineError::MaxLeverageExceeded {
                    leverage,
                    max: config.max_leverage,
                });
            }
            if available < requirement.initial {
                return Err(EngineError::InsufficientMargin {
                    required: requirement.initial,
                    available,
                });
            }
        }

        Ok(TradeEvaluation {
            fill_price: fill,
            order_fee: fee,
            update,
            new_size,
        })
    }
}
