//! Trading-session lifecycle controller.
//!
//! Sole writer of session status and the aggregate counters. Every
//! state-changing operation validates ownership first, then the state
//! machine, and persists a single updated record at the end, so a
//! failed operation leaves the session exactly as it was.

use super::{OrderController, store_failure};
use crate::entities::session::transition;
use crate::entities::{
    NewSession, SessionAction, SessionStatus, SessionUpdate, TradeRecord, TradeSettlement,
    TradingSession,
};
use crate::error::{ControlError, ensure_owner};
use crate::hub::ConnectionHub;
use crate::metrics::{self, PerformanceMetrics};
use crate::store::{SessionEvent, SessionEventLog, SessionStore, TradeLedger};
use crate::strategy;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{info, warn};
use tradecast_sdk::{Envelope, EventKind, topics};
use uuid::Uuid;

/// Current risk posture of a session.
#[derive(Debug, Clone, Serialize)]
pub struct RiskReport {
    pub session_id: Uuid,
    pub current_drawdown_pct: Decimal,
    pub max_drawdown_pct: Decimal,
    pub drawdown_breached: bool,
    pub total_pnl: Decimal,
    pub max_daily_loss: Decimal,
    pub max_position_size: Decimal,
    pub risk_per_trade_pct: Decimal,
}

pub struct SessionController {
    sessions: Arc<dyn SessionStore>,
    trades: Arc<dyn TradeLedger>,
    events: Arc<dyn SessionEventLog>,
    orders: Arc<OrderController>,
    hub: Arc<ConnectionHub>,
}

impl SessionController {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        trades: Arc<dyn TradeLedger>,
        events: Arc<dyn SessionEventLog>,
        orders: Arc<OrderController>,
        hub: Arc<ConnectionHub>,
    ) -> Self {
        Self {
            sessions,
            trades,
            events,
            orders,
            hub,
        }
    }

    /// Create a session in the `Created` state with its capital seeded.
    ///
    /// Strategy parameters are validated before anything is persisted.
    pub async fn create(
        &self,
        caller: i64,
        new: NewSession,
    ) -> Result<TradingSession, ControlError> {
        if new.name.trim().is_empty() {
            return Err(ControlError::Validation("name must not be empty".into()));
        }
        if new.initial_capital <= Decimal::ZERO {
            return Err(ControlError::Validation(
                "initial capital must be positive".into(),
            ));
        }
        strategy::validate_params(&new.strategy, &new.params)?;

        let session = TradingSession::create(caller, new);
        self.sessions
            .insert(session.clone())
            .await
            .map_err(store_failure)?;

        info!(session_id = %session.id, user_id = caller, strategy = %session.strategy, "session created");
        self.log_event(
            session.id,
            "created",
            json!({ "strategy": session.strategy, "simulated": session.simulated }),
        )
        .await;
        self.publish(
            caller,
            EventKind::SessionUpdate,
            json!({ "action": "created", "session": as_value(&session) }),
        )
        .await;
        Ok(session)
    }

    pub async fn get(&self, caller: i64, id: Uuid) -> Result<TradingSession, ControlError> {
        let session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        Ok(session)
    }

    pub async fn list(&self, caller: i64) -> Result<Vec<TradingSession>, ControlError> {
        self.sessions
            .list_for_user(caller)
            .await
            .map_err(store_failure)
    }

    /// Edit session metadata, risk limits or strategy parameters.
    /// Not permitted while the session is Active.
    pub async fn update(
        &self,
        caller: i64,
        id: Uuid,
        update: SessionUpdate,
    ) -> Result<TradingSession, ControlError> {
        let mut session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        if session.status == SessionStatus::Active {
            return Err(ControlError::invalid_transition(session.status, "update"));
        }
        if let Some(params) = &update.params {
            strategy::validate_params(&session.strategy, params)?;
        }

        if let Some(name) = update.name {
            session.name = name;
        }
        if let Some(tags) = update.tags {
            session.tags = tags;
        }
        if let Some(risk) = update.risk {
            session.risk = risk;
        }
        if let Some(params) = update.params {
            session.params = params;
        }
        session.updated_at = OffsetDateTime::now_utc();
        self.sessions
            .update(session.clone())
            .await
            .map_err(store_failure)?;

        self.publish(
            caller,
            EventKind::SessionUpdate,
            json!({ "action": "updated", "session": as_value(&session) }),
        )
        .await;
        Ok(session)
    }

    /// Delete a session. Refused while it is Active.
    pub async fn delete(&self, caller: i64, id: Uuid) -> Result<(), ControlError> {
        let session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        if session.status == SessionStatus::Active {
            return Err(ControlError::invalid_transition(session.status, "delete"));
        }
        self.sessions.delete(id).await.map_err(store_failure)?;

        info!(session_id = %id, user_id = caller, "session deleted");
        self.publish(
            caller,
            EventKind::SessionUpdate,
            json!({ "action": "deleted", "session_id": id }),
        )
        .await;
        Ok(())
    }

    /// Drive the state machine. Illegal (state, action) pairs fail
    /// with `InvalidTransition` and mutate nothing.
    ///
    /// Stopping cancels all of the session's open orders, best-effort,
    /// and reports the count in the broadcast payload.
    pub async fn control(
        &self,
        caller: i64,
        id: Uuid,
        action: SessionAction,
        reason: Option<String>,
    ) -> Result<TradingSession, ControlError> {
        let mut session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;

        let previous = session.status;
        let next = transition(previous, action)
            .ok_or_else(|| ControlError::invalid_transition(previous, action))?;

        let now = OffsetDateTime::now_utc();
        session.status = next;
        session.updated_at = now;
        match action {
            SessionAction::Start => {
                // First start only; a restart keeps the original mark.
                if session.started_at.is_none() {
                    session.started_at = Some(now);
                }
            }
            SessionAction::Stop => session.ended_at = Some(now),
            SessionAction::Pause | SessionAction::Resume => {}
        }
        self.sessions
            .update(session.clone())
            .await
            .map_err(store_failure)?;

        let cancelled_orders = if action == SessionAction::Stop {
            Some(self.orders.cancel_open_for_session(id).await)
        } else {
            None
        };

        info!(
            session_id = %id,
            user_id = caller,
            %action,
            from = %previous,
            to = %next,
            "session transition"
        );
        self.log_event(
            id,
            action.to_string(),
            json!({
                "from": previous,
                "to": next,
                "reason": &reason,
                "cancelled_orders": cancelled_orders,
            }),
        )
        .await;

        let kind = match action {
            SessionAction::Start => EventKind::SessionStart,
            SessionAction::Pause => EventKind::SessionPause,
            SessionAction::Resume => EventKind::SessionResume,
            SessionAction::Stop => EventKind::SessionStop,
        };
        self.publish(
            caller,
            kind,
            json!({
                "session_id": id,
                "status": next,
                "reason": reason,
                "cancelled_orders": cancelled_orders,
            }),
        )
        .await;
        Ok(session)
    }

    /// Settle a trade against the session: the only path that moves
    /// `current_capital` and the cumulative counters.
    pub async fn record_trade(
        &self,
        caller: i64,
        id: Uuid,
        settlement: TradeSettlement,
    ) -> Result<TradingSession, ControlError> {
        let mut session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        if !matches!(
            session.status,
            SessionStatus::Active | SessionStatus::Paused
        ) {
            return Err(ControlError::invalid_transition(
                session.status,
                "record_trade",
            ));
        }

        let trade = TradeRecord::from_settlement(id, settlement);
        self.trades
            .append(trade.clone())
            .await
            .map_err(store_failure)?;

        session.total_trades += 1;
        if trade.pnl > Decimal::ZERO {
            session.winning_trades += 1;
            session.max_profit = session.max_profit.max(trade.pnl);
        } else if trade.pnl < Decimal::ZERO {
            session.losing_trades += 1;
            session.max_loss = session.max_loss.min(trade.pnl);
        }
        session.total_pnl += trade.pnl;
        session.total_fees += trade.fees;
        session.current_capital += trade.pnl - trade.fees;
        session.peak_capital = session.peak_capital.max(session.current_capital);
        session.current_drawdown_pct = if session.peak_capital > Decimal::ZERO {
            (session.peak_capital - session.current_capital) / session.peak_capital
                * Decimal::from(100)
        } else {
            Decimal::ZERO
        };
        session.updated_at = OffsetDateTime::now_utc();
        self.sessions
            .update(session.clone())
            .await
            .map_err(store_failure)?;

        self.hub
            .broadcast_to_topic(
                &topics::trades(caller),
                Envelope::new(EventKind::TradeNotification, as_value(&trade)).for_user(caller),
            )
            .await;

        let ledger = self
            .trades
            .list_for_session(id)
            .await
            .map_err(store_failure)?;
        let performance = metrics::compute(&session, &ledger);
        self.publish(
            caller,
            EventKind::PerformanceUpdate,
            json!({ "session_id": id, "metrics": as_value(&performance) }),
        )
        .await;

        if session.risk.max_drawdown_pct > Decimal::ZERO
            && session.current_drawdown_pct >= session.risk.max_drawdown_pct
        {
            warn!(
                session_id = %id,
                drawdown = %session.current_drawdown_pct,
                limit = %session.risk.max_drawdown_pct,
                "session breached its drawdown limit"
            );
            self.hub
                .broadcast_to_topic(
                    &topics::alerts(caller),
                    Envelope::new(
                        EventKind::RiskAlert,
                        json!({
                            "session_id": id,
                            "current_drawdown_pct": session.current_drawdown_pct,
                            "max_drawdown_pct": session.risk.max_drawdown_pct,
                        }),
                    )
                    .for_user(caller),
                )
                .await;
        }
        Ok(session)
    }

    /// Derived performance figures, recomputed from the trade ledger.
    pub async fn performance(
        &self,
        caller: i64,
        id: Uuid,
    ) -> Result<PerformanceMetrics, ControlError> {
        let session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        let ledger = self
            .trades
            .list_for_session(id)
            .await
            .map_err(store_failure)?;
        Ok(metrics::compute(&session, &ledger))
    }

    /// Current drawdown versus the configured limits.
    pub async fn risk_report(&self, caller: i64, id: Uuid) -> Result<RiskReport, ControlError> {
        let session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        Ok(RiskReport {
            session_id: id,
            current_drawdown_pct: session.current_drawdown_pct,
            max_drawdown_pct: session.risk.max_drawdown_pct,
            drawdown_breached: session.risk.max_drawdown_pct > Decimal::ZERO
                && session.current_drawdown_pct >= session.risk.max_drawdown_pct,
            total_pnl: session.total_pnl,
            max_daily_loss: session.risk.max_daily_loss,
            max_position_size: session.risk.max_position_size,
            risk_per_trade_pct: session.risk.risk_per_trade_pct,
        })
    }

    /// The session's append-only event log.
    pub async fn logs(&self, caller: i64, id: Uuid) -> Result<Vec<SessionEvent>, ControlError> {
        let session = self.load(id).await?;
        ensure_owner(caller, session.user_id)?;
        self.events.list_for_session(id).await.map_err(store_failure)
    }

    /// End-of-run path used by the strategy runner when it finishes
    /// cleanly. Not reachable through the control actions.
    pub async fn mark_completed(&self, id: Uuid) -> Result<TradingSession, ControlError> {
        self.finish(id, SessionStatus::Completed, None).await
    }

    /// End-of-run path for an unrecoverable strategy error.
    pub async fn mark_terminated(
        &self,
        id: Uuid,
        reason: impl Into<String>,
    ) -> Result<TradingSession, ControlError> {
        self.finish(id, SessionStatus::Terminated, Some(reason.into()))
            .await
    }

    async fn finish(
        &self,
        id: Uuid,
        status: SessionStatus,
        reason: Option<String>,
    ) -> Result<TradingSession, ControlError> {
        let mut session = self.load(id).await?;
        if !matches!(
            session.status,
            SessionStatus::Active | SessionStatus::Paused
        ) {
            return Err(ControlError::invalid_transition(session.status, status));
        }

        let now = OffsetDateTime::now_utc();
        session.status = status;
        session.ended_at = Some(now);
        session.updated_at = now;
        session.error_message = reason.clone();
        self.sessions
            .update(session.clone())
            .await
            .map_err(store_failure)?;

        let cancelled_orders = self.orders.cancel_open_for_session(id).await;
        self.log_event(
            id,
            status.to_string(),
            json!({ "reason": &reason, "cancelled_orders": cancelled_orders }),
        )
        .await;
        self.publish(
            session.user_id,
            EventKind::SessionUpdate,
            json!({
                "session_id": id,
                "status": status,
                "reason": reason,
                "cancelled_orders": cancelled_orders,
            }),
        )
        .await;
        Ok(session)
    }

    async fn load(&self, id: Uuid) -> Result<TradingSession, ControlError> {
        self.sessions
            .load(id)
            .await
            .map_err(store_failure)?
            .ok_or(ControlError::NotFound("session"))
    }

    /// Audit-log append. Best-effort: the primary record is already
    /// persisted, so a log failure is reported but not surfaced.
    async fn log_event(&self, session_id: Uuid, kind: impl Into<String>, detail: serde_json::Value) {
        let event = SessionEvent::new(session_id, kind, detail);
        if let Err(err) = self.events.append(event).await {
            warn!(session_id = %session_id, error = %err, "failed to append session event");
        }
    }

    async fn publish(&self, user_id: i64, kind: EventKind, payload: serde_json::Value) {
        let envelope = Envelope::new(kind, payload).for_user(user_id);
        self.hub
            .broadcast_to_topic(&topics::sessions(user_id), envelope)
            .await;
    }
}

fn as_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}
