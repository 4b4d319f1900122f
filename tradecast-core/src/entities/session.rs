//! Trading session entity and its state machine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Session lifecycle state.
///
/// `Completed` and `Terminated` are reachable only through the
/// controller's end-of-run paths, never through a control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Stopped,
    Completed,
    Terminated,
}

impl SessionStatus {
    /// True for states that admit no further control actions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Terminated)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Completed => "completed",
            SessionStatus::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// A control action requested against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl std::fmt::Display for SessionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionAction::Start => "start",
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// The transition table. Returns the new state, or `None` when the
/// action is not legal from `current`, in which case the controller
/// performs no mutation at all.
pub fn transition(current: SessionStatus, action: SessionAction) -> Option<SessionStatus> {
    use SessionAction::*;
    use SessionStatus::*;
    match (current, action) {
        (Created | Stopped, Start) => Some(Active),
        (Active, Pause) => Some(Paused),
        (Paused, Resume) => Some(Active),
        (Active | Paused, Stop) => Some(Stopped),
        _ => None,
    }
}

/// Per-session risk limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum drawdown from peak capital, in percent.
    pub max_drawdown_pct: Decimal,
    /// Maximum loss allowed within one trading day.
    pub max_daily_loss: Decimal,
    /// Largest position size a single order may open.
    pub max_position_size: Decimal,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub risk_per_trade_pct: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_drawdown_pct: Decimal::from(20),
            max_daily_loss: Decimal::ZERO,
            max_position_size: Decimal::ZERO,
            stop_loss_pct: Decimal::from(2),
            take_profit_pct: Decimal::from(4),
            risk_per_trade_pct: Decimal::ONE,
        }
    }
}

/// A bounded trading run with its own capital, risk limits and
/// aggregate performance counters.
///
/// The session controller is the sole writer of `status` and the
/// aggregate counters; `current_capital` moves only through trade
/// settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSession {
    pub id: Uuid,
    pub user_id: i64,
    pub strategy: String,
    pub name: String,
    pub simulated: bool,
    pub tags: Vec<String>,

    pub status: SessionStatus,
    pub initial_capital: Decimal,
    pub current_capital: Decimal,
    /// Highest capital observed so far; feeds drawdown tracking.
    pub peak_capital: Decimal,

    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    /// Largest single-trade profit (>= 0).
    pub max_profit: Decimal,
    /// Largest single-trade loss (<= 0).
    pub max_loss: Decimal,
    /// Current drawdown from peak capital, in percent.
    pub current_drawdown_pct: Decimal,

    pub risk: RiskConfig,
    pub params: HashMap<String, serde_json::Value>,

    #[serde(with = "time::serde::timestamp")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::timestamp::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::timestamp::option")]
    pub ended_at: Option<OffsetDateTime>,
    /// Reason recorded when the session reaches `Terminated`.
    pub error_message: Option<String>,
}

/// Fields supplied when creating a session.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub name: String,
    pub strategy: String,
    #[serde(default)]
    pub simulated: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub initial_capital: Decimal,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Fields that may change after creation (only while not Active).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub tags: Option<Vec<String>>,
    pub risk: Option<RiskConfig>,
    pub params: Option<HashMap<String, serde_json::Value>>,
}

impl TradingSession {
    /// Construct a session in the `Created` state.
    pub fn create(user_id: i64, new: NewSession) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            user_id,
            strategy: new.strategy,
            name: new.name,
            simulated: new.simulated,
            tags: new.tags,
            status: SessionStatus::Created,
            initial_capital: new.initial_capital,
            current_capital: new.initial_capital,
            peak_capital: new.initial_capital,
            total_trades: 0,
            winning_trades: 0,
            losing_trades: 0,
            total_pnl: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            max_profit: Decimal::ZERO,
            max_loss: Decimal::ZERO,
            current_drawdown_pct: Decimal::ZERO,
            risk: new.risk,
            params: new.params,
            created_at: now,
            updated_at: now,
            started_at: None,
            ended_at: None,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SessionStatus; 6] = [
        SessionStatus::Created,
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Stopped,
        SessionStatus::Completed,
        SessionStatus::Terminated,
    ];
    const ALL_ACTIONS: [SessionAction; 4] = [
        SessionAction::Start,
        SessionAction::Pause,
        SessionAction::Resume,
        SessionAction::Stop,
    ];

    #[test]
    fn transition_table_matches_the_allowed_pairs() {
        assert_eq!(
            transition(SessionStatus::Created, SessionAction::Start),
            Some(SessionStatus::Active)
        );
        assert_eq!(
            transition(SessionStatus::Stopped, SessionAction::Start),
            Some(SessionStatus::Active)
        );
        assert_eq!(
            transition(SessionStatus::Active, SessionAction::Pause),
            Some(SessionStatus::Paused)
        );
        assert_eq!(
            transition(SessionStatus::Paused, SessionAction::Resume),
            Some(SessionStatus::Active)
        );
        assert_eq!(
            transition(SessionStatus::Active, SessionAction::Stop),
            Some(SessionStatus::Stopped)
        );
        assert_eq!(
            transition(SessionStatus::Paused, SessionAction::Stop),
            Some(SessionStatus::Stopped)
        );
    }

    #[test]
    fn every_pair_outside_the_table_is_rejected() {
        let allowed = [
            (SessionStatus::Created, SessionAction::Start),
            (SessionStatus::Stopped, SessionAction::Start),
            (SessionStatus::Active, SessionAction::Pause),
            (SessionStatus::Paused, SessionAction::Resume),
            (SessionStatus::Active, SessionAction::Stop),
            (SessionStatus::Paused, SessionAction::Stop),
        ];
        for state in ALL_STATES {
            for action in ALL_ACTIONS {
                let expected = allowed.contains(&(state, action));
                assert_eq!(
                    transition(state, action).is_some(),
                    expected,
                    "({state}, {action})"
                );
            }
        }
    }

    #[test]
    fn terminal_states_admit_no_actions() {
        for state in [SessionStatus::Completed, SessionStatus::Terminated] {
            for action in ALL_ACTIONS {
                assert_eq!(transition(state, action), None);
            }
        }
    }

    #[test]
    fn create_seeds_capital_and_counters() {
        let session = TradingSession::create(
            1,
            NewSession {
                name: "btc momentum".into(),
                strategy: "momentum".into(),
                simulated: true,
                tags: vec!["test".into()],
                initial_capital: Decimal::from(10_000),
                risk: RiskConfig::default(),
                params: HashMap::new(),
            },
        );
        assert_eq!(session.status, SessionStatus::Created);
        assert_eq!(session.current_capital, Decimal::from(10_000));
        assert_eq!(session.peak_capital, Decimal::from(10_000));
        assert_eq!(session.total_trades, 0);
        assert!(session.started_at.is_none());
    }
}
