// =============================================================================
// Event Bus — bounded in-memory log of agent activity
// =============================================================================
//
// A single FIFO ring (default 500 entries) shared between the agent task and
// the HTTP surface. The UI reconstructs the agent's activity by polling the
// query endpoints; nothing is pushed.
//
// Locking: the ring mutex covers only append/eviction and queries. Listener
// callbacks run after the ring lock is released, from a snapshot of the
// listener list, so one slow listener cannot stall emitters beyond its own
// execution time. Listeners must not perform I/O.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::Severity;

/// Default ring capacity.
pub const DEFAULT_CAPACITY: usize = 500;

// =============================================================================
// Event model
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentStarted,
    AgentStopped,
    StateChanged,
    SimulationStarted,
    SimulationCompleted,
    VersionCreated,
    VersionActivated,
    OrderCreated,
    OrderClosed,
    BrainDecision,
    OptimizationStarted,
    OptimizationCompleted,
    Error,
    Info,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AgentStarted => "agent_started",
            Self::AgentStopped => "agent_stopped",
            Self::StateChanged => "state_changed",
            Self::SimulationStarted => "simulation_started",
            Self::SimulationCompleted => "simulation_completed",
            Self::VersionCreated => "version_created",
            Self::VersionActivated => "version_activated",
            Self::OrderCreated => "order_created",
            Self::OrderClosed => "order_closed",
            Self::BrainDecision => "brain_decision",
            Self::OptimizationStarted => "optimization_started",
            Self::OptimizationCompleted => "optimization_completed",
            Self::Error => "error",
            Self::Info => "info",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown event type: {s}"))
    }
}

/// One entry in the ring.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    pub data: serde_json::Value,
}

/// Aggregate counts over the current ring contents.
#[derive(Debug, Clone, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub by_type: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

type Listener = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

// =============================================================================
// EventBus
// =============================================================================

pub struct EventBus {
    capacity: usize,
    ring: Mutex<VecDeque<AgentEvent>>,
    listeners: Mutex<Vec<Listener>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Append an event, evicting the oldest entry past capacity, then notify
    /// listeners outside the ring lock.
    pub fn emit(
        &self,
        event_type: EventType,
        message: impl Into<String>,
        data: serde_json::Value,
        severity: Severity,
    ) -> AgentEvent {
        let event = AgentEvent {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            event_type,
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            data,
        };

        {
            let mut ring = self.ring.lock();
            ring.push_back(event.clone());
            while ring.len() > self.capacity {
                ring.pop_front();
            }
        }

        match severity {
            Severity::Error => error!(event = %event_type, "{}", event.message),
            Severity::Warning => warn!(event = %event_type, "{}", event.message),
            _ => info!(event = %event_type, "{}", event.message),
        }

        let snapshot: Vec<Listener> = self.listeners.lock().clone();
        for listener in snapshot {
            listener(&event);
        }

        event
    }

    pub fn add_listener(&self, listener: impl Fn(&AgentEvent) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Most-recent-first slice of the ring, optionally filtered.
    pub fn get(
        &self,
        limit: usize,
        event_type: Option<EventType>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AgentEvent> {
        let ring = self.ring.lock();
        ring.iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .filter(|e| since.map_or(true, |s| e.timestamp > s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// The latest `count` events, newest first.
    pub fn latest(&self, count: usize) -> Vec<AgentEvent> {
        let ring = self.ring.lock();
        ring.iter().rev().take(count).cloned().collect()
    }

    pub fn stats(&self) -> EventStats {
        let ring = self.ring.lock();
        let mut by_type: HashMap<String, usize> = HashMap::new();
        let mut by_severity: HashMap<String, usize> = HashMap::new();
        for e in ring.iter() {
            *by_type.entry(e.event_type.to_string()).or_default() += 1;
            *by_severity.entry(e.severity.to_string()).or_default() += 1;
        }
        EventStats {
            total_events: ring.len(),
            by_type,
            by_severity,
            oldest: ring.front().map(|e| e.timestamp),
            newest: ring.back().map(|e| e.timestamp),
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    // -------------------------------------------------------------------------
    // Lifecycle emitters
    // -------------------------------------------------------------------------

    pub fn agent_started(&self, agent_id: &str, symbol: &str, capital: f64) {
        self.emit(
            EventType::AgentStarted,
            format!("Agent {agent_id} started for {symbol}"),
            serde_json::json!({
                "agent_id": agent_id,
                "symbol": symbol,
                "initial_capital": capital,
            }),
            Severity::Success,
        );
    }

    pub fn agent_stopped(&self, agent_id: &str) {
        self.emit(
            EventType::AgentStopped,
            format!("Agent {agent_id} stopped"),
            serde_json::json!({ "agent_id": agent_id }),
            Severity::Info,
        );
    }

    pub fn state_changed(&self, agent_id: &str, old_state: &str, new_state: &str) {
        self.emit(
            EventType::StateChanged,
            format!("State changed: {old_state} -> {new_state}"),
            serde_json::json!({
                "agent_id": agent_id,
                "old_state": old_state,
                "new_state": new_state,
            }),
            Severity::Info,
        );
    }

    pub fn simulation_started(&self, agent_id: &str, duration_s: u64, version_name: &str) {
        self.emit(
            EventType::SimulationStarted,
            format!("Simulation started ({duration_s}s) with {version_name}"),
            serde_json::json!({
                "agent_id": agent_id,
                "duration": duration_s,
                "version": version_name,
            }),
            Severity::Info,
        );
    }

    pub fn simulation_completed(
        &self,
        agent_id: &str,
        version_name: &str,
        winrate: f64,
        pnl_percent: f64,
        trades: u64,
    ) {
        let severity = if winrate >= 60.0 {
            Severity::Success
        } else if winrate >= 40.0 {
            Severity::Warning
        } else {
            Severity::Error
        };
        self.emit(
            EventType::SimulationCompleted,
            format!(
                "Simulation completed: {winrate:.1}% winrate, {pnl_percent:+.2}% P&L ({trades} trades)"
            ),
            serde_json::json!({
                "agent_id": agent_id,
                "version": version_name,
                "winrate": winrate,
                "pnl_percent": pnl_percent,
                "trades": trades,
            }),
            severity,
        );
    }

    pub fn version_created(&self, agent_id: &str, version_name: &str, changes: &[String]) {
        self.emit(
            EventType::VersionCreated,
            format!("New version created: {version_name}"),
            serde_json::json!({
                "agent_id": agent_id,
                "version": version_name,
                "changes": changes,
            }),
            Severity::Success,
        );
    }

    pub fn version_activated(&self, agent_id: &str, version_name: &str) {
        self.emit(
            EventType::VersionActivated,
            format!("Version activated: {version_name}"),
            serde_json::json!({ "agent_id": agent_id, "version": version_name }),
            Severity::Success,
        );
    }

    pub fn brain_decision(&self, agent_id: &str, decision: &str, reasoning: &str, confidence: f64) {
        self.emit(
            EventType::BrainDecision,
            format!("Decision: {decision} (confidence {:.0}%)", confidence * 100.0),
            serde_json::json!({
                "agent_id": agent_id,
                "decision": decision,
                "reasoning": reasoning,
                "confidence": confidence,
            }),
            Severity::Info,
        );
    }

    pub fn order_created(&self, agent_id: &str, order_id: &str, side: &str, price: f64, qty: f64) {
        self.emit(
            EventType::OrderCreated,
            format!("Order {}: {qty:.6} @ ${price:.2}", side.to_uppercase()),
            serde_json::json!({
                "agent_id": agent_id,
                "order_id": order_id,
                "side": side,
                "price": price,
                "quantity": qty,
            }),
            Severity::Info,
        );
    }

    pub fn order_closed(&self, agent_id: &str, order_id: &str, pnl: f64, pnl_percent: f64) {
        let severity = if pnl >= 0.0 {
            Severity::Success
        } else {
            Severity::Error
        };
        self.emit(
            EventType::OrderClosed,
            format!("Order closed: {pnl:+.4} ({pnl_percent:+.2}%)"),
            serde_json::json!({
                "agent_id": agent_id,
                "order_id": order_id,
                "pnl": pnl,
                "pnl_percent": pnl_percent,
            }),
            severity,
        );
    }

    pub fn agent_error(&self, agent_id: &str, message: &str) {
        self.emit(
            EventType::Error,
            format!("Error: {message}"),
            serde_json::json!({ "agent_id": agent_id, "error": message }),
            Severity::Error,
        );
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn ring_caps_at_capacity_fifo() {
        let bus = EventBus::default();
        for i in 0..600 {
            bus.emit(
                EventType::Info,
                format!("event {i}"),
                serde_json::json!({ "n": i }),
                Severity::Info,
            );
        }
        assert_eq!(bus.len(), 500);
        // The newest entry is number 599; the oldest surviving one is 100.
        let newest = bus.latest(1);
        assert_eq!(newest[0].message, "event 599");
        let all = bus.get(500, None, None);
        assert_eq!(all.last().unwrap().message, "event 100");
    }

    #[test]
    fn get_returns_most_recent_first() {
        let bus = EventBus::new(10);
        bus.emit(EventType::Info, "a", serde_json::Value::Null, Severity::Info);
        bus.emit(EventType::Info, "b", serde_json::Value::Null, Severity::Info);
        let events = bus.get(10, None, None);
        assert_eq!(events[0].message, "b");
        assert_eq!(events[1].message, "a");
    }

    #[test]
    fn type_filter_applies() {
        let bus = EventBus::new(10);
        bus.emit(EventType::Info, "a", serde_json::Value::Null, Severity::Info);
        bus.emit(
            EventType::OrderCreated,
            "b",
            serde_json::Value::Null,
            Severity::Info,
        );
        let only_orders = bus.get(10, Some(EventType::OrderCreated), None);
        assert_eq!(only_orders.len(), 1);
        assert_eq!(only_orders[0].message, "b");
    }

    #[test]
    fn since_filter_applies() {
        let bus = EventBus::new(10);
        bus.emit(EventType::Info, "old", serde_json::Value::Null, Severity::Info);
        let cutoff = Utc::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        bus.emit(EventType::Info, "new", serde_json::Value::Null, Severity::Info);
        let recent = bus.get(10, None, Some(cutoff));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].message, "new");
    }

    #[test]
    fn stats_count_by_type_and_severity() {
        let bus = EventBus::new(10);
        bus.emit(EventType::Info, "a", serde_json::Value::Null, Severity::Info);
        bus.emit(EventType::Error, "b", serde_json::Value::Null, Severity::Error);
        bus.emit(EventType::Error, "c", serde_json::Value::Null, Severity::Error);
        let stats = bus.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.by_type.get("error"), Some(&2));
        assert_eq!(stats.by_severity.get("info"), Some(&1));
        assert!(stats.oldest.unwrap() <= stats.newest.unwrap());
    }

    #[test]
    fn clear_empties_the_ring() {
        let bus = EventBus::new(10);
        bus.emit(EventType::Info, "a", serde_json::Value::Null, Severity::Info);
        bus.clear();
        assert!(bus.is_empty());
    }

    #[test]
    fn listeners_observe_every_emit() {
        let bus = EventBus::new(10);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.add_listener(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(EventType::Info, "a", serde_json::Value::Null, Severity::Info);
        bus.emit(EventType::Info, "b", serde_json::Value::Null, Severity::Info);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn event_type_round_trips_from_str() {
        let t: EventType = "simulation_completed".parse().unwrap();
        assert_eq!(t, EventType::SimulationCompleted);
        assert!("nonsense".parse::<EventType>().is_err());
    }
}
