//! Alert creation, storage, and acknowledgement
//!
//! Alerts are append-only: the acknowledged flag is the only mutable field,
//! and records are aged out by the retention window rather than deleted.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::info;

use crate::config::AlertConfig;
use crate::error::{RiskError, RiskResult};
use crate::{Alert, AlertType, Severity, Symbol};

pub struct AlertManager {
    config: AlertConfig,
    alerts: Vec<Alert>,
    next_id: u64,
    /// Last emission time per (type, symbol) for duplicate suppression.
    last_emitted: HashMap<(AlertType, Option<Symbol>), DateTime<Utc>>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        AlertManager {
            config,
            alerts: Vec::new(),
            next_id: 1,
            last_emitted: HashMap::new(),
        }
    }

    /// Create and store a new alert. Returns None when an identical
    /// unacknowledged (type, symbol) alert was raised within the cool-down.
    pub fn create(
        &mut self,
        alert_type: AlertType,
        severity: Severity,
        symbol: Option<Symbol>,
        message: impl Into<String>,
    ) -> Option<Alert> {
        let now = Utc::now();
        let key = (alert_type, symbol.clone());

        if let Some(last) = self.last_emitted.get(&key) {
            let cooldown = Duration::seconds(self.config.cooldown_secs as i64);
            let unacked_duplicate = self
                .alerts
                .iter()
                .any(|a| a.alert_type == alert_type && a.symbol == symbol && !a.acknowledged);
            if now - *last < cooldown && unacked_duplicate {
                return None;
            }
        }

        let alert = Alert {
            id: self.next_id,
            alert_type,
            severity,
            symbol,
            message: message.into(),
            timestamp: now,
            acknowledged: false,
        };
        self.next_id += 1;
        self.last_emitted.insert(key, now);

        info!(
            "Alert #{} [{:?}/{:?}] {}",
            alert.id, alert.alert_type, alert.severity, alert.message
        );

        self.alerts.push(alert.clone());
        Some(alert)
    }

    /// Mark an alert acknowledged.
    pub fn acknowledge(&mut self, id: u64) -> RiskResult<()> {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.acknowledged = true;
                Ok(())
            }
            None => Err(RiskError::NotFound(id)),
        }
    }

    /// All unacknowledged alerts younger than the retention window.
    pub fn active(&mut self) -> Vec<Alert> {
        self.prune();
        self.alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect()
    }

    /// Every stored alert, acknowledged or not, still within retention.
    pub fn all(&mut self) -> Vec<Alert> {
        self.prune();
        self.alerts.clone()
    }

    fn prune(&mut self) {
        let cutoff = Utc::now() - Duration::seconds(self.config.retention_secs as i64);
        self.alerts.retain(|a| a.timestamp >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AlertManager {
        AlertManager::new(AlertConfig::default())
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut mgr = manager();
        let a = mgr
            .create(AlertType::LimitBreach, Severity::High, None, "var breach")
            .unwrap();
        let b = mgr
            .create(AlertType::Volatility, Severity::Low, None, "vol elevated")
            .unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_acknowledge_unknown_id() {
        let mut mgr = manager();
        assert!(matches!(mgr.acknowledge(99), Err(RiskError::NotFound(99))));
    }

    #[test]
    fn test_acknowledged_alerts_leave_active_set() {
        let mut mgr = manager();
        let alert = mgr
            .create(AlertType::LimitBreach, Severity::High, None, "breach")
            .unwrap();
        assert_eq!(mgr.active().len(), 1);

        mgr.acknowledge(alert.id).unwrap();
        assert!(mgr.active().is_empty());
    }

    #[test]
    fn test_duplicate_suppression_within_cooldown() {
        let mut mgr = manager();
        let sym = Some(Symbol::new("AAPL"));
        assert!(mgr
            .create(AlertType::LimitBreach, Severity::High, sym.clone(), "breach")
            .is_some());
        // Same (type, symbol) again, immediately: suppressed.
        assert!(mgr
            .create(AlertType::LimitBreach, Severity::High, sym.clone(), "breach")
            .is_none());
        // Different symbol is unaffected.
        assert!(mgr
            .create(
                AlertType::LimitBreach,
                Severity::High,
                Some(Symbol::new("MSFT")),
                "breach"
            )
            .is_some());
    }

    #[test]
    fn test_duplicate_allowed_after_acknowledge() {
        let mut mgr = manager();
        let alert = mgr
            .create(AlertType::LimitBreach, Severity::High, None, "breach")
            .unwrap();
        mgr.acknowledge(alert.id).unwrap();
        // No unacknowledged duplicate remains, so the alert re-raises.
        assert!(mgr
            .create(AlertType::LimitBreach, Severity::High, None, "breach")
            .is_some());
    }
}
