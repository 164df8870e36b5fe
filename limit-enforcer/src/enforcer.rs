//! Cap evaluation and enforced ledger mutations

use crate::{
    error::{Denial, DenyReason},
    rules::{ActionType, LimitRule, LimitsConfig},
    usage::{counter_key, Period, Usage, UsageCounter},
    Error, Result,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use points_ledger::{storage, Ledger, LedgerEntry, Storage, Table, UserId, WriteSet};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of a cap evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Within every cap
    Allow,
    /// A cap would be exceeded
    Deny(Denial),
}

impl Decision {
    /// Whether the action may proceed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Limit enforcer over the ledger's store
#[derive(Debug)]
pub struct LimitEnforcer {
    ledger: Arc<Ledger>,
    rules: DashMap<ActionType, LimitRule>,
}

impl LimitEnforcer {
    /// Load stored rules, seeding any action the store has no rule for from `config`
    pub fn open(ledger: Arc<Ledger>, config: &LimitsConfig) -> Result<Self> {
        config.validate()?;

        let rules = DashMap::new();
        ledger
            .storage()
            .visit_prefix(Table::LimitRules, &[], false, |_, value| {
                let rule: LimitRule = storage::decode(value)?;
                rules.insert(rule.action, rule);
                Ok(true)
            })?;

        let enforcer = Self { ledger, rules };
        for rule in &config.rules {
            if !enforcer.rules.contains_key(&rule.action) {
                enforcer.set_rule(rule.clone())?;
            }
        }

        tracing::info!(rules = enforcer.rules.len(), "Limit enforcer ready");
        Ok(enforcer)
    }

    /// Ledger the enforcer posts through
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Active rule for an action
    pub fn rule(&self, action: ActionType) -> Option<LimitRule> {
        self.rules.get(&action).map(|r| r.value().clone())
    }

    /// Every active rule, ordered by action
    pub fn rules(&self) -> Vec<LimitRule> {
        let mut rules: Vec<LimitRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        rules.sort_by_key(|r| r.action);
        rules
    }

    /// Insert or replace a rule (administrative)
    pub fn set_rule(&self, rule: LimitRule) -> Result<()> {
        rule.validate()?;

        let storage = self.ledger.storage();
        let mut ws = storage.write_set();
        ws.put(Table::LimitRules, rule.action.as_str().as_bytes(), &rule)?;
        storage.commit(ws)?;

        tracing::info!(
            action = %rule.action,
            daily_cap = ?rule.daily_cap,
            weekly_cap = ?rule.weekly_cap,
            "Limit rule set"
        );
        self.rules.insert(rule.action, rule);
        Ok(())
    }

    /// Drop the rule for an action; returns whether one existed
    pub fn remove_rule(&self, action: ActionType) -> Result<bool> {
        let storage = self.ledger.storage();
        let mut ws = storage.write_set();
        ws.delete(Table::LimitRules, action.as_str().as_bytes())?;
        storage.commit(ws)?;

        let existed = self.rules.remove(&action).is_some();
        if existed {
            tracing::info!(action = %action, "Limit rule removed");
        }
        Ok(existed)
    }

    /// Read-only pre-flight. Concurrent callers may both see `Allow`;
    /// the enforced mutations re-evaluate under the user's lock.
    pub fn check(
        &self,
        user_id: &UserId,
        action: ActionType,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<Decision> {
        let Some(rule) = self.rule(action) else {
            return Ok(Decision::Allow);
        };
        let storage = self.ledger.storage();
        let today = read_counter(storage, user_id, action, Period::Day, now)?;
        let week = read_counter(storage, user_id, action, Period::Week, now)?;
        Ok(evaluate(&rule, today, week, amount))
    }

    /// Evaluate and record an action inside a ledger atomic unit.
    ///
    /// Must run from a staging closure, which holds the user's ledger lock.
    pub fn stage(
        &self,
        ws: &mut WriteSet<'_>,
        user_id: &UserId,
        action: ActionType,
        amount: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let storage = ws.storage();
        let today = read_counter(storage, user_id, action, Period::Day, now)?;
        let week = read_counter(storage, user_id, action, Period::Week, now)?;

        if let Some(rule) = self.rule(action) {
            if let Decision::Deny(denial) = evaluate(&rule, today, week, amount) {
                tracing::info!(
                    user_id = %user_id,
                    action = %action,
                    cap = denial.cap,
                    used = denial.used,
                    "Action denied by limit"
                );
                return Err(Error::Denied(denial));
            }
        }

        ws.put(
            Table::LimitUsage,
            &counter_key(user_id, action, Period::Day, now),
            &today.bumped(amount),
        )?;
        ws.put(
            Table::LimitUsage,
            &counter_key(user_id, action, Period::Week, now),
            &week.bumped(amount),
        )?;
        Ok(())
    }

    /// Earn for a rate-limited action; cap check and counters commit with the entry
    pub fn earn(
        &self,
        user_id: &UserId,
        action: ActionType,
        amount: u64,
        description: &str,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        let now = Utc::now();
        self.ledger
            .earn_with(user_id, amount, description, reference, |ws| {
                self.stage(ws, user_id, action, amount, now)
            })
    }

    /// Spend for a rate-limited action; cap check and counters commit with the entry
    pub fn spend(
        &self,
        user_id: &UserId,
        action: ActionType,
        amount: u64,
        description: &str,
        reference: Option<&str>,
    ) -> Result<LedgerEntry> {
        let now = Utc::now();
        self.ledger
            .spend_with(user_id, amount, description, reference, |ws| {
                self.stage(ws, user_id, action, amount, now)
            })
    }

    /// Consumption in the periods containing `now`
    pub fn usage(&self, user_id: &UserId, action: ActionType, now: DateTime<Utc>) -> Result<Usage> {
        let storage = self.ledger.storage();
        let rule = self.rule(action);
        Ok(Usage {
            action,
            today: read_counter(storage, user_id, action, Period::Day, now)?,
            this_week: read_counter(storage, user_id, action, Period::Week, now)?,
            measure: rule.as_ref().map(|r| r.measure),
            daily_cap: rule.as_ref().and_then(|r| r.daily_cap),
            weekly_cap: rule.as_ref().and_then(|r| r.weekly_cap),
        })
    }
}

fn read_counter(
    storage: &Storage,
    user_id: &UserId,
    action: ActionType,
    period: Period,
    now: DateTime<Utc>,
) -> Result<UsageCounter> {
    Ok(storage
        .get::<UsageCounter>(Table::LimitUsage, &counter_key(user_id, action, period, now))?
        .unwrap_or_default())
}

/// Daily cap is checked before weekly
fn evaluate(rule: &LimitRule, today: UsageCounter, week: UsageCounter, amount: u64) -> Decision {
    let requested = rule.increment(amount);
    let checks = [
        (rule.daily_cap, today, DenyReason::DailyCapExceeded),
        (rule.weekly_cap, week, DenyReason::WeeklyCapExceeded),
    ];

    for (cap, counter, reason) in checks {
        let Some(cap) = cap else { continue };
        let used = counter.measured(rule.measure);
        if used.saturating_add(requested) > cap {
            return Decision::Deny(Denial {
                action: rule.action,
                reason,
                cap,
                used,
                requested,
            });
        }
    }
    Decision::Allow
}
