//! Limit enforcer against a real store

use chrono::{Duration, TimeZone, Utc};
use limit_enforcer::{
    ActionType, CapMeasure, Decision, DenyReason, Error, LimitEnforcer, LimitRule, LimitsConfig,
};
use points_ledger::{Config, Ledger, UserId};
use proptest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn open_enforcer(rules: Vec<LimitRule>) -> (LimitEnforcer, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(temp_dir.path());
    config.sync_writes = false;
    let ledger = Arc::new(Ledger::open(&config).unwrap());
    let enforcer = LimitEnforcer::open(ledger, &LimitsConfig { rules }).unwrap();
    (enforcer, temp_dir)
}

#[test]
fn sixth_letter_reward_denied_same_day() {
    let (enforcer, _temp) = open_enforcer(vec![LimitRule::daily_count(ActionType::ReceiveLetter, 5)]);
    let user = UserId::new("penpal");

    for i in 0..5 {
        enforcer
            .earn(&user, ActionType::ReceiveLetter, 10, "letter received", Some(format!("letter-{}", i).as_str()))
            .unwrap();
    }

    let err = enforcer
        .earn(&user, ActionType::ReceiveLetter, 10, "letter received", Some("letter-5"))
        .unwrap_err();
    let denial = err.denial().expect("cap denial");
    assert_eq!(denial.reason, DenyReason::DailyCapExceeded);
    assert_eq!(denial.cap, 5);
    assert_eq!(denial.used, 5);

    let balance = enforcer.ledger().balance(&user).unwrap();
    assert_eq!(balance.available(), 50);
    assert_eq!(balance.entry_count(), 5);

    let usage = enforcer.usage(&user, ActionType::ReceiveLetter, Utc::now()).unwrap();
    assert_eq!(usage.today.count, 5);
    assert_eq!(usage.remaining_today(), Some(0));
}

#[test]
fn other_actions_and_users_unaffected() {
    let (enforcer, _temp) = open_enforcer(vec![LimitRule::daily_count(ActionType::ReceiveLetter, 1)]);
    let alice = UserId::new("alice");
    let bob = UserId::new("bob");

    enforcer.earn(&alice, ActionType::ReceiveLetter, 1, "letter", None).unwrap();
    assert!(enforcer.earn(&alice, ActionType::ReceiveLetter, 1, "letter", None).is_err());

    enforcer.earn(&alice, ActionType::SendLetter, 1, "letter sent", None).unwrap();
    enforcer.earn(&bob, ActionType::ReceiveLetter, 1, "letter", None).unwrap();
}

#[test]
fn check_is_read_only() {
    let (enforcer, _temp) = open_enforcer(vec![LimitRule::daily_count(ActionType::SendLetter, 1)]);
    let user = UserId::new("reader");
    let now = Utc::now();

    for _ in 0..3 {
        assert_eq!(
            enforcer.check(&user, ActionType::SendLetter, 1, now).unwrap(),
            Decision::Allow
        );
    }
    assert_eq!(enforcer.usage(&user, ActionType::SendLetter, now).unwrap().today.count, 0);
}

#[test]
fn counters_reset_on_next_day_but_not_next_week() {
    let rule = LimitRule {
        action: ActionType::ShopPurchase,
        measure: CapMeasure::Amount,
        daily_cap: Some(100),
        weekly_cap: Some(150),
    };
    let (enforcer, _temp) = open_enforcer(vec![rule]);
    let user = UserId::new("shopper");
    enforcer.ledger().earn(&user, 1_000, "seed", None).unwrap();

    // Monday and Tuesday of the same ISO week
    let monday = Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap();
    let tuesday = monday + Duration::days(1);

    let storage = enforcer.ledger().storage().clone();
    let mut ws = storage.write_set();
    enforcer.stage(&mut ws, &user, ActionType::ShopPurchase, 100, monday).unwrap();
    storage.commit(ws).unwrap();

    match enforcer.check(&user, ActionType::ShopPurchase, 1, monday).unwrap() {
        Decision::Deny(denial) => assert_eq!(denial.reason, DenyReason::DailyCapExceeded),
        Decision::Allow => panic!("daily cap should be reached"),
    }

    assert!(enforcer.check(&user, ActionType::ShopPurchase, 50, tuesday).unwrap().is_allowed());
    match enforcer.check(&user, ActionType::ShopPurchase, 51, tuesday).unwrap() {
        Decision::Deny(denial) => assert_eq!(denial.reason, DenyReason::WeeklyCapExceeded),
        Decision::Allow => panic!("weekly cap should be reached"),
    }
}

#[test]
fn enforced_spend_respects_balance_and_cap() {
    let rule = LimitRule {
        action: ActionType::ShopPurchase,
        measure: CapMeasure::Amount,
        daily_cap: Some(30),
        weekly_cap: None,
    };
    let (enforcer, _temp) = open_enforcer(vec![rule]);
    let user = UserId::new("buyer");
    enforcer.ledger().earn(&user, 100, "seed", None).unwrap();

    enforcer.spend(&user, ActionType::ShopPurchase, 20, "stamp", Some("order-1")).unwrap();
    let err = enforcer
        .spend(&user, ActionType::ShopPurchase, 20, "stamp", Some("order-2"))
        .unwrap_err();
    assert!(matches!(err, Error::Denied(_)));

    // A refused spend does not consume the cap
    let err = enforcer
        .spend(&UserId::new("broke"), ActionType::ShopPurchase, 5, "stamp", None)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Ledger(points_ledger::Error::InsufficientBalance { .. })
    ));
    let usage = enforcer
        .usage(&UserId::new("broke"), ActionType::ShopPurchase, Utc::now())
        .unwrap();
    assert_eq!(usage.today.amount, 0);
}

#[test]
fn rules_persist_and_config_does_not_override_admin_changes() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_dir(temp_dir.path());
    let seeded = LimitsConfig {
        rules: vec![LimitRule::daily_count(ActionType::SendLetter, 3)],
    };

    {
        let ledger = Arc::new(Ledger::open(&config).unwrap());
        let enforcer = LimitEnforcer::open(ledger, &seeded).unwrap();
        enforcer
            .set_rule(LimitRule::daily_count(ActionType::SendLetter, 10))
            .unwrap();
        enforcer
            .set_rule(LimitRule::daily_count(ActionType::TransferSend, 2))
            .unwrap();
        assert!(enforcer.remove_rule(ActionType::TransferSend).unwrap());
        assert!(!enforcer.remove_rule(ActionType::TransferSend).unwrap());
    }

    let ledger = Arc::new(Ledger::open(&config).unwrap());
    let enforcer = LimitEnforcer::open(ledger, &seeded).unwrap();
    let rules = enforcer.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].daily_cap, Some(10));
}

#[test]
fn concurrent_earns_never_exceed_cap() {
    let (enforcer, _temp) = open_enforcer(vec![LimitRule::daily_count(ActionType::ReceiveLetter, 3)]);
    let enforcer = Arc::new(enforcer);
    let user = UserId::new("popular");

    let threads = 12;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let enforcer = enforcer.clone();
            let barrier = barrier.clone();
            let user = user.clone();
            thread::spawn(move || {
                barrier.wait();
                enforcer.earn(&user, ActionType::ReceiveLetter, 1, "letter", None)
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.is_ok())
        .count();
    assert_eq!(granted, 3);
    assert_eq!(enforcer.ledger().balance(&user).unwrap().available(), 3);
}

#[test]
fn unknown_config_keys_rejected() {
    let raw = r#"
        [[rules]]
        action = "receive_letter"
        daily_cap = 5
        hourly_cap = 1
    "#;
    assert!(toml::from_str::<LimitsConfig>(raw).is_err());

    let raw = r#"
        [[rules]]
        action = "send_letter"
        measure = "amount"
        weekly_cap = 70
    "#;
    let config: LimitsConfig = toml::from_str(raw).unwrap();
    assert_eq!(config.rules[0].measure, CapMeasure::Amount);
    assert_eq!(config.rules[0].daily_cap, None);

    let raw = r#"
        [[rules]]
        action = "post_comment"
    "#;
    assert!(toml::from_str::<LimitsConfig>(raw).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: granted amount never exceeds the daily amount cap
    #[test]
    fn prop_amount_cap_holds(cap in 1u64..200, amounts in prop::collection::vec(1u64..60, 1..20)) {
        let rule = LimitRule {
            action: ActionType::TransferSend,
            measure: CapMeasure::Amount,
            daily_cap: Some(cap),
            weekly_cap: None,
        };
        let (enforcer, _temp) = open_enforcer(vec![rule]);
        let user = UserId::new("sender");

        let mut granted = 0u64;
        for amount in amounts {
            match enforcer.earn(&user, ActionType::TransferSend, amount, "earn", None) {
                Ok(_) => granted += amount,
                Err(Error::Denied(denial)) => {
                    prop_assert!(denial.used + amount > cap);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
        prop_assert!(granted <= cap);
    }
}
