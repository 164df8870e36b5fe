//! Transfer workflow against a real store

use chrono::{Duration, Utc};
use limit_enforcer::{ActionType, CapMeasure, LimitEnforcer, LimitRule, LimitsConfig};
use points_ledger::{Config, Direction, Ledger, Page, Table, UserId};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use transfer_engine::{
    Actor, BatchOutcome, BatchRecipient, BatchStatus, BatchTrigger, CreateTransfer, Error,
    ExpirationBatch, ExpirationScheduler, FeePolicy, SchedulerConfig, TransferConfig, TransferEngine,
    TransferStatus, TransferType,
};

fn open_engine(rules: Vec<LimitRule>) -> (Arc<TransferEngine>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(temp_dir.path());
    config.sync_writes = false;
    let ledger = Arc::new(Ledger::open(&config).unwrap());
    let limits = Arc::new(LimitEnforcer::open(ledger, &LimitsConfig { rules }).unwrap());
    let engine = TransferEngine::new(limits, TransferConfig::default()).unwrap();
    (Arc::new(engine), temp_dir)
}

fn funded(engine: &TransferEngine, name: &str, amount: u64) -> UserId {
    let user = UserId::new(name);
    if amount == 0 {
        engine.ledger().open_account(&user).unwrap();
    } else {
        engine.ledger().earn(&user, amount, "seed", None).unwrap();
    }
    user
}

fn available(engine: &TransferEngine, user: &UserId) -> u64 {
    engine.ledger().balance(user).unwrap().available()
}

fn scheduler(engine: &Arc<TransferEngine>) -> ExpirationScheduler {
    let config = SchedulerConfig {
        scan_page_size: 2,
        ..SchedulerConfig::default()
    };
    ExpirationScheduler::new(engine.clone(), config).unwrap()
}

#[test]
fn accepted_transfer_moves_amount_and_burns_fee() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 30).with_fee(2))
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Pending);
    assert_eq!(available(&engine, &alice), 68);
    assert_eq!(available(&engine, &bob), 0);

    let done = engine.accept(transfer.id, &bob).unwrap();
    assert_eq!(done.status, TransferStatus::Processed);
    assert!(done.resolved_at.is_some());
    assert_eq!(available(&engine, &alice), 68);
    assert_eq!(available(&engine, &bob), 30);

    assert!(engine.ledger().reconcile(&alice).unwrap().consistent);
    assert!(engine.ledger().reconcile(&bob).unwrap().consistent);
}

#[test]
fn rejected_transfer_refunds_sender() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 30).with_fee(2))
        .unwrap();
    let done = engine.reject(transfer.id, &bob).unwrap();

    assert_eq!(done.status, TransferStatus::Rejected);
    assert_eq!(available(&engine, &alice), 100);
    assert_eq!(available(&engine, &bob), 0);
}

#[test]
fn cancel_leaves_matching_debit_and_credit() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 40).with_fee(5))
        .unwrap();
    engine.cancel(transfer.id, &alice).unwrap();

    let reference = transfer.id.to_string();
    let entries: Vec<_> = engine
        .ledger()
        .history(&alice, Page::default())
        .unwrap()
        .into_iter()
        .filter(|e| e.reference.as_deref() == Some(reference.as_str()))
        .collect();

    assert_eq!(entries.len(), 2);
    let net: i128 = entries.iter().map(|e| e.signed_amount()).sum();
    assert_eq!(net, 0);
    assert!(entries.iter().any(|e| e.direction == Direction::Spend && e.amount == 45));
    assert!(entries.iter().any(|e| e.direction == Direction::Earn && e.amount == 45));
    assert_eq!(available(&engine, &alice), 100);
}

#[test]
fn insufficient_balance_creates_nothing() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 10);
    let bob = funded(&engine, "bob", 0);

    let err = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10).with_fee(1))
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { available: 10, requested: 11, .. }));
    assert_eq!(available(&engine, &alice), 10);
    assert!(engine.list_for_user(&alice, None, Page::default()).unwrap().is_empty());
}

#[test]
fn resolution_after_terminal_state_refused() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10))
        .unwrap();
    engine.accept(transfer.id, &bob).unwrap();

    assert!(matches!(
        engine.reject(transfer.id, &bob),
        Err(Error::AlreadyResolved { status: TransferStatus::Processed, .. })
    ));
    assert!(matches!(engine.cancel(transfer.id, &alice), Err(Error::AlreadyResolved { .. })));
    assert_eq!(available(&engine, &bob), 10);
}

#[test]
fn zero_ttl_transfer_expires_on_next_sweep() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(
            CreateTransfer::new(alice.clone(), bob.clone(), 20)
                .with_fee(1)
                .with_ttl(Duration::zero()),
        )
        .unwrap();
    assert_eq!(available(&engine, &alice), 79);

    thread::sleep(std::time::Duration::from_millis(5));

    let batch = scheduler(&engine).run_once(BatchTrigger::Manual).unwrap();

    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.expired_count, 1);
    assert_eq!(available(&engine, &alice), 100);
    assert_eq!(
        engine.get(transfer.id, &Actor::Admin).unwrap().status,
        TransferStatus::Expired
    );
    assert!(matches!(engine.accept(transfer.id, &bob), Err(Error::Expired(_))));
}

#[test]
fn repeated_sweeps_refund_once() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let recipients: Vec<UserId> = (0..5).map(|i| funded(&engine, &format!("friend{}", i), 0)).collect();

    for to in &recipients {
        engine
            .create(CreateTransfer::new(alice.clone(), to.clone(), 10).with_ttl(Duration::zero()))
            .unwrap();
    }
    assert_eq!(available(&engine, &alice), 50);

    thread::sleep(std::time::Duration::from_millis(5));
    let scheduler = scheduler(&engine);

    let first = scheduler.run_once(BatchTrigger::Scheduled).unwrap();
    assert_eq!(first.expired_count, 5);
    assert_eq!(first.error_count, 0);

    let second = scheduler.run_once(BatchTrigger::Scheduled).unwrap();
    assert_eq!(second.expired_count, 0);
    assert_eq!(second.scanned_count, 0);

    assert_eq!(available(&engine, &alice), 100);

    let recent = scheduler.recent_batches(10).unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent.iter().any(|b| b.id == second.id));
    assert_eq!(scheduler.recent_batches(1).unwrap().len(), 1);
    assert_eq!(scheduler.batch(first.id).unwrap().unwrap().expired_count, 5);
}

#[test]
fn sweep_leaves_transfers_not_yet_due() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10).with_ttl(Duration::hours(1)))
        .unwrap();

    let scheduler = scheduler(&engine);
    let batch = scheduler.run_once_at(Utc::now(), BatchTrigger::Manual).unwrap();
    assert_eq!(batch.expired_count, 0);

    let ahead = scheduler
        .run_once_at(Utc::now() + Duration::hours(2), BatchTrigger::Manual)
        .unwrap();
    assert_eq!(ahead.expired_count, 0);
    assert_eq!(ahead.scanned_count, 0);
    assert!(ahead.cutoff <= Utc::now());
    assert!(matches!(
        engine.expire(transfer.id, Utc::now() + Duration::hours(2)),
        Err(Error::NotYetDue(_))
    ));
    assert_eq!(available(&engine, &alice), 90);

    engine.accept(transfer.id, &bob).unwrap();
    assert_eq!(available(&engine, &bob), 10);
}

#[test]
fn racing_resolutions_resolve_exactly_once() {
    for _ in 0..10 {
        let (engine, _temp) = open_engine(vec![]);
        let alice = funded(&engine, "alice", 100);
        let bob = funded(&engine, "bob", 0);

        let transfer = engine
            .create(CreateTransfer::new(alice.clone(), bob.clone(), 30).with_fee(2))
            .unwrap();
        let id = transfer.id;

        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                let alice = alice.clone();
                let bob = bob.clone();
                thread::spawn(move || {
                    barrier.wait();
                    match i {
                        0 => engine.accept(id, &bob),
                        1 => engine.reject(id, &bob),
                        2 => engine.cancel(id, &alice),
                        _ => engine.admin_cancel(id),
                    }
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in &results {
            if let Err(err) = result {
                assert!(matches!(err, Error::AlreadyResolved { .. }), "unexpected {err}");
            }
        }

        // Conservation: 100 in, at most the fee burned
        let total = available(&engine, &alice) + available(&engine, &bob);
        match winners[0].status {
            TransferStatus::Processed => assert_eq!(total, 98),
            _ => assert_eq!(total, 100),
        }
    }
}

#[test]
fn overdue_transfer_races_settle_on_expiry() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);

    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 30).with_ttl(Duration::zero()))
        .unwrap();
    let id = transfer.id;
    let sweep_at = transfer.expires_at + Duration::seconds(1);
    thread::sleep(std::time::Duration::from_millis(5));

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            let barrier = barrier.clone();
            let alice = alice.clone();
            let bob = bob.clone();
            thread::spawn(move || {
                barrier.wait();
                match i {
                    0 => engine.accept(id, &bob),
                    1 => engine.reject(id, &bob),
                    2 => engine.cancel(id, &alice),
                    _ => engine.expire(id, sweep_at),
                }
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(results[3].as_ref().unwrap().status, TransferStatus::Expired);
    for result in &results[..3] {
        assert!(matches!(result, Err(Error::Expired(_))));
    }
    assert_eq!(available(&engine, &alice), 100);
    assert_eq!(available(&engine, &bob), 0);
}

#[test]
fn idempotent_create_replays_and_detects_conflicts() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);
    let id = uuid::Uuid::now_v7();

    let first = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10).with_id(id))
        .unwrap();
    let replay = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10).with_id(id))
        .unwrap();
    assert_eq!(first, replay);
    assert_eq!(available(&engine, &alice), 90);

    let err = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 11).with_id(id))
        .unwrap_err();
    assert!(matches!(err, Error::IdempotencyConflict(conflict) if conflict == id));
    assert_eq!(available(&engine, &alice), 90);

    let other_ttl = engine
        .create(
            CreateTransfer::new(alice.clone(), bob.clone(), 10)
                .with_id(id)
                .with_ttl(Duration::hours(1)),
        )
        .unwrap_err();
    assert!(matches!(other_ttl, Error::IdempotencyConflict(conflict) if conflict == id));
    assert_eq!(available(&engine, &alice), 90);
}

#[test]
fn batch_reports_partial_failures() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 50);
    let bob = funded(&engine, "bob", 0);
    let carol = funded(&engine, "carol", 0);

    let result = engine
        .batch_create(
            &alice,
            &[
                BatchRecipient::new("bob", 20),
                BatchRecipient::new("nobody", 5),
                BatchRecipient::new("carol", 20),
                BatchRecipient::new("bob", 20),
            ],
            FeePolicy::Flat(1),
            None,
        )
        .unwrap();

    assert_eq!(result.outcomes.len(), 4);
    assert_eq!(result.created(), 2);
    assert_eq!(result.failed(), 2);
    assert_eq!(result.escrowed(), 42);
    assert!(matches!(&result.outcomes[1], BatchOutcome::Failed { to_user_id, .. } if to_user_id.as_str() == "nobody"));
    // Third child drained the balance
    assert!(matches!(&result.outcomes[3], BatchOutcome::Failed { .. }));
    assert_eq!(available(&engine, &alice), 8);

    for outcome in &result.outcomes {
        if let BatchOutcome::Created(transfer) = outcome {
            assert_eq!(
                transfer.transfer_type,
                TransferType::BatchChild { batch_id: result.batch_id }
            );
        }
    }

    assert_eq!(engine.list_for_user(&bob, None, Page::default()).unwrap().len(), 1);
    assert_eq!(engine.list_for_user(&carol, None, Page::default()).unwrap().len(), 1);
}

#[test]
fn oversized_or_empty_batch_rejected() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 50);

    assert!(matches!(
        engine.batch_create(&alice, &[], FeePolicy::Waived, None),
        Err(Error::InvalidBatch(_))
    ));

    let too_many: Vec<_> = (0..51).map(|i| BatchRecipient::new(format!("user{}", i), 1)).collect();
    assert!(matches!(
        engine.batch_create(&alice, &too_many, FeePolicy::Waived, None),
        Err(Error::InvalidBatch(_))
    ));
    assert_eq!(available(&engine, &alice), 50);
}

#[test]
fn transfer_send_cap_denies_without_debit() {
    let rule = LimitRule {
        action: ActionType::TransferSend,
        measure: CapMeasure::Amount,
        daily_cap: Some(50),
        weekly_cap: None,
    };
    let (engine, _temp) = open_engine(vec![rule]);
    let alice = funded(&engine, "alice", 200);
    let bob = funded(&engine, "bob", 0);

    engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 40))
        .unwrap();
    let err = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 20))
        .unwrap_err();

    match err {
        Error::LimitExceeded(denial) => {
            assert_eq!(denial.cap, 50);
            assert_eq!(denial.used, 40);
        }
        other => panic!("expected limit denial, got {other}"),
    }
    assert_eq!(available(&engine, &alice), 160);

    let usage = engine
        .limits()
        .usage(&alice, ActionType::TransferSend, Utc::now())
        .unwrap();
    assert_eq!(usage.today.amount, 40);
}

#[test]
fn listing_filters_and_statistics() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);
    let carol = funded(&engine, "carol", 0);

    let t1 = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 10).with_fee(1))
        .unwrap();
    let t2 = engine
        .create(CreateTransfer::new(alice.clone(), carol.clone(), 20))
        .unwrap();
    let t3 = engine
        .create(CreateTransfer::new(alice.clone(), bob.clone(), 5))
        .unwrap();
    engine.accept(t1.id, &bob).unwrap();
    engine.reject(t2.id, &carol).unwrap();

    let all = engine.list_for_user(&alice, None, Page::default()).unwrap();
    let ids: Vec<_> = all.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![t3.id, t2.id, t1.id]);

    let pending = engine
        .list_for_user(&alice, Some(TransferStatus::Pending), Page::default())
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, t3.id);

    let second_page = engine.list_for_user(&alice, None, Page::new(2, 2)).unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].id, t1.id);

    let stats = engine.stats(&alice).unwrap();
    assert_eq!(stats.sent.total(), 3);
    assert_eq!(stats.sent.processed, 1);
    assert_eq!(stats.sent.rejected, 1);
    assert_eq!(stats.sent.pending, 1);
    assert_eq!(stats.points_sent, 10);
    assert_eq!(stats.fees_paid, 1);
    assert_eq!(stats.escrowed, 5);

    let bob_stats = engine.stats(&bob).unwrap();
    assert_eq!(bob_stats.received.total(), 2);
    assert_eq!(bob_stats.points_received, 10);

    assert!(matches!(engine.get(t2.id, &Actor::User(bob)), Err(Error::NotFound(_))));
}

#[test]
fn interrupted_batches_recovered_as_failed() {
    let (engine, _temp) = open_engine(vec![]);
    let scheduler = scheduler(&engine);

    let finished = scheduler.run_once(BatchTrigger::Manual).unwrap();
    assert_eq!(finished.status, BatchStatus::Completed);

    // Left behind by a process that died mid-sweep
    let stuck = ExpirationBatch {
        id: uuid::Uuid::now_v7(),
        status: BatchStatus::Processing,
        trigger: BatchTrigger::Scheduled,
        cutoff: Utc::now(),
        scanned_count: 3,
        expired_count: 1,
        skipped_count: 0,
        error_count: 0,
        started_at: Some(Utc::now()),
        completed_at: None,
        failure: None,
    };
    let storage = engine.ledger().storage();
    let mut ws = storage.write_set();
    ws.put(Table::ExpirationBatches, stuck.id.as_bytes(), &stuck).unwrap();
    storage.commit(ws).unwrap();

    assert_eq!(scheduler.recover_interrupted().unwrap(), 1);
    let recovered = scheduler.batch(stuck.id).unwrap().unwrap();
    assert_eq!(recovered.status, BatchStatus::Failed);
    assert!(recovered.failure.is_some());
    assert_eq!(
        scheduler.batch(finished.id).unwrap().unwrap().status,
        BatchStatus::Completed
    );
    assert_eq!(scheduler.recover_interrupted().unwrap(), 0);
}

#[test]
fn unreadable_transfer_fails_the_batch() {
    let (engine, _temp) = open_engine(vec![]);
    let scheduler = Arc::new(scheduler(&engine));

    let id = uuid::Uuid::now_v7();
    let storage = engine.ledger().storage();
    let mut ws = storage.write_set();
    ws.put_marker(
        Table::PendingExpiry,
        &transfer_engine::store::expiry_key(Utc::now() - Duration::minutes(1), id),
    )
    .unwrap();
    ws.put(Table::Transfers, id.as_bytes(), &0u8).unwrap();
    storage.commit(ws).unwrap();

    let sweeper = scheduler.clone();
    let batch = thread::spawn(move || sweeper.run_once(BatchTrigger::Scheduled))
        .join()
        .unwrap()
        .unwrap();

    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.failure.is_some());
    assert!(batch.completed_at.is_some());
    assert_eq!(batch.expired_count, 0);

    let stored = scheduler.batch(batch.id).unwrap().unwrap();
    assert_eq!(stored.status, BatchStatus::Failed);
    assert_eq!(stored.failure, batch.failure);
}

#[test]
fn failed_refund_counted_and_retried_next_run() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", u64::MAX - 5);
    let bob = funded(&engine, "bob", 0);

    // Total never decreases, so refunding 10 would overflow it
    let transfer = engine
        .create(CreateTransfer::new(alice.clone(), bob, 10).with_ttl(Duration::zero()))
        .unwrap();
    thread::sleep(std::time::Duration::from_millis(5));

    let scheduler = Arc::new(scheduler(&engine));
    for _ in 0..2 {
        let sweeper = scheduler.clone();
        let batch = thread::spawn(move || sweeper.run_once(BatchTrigger::Scheduled))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.scanned_count, 1);
        assert_eq!(batch.error_count, 1);
        assert_eq!(batch.expired_count, 0);
    }

    assert_eq!(
        engine.get(transfer.id, &Actor::Admin).unwrap().status,
        TransferStatus::Pending
    );
    assert_eq!(available(&engine, &alice), u64::MAX - 15);
}

#[tokio::test]
async fn spawned_scheduler_serves_manual_runs() {
    let (engine, _temp) = open_engine(vec![]);
    let alice = funded(&engine, "alice", 100);
    let bob = funded(&engine, "bob", 0);
    engine
        .create(CreateTransfer::new(alice.clone(), bob, 25).with_ttl(Duration::zero()))
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let config = SchedulerConfig {
        enabled: false,
        ..SchedulerConfig::default()
    };
    let scheduler = Arc::new(ExpirationScheduler::new(engine.clone(), config).unwrap());
    let (handle, task) = scheduler.spawn();

    let batch = handle.run_now().await.unwrap();
    assert_eq!(batch.trigger, BatchTrigger::Manual);
    assert_eq!(batch.expired_count, 1);
    assert_eq!(available(&engine, &alice), 100);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert!(handle.run_now().await.is_err());
}
