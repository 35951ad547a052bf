//! Behaviour shared by every backend.
//!
//! Each check expects an empty store and is run once per backend.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::{TimeZone, Utc};

use mailsweep::models::{Charge, ClaimQuery, JobRecord, JobStatus, QuotaScope, ReportRow};
use mailsweep::store::Backend;
use mailsweep::StoreError;

fn fetched_record(id: &str, from: &str) -> JobRecord {
    JobRecord::new(id).into_fetched(
        from.to_string(),
        "me@example.com".to_string(),
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
    )
}

fn seed_fetched(backend: &Backend, id: &str, from: &str) {
    backend.jobs.create(&JobRecord::new(id)).unwrap();
    let claimed = backend
        .jobs
        .claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, id);
    assert!(backend.jobs.advance(&fetched_record(id, from)).unwrap());
}

pub fn uniqueness(backend: &Backend) {
    let jobs = &backend.jobs;
    jobs.create(&JobRecord::new("t1")).unwrap();

    let err = jobs.create(&JobRecord::new("t1")).unwrap_err();
    assert!(err.is_duplicate());

    // Still unique once the record has moved to another partition.
    jobs.claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
        .unwrap()
        .unwrap();
    assert!(jobs.create(&JobRecord::new("t1")).unwrap_err().is_duplicate());
    assert_eq!(jobs.count_by_status(JobStatus::New).unwrap(), 0);
    assert_eq!(jobs.count_by_status(JobStatus::Fetching).unwrap(), 1);
}

pub fn create_rejects_populated_records(backend: &Backend) {
    let err = backend
        .jobs
        .create(&fetched_record("t1", "a@x.com"))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidRecord { .. }));
    assert!(backend.jobs.find("t1").unwrap().is_none());
}

pub fn claim_order_and_drain(backend: &Backend) {
    let jobs = &backend.jobs;
    for id in ["t1", "t2", "t3"] {
        jobs.create(&JobRecord::new(id)).unwrap();
    }
    let query = ClaimQuery::Any(JobStatus::New);
    let mut claimed = Vec::new();
    while let Some(record) = jobs.claim_one(&query, JobStatus::Fetching).unwrap() {
        assert_eq!(record.status, JobStatus::Fetching);
        assert!(record.is_pristine());
        claimed.push(record.id);
    }
    assert_eq!(claimed, vec!["t1", "t2", "t3"]);
    assert!(jobs.claim_one(&query, JobStatus::Fetching).unwrap().is_none());
}

pub fn transitions(backend: &Backend) {
    let jobs = &backend.jobs;
    jobs.create(&JobRecord::new("t1")).unwrap();

    // FETCHED is only reachable from FETCHING.
    assert!(!jobs.advance(&fetched_record("t1", "a@x.com")).unwrap());
    let stored = jobs.find("t1").unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::New);
    assert!(stored.is_pristine());

    jobs.claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
        .unwrap()
        .unwrap();
    assert!(jobs.advance(&fetched_record("t1", "a@x.com")).unwrap());
    let stored = jobs.find("t1").unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Fetched);
    assert!(stored.is_populated());
    assert_eq!(stored.from, "a@x.com");
    assert_eq!(
        stored.created,
        Some(Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap())
    );

    // A second advance is late and changes nothing.
    assert!(!jobs.advance(&fetched_record("t1", "b@x.com")).unwrap());
    assert_eq!(jobs.find("t1").unwrap().unwrap().from, "a@x.com");

    let mut half = fetched_record("t1", "a@x.com");
    half.to.clear();
    assert!(matches!(
        jobs.advance(&half),
        Err(StoreError::InvalidRecord { .. })
    ));
}

pub fn claim_by_sender(backend: &Backend) {
    seed_fetched(backend, "t1", "a@x.com");
    seed_fetched(backend, "t2", "b@x.com");
    seed_fetched(backend, "t3", "a@x.com");

    let query = ClaimQuery::BySender {
        source: JobStatus::Fetched,
        sender: "a@x.com".to_string(),
    };
    let jobs = &backend.jobs;
    let first = jobs.claim_one(&query, JobStatus::Deleting).unwrap().unwrap();
    let second = jobs.claim_one(&query, JobStatus::Deleting).unwrap().unwrap();
    assert_eq!((first.id.as_str(), second.id.as_str()), ("t1", "t3"));
    assert_eq!(first.from, "a@x.com");
    assert!(jobs.claim_one(&query, JobStatus::Deleting).unwrap().is_none());
    assert_eq!(jobs.find("t2").unwrap().unwrap().status, JobStatus::Fetched);
}

pub fn idempotent_remove(backend: &Backend) {
    seed_fetched(backend, "t1", "a@x.com");
    backend.jobs.create(&JobRecord::new("t2")).unwrap();
    let jobs = &backend.jobs;

    jobs.remove("t1").unwrap();
    jobs.remove("t1").unwrap();
    jobs.remove("missing").unwrap();
    assert!(jobs.find("t1").unwrap().is_none());

    // Records that never reached the delete path stay.
    jobs.remove("t2").unwrap();
    assert_eq!(jobs.find("t2").unwrap().unwrap().status, JobStatus::New);
}

pub fn report_ordering(backend: &Backend) {
    for (i, from) in ["c", "b", "a", "b", "a", "a", "b"].iter().enumerate() {
        seed_fetched(backend, &format!("t{i}"), from);
    }
    // Records outside FETCHED are not counted.
    backend.jobs.create(&JobRecord::new("new-1")).unwrap();

    let rows = backend.jobs.summarize(100).unwrap();
    assert_eq!(
        rows,
        vec![
            ReportRow::new("a", 3),
            ReportRow::new("b", 3),
            ReportRow::new("c", 1)
        ]
    );
    assert_eq!(backend.jobs.summarize(2).unwrap().len(), 2);
}

pub fn quota_all_or_nothing(backend: &Backend) {
    let day = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let charges = |cost| {
        [
            Charge {
                scope: QuotaScope::Global,
                bucket_start: day,
                cost,
                ceiling: 1_000,
            },
            Charge {
                scope: QuotaScope::Caller,
                bucket_start: second,
                cost,
                ceiling: 150,
            },
        ]
    };
    let counters = &backend.counters;

    for _ in 0..15 {
        assert!(counters.try_charge(&charges(10)).unwrap());
    }
    assert!(!counters.try_charge(&charges(10)).unwrap());
    assert_eq!(counters.counter(QuotaScope::Global, day).unwrap(), 150);
    assert_eq!(counters.counter(QuotaScope::Caller, second).unwrap(), 150);

    assert_eq!(counters.prune(QuotaScope::Caller, second).unwrap(), 0);
    assert_eq!(
        counters
            .prune(QuotaScope::Caller, second + chrono::TimeDelta::seconds(1))
            .unwrap(),
        1
    );
    assert_eq!(counters.counter(QuotaScope::Caller, second).unwrap(), 0);
    assert_eq!(counters.counter(QuotaScope::Global, day).unwrap(), 150);
}

pub fn requeue_stale(backend: &Backend) {
    let jobs = &backend.jobs;
    seed_fetched(backend, "t1", "a@x.com");
    jobs.create(&JobRecord::new("t2")).unwrap();
    jobs.claim_one(&ClaimQuery::Any(JobStatus::New), JobStatus::Fetching)
        .unwrap()
        .unwrap();
    jobs.claim_one(
        &ClaimQuery::BySender {
            source: JobStatus::Fetched,
            sender: "a@x.com".to_string(),
        },
        JobStatus::Deleting,
    )
    .unwrap()
    .unwrap();

    let summary = jobs.requeue_stale().unwrap();
    assert_eq!((summary.fetching, summary.deleting), (1, 1));

    let t1 = jobs.find("t1").unwrap().unwrap();
    assert_eq!(t1.status, JobStatus::Fetched);
    assert_eq!(t1.from, "a@x.com");
    let t2 = jobs.find("t2").unwrap().unwrap();
    assert_eq!(t2.status, JobStatus::New);
    assert!(t2.is_pristine());
}

/// `claimers` threads race on `records` NEW records; each record must be
/// handed out exactly once.
pub fn concurrent_claims(backends: Vec<Backend>, records: usize) {
    let setup = &backends[0];
    for i in 0..records {
        setup.jobs.create(&JobRecord::new(format!("t{i:04}"))).unwrap();
    }

    let barrier = Arc::new(Barrier::new(backends.len()));
    let handles: Vec<_> = backends
        .into_iter()
        .map(|backend| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                let query = ClaimQuery::Any(JobStatus::New);
                while let Some(record) = backend.jobs.claim_one(&query, JobStatus::Fetching).unwrap() {
                    mine.push(record.id);
                }
                mine
            })
        })
        .collect();

    let mut seen = HashSet::new();
    let mut total = 0;
    for handle in handles {
        for id in handle.join().unwrap() {
            total += 1;
            assert!(seen.insert(id.clone()), "record {id} was claimed twice");
        }
    }
    assert_eq!(total, records);
    assert_eq!(seen.len(), records);
}

/// Concurrent reservations never push a counter past its ceiling.
pub fn concurrent_charges(backends: Vec<Backend>, attempts_per_thread: usize) {
    let second = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let charge = [Charge {
        scope: QuotaScope::Caller,
        bucket_start: second,
        cost: 10,
        ceiling: 150,
    }];
    let reader = backends[0].counters.clone();

    let handles: Vec<_> = backends
        .into_iter()
        .map(|backend| {
            let charge = charge.clone();
            thread::spawn(move || {
                (0..attempts_per_thread)
                    .filter(|_| backend.counters.try_charge(&charge).unwrap())
                    .count()
            })
        })
        .collect();

    let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(granted, 15);
    assert_eq!(reader.counter(QuotaScope::Caller, second).unwrap(), 150);
}
