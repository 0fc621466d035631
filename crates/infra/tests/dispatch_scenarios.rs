//! End-to-end dispatch runs against scripted and simulated collaborators.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use fanout_core::{DispatchError, JobSnapshot, MessagePayload, Recipient, RecipientId};
use fanout_infra::dispatch::ProductionOutcome;
use fanout_infra::{
    DispatchConfig, FileJobStore, InMemoryJobStore, JobStore, RateLimitConfig, RunError, run_job,
    run_job_until,
};
use fanout_sim::{
    ScriptedSender, SimulatedDirectory, SimulatedSender, SimulationConfig, StaticDirectory,
};

fn fast_config() -> DispatchConfig {
    let mut config = DispatchConfig::default()
        .with_workers(3)
        .with_page_size(2)
        .with_retry_limit(1)
        .with_checkpoint_every(5);
    config.rate_limit = RateLimitConfig {
        initial_delay: Duration::from_millis(10),
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(5),
        ..RateLimitConfig::default()
    };
    config.retry.base_backoff = Duration::from_millis(20);
    config.worker_yield = Duration::from_millis(1);
    config.page_retry_backoff = Duration::from_millis(10);
    config
}

fn payload() -> MessagePayload {
    MessagePayload::new("Scheduled maintenance tonight at 22:00 UTC.")
}

fn ids(raw: &[&str]) -> Vec<RecipientId> {
    raw.iter().map(|s| RecipientId::from(*s)).collect()
}

fn sorted(mut v: Vec<RecipientId>) -> Vec<RecipientId> {
    v.sort();
    v
}

#[tokio::test(start_paused = true)]
async fn transient_unreachable_and_healthy_recipients_classify_separately() {
    let store = InMemoryJobStore::arc();
    let source = Arc::new(StaticDirectory::new(vec![
        Recipient::new("A", "alice"),
        Recipient::new("B", "bob").unreachable(),
        Recipient::new("C", "carol"),
    ]));
    let sender = Arc::new(
        ScriptedSender::new()
            .always("A", DispatchError::transient("503"))
            .always("B", DispatchError::unreachable("dm closed")),
    );

    let report = run_job(&fast_config(), store.clone(), source, sender.clone(), payload())
        .await
        .unwrap();

    assert!(report.finished);
    assert_eq!(report.counters.sent, 1);
    assert_eq!(report.counters.failed, 1);
    assert_eq!(report.counters.closed, 1);

    let saved = store.current().unwrap();
    assert_eq!(saved.sent, ids(&["C"]));
    assert_eq!(saved.failed, ids(&["A"]));
    assert_eq!(saved.closed, ids(&["B"]));
    assert!(saved.pending.is_empty());
    assert!(!saved.active);

    assert_eq!(sender.attempts(&RecipientId::from("A")), 2);
    assert_eq!(sender.attempts(&RecipientId::from("B")), 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_hint_slows_sends_then_recipient_is_sent() {
    let store = InMemoryJobStore::arc();
    let source = Arc::new(StaticDirectory::new(vec![Recipient::new("R", "rate")]));
    let sender = Arc::new(ScriptedSender::new().sequence(
        "R",
        vec![
            Err(DispatchError::rate_limited(Some(Duration::from_secs(2)))),
            Ok(()),
        ],
    ));

    let report = run_job(&fast_config(), store.clone(), source, sender, payload())
        .await
        .unwrap();

    assert_eq!(report.counters.sent, 1);
    assert_eq!(store.current().unwrap().sent, ids(&["R"]));
    // Raised to the 2s hint, then decayed once by the success.
    assert!(report.final_delay >= Duration::from_millis(1900));
    assert!(report.elapsed >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn fixed_seed_runs_are_identical() {
    let sim = SimulationConfig {
        unreachable_rate: 0.1,
        missing_rate: 0.05,
        rate_limit_rate: 0.1,
        transient_rate: 0.3,
        retry_after: Some(Duration::from_millis(100)),
        ..SimulationConfig::new(7, 60)
    };

    let mut runs = Vec::new();
    for _ in 0..2 {
        let store = InMemoryJobStore::arc();
        let report = run_job(
            &fast_config(),
            store.clone(),
            Arc::new(SimulatedDirectory::new(&sim)),
            Arc::new(SimulatedSender::new(&sim)),
            payload(),
        )
        .await
        .unwrap();
        assert!(report.finished);

        let saved = store.current().unwrap();
        runs.push((
            report.counters,
            sorted(saved.sent),
            sorted(saved.failed),
            sorted(saved.closed),
        ));
    }

    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].0.total(), 60);
}

#[tokio::test(start_paused = true)]
async fn completed_production_is_never_repaginated_on_resume() {
    let mut stored = JobSnapshot::new();
    stored.pending = ids(&["2", "3"]);
    stored.sent = ids(&["1"]);
    stored.counters.sent = 1;
    stored.cursor = Some(RecipientId::from("3"));
    stored.production_complete = true;
    let store = Arc::new(InMemoryJobStore::with_snapshot(stored));

    let source = Arc::new(StaticDirectory::new(
        ["1", "2", "3", "4"]
            .iter()
            .map(|id| Recipient::new(*id, "user"))
            .collect(),
    ));

    let report = run_job(&fast_config(), store.clone(), source.clone(), Arc::new(ScriptedSender::new()), payload())
        .await
        .unwrap();

    assert_eq!(report.production, ProductionOutcome::AlreadyComplete);
    assert_eq!(source.list_calls(), 0);
    assert_eq!(report.counters.sent, 3);
    assert_eq!(sorted(store.current().unwrap().sent), ids(&["1", "2", "3"]));
}

#[tokio::test(start_paused = true)]
async fn interrupted_job_resumes_from_cursor() {
    let mut stored = JobSnapshot::new();
    stored.pending = ids(&["3"]);
    stored.sent = ids(&["1", "2"]);
    stored.counters.sent = 2;
    stored.cursor = Some(RecipientId::from("3"));
    let store = Arc::new(InMemoryJobStore::with_snapshot(stored));

    let source = Arc::new(StaticDirectory::new(
        ["1", "2", "3", "4", "5"]
            .iter()
            .map(|id| Recipient::new(*id, "user"))
            .collect(),
    ));
    let sender = Arc::new(ScriptedSender::new());

    let report = run_job(&fast_config(), store.clone(), source, sender.clone(), payload())
        .await
        .unwrap();

    assert!(report.finished);
    assert_eq!(report.counters.sent, 5);
    assert_eq!(sender.attempts(&RecipientId::from("1")), 0);
    assert_eq!(sender.total_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn every_produced_recipient_is_resolved_exactly_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(FileJobStore::new(temp.path().join("job.json")));
    let sim = SimulationConfig {
        retry_after: Some(Duration::from_millis(50)),
        ..SimulationConfig::new(11, 150)
    };
    let directory = Arc::new(SimulatedDirectory::new(&sim));
    let expected: HashSet<RecipientId> = directory.recipients().iter().map(|r| r.id.clone()).collect();

    let mut config = fast_config().with_page_size(40).with_workers(4);
    config.retry.retry_limit = 2;

    let report = run_job(&config, store.clone(), directory, Arc::new(SimulatedSender::new(&sim)), payload())
        .await
        .unwrap();
    assert!(report.finished);

    let saved = store.load().unwrap().unwrap();
    assert!(saved.pending.is_empty());
    assert!(saved.production_complete);
    assert!(!saved.active);

    let mut seen = HashSet::new();
    for id in saved.sent.iter().chain(&saved.failed).chain(&saved.closed) {
        assert!(seen.insert(id.clone()), "{id} classified twice");
    }
    assert_eq!(seen, expected);
    assert_eq!(saved.counters.sent as usize, saved.sent.len());
    assert_eq!(saved.counters.failed as usize, saved.failed.len());
    assert_eq!(saved.counters.closed as usize, saved.closed.len());
}

#[tokio::test(start_paused = true)]
async fn failing_store_does_not_abort_the_run() {
    let store = InMemoryJobStore::arc();
    store.set_failing(true);
    let source = Arc::new(StaticDirectory::new(vec![
        Recipient::new("1", "a"),
        Recipient::new("2", "b"),
    ]));

    let report = run_job(&fast_config(), store.clone(), source, Arc::new(ScriptedSender::new()), payload())
        .await
        .unwrap();

    assert!(report.finished);
    assert_eq!(report.counters.sent, 2);
    assert!(store.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn unavailable_directory_halts_production_but_keeps_job_resumable() {
    let store = InMemoryJobStore::arc();
    let source = Arc::new(StaticDirectory::new(vec![Recipient::new("1", "a")]).failing_pages(100));

    let report = run_job(&fast_config(), store.clone(), source, Arc::new(ScriptedSender::new()), payload())
        .await
        .unwrap();

    assert!(matches!(report.production, ProductionOutcome::Halted { .. }));
    assert!(!report.finished);
    assert!(!report.production_complete);

    let saved = store.current().unwrap();
    assert!(saved.active);
    assert!(!saved.production_complete);
}

#[tokio::test]
async fn unreadable_snapshot_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("job.json");
    std::fs::write(&path, "not json").unwrap();

    let result = run_job(
        &fast_config(),
        Arc::new(FileJobStore::new(&path)),
        Arc::new(StaticDirectory::default()),
        Arc::new(ScriptedSender::new()),
        payload(),
    )
    .await;

    assert!(matches!(result, Err(RunError::Storage(_))));
    // The unreadable snapshot is left for inspection.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
}

#[tokio::test(start_paused = true)]
async fn deactivation_stops_workers_and_persists_inactive_job() {
    let store = InMemoryJobStore::arc();
    let source = Arc::new(StaticDirectory::new(
        (0..50)
            .map(|i| Recipient::new(format!("{i:03}"), "user"))
            .collect(),
    ));
    let sender = Arc::new(ScriptedSender::new());

    let mut config = fast_config().with_workers(2).with_page_size(100);
    config.rate_limit.initial_delay = Duration::from_millis(100);
    config.rate_limit.min_delay = Duration::from_millis(100);

    let report = run_job_until(
        &config,
        store.clone(),
        source.clone(),
        sender.clone(),
        payload(),
        tokio::time::sleep(Duration::from_millis(1500)),
    )
    .await
    .unwrap();

    assert!(!report.active);
    assert!(!report.finished);
    assert!(report.pending > 0);
    assert!(report.counters.sent > 0);
    assert_eq!(report.counters.total() as usize + report.pending, 50);
    assert!(report.elapsed < Duration::from_secs(3));

    let saved = store.current().unwrap();
    assert!(!saved.active);
    assert_eq!(saved.pending.len(), report.pending);
    assert_eq!(saved.counters, report.counters);

    // A deactivated job stays stopped on the next run.
    let attempts_before = sender.total_attempts();
    let resumed = run_job(&config, store.clone(), source, sender.clone(), payload())
        .await
        .unwrap();
    assert_eq!(resumed.workers.attempts(), 0);
    assert_eq!(resumed.pending, report.pending);
    assert_eq!(sender.total_attempts(), attempts_before);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_touching_the_job() {
    let store = InMemoryJobStore::arc();
    let mut config = fast_config();
    config.monitor_period = Duration::ZERO;

    let result = run_job(
        &config,
        store.clone(),
        Arc::new(StaticDirectory::new(vec![Recipient::new("1", "a")])),
        Arc::new(ScriptedSender::new()),
        payload(),
    )
    .await;

    assert!(matches!(result, Err(RunError::Config(_))));
    assert_eq!(store.save_count(), 0);
}
