mod support;

use std::time::Duration;

use delta_sync_core::contract::{EnvelopeFormat, InvokeGranularity};
use delta_sync_core::convergence::{run_once, ConvergenceLoop, ConvergenceSettings, LoopOutcome};
use delta_sync_core::delta::{DeltaMode, ExclusionSet};
use delta_sync_core::dispatch::{
    replay_audit_record, ArtifactStore, BatchDispatcher, DispatchResult, DispatchSettings,
};
use delta_sync_core::job::{SyncJob, SyncJobConfig};
use delta_sync_core::keys::KeyRule;
use delta_sync_core::listing::{ListOptions, ObjectRecord};

use support::bucket::{MemoryArtifacts, MemoryStore};
use support::processor::{MarkerWritingProcessor, NoWait};

const INPUT: &str = "landing-dev";
const OUTPUT: &str = "curated-dev";

fn job_config(limit: usize) -> SyncJobConfig {
    SyncJobConfig {
        name: "orders-dev".to_string(),
        input_bucket: INPUT.to_string(),
        input_prefix: "in/".to_string(),
        output_bucket: OUTPUT.to_string(),
        output_prefix: "out/".to_string(),
        error_prefix: Some("errors/".to_string()),
        limit,
        key_rule: KeyRule::default(),
        exclusions: ExclusionSet::default(),
        list_options: ListOptions::default(),
    }
}

fn dispatch_settings(limit: usize) -> DispatchSettings {
    dispatch_settings_for_run(limit, "20240501T080000.000Z")
}

fn dispatch_settings_for_run(limit: usize, run_id: &str) -> DispatchSettings {
    DispatchSettings {
        job: "orders-dev".to_string(),
        run_id: run_id.to_string(),
        store_id: INPUT.to_string(),
        audit_prefix: "audit".to_string(),
        key_rule: KeyRule::default().version_tag(),
        format: EnvelopeFormat::Compact,
        granularity: InvokeGranularity::Batch,
        limit,
    }
}

fn seed_inputs(store: &MemoryStore, count: usize) {
    for index in 0..count {
        store.put(
            INPUT,
            &format!("in/orders-{index}_timestamp_20240501.csv"),
            128,
        );
    }
}

#[test]
fn automated_loop_drains_when_every_batch_lands() {
    let store = MemoryStore::default();
    seed_inputs(&store, 5);
    let config = job_config(2);
    let job = SyncJob::new(&config, &store);
    let processor = MarkerWritingProcessor::new(&store, OUTPUT, "out/");
    let artifacts = MemoryArtifacts::default();
    let settings = dispatch_settings(2);
    let dispatcher = BatchDispatcher::new(&settings, &processor, &artifacts);
    let sleeper = NoWait::default();

    let outcome = ConvergenceLoop::new(
        &job,
        &dispatcher,
        &sleeper,
        ConvergenceSettings {
            poll_interval: Duration::from_secs(60),
            dry_run: false,
        },
    )
    .run()
    .expect("loop should finish");

    assert_eq!(
        outcome,
        LoopOutcome::Drained {
            cycles: 3,
            dispatched: 5
        }
    );
    assert_eq!(processor.received().len(), 5);
    assert_eq!(store.keys(OUTPUT, "out/").len(), 5);
    assert_eq!(
        artifacts.keys(),
        vec![
            "audit/orders-dev/run=20240501T080000.000Z/cycle=0001.json".to_string(),
            "audit/orders-dev/run=20240501T080000.000Z/cycle=0002.json".to_string(),
            "audit/orders-dev/run=20240501T080000.000Z/cycle=0003.json".to_string(),
        ]
    );
    assert_eq!(
        *sleeper.waits.lock().expect("poisoned mutex"),
        vec![Duration::from_secs(60); 3]
    );
}

#[test]
fn rejected_record_stalls_the_loop() {
    let store = MemoryStore::default();
    seed_inputs(&store, 5);
    let config = job_config(2);
    let job = SyncJob::new(&config, &store);
    let processor = MarkerWritingProcessor::new(&store, OUTPUT, "out/")
        .rejecting("in/orders-0_timestamp_20240501.csv");
    let artifacts = MemoryArtifacts::default();
    let settings = dispatch_settings(2);
    let dispatcher = BatchDispatcher::new(&settings, &processor, &artifacts);
    let sleeper = NoWait::default();

    let outcome = ConvergenceLoop::new(&job, &dispatcher, &sleeper, ConvergenceSettings::default())
        .run()
        .expect("stall is not an error");

    assert_eq!(
        outcome,
        LoopOutcome::Stalled {
            cycles: 1,
            dispatched: 2,
            expected_backlog: 3,
            observed_backlog: 1,
        }
    );
    let retry = job.current_delta().expect("delta");
    assert_eq!(retry.mode(), DeltaMode::RetryFailures);
    assert_eq!(
        retry.records(),
        &[ObjectRecord::new("in/orders-0_timestamp_20240501.csv", 128)]
    );
}

#[test]
fn zero_size_inputs_never_reach_the_delta() {
    let store = MemoryStore::default();
    store.put(INPUT, "in/A", 10);
    store.put(INPUT, "in/B", 0);
    store.put(INPUT, "in/C", 10);
    let config = job_config(10);

    let delta = SyncJob::new(&config, &store)
        .current_delta()
        .expect("delta");

    assert_eq!(
        delta.records(),
        &[ObjectRecord::new("in/A", 10), ObjectRecord::new("in/C", 10)]
    );
}

#[test]
fn excluded_and_processed_files_are_skipped() {
    let store = MemoryStore::default();
    store.put(INPUT, "in/A_timestamp_1.csv", 10);
    store.put(INPUT, "in/B_timestamp_1.csv", 10);
    store.put(INPUT, "in/C_timestamp_1.csv", 10);
    store.put(OUTPUT, "out/A_timestamp_9.parquet", 0);
    let mut config = job_config(10);
    config.exclusions = ExclusionSet::from_lines("# poisoned upstream\nin/C_timestamp_1.csv\n");

    let delta = SyncJob::new(&config, &store)
        .current_delta()
        .expect("delta");

    assert_eq!(delta.mode(), DeltaMode::Forward);
    assert_eq!(
        delta.records(),
        &[ObjectRecord::new("in/B_timestamp_1.csv", 10)]
    );
}

#[test]
fn dry_run_once_persists_audit_and_replay_reinvokes_it() {
    let store = MemoryStore::default();
    seed_inputs(&store, 3);
    let config = job_config(2);
    let job = SyncJob::new(&config, &store);
    let processor = MarkerWritingProcessor::new(&store, OUTPUT, "out/");
    let artifacts = MemoryArtifacts::default();
    let settings = dispatch_settings(2);
    let dispatcher = BatchDispatcher::new(&settings, &processor, &artifacts);

    let report = run_once(&job, &dispatcher, true).expect("dry run");

    assert_eq!(report.backlog, 3);
    let audit_key = match report.result {
        DispatchResult::DryRun { batch, audit_key } => {
            assert_eq!(batch.len(), 2);
            audit_key
        }
        other => panic!("expected dry run, got {other:?}"),
    };
    assert!(processor.received().is_empty());

    let body = artifacts.read_object(&audit_key).expect("audit record");
    let invocations = replay_audit_record(&body, &processor).expect("replay");

    assert_eq!(invocations, 1);
    assert_eq!(processor.received().len(), 2);
    assert_eq!(job.current_delta().expect("delta").len(), 1);
}

#[test]
fn consecutive_single_passes_keep_every_audit_record() {
    let store = MemoryStore::default();
    seed_inputs(&store, 4);
    let config = job_config(2);
    let job = SyncJob::new(&config, &store);
    let processor = MarkerWritingProcessor::new(&store, OUTPUT, "out/");
    let artifacts = MemoryArtifacts::default();

    let mut audit_keys = Vec::new();
    for run_id in ["20240501T080000.000Z", "20240501T081000.000Z"] {
        let settings = dispatch_settings_for_run(2, run_id);
        let dispatcher = BatchDispatcher::new(&settings, &processor, &artifacts);
        match run_once(&job, &dispatcher, false).expect("single pass").result {
            DispatchResult::Submitted { audit_key, .. } => audit_keys.push(audit_key),
            other => panic!("expected submitted batch, got {other:?}"),
        }
    }

    assert_ne!(audit_keys[0], audit_keys[1]);
    assert_eq!(artifacts.keys(), audit_keys);
    let first: serde_json::Value =
        serde_json::from_slice(&artifacts.read_object(&audit_keys[0]).expect("first record"))
            .expect("valid json");
    assert_eq!(
        first["records"][0]["key"],
        "in/orders-0_timestamp_20240501.csv"
    );
}
