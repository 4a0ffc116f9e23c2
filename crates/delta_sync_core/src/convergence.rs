use std::time::Duration;

use crate::delta::DeltaSet;
use crate::dispatch::{BatchDispatcher, DispatchResult};
use crate::error::SyncError;
use crate::job::SyncJob;
use crate::sleep::Sleeper;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Anything that can report the current backlog.
pub trait BacklogSource {
    fn current_delta(&self) -> Result<DeltaSet, SyncError>;
}

impl BacklogSource for SyncJob<'_> {
    fn current_delta(&self) -> Result<DeltaSet, SyncError> {
        SyncJob::current_delta(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Listing,
    Dispatching,
    Waiting,
    Drained,
    Stalled,
    DryRunStop,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Drained | Self::Stalled | Self::DryRunStop)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceSettings {
    pub poll_interval: Duration,
    pub dry_run: bool,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Drained {
        cycles: usize,
        dispatched: usize,
    },
    Stalled {
        cycles: usize,
        dispatched: usize,
        expected_backlog: usize,
        observed_backlog: usize,
    },
    DryRunStop {
        batch_size: usize,
        backlog: usize,
        audit_key: String,
    },
}

/// Backlog expected after one batch was consumed. Progress must match it
/// exactly; anything else counts as a stall.
pub fn expected_backlog(previous: usize, limit: usize) -> usize {
    previous.saturating_sub(limit)
}

/// Dispatch, wait, re-list until the backlog drains or stops shrinking by
/// exactly one batch per cycle.
pub struct ConvergenceLoop<'a> {
    source: &'a dyn BacklogSource,
    dispatcher: &'a BatchDispatcher<'a>,
    sleeper: &'a dyn Sleeper,
    settings: ConvergenceSettings,
    history: Vec<LoopState>,
}

impl<'a> ConvergenceLoop<'a> {
    pub fn new(
        source: &'a dyn BacklogSource,
        dispatcher: &'a BatchDispatcher<'a>,
        sleeper: &'a dyn Sleeper,
        settings: ConvergenceSettings,
    ) -> Self {
        Self {
            source,
            dispatcher,
            sleeper,
            settings,
            history: vec![LoopState::Idle],
        }
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> &[LoopState] {
        &self.history
    }

    pub fn state(&self) -> LoopState {
        self.history.last().copied().unwrap_or(LoopState::Idle)
    }

    pub fn run(&mut self) -> Result<LoopOutcome, SyncError> {
        let limit = self.dispatcher.limit();
        let mut cycles = 0usize;
        let mut dispatched = 0usize;

        self.enter(LoopState::Listing);
        let mut delta = self.source.current_delta()?;

        loop {
            if delta.is_empty() {
                self.enter(LoopState::Drained);
                tracing::info!(
                    component = "convergence",
                    event = "drained",
                    cycles,
                    dispatched
                );
                return Ok(LoopOutcome::Drained { cycles, dispatched });
            }

            self.enter(LoopState::Dispatching);
            cycles += 1;
            match self
                .dispatcher
                .dispatch(&delta, cycles, self.settings.dry_run)?
            {
                DispatchResult::DryRun { batch, audit_key } => {
                    self.enter(LoopState::DryRunStop);
                    tracing::info!(
                        component = "convergence",
                        event = "dry_run_stop",
                        batch_size = batch.len(),
                        backlog = delta.len(),
                        audit_key = audit_key.as_str()
                    );
                    return Ok(LoopOutcome::DryRunStop {
                        batch_size: batch.len(),
                        backlog: delta.len(),
                        audit_key,
                    });
                }
                DispatchResult::Submitted { batch, .. } => dispatched += batch.len(),
                DispatchResult::NothingToDo => {
                    self.enter(LoopState::Drained);
                    return Ok(LoopOutcome::Drained { cycles, dispatched });
                }
            }

            self.enter(LoopState::Waiting);
            self.sleeper.sleep(self.settings.poll_interval);

            let previous = delta.len();
            let expected = expected_backlog(previous, limit);
            self.enter(LoopState::Listing);
            delta = self.source.current_delta()?;

            if delta.len() != expected {
                self.enter(LoopState::Stalled);
                tracing::warn!(
                    component = "convergence",
                    event = "stalled",
                    cycles,
                    dispatched,
                    previous_backlog = previous,
                    expected_backlog = expected,
                    observed_backlog = delta.len()
                );
                return Ok(LoopOutcome::Stalled {
                    cycles,
                    dispatched,
                    expected_backlog: expected,
                    observed_backlog: delta.len(),
                });
            }
            tracing::info!(
                component = "convergence",
                event = "cycle_progressed",
                cycle = cycles,
                backlog = delta.len()
            );
        }
    }

    fn enter(&mut self, state: LoopState) {
        tracing::debug!(component = "convergence", event = "state", state = ?state);
        self.history.push(state);
    }
}

/// Result of a single non-polling dispatch pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnceReport {
    pub backlog: usize,
    pub result: DispatchResult,
}

pub fn run_once(
    source: &dyn BacklogSource,
    dispatcher: &BatchDispatcher<'_>,
    dry_run: bool,
) -> Result<OnceReport, SyncError> {
    let delta = source.current_delta()?;
    let result = dispatcher.dispatch(&delta, 1, dry_run)?;
    Ok(OnceReport {
        backlog: delta.len(),
        result,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::contract::{EnvelopeFormat, InvokeGranularity};
    use crate::delta::{compute_delta, ExclusionSet};
    use crate::dispatch::{ArtifactStore, BatchInvoker, DispatchSettings};
    use crate::error::SyncStage;
    use crate::keys::KeyNormalizer;
    use crate::listing::ObjectRecord;

    use super::*;

    /// Replays a scripted sequence of backlog sizes.
    struct ScriptedBacklog {
        sizes: RefCell<VecDeque<Result<usize, String>>>,
    }

    impl ScriptedBacklog {
        fn new(sizes: Vec<Result<usize, String>>) -> Self {
            Self {
                sizes: RefCell::new(sizes.into()),
            }
        }
    }

    impl BacklogSource for ScriptedBacklog {
        fn current_delta(&self) -> Result<DeltaSet, SyncError> {
            let next = self
                .sizes
                .borrow_mut()
                .pop_front()
                .expect("script exhausted");
            let size = next.map_err(|message| SyncError::StoreUnavailable {
                stage: SyncStage::Listing,
                message,
            })?;
            let inputs: Vec<ObjectRecord> = (0..size)
                .map(|index| ObjectRecord::new(format!("in/{index}"), 1))
                .collect();
            Ok(compute_delta(
                &KeyNormalizer::default(),
                &inputs,
                &[],
                &[],
                &ExclusionSet::default(),
            ))
        }
    }

    #[derive(Default)]
    struct CountingInvoker {
        calls: Mutex<usize>,
    }

    impl BatchInvoker for CountingInvoker {
        fn invoke_batch(&self, _payload: &[u8]) -> Result<(), String> {
            *self.calls.lock().expect("poisoned mutex") += 1;
            Ok(())
        }
    }

    struct NullArtifacts;

    impl ArtifactStore for NullArtifacts {
        fn write_object(&self, _key: &str, _body: &[u8]) -> Result<(), String> {
            Ok(())
        }

        fn read_object(&self, key: &str) -> Result<Vec<u8>, String> {
            Err(format!("missing {key}"))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        naps: Cell<usize>,
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, _duration: Duration) {
            self.naps.set(self.naps.get() + 1);
        }
    }

    fn settings(limit: usize) -> DispatchSettings {
        DispatchSettings {
            job: "job".to_string(),
            run_id: "run".to_string(),
            store_id: "bucket".to_string(),
            audit_prefix: String::new(),
            key_rule: "delimited-v2:_timestamp".to_string(),
            format: EnvelopeFormat::Compact,
            granularity: InvokeGranularity::Batch,
            limit,
        }
    }

    fn run_script(
        limit: usize,
        dry_run: bool,
        sizes: Vec<Result<usize, String>>,
    ) -> (Result<LoopOutcome, SyncError>, Vec<LoopState>, usize, usize) {
        let source = ScriptedBacklog::new(sizes);
        let invoker = CountingInvoker::default();
        let dispatch_settings = settings(limit);
        let dispatcher = BatchDispatcher::new(&dispatch_settings, &invoker, &NullArtifacts);
        let sleeper = RecordingSleeper::default();
        let mut convergence = ConvergenceLoop::new(
            &source,
            &dispatcher,
            &sleeper,
            ConvergenceSettings {
                poll_interval: Duration::from_secs(30),
                dry_run,
            },
        );
        let outcome = convergence.run();
        let calls = *invoker.calls.lock().expect("poisoned mutex");
        (outcome, convergence.history().to_vec(), calls, sleeper.naps.get())
    }

    #[test]
    fn exact_batch_reduction_keeps_polling_until_drained() {
        let (outcome, history, calls, naps) =
            run_script(4, false, vec![Ok(10), Ok(6), Ok(2), Ok(0)]);

        assert_eq!(
            outcome.expect("loop should finish"),
            LoopOutcome::Drained {
                cycles: 3,
                dispatched: 10
            }
        );
        assert_eq!(calls, 3);
        assert_eq!(naps, 3);
        assert_eq!(history.first(), Some(&LoopState::Idle));
        assert_eq!(history.last(), Some(&LoopState::Drained));
    }

    #[test]
    fn slower_progress_is_a_stall() {
        let (outcome, _, calls, _) = run_script(4, false, vec![Ok(10), Ok(7)]);

        assert_eq!(
            outcome.expect("stall is not an error"),
            LoopOutcome::Stalled {
                cycles: 1,
                dispatched: 4,
                expected_backlog: 6,
                observed_backlog: 7
            }
        );
        assert_eq!(calls, 1);
    }

    #[test]
    fn faster_progress_is_also_a_stall() {
        let (outcome, history, _, _) = run_script(4, false, vec![Ok(10), Ok(5)]);

        assert!(matches!(
            outcome.expect("stall is not an error"),
            LoopOutcome::Stalled {
                expected_backlog: 6,
                observed_backlog: 5,
                ..
            }
        ));
        assert_eq!(history.last(), Some(&LoopState::Stalled));
    }

    #[test]
    fn empty_initial_backlog_drains_without_dispatch() {
        let (outcome, history, calls, naps) = run_script(4, false, vec![Ok(0)]);

        assert_eq!(
            outcome.expect("loop should finish"),
            LoopOutcome::Drained {
                cycles: 0,
                dispatched: 0
            }
        );
        assert_eq!(calls, 0);
        assert_eq!(naps, 0);
        assert_eq!(
            history,
            vec![LoopState::Idle, LoopState::Listing, LoopState::Drained]
        );
    }

    #[test]
    fn dry_run_stops_after_one_decision() {
        let (outcome, history, calls, naps) = run_script(4, true, vec![Ok(10)]);

        assert!(matches!(
            outcome.expect("dry run should finish"),
            LoopOutcome::DryRunStop {
                batch_size: 4,
                backlog: 10,
                ..
            }
        ));
        assert_eq!(calls, 0);
        assert_eq!(naps, 0);
        assert_eq!(
            history,
            vec![
                LoopState::Idle,
                LoopState::Listing,
                LoopState::Dispatching,
                LoopState::DryRunStop
            ]
        );
    }

    #[test]
    fn short_final_batch_expects_empty_backlog() {
        let (outcome, _, _, _) = run_script(4, false, vec![Ok(3), Ok(0)]);

        assert_eq!(
            outcome.expect("loop should finish"),
            LoopOutcome::Drained {
                cycles: 1,
                dispatched: 3
            }
        );
    }

    #[test]
    fn listing_failure_mid_loop_is_fatal() {
        let (outcome, _, calls, _) =
            run_script(4, false, vec![Ok(8), Err("connection reset".to_string())]);

        let error = outcome.expect_err("listing failure should abort");
        assert_eq!(error.stage(), SyncStage::Listing);
        assert_eq!(calls, 1);
    }

    #[test]
    fn expected_backlog_is_exact_batch_reduction() {
        assert_eq!(expected_backlog(10, 4), 6);
        assert_eq!(expected_backlog(3, 4), 0);
    }

    #[test]
    fn run_once_dispatches_a_single_batch() {
        let source = ScriptedBacklog::new(vec![Ok(7)]);
        let invoker = CountingInvoker::default();
        let dispatch_settings = settings(5);
        let dispatcher = BatchDispatcher::new(&dispatch_settings, &invoker, &NullArtifacts);

        let report = run_once(&source, &dispatcher, false).expect("single pass should succeed");

        assert_eq!(report.backlog, 7);
        assert!(matches!(
            report.result,
            DispatchResult::Submitted { ref batch, .. } if batch.len() == 5
        ));
        assert_eq!(*invoker.calls.lock().expect("poisoned mutex"), 1);
    }
}
