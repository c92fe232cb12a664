//! Weighted progress aggregation.
//!
//! Every multi-stage operation declares its stages up front with weights
//! summing to 100. Each stage reports a local fraction in `[0, 1]`; the
//! coordinator maps it onto the overall percentage and forwards it to the
//! caller's sink. The overall value never decreases, even when a fallback
//! path restarts work inside a stage.

use std::sync::{Arc, Mutex};

use crate::error::{ReelError, ReelResult};

/// Progress report delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ReelProgress {
    /// Overall completion in `[0, 100]`.
    pub percent: f64,
    /// Human-readable stage label.
    pub stage: String,
}

/// Caller-supplied progress sink.
pub type ProgressCallback = Arc<dyn Fn(ReelProgress) + Send + Sync>;

#[derive(Debug, Clone)]
struct StagePlan {
    label: String,
    start: f64,
    weight: f64,
}

struct CoordinatorState {
    percent: f64,
    stage: String,
}

struct Shared {
    sink: Option<ProgressCallback>,
    plan: Vec<StagePlan>,
    state: Mutex<CoordinatorState>,
    // Held from the state update until the sink returns, so reports reach
    // the sink in the order they were accepted.
    delivery: Mutex<()>,
}

/// Aggregates weighted stage progress into a single monotonic percentage.
#[derive(Clone)]
pub struct ProgressCoordinator {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("plan", &self.shared.plan)
            .field("percent", &self.percent())
            .finish()
    }
}

impl ProgressCoordinator {
    /// Build a coordinator from `(label, weight)` pairs. Weights must be
    /// positive and sum to 100.
    pub fn new(sink: Option<ProgressCallback>, stages: &[(&str, f64)]) -> ReelResult<Self> {
        if stages.is_empty() {
            return Err(ReelError::invalid_input("progress plan has no stages"));
        }
        let mut plan = Vec::with_capacity(stages.len());
        let mut start = 0.0;
        for (label, weight) in stages {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(ReelError::invalid_input(format!(
                    "progress stage '{label}' has invalid weight {weight}"
                )));
            }
            plan.push(StagePlan {
                label: (*label).to_string(),
                start,
                weight: *weight,
            });
            start += weight;
        }
        if (start - 100.0).abs() > 1e-6 {
            return Err(ReelError::invalid_input(format!(
                "progress weights sum to {start}, expected 100"
            )));
        }

        Ok(Self {
            shared: Arc::new(Shared {
                sink,
                plan,
                state: Mutex::new(CoordinatorState {
                    percent: 0.0,
                    stage: String::new(),
                }),
                delivery: Mutex::new(()),
            }),
        })
    }

    /// A single-stage coordinator with no sink.
    pub fn silent() -> Self {
        Self {
            shared: Arc::new(Shared {
                sink: None,
                plan: vec![StagePlan {
                    label: "work".to_string(),
                    start: 0.0,
                    weight: 100.0,
                }],
                state: Mutex::new(CoordinatorState {
                    percent: 0.0,
                    stage: String::new(),
                }),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Reporter for the named stage. Unknown labels yield a zero-width
    /// reporter pinned at the current percentage.
    pub fn stage(&self, label: &str) -> StageProgress {
        match self.shared.plan.iter().find(|s| s.label == label) {
            Some(plan) => StageProgress {
                coordinator: self.clone(),
                label: plan.label.clone(),
                start: plan.start,
                span: plan.weight,
            },
            None => {
                tracing::debug!(stage = label, "Progress stage not in plan");
                StageProgress {
                    coordinator: self.clone(),
                    label: label.to_string(),
                    start: self.percent(),
                    span: 0.0,
                }
            }
        }
    }

    /// Current overall percentage.
    pub fn percent(&self) -> f64 {
        self.shared
            .state
            .lock()
            .map(|state| state.percent)
            .unwrap_or(0.0)
    }

    /// Jump to 100% with the given label.
    pub fn finish(&self, label: &str) {
        self.emit(100.0, label);
    }

    fn emit(&self, percent: f64, label: &str) {
        let percent = percent.clamp(0.0, 100.0);
        let _delivery = self
            .shared
            .delivery
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let report = {
            let Ok(mut state) = self.shared.state.lock() else {
                return;
            };
            let next = percent.max(state.percent);
            let moved = next > state.percent + 0.05 || (next >= 100.0 && state.percent < 100.0);
            let relabeled = state.stage != label;
            if !moved && !relabeled {
                return;
            }
            state.percent = next;
            state.stage = label.to_string();
            ReelProgress {
                percent: next,
                stage: label.to_string(),
            }
        };

        tracing::trace!(percent = report.percent, stage = %report.stage, "Progress");
        if let Some(sink) = &self.shared.sink {
            sink(report);
        }
    }
}

/// Reporter for one stage (or a sub-range of one).
#[derive(Debug, Clone)]
pub struct StageProgress {
    coordinator: ProgressCoordinator,
    label: String,
    start: f64,
    span: f64,
}

impl StageProgress {
    /// Report local completion in `[0, 1]`.
    pub fn report(&self, fraction: f64) {
        self.report_labeled(fraction, &self.label);
    }

    /// Report local completion with a more specific label.
    pub fn report_labeled(&self, fraction: f64, label: &str) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.coordinator
            .emit(self.start + self.span * fraction, label);
    }

    /// Mark the stage as started.
    pub fn begin(&self) {
        self.report(0.0);
    }

    /// Mark the stage as done.
    pub fn complete(&self) {
        self.report(1.0);
    }

    /// A reporter covering `[from, to]` of this stage.
    pub fn sub_range(&self, from: f64, to: f64) -> StageProgress {
        let from = from.clamp(0.0, 1.0);
        let to = to.clamp(from, 1.0);
        StageProgress {
            coordinator: self.coordinator.clone(),
            label: self.label.clone(),
            start: self.start + self.span * from,
            span: self.span * (to - from),
        }
    }

    /// Like [`StageProgress::sub_range`] with its own label.
    pub fn sub_stage(&self, from: f64, to: f64, label: impl Into<String>) -> StageProgress {
        let mut sub = self.sub_range(from, to);
        sub.label = label.into();
        sub
    }

    /// Split the stage into `parts` equal consecutive reporters.
    pub fn split(&self, parts: usize) -> Vec<StageProgress> {
        let parts = parts.max(1);
        (0..parts)
            .map(|i| self.sub_range(i as f64 / parts as f64, (i + 1) as f64 / parts as f64))
            .collect()
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_sink() -> (ProgressCallback, Arc<Mutex<Vec<ReelProgress>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: ProgressCallback = Arc::new(move |p| sink_seen.lock().unwrap().push(p));
        (sink, seen)
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        assert!(ProgressCoordinator::new(None, &[("a", 50.0), ("b", 40.0)]).is_err());
        assert!(ProgressCoordinator::new(None, &[("a", 0.0), ("b", 100.0)]).is_err());
        assert!(ProgressCoordinator::new(None, &[("a", 60.0), ("b", 40.0)]).is_ok());
    }

    #[test]
    fn test_stage_fraction_maps_to_overall_percent() {
        let (sink, seen) = recording_sink();
        let progress = ProgressCoordinator::new(
            Some(sink),
            &[("load", 20.0), ("normalize", 60.0), ("concat", 15.0), ("finalize", 5.0)],
        )
        .unwrap();

        progress.stage("load").complete();
        progress.stage("normalize").report(0.5);
        assert!((progress.percent() - 50.0).abs() < 1e-9);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.last().unwrap().stage, "normalize");
    }

    #[test]
    fn test_progress_never_decreases() {
        let (sink, seen) = recording_sink();
        let progress =
            ProgressCoordinator::new(Some(sink), &[("encode", 80.0), ("finalize", 20.0)]).unwrap();
        let encode = progress.stage("encode");
        encode.report(0.75);
        // A fallback strategy restarting inside the same stage
        encode.report_labeled(0.1, "frame export");
        encode.report(0.9);

        let seen = seen.lock().unwrap();
        for pair in seen.windows(2) {
            assert!(pair[1].percent >= pair[0].percent);
        }
        assert!((progress.percent() - 72.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reporters_deliver_in_order() {
        let (sink, seen) = recording_sink();
        let progress = ProgressCoordinator::new(Some(sink), &[("normalize", 100.0)]).unwrap();
        let parts = progress.stage("normalize").split(4);

        std::thread::scope(|scope| {
            for part in &parts {
                scope.spawn(move || {
                    for step in 1..=200 {
                        part.report(step as f64 / 200.0);
                    }
                });
            }
        });

        let seen = seen.lock().unwrap();
        assert!(seen.len() > 1);
        for pair in seen.windows(2) {
            assert!(pair[1].percent >= pair[0].percent, "{pair:?}");
        }
        assert!((progress.percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_covers_stage_evenly() {
        let progress = ProgressCoordinator::new(None, &[("load", 20.0), ("normalize", 80.0)]).unwrap();
        let parts = progress.stage("normalize").split(4);
        assert_eq!(parts.len(), 4);
        parts[0].complete();
        assert!((progress.percent() - 40.0).abs() < 1e-9);
        parts[3].sub_range(0.5, 1.0).complete();
        assert!((progress.percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_stage_is_inert() {
        let progress = ProgressCoordinator::new(None, &[("a", 100.0)]).unwrap();
        progress.stage("a").report(0.3);
        progress.stage("missing").complete();
        assert!((progress.percent() - 30.0).abs() < 1e-9);
    }
}
