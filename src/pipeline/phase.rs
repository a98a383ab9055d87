use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout};

use crate::pipeline::error::{Phase, PipelineError};
use crate::ui;

/// Called with (completed, eligible) after every finished job.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

const MAX_REPORTED_FAILURES: usize = 10;
const MAX_REASON_LEN: usize = 120;

struct SlotFailure {
    label: String,
    reason: String,
}

/// Run one pipeline phase over a slot vector.
///
/// `jobs[i] == None` marks a slot the phase does not work on (placeholder or
/// already-failed); it stays `None` in the result. Workers run under a
/// semaphore of `workers` permits and return `(index, result)`; the driver
/// alone writes the output slots, so completion order never affects output
/// order.
///
/// The deadline covers the whole phase: when it expires, everything still
/// running or queued is aborted and the phase fails with its completion
/// ratio. After completion the per-slot failure count is checked against
/// `max_failure_rate` over `gate_denominator` slots. The caller passes the
/// non-placeholder count, which can be smaller than the job count when
/// placeholder pass-through jobs run in the phase. A zero denominator
/// disables the gate.
pub async fn run_phase<T, Fut>(
    phase: Phase,
    jobs: Vec<Option<Fut>>,
    labels: &[String],
    workers: usize,
    deadline: Duration,
    max_failure_rate: f64,
    gate_denominator: usize,
    progress: Option<ProgressFn>,
) -> Result<Vec<Option<T>>, PipelineError>
where
    T: Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    let total = jobs.len();
    let eligible = jobs.iter().filter(|job| job.is_some()).count();

    let mut slots: Vec<Option<T>> = std::iter::repeat_with(|| None).take(total).collect();
    if eligible == 0 {
        return Ok(slots);
    }

    let semaphore = Arc::new(Semaphore::new(workers));
    let mut set: JoinSet<(usize, anyhow::Result<T>)> = JoinSet::new();

    for (index, job) in jobs.into_iter().enumerate() {
        let Some(job) = job else { continue };
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("phase semaphore closed");
            (index, job.await)
        });
    }

    let started = Instant::now();
    let mut completed = 0usize;
    let mut failures: Vec<SlotFailure> = Vec::new();

    loop {
        let Some(remaining) = deadline.checked_sub(started.elapsed()) else {
            set.abort_all();
            return Err(PipelineError::PhaseTimeout {
                phase,
                completed,
                total: eligible,
            });
        };

        let joined = match timeout(remaining, set.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => {
                set.abort_all();
                return Err(PipelineError::PhaseTimeout {
                    phase,
                    completed,
                    total: eligible,
                });
            }
        };

        completed += 1;
        if let Some(callback) = &progress {
            callback(completed, eligible);
        }

        match joined {
            Ok((index, Ok(value))) => {
                slots[index] = Some(value);
            }
            Ok((index, Err(err))) => {
                let label = labels.get(index).cloned().unwrap_or_default();
                let reason = concise_reason(&err);
                ui::warn(
                    "phase.segment.failed",
                    &format!("{phase} failed for '{label}': {reason}"),
                );
                failures.push(SlotFailure { label, reason });
            }
            Err(join_err) => {
                if join_err.is_cancelled() {
                    continue;
                }
                failures.push(SlotFailure {
                    label: "(worker)".to_string(),
                    reason: join_err.to_string(),
                });
            }
        }
    }

    let failed = failures.len();
    if gate_denominator > 0 && failed as f64 / gate_denominator as f64 > max_failure_rate {
        let details = failures
            .iter()
            .take(MAX_REPORTED_FAILURES)
            .map(|f| format!("'{}' ({})", f.label, f.reason))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(PipelineError::FailureRateExceeded {
            phase,
            failed,
            eligible: gate_denominator,
            details,
        });
    }

    Ok(slots)
}

fn concise_reason(err: &anyhow::Error) -> String {
    let full = format!("{err:#}");
    let mut reason: String = full.chars().take(MAX_REASON_LEN).collect();
    if reason.len() < full.len() {
        reason.push('…');
    }
    reason
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::bail;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("w{i}")).collect()
    }

    #[tokio::test]
    async fn results_land_in_plan_order_despite_variable_delays() {
        let delays_ms = [10u64, 50, 20, 40, 30];
        let jobs: Vec<Option<_>> = delays_ms
            .iter()
            .enumerate()
            .map(|(i, &delay)| {
                Some(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok(i)
                })
            })
            .collect();

        let slots = run_phase(
            Phase::Fetch,
            jobs,
            &labels(5),
            4,
            Duration::from_secs(5),
            0.5,
            5,
            None,
        )
        .await
        .unwrap();

        assert_eq!(slots, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    }

    #[tokio::test]
    async fn ineligible_slots_stay_none() {
        let jobs: Vec<Option<std::future::Ready<anyhow::Result<usize>>>> =
            vec![Some(std::future::ready(Ok(0))), None, Some(std::future::ready(Ok(2)))];

        let slots = run_phase(
            Phase::Fetch,
            jobs,
            &labels(3),
            2,
            Duration::from_secs(1),
            0.5,
            2,
            None,
        )
        .await
        .unwrap();

        assert_eq!(slots, vec![Some(0), None, Some(2)]);
    }

    #[tokio::test]
    async fn failures_at_the_rate_boundary_pass() {
        // 5 of 10 failed at rate 0.5 is allowed.
        let jobs: Vec<Option<_>> = (0..10)
            .map(|i| {
                Some(async move {
                    if i % 2 == 0 {
                        bail!("synthetic failure")
                    }
                    Ok(i)
                })
            })
            .collect();

        let slots = run_phase(
            Phase::Fetch,
            jobs,
            &labels(10),
            4,
            Duration::from_secs(5),
            0.5,
            10,
            None,
        )
        .await
        .unwrap();

        assert_eq!(slots.iter().filter(|s| s.is_none()).count(), 5);
    }

    #[tokio::test]
    async fn failures_above_the_rate_are_fatal() {
        // 2 of 10 failed at rate 0.1 trips the gate.
        let jobs: Vec<Option<_>> = (0..10)
            .map(|i| {
                Some(async move {
                    if i < 2 {
                        bail!("synthetic failure")
                    }
                    Ok(i)
                })
            })
            .collect();

        let err = run_phase(
            Phase::Transcode,
            jobs,
            &labels(10),
            4,
            Duration::from_secs(5),
            0.1,
            10,
            None,
        )
        .await
        .unwrap_err();

        match err {
            PipelineError::FailureRateExceeded {
                phase,
                failed,
                eligible,
                details,
            } => {
                assert_eq!(phase, Phase::Transcode);
                assert_eq!(failed, 2);
                assert_eq!(eligible, 10);
                assert!(details.contains("synthetic failure"));
            }
            other => panic!("expected FailureRateExceeded, got {other}"),
        }
    }

    #[tokio::test]
    async fn deadline_aborts_the_phase() {
        let jobs: Vec<Option<_>> = (0..3)
            .map(|i| {
                Some(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(i)
                })
            })
            .collect();

        let err = run_phase(
            Phase::Fetch,
            jobs,
            &labels(3),
            2,
            Duration::from_millis(50),
            0.5,
            3,
            None,
        )
        .await
        .unwrap_err();

        match err {
            PipelineError::PhaseTimeout {
                phase,
                completed,
                total,
            } => {
                assert_eq!(phase, Phase::Fetch);
                assert_eq!(completed, 0);
                assert_eq!(total, 3);
            }
            other => panic!("expected PhaseTimeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn progress_reports_every_completion() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let progress: ProgressFn = Arc::new(move |done, total| {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(done <= total);
        });

        let jobs: Vec<Option<_>> = (0..4).map(|i| Some(async move { Ok(i) })).collect();
        run_phase(
            Phase::Fetch,
            jobs,
            &labels(4),
            2,
            Duration::from_secs(1),
            0.5,
            4,
            Some(progress),
        )
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
