//! Concurrent researcher dispatch.
//!
//! One task per plan section on a [`JoinSet`], gated by a semaphore. Every
//! section yields exactly one result: agent errors and panics become
//! degraded results. Results come back in plan order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use delve_agents::{Agent, AgentOutput, AgentTask};
use delve_common::{Plan, ResearchResult, Section, StepTrace};
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::session::{SessionRun, StepError};

/// A researcher task finished without producing a result.
#[derive(Debug)]
pub(crate) struct Cancelled;

/// Research every section of `plan`, at most `max_concurrent` at a time.
///
/// Returns `Err(Cancelled)` if the session is cancelled before all sections
/// finish; in-flight tasks are aborted and their results discarded.
#[instrument(skip_all, fields(session_id = %run.session_id(), sections = plan.len()))]
pub(crate) async fn research_sections(
    run: Arc<SessionRun>,
    researcher: Arc<dyn Agent>,
    plan: &Plan,
    max_concurrent: usize,
) -> Result<Vec<ResearchResult>, Cancelled> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();

    for (index, section) in plan.sections().iter().cloned().enumerate() {
        let run = run.clone();
        let researcher = researcher.clone();
        let semaphore = semaphore.clone();

        tasks.spawn(async move {
            let permit = tokio::select! {
                _ = run.cancel.cancelled() => return (index, None),
                permit = semaphore.acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return (index, None);
            };

            let attempt = AssertUnwindSafe(research_one(&run, researcher.as_ref(), &section))
                .catch_unwind()
                .await;
            let result = match attempt {
                Ok(result) => result,
                Err(panic) => Some(recover_panic(&run, researcher.as_ref(), &section, panic)),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<ResearchResult>> = vec![None; plan.len()];
    loop {
        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => {
                tasks.abort_all();
                info!(session_id = %run.session_id(), "Research fan-out cancelled");
                return Err(Cancelled);
            }
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok((index, Some(result)))) => {
                    debug!(
                        session_id = %run.session_id(),
                        section_id = %result.section_id,
                        degraded = result.degraded,
                        "Section finished"
                    );
                    slots[index] = Some(result);
                }
                Some(Ok((_, None))) => {}
                Some(Err(e)) => {
                    error!(session_id = %run.session_id(), error = %e, "Researcher task join error");
                }
            }
        }
    }

    if run.cancel.is_cancelled() {
        return Err(Cancelled);
    }

    Ok(plan
        .sections()
        .iter()
        .zip(slots)
        .map(|(section, slot)| {
            slot.unwrap_or_else(|| {
                ResearchResult::degraded(section, "researcher task ended without a result")
            })
        })
        .collect())
}

/// `None` only when cancelled.
async fn research_one(
    run: &SessionRun,
    researcher: &dyn Agent,
    section: &Section,
) -> Option<ResearchResult> {
    let task = AgentTask::Research {
        section: section.clone(),
    };

    match run.step(researcher, task).await {
        Ok(AgentOutput::Research(result)) => Some(result),
        Ok(_) => {
            warn!(section_id = %section.id, "Researcher returned a non-research output");
            Some(ResearchResult::degraded(section, "researcher returned no research result"))
        }
        Err(StepError::Agent(e)) => Some(ResearchResult::degraded(section, &e.message)),
        Err(StepError::Cancelled) => None,
    }
}

fn recover_panic(
    run: &SessionRun,
    researcher: &dyn Agent,
    section: &Section,
    panic: Box<dyn Any + Send>,
) -> ResearchResult {
    let message = panic_message(panic.as_ref());
    error!(
        session_id = %run.session_id(),
        section_id = %section.id,
        panic = %message,
        "Researcher panicked"
    );

    let result = ResearchResult::degraded(section, format!("researcher panicked: {message}"));
    let trace = StepTrace::new(researcher.name(), section.title.clone())
        .with_output(result.summary.clone())
        .with_decision(format!("degraded: researcher panicked: {message}"));
    run.record_synthetic(trace, AgentOutput::Research(result.clone()).user_facing());
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
