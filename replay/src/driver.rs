//! Step feeder and event loop.
//!
//! A spawned task feeds steps over a channel, pausing between them to mimic
//! network latency. The reconciliation context is not `Send`, so it stays on
//! the event loop and is only touched from there.

use crate::{
    config::Config,
    error::{AppError, AppResult},
    script::{Action, Script, Step},
};
use hedge_engine::{ReconciliationContext, RevertReport, StoreSnapshot};
use std::{cell::Cell, rc::Rc, time::Duration};
use tokio::sync::mpsc;

/// Result of replaying a script.
#[derive(Debug)]
pub struct Outcome {
    /// Final live cache
    pub snapshot: StoreSnapshot,
    /// Non-empty revert reports, in order
    pub reports: Vec<RevertReport>,
    /// Number of change events observers saw
    pub events: usize,
}

/// Replay `script` to completion, starting from `initial` if given.
pub async fn run(
    script: Script,
    initial: Option<StoreSnapshot>,
    config: &Config,
) -> AppResult<Outcome> {
    let mut ctx = ReconciliationContext::new(config.engine());
    if let Some(snapshot) = initial {
        ctx.load_snapshot(snapshot)?;
    }
    for model in &script.models {
        ctx.register_model(model.as_str());
    }

    let events = Rc::new(Cell::new(0_usize));
    let counter = Rc::clone(&events);
    ctx.observe(move |model, change, _| {
        counter.set(counter.get() + 1);
        tracing::info!(
            model,
            id = change.id(),
            kind = %change.kind(),
            flag = ?change.flag(),
            "change"
        );
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<Step>();
    let feeder = tokio::spawn(feed(script.steps, tx, config.step_delay));

    let mut reports = Vec::new();
    let mut index = 0;
    while let Some(step) = rx.recv().await {
        index += 1;
        tracing::debug!(step = index, kind = step.name(), "applying step");
        let report =
            apply(&mut ctx, step.into_action()).map_err(|source| AppError::Step { step: index, source })?;
        if let Some(report) = report.filter(|r| !r.is_empty()) {
            reports.push(report);
        }
    }
    feeder.await?;

    if !ctx.round_trips().is_idle() {
        tracing::warn!(
            outstanding = ctx.round_trips().outstanding(),
            "script ended with round trips still outstanding"
        );
    }

    Ok(Outcome {
        snapshot: ctx.store().export_state(),
        reports,
        events: events.get(),
    })
}

async fn feed(steps: Vec<Step>, tx: mpsc::UnboundedSender<Step>, delay: Duration) {
    for step in steps {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if tx.send(step).is_err() {
            tracing::debug!("event loop stopped; dropping remaining steps");
            break;
        }
    }
}

fn apply(
    ctx: &mut ReconciliationContext,
    action: Action,
) -> hedge_engine::Result<Option<RevertReport>> {
    match action {
        Action::BeginRoundTrip => {
            ctx.begin_round_trip();
            Ok(None)
        }
        Action::EndRoundTrip => ctx.end_round_trip().map(Some),
        Action::Local(write) => ctx.apply_local(write).map(|_| None),
        Action::Authoritative(update) => ctx.apply_authoritative(update).map(|_| None),
    }
}
