//! `weft simulate`: request-per-task workload.
//!
//! Every request is one Task that does some I/O-like waiting. A share of
//! the requests also enter a shared exclusive section and wait inside it.
//! With the hostile lock those waits pin carriers and show up as pinning
//! events; with the friendly lock they unmount like any other wait.

use crate::output::StyledOutput;
use clap::ValueEnum;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use termcolor::ColorChoice;
use weft_core::{
    FriendlyLock, HostileLock, JoinHandle, PinningEvent, Scheduler, SchedulerConfig,
    SchedulerError, SchedulerStats, TaskFailure,
};

/// Pinning events listed in the text report
const MAX_LISTED_EVENTS: usize = 10;

/// Which lock guards the exclusive section
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    Hostile,
    Friendly,
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub requests: usize,
    /// Probability that a request enters the exclusive section
    pub critical_share: f64,
    /// Wait inside the exclusive section
    pub hold: Duration,
    /// Wait outside the exclusive section
    pub work: Duration,
    pub lock: LockKind,
    pub seed: Option<u64>,
    pub format: OutputFormat,
}

/// Simulation outcome
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub requests: usize,
    pub critical: usize,
    pub lock: LockKind,
    pub carriers: usize,
    pub elapsed_ms: u64,
    /// Requests refused by a bounded run queue
    pub rejected: usize,
    /// Requests that failed or were cancelled
    pub failed: usize,
    /// Final value of the guarded counter
    pub counter: u64,
    pub stats: SchedulerStats,
    pub pinning_events: Vec<PinningEvent>,
}

enum Section {
    Hostile(Arc<HostileLock<u64>>),
    Friendly(Arc<FriendlyLock<u64>>),
}

impl Section {
    fn new(kind: LockKind) -> Self {
        match kind {
            LockKind::Hostile => Section::Hostile(Arc::new(HostileLock::new(0))),
            LockKind::Friendly => Section::Friendly(Arc::new(FriendlyLock::new(0))),
        }
    }

    fn value(&self) -> u64 {
        match self {
            Section::Hostile(lock) => *lock.lock_blocking(),
            Section::Friendly(lock) => *lock.lock_blocking(),
        }
    }
}

fn submit_request(
    scheduler: &Scheduler,
    index: usize,
    section: &Section,
    critical: bool,
    hold: Duration,
    work: Duration,
) -> Result<JoinHandle<()>, SchedulerError> {
    let name = format!("request-{}", index);
    match (section, critical) {
        (_, false) => scheduler.submit_named(name, move |cx| async move {
            cx.sleep(work).await;
            Ok::<_, TaskFailure>(())
        }),
        (Section::Hostile(lock), true) => {
            let lock = Arc::clone(lock);
            scheduler.submit_named(name, move |cx| async move {
                cx.sleep(work).await;
                let mut guard = lock.lock(&cx);
                cx.sleep(hold).await;
                *guard += 1;
                Ok::<_, TaskFailure>(())
            })
        }
        (Section::Friendly(lock), true) => {
            let lock = Arc::clone(lock);
            scheduler.submit_named(name, move |cx| async move {
                cx.sleep(work).await;
                let mut guard = lock.lock(&cx).await;
                cx.sleep(hold).await;
                *guard += 1;
                Ok::<_, TaskFailure>(())
            })
        }
    }
}

/// Run the workload and collect the report
pub fn run(config: SchedulerConfig, options: &SimulateOptions) -> anyhow::Result<SimulationReport> {
    if !(0.0..=1.0).contains(&options.critical_share) {
        anyhow::bail!(
            "--critical-share must be between 0 and 1, got {}",
            options.critical_share
        );
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let carriers = config.carrier_pool_size;
    let scheduler = Scheduler::new(config);
    let section = Section::new(options.lock);
    let began = SystemTime::now();
    let clock = Instant::now();
    scheduler.start()?;

    tracing::info!(
        requests = options.requests,
        carriers,
        lock = ?options.lock,
        "simulation started"
    );

    let mut handles = Vec::with_capacity(options.requests);
    let mut critical = 0;
    let mut rejected = 0;
    for index in 0..options.requests {
        let is_critical = rng.gen_bool(options.critical_share);
        match submit_request(
            &scheduler,
            index,
            &section,
            is_critical,
            options.hold,
            options.work,
        ) {
            Ok(handle) => {
                if is_critical {
                    critical += 1;
                }
                handles.push(handle);
            }
            Err(SchedulerError::CapacityExceeded { .. }) => rejected += 1,
            Err(e) => return Err(e.into()),
        }
    }

    let mut failed = 0;
    for handle in handles {
        if let Err(e) = handle.join() {
            tracing::debug!(error = %e, "request did not complete");
            failed += 1;
        }
    }

    let elapsed_ms = clock.elapsed().as_millis() as u64;
    let stats = scheduler.stats();
    let pinning_events = scheduler.list_pinning_events(began);
    scheduler.shutdown();

    Ok(SimulationReport {
        requests: options.requests,
        critical,
        lock: options.lock,
        carriers,
        elapsed_ms,
        rejected,
        failed,
        counter: section.value(),
        stats,
        pinning_events,
    })
}

pub fn execute(
    config: SchedulerConfig,
    options: SimulateOptions,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let report = run(config, &options)?;
    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_text(&report, color),
    }
    Ok(())
}

fn print_text(report: &SimulationReport, color: ColorChoice) {
    let mut out = StyledOutput::new(color);
    let lock = match report.lock {
        LockKind::Hostile => "hostile",
        LockKind::Friendly => "friendly",
    };

    out.bold("Simulation");
    out.plain(&format!(
        "  {} requests on {} carriers ({} lock)",
        report.requests, report.carriers, lock
    ));
    out.newline();
    out.row("critical", report.critical);
    out.row("elapsed", format!("{} ms", report.elapsed_ms));
    out.row("completed", report.stats.completed);
    out.row("failed", report.failed);
    out.row("rejected", report.rejected);
    out.row("unmounts", report.stats.unmounts);
    out.row("pinned blocks", report.stats.pinned_blocks);
    out.row("carrier stalls", report.stats.carrier_stalls);
    out.row("peak running", report.stats.peak_running);
    out.newline();

    if report.pinning_events.is_empty() {
        out.success("No pinning events");
        out.newline();
        out.flush();
        return;
    }

    let longest = report
        .pinning_events
        .iter()
        .map(|e| e.duration)
        .max()
        .unwrap_or_default();
    out.warning(&format!("{} pinning events", report.pinning_events.len()));
    out.plain(&format!(" (longest {:.1?})", longest));
    out.newline();

    for event in report.pinning_events.iter().take(MAX_LISTED_EVENTS) {
        let carrier = event
            .carrier_id
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.plain(&format!(
            "  #{:<4} {:<10} {:<11} {:>9.1?}  ",
            event.seq, event.task_id, carrier, event.duration
        ));
        out.info(&event.reason.to_string());
        out.plain(&format!("  at {}", event.location));
        out.newline();
    }
    if report.pinning_events.len() > MAX_LISTED_EVENTS {
        out.plain(&format!(
            "  ... {} more",
            report.pinning_events.len() - MAX_LISTED_EVENTS
        ));
        out.newline();
    }
    out.flush();
}
