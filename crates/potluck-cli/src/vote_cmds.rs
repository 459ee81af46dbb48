//! `potluck vote`, `decide`, `finalize` and `sweep`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use potluck_core::store::Ballot;
use potluck_core::sweep::ExpirySweep;
use potluck_core::voting::{SweepReport, VotingOutcome};

use crate::app::App;

pub struct BallotArgs {
    pub ranks: Vec<String>,
    pub abstain: bool,
    pub notes: String,
}

impl BallotArgs {
    fn into_ballot(self) -> Result<Ballot> {
        if !self.abstain && self.ranks.is_empty() {
            anyhow::bail!("rank every option with --rank (best first) or pass --abstain");
        }
        let mut ballot = if self.abstain {
            Ballot::abstain()
        } else {
            Ballot::ranked(self.ranks.into_iter().zip(1..))
        };
        ballot.notes = self.notes;
        Ok(ballot)
    }
}

pub async fn cmd_vote(
    app: &App,
    user: Option<&str>,
    event_id: &str,
    voter: &str,
    args: BallotArgs,
) -> Result<()> {
    let ballot = args.into_ballot()?;
    let ctx = app.ctx(Some(user.unwrap_or(voter)));
    let outcome = app
        .service
        .cast_ballot(&ctx, event_id, voter, &ballot)
        .await?;
    println!("Ballot recorded for {voter}.");
    print_outcome(&outcome);
    Ok(())
}

pub async fn cmd_decide(
    app: &App,
    user: Option<&str>,
    event_id: &str,
    option_id: &str,
) -> Result<()> {
    let Some(user) = user else {
        anyhow::bail!("deciding an event needs the plan owner: pass --as <user>");
    };
    let outcome = app
        .service
        .force_decide(&app.ctx(Some(user)), event_id, option_id)
        .await?;
    println!("Event {event_id} decided.");
    print_outcome(&outcome);
    Ok(())
}

pub async fn cmd_finalize(app: &App, user: Option<&str>, plan_id: &str) -> Result<()> {
    let outcome = app.service.finalize(&app.ctx(user), plan_id).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &VotingOutcome) {
    println!("  Plan ID:      {}", outcome.plan_id);
    if let Some(event) = &outcome.event {
        println!("  Event:        {} ({})", event.id, event.status);
        if let Some(chosen) = &event.chosen_option_id {
            println!("  Chosen:       {chosen}");
        }
    }
    println!("  Plan status:  {}", outcome.plan_status);
    if outcome.derived {
        println!("  Tasks and grocery list derived.");
    }
}

pub async fn cmd_sweep(app: &App, once: bool) -> Result<()> {
    let sweep = ExpirySweep::new(app.service.coordinator().clone(), app.sweep_config());

    if once {
        let report = sweep.run_once().await;
        print_report(&report);
        return Ok(());
    }

    // First signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nStopping sweep (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    println!(
        "Sweeping expired events every {}s. Ctrl+C to stop.",
        app.config.sweep_interval.as_secs()
    );
    let decided = sweep.spawn(cancel).await?;
    println!("Sweep stopped; {decided} event(s) decided.");
    Ok(())
}

fn print_report(report: &SweepReport) {
    if report.is_empty() {
        println!("No expired events or pending derivations.");
        return;
    }
    for event_id in &report.decided {
        println!("  decided    {event_id}");
    }
    for plan_id in &report.rederived {
        println!("  derived    {plan_id}");
    }
    for failure in &report.failed {
        let target = failure.event_id.as_deref().unwrap_or(&failure.plan_id);
        println!("  failed     {target}: {}", failure.error);
    }
}
