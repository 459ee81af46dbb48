//! Winner selection for one event.
//!
//! Each ranking voter gives option `o` a score of `1 / rank(o)`. Scores are
//! summed exactly by scaling with `lcm(1..=n)`, so equal sums always
//! compare equal. Ties fall through: most first-choice votes, then lowest
//! rank sum, then the plan's tie-break policy.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use potluck_db::models::{MealPlan, TieBreakPolicy};

use crate::error::PlanError;
use crate::store::EventAggregate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionScore {
    pub option_id: String,
    /// Sum of `1 / rank`, scaled by `lcm(1..=n)`.
    pub scaled_score: u128,
    pub first_choices: u32,
    pub rank_sum: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TallyResult {
    pub winner: String,
    /// True when the tie-break policy picked the winner.
    pub tie_broken: bool,
    pub scores: Vec<OptionScore>,
}

/// Pick the winning option of `event` from its live ranked votes.
///
/// Abstentions are ignored. An event with no ranked votes leaves every
/// option tied and goes straight to the tie-break policy.
pub fn tally(plan: &MealPlan, event: &EventAggregate) -> Result<TallyResult, PlanError> {
    if event.options.is_empty() {
        return Err(PlanError::invalid_state(format!(
            "event {} has no options to choose from",
            event.event.id
        )));
    }

    let scale = lcm_up_to(event.options.len() as u128);
    let mut scores: Vec<OptionScore> = event
        .options
        .iter()
        .map(|o| OptionScore {
            option_id: o.id.clone(),
            scaled_score: 0,
            first_choices: 0,
            rank_sum: 0,
        })
        .collect();
    let index: HashMap<&str, usize> = event
        .options
        .iter()
        .enumerate()
        .map(|(i, o)| (o.id.as_str(), i))
        .collect();

    // voter -> [(option, rank)], for the owner_picks fallback.
    let mut ballots: BTreeMap<&str, Vec<(&str, u32)>> = BTreeMap::new();
    for vote in event.votes.iter().filter(|v| !v.abstain) {
        let (Some(rank), Some(&i)) = (vote.rank, index.get(vote.option_id.as_str())) else {
            continue;
        };
        let rank = rank.max(1) as u32;
        let score = &mut scores[i];
        score.scaled_score += scale / u128::from(rank);
        score.rank_sum += u64::from(rank);
        if rank == 1 {
            score.first_choices += 1;
        }
        ballots
            .entry(vote.voter_id.as_str())
            .or_default()
            .push((vote.option_id.as_str(), rank));
    }

    let tied = leaders(&scores);
    let (winner, tie_broken) = if tied.len() == 1 {
        (tied[0].option_id.clone(), false)
    } else {
        let mut tied_ids: Vec<&str> = tied.iter().map(|s| s.option_id.as_str()).collect();
        tied_ids.sort_unstable();
        let pick = match plan.tie_break_policy {
            TieBreakPolicy::OwnerPicks => owner_pick(&plan.created_by_user, &ballots, &tied_ids),
            TieBreakPolicy::RandomSeeded => seeded_pick(&plan.id, &event.event.id, &tied_ids),
        };
        (pick.to_owned(), true)
    };

    debug!(
        plan_id = %plan.id,
        event_id = %event.event.id,
        winner = %winner,
        tie_broken,
        ballots = ballots.len(),
        "event tallied"
    );
    Ok(TallyResult {
        winner,
        tie_broken,
        scores,
    })
}

/// Options still tied after score, first choices and rank sum.
fn leaders(scores: &[OptionScore]) -> Vec<&OptionScore> {
    let mut tied: Vec<&OptionScore> = scores.iter().collect();
    narrow(&mut tied, |s| s.scaled_score, Pick::Highest);
    narrow(&mut tied, |s| u128::from(s.first_choices), Pick::Highest);
    narrow(&mut tied, |s| u128::from(s.rank_sum), Pick::Lowest);
    tied
}

enum Pick {
    Highest,
    Lowest,
}

/// Keep only the candidates with the best `key`.
fn narrow(tied: &mut Vec<&OptionScore>, key: impl Fn(&OptionScore) -> u128, pick: Pick) {
    let best = match pick {
        Pick::Highest => tied.iter().map(|s| key(*s)).max(),
        Pick::Lowest => tied.iter().map(|s| key(*s)).min(),
    };
    if let Some(best) = best {
        tied.retain(|s| key(*s) == best);
    }
}

/// The tied option the owner ranked best; failing that, the best of the
/// first voter (by id) who ranked; failing that, the lowest option id.
fn owner_pick<'a>(
    owner: &str,
    ballots: &BTreeMap<&str, Vec<(&str, u32)>>,
    tied_ids: &[&'a str],
) -> &'a str {
    let ballot = ballots
        .get(owner)
        .or_else(|| ballots.values().find(|b| !b.is_empty()));
    ballot
        .and_then(|ranks| {
            tied_ids
                .iter()
                .filter_map(|id| {
                    ranks
                        .iter()
                        .find(|(option, _)| option == id)
                        .map(|(_, rank)| (*rank, *id))
                })
                .min()
                .map(|(_, id)| id)
        })
        .unwrap_or(tied_ids[0])
}

/// Deterministic pick seeded with SHA-256(plan id || event id).
fn seeded_pick<'a>(plan_id: &str, event_id: &str, tied_ids: &[&'a str]) -> &'a str {
    let digest = Sha256::new()
        .chain_update(plan_id.as_bytes())
        .chain_update(event_id.as_bytes())
        .finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let n = u64::from_be_bytes(seed) % tied_ids.len() as u64;
    tied_ids[n as usize]
}

fn lcm_up_to(n: u128) -> u128 {
    (1..=n.max(1)).fold(1, |acc, k| acc / gcd(acc, k) * k)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}
