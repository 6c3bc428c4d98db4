//! Phase confidence scoring.
//!
//! Confidence at each PRAR phase is the mean of named factors, each clamped
//! to `[0, 1]`. The factor set differs by phase: Perceive scores how well the
//! observation itself landed; Reason scores how well-supported the selected
//! plan is. Factors are produced upstream by the reasoning model — this
//! module only clamps, averages, and compares against gate thresholds.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Confidence factors produced during Perceive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PerceiveFactors {
    pub visual_clarity: f64,
    pub terminal_clarity: f64,
    pub goal_relevance: f64,
}

impl PerceiveFactors {
    pub fn new(visual_clarity: f64, terminal_clarity: f64, goal_relevance: f64) -> Self {
        Self {
            visual_clarity: clamp_unit(visual_clarity),
            terminal_clarity: clamp_unit(terminal_clarity),
            goal_relevance: clamp_unit(goal_relevance),
        }
    }

    pub fn mean(&self) -> f64 {
        (self.visual_clarity + self.terminal_clarity + self.goal_relevance) / 3.0
    }
}

/// Confidence factors produced during Reason.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReasonFactors {
    pub past_experience: f64,
    pub pattern_availability: f64,
    pub code_understanding: f64,
    pub strategy_clarity: f64,
    pub risk_assessment: f64,
}

impl ReasonFactors {
    pub fn new(
        past_experience: f64,
        pattern_availability: f64,
        code_understanding: f64,
        strategy_clarity: f64,
        risk_assessment: f64,
    ) -> Self {
        Self {
            past_experience: clamp_unit(past_experience),
            pattern_availability: clamp_unit(pattern_availability),
            code_understanding: clamp_unit(code_understanding),
            strategy_clarity: clamp_unit(strategy_clarity),
            risk_assessment: clamp_unit(risk_assessment),
        }
    }

    pub fn mean(&self) -> f64 {
        (self.past_experience
            + self.pattern_availability
            + self.code_understanding
            + self.strategy_clarity
            + self.risk_assessment)
            / 5.0
    }
}

/// A phase's confidence value plus the factors it was derived from, kept
/// together so Perception/ReasoningBranch records can carry provenance for
/// the score they report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PhaseConfidence {
    Perceive { score: f64, factors: PerceiveFactors },
    Reason { score: f64, factors: ReasonFactors },
}

impl PhaseConfidence {
    pub fn perceive(factors: PerceiveFactors) -> Self {
        PhaseConfidence::Perceive {
            score: factors.mean(),
            factors,
        }
    }

    pub fn reason(factors: ReasonFactors) -> Self {
        PhaseConfidence::Reason {
            score: factors.mean(),
            factors,
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            PhaseConfidence::Perceive { score, .. } => *score,
            PhaseConfidence::Reason { score, .. } => *score,
        }
    }

    /// Whether `score` clears the given gate threshold.
    pub fn passes_gate(&self, theta: f64) -> bool {
        self.score() >= theta
    }
}

/// Selects the highest-scoring branch among candidates by
/// `feasibility + alignment - lambda * risk`, breaking ties by alignment,
/// then lower risk, then insertion order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BranchScore {
    pub feasibility: f64,
    pub alignment: f64,
    pub risk: f64,
}

impl BranchScore {
    pub fn new(feasibility: f64, alignment: f64, risk: f64) -> Self {
        Self {
            feasibility: clamp_unit(feasibility),
            alignment: clamp_unit(alignment),
            risk: clamp_unit(risk),
        }
    }

    pub fn utility(&self, lambda: f64) -> f64 {
        self.feasibility + self.alignment - lambda * self.risk
    }
}

/// Select the index of the winning branch under the selection rule above.
/// Returns `Unplanable` if `branches` is empty.
pub fn select_branch(branches: &[BranchScore], lambda: f64) -> Result<usize> {
    if branches.is_empty() {
        return Err(Error::Unplanable("no candidate branches to select from".into()));
    }
    let mut best = 0;
    for (idx, candidate) in branches.iter().enumerate().skip(1) {
        let current_best = &branches[best];
        let candidate_utility = candidate.utility(lambda);
        let best_utility = current_best.utility(lambda);

        let candidate_wins = if (candidate_utility - best_utility).abs() > f64::EPSILON {
            candidate_utility > best_utility
        } else if (candidate.alignment - current_best.alignment).abs() > f64::EPSILON {
            candidate.alignment > current_best.alignment
        } else if (candidate.risk - current_best.risk).abs() > f64::EPSILON {
            candidate.risk < current_best.risk
        } else {
            false // insertion order: earlier index already holds `best`
        };

        if candidate_wins {
            best = idx;
        }
    }
    Ok(best)
}
