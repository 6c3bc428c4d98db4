//! `PersonaOrchestrator`: weighted-consensus deliberation among N distinct
//! persona handlers, used only for evolution deliberation — never for
//! routine task execution.
//!
//! The default roster ships seven specialty personas, each judging proposals
//! through its own domain lens and reporting a recommendation, confidence,
//! and reasoning trail. This is a default roster, not a fixed cardinality —
//! callers may configure any N personas.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::audit_journal::AuditJournal;
use crate::error::{Error, Result};

/// A change under deliberation, surfaced by `EvolutionController`.
#[derive(Debug, Clone)]
pub struct EvolutionProposal {
    pub id: Uuid,
    pub description: String,
    pub target_concept: Uuid,
    pub estimated_cost: f64,
    pub estimated_risk: f64,
}

/// One persona's judgement: which proposal it endorses, with what
/// confidence, and why.
#[derive(Debug, Clone)]
pub struct PersonaAnalysis {
    pub recommendation: Uuid,
    pub confidence: f64,
    pub reasoning: Vec<String>,
}

/// A distinct reasoning perspective consulted during deliberation.
#[async_trait]
pub trait Persona: Send + Sync {
    fn name(&self) -> &str;
    fn role_prompt(&self) -> &str;

    /// Judge `proposals` in light of `question`, returning the one this
    /// persona endorses most strongly.
    async fn analyze(&self, question: &str, proposals: &[EvolutionProposal]) -> Result<PersonaAnalysis>;
}

/// Concrete persona driven by a named domain specialty. Scores proposals by
/// a specialty-weighted combination of estimated risk and cost in the
/// absence of a wired reasoning-model backend; a production deployment
/// replaces `analyze` with an actual model call while keeping the same
/// specialty framing.
pub struct HeuristicPersona {
    name: String,
    role_prompt: String,
    risk_aversion: f64,
    cost_aversion: f64,
}

impl HeuristicPersona {
    pub fn new(
        name: impl Into<String>,
        role_prompt: impl Into<String>,
        risk_aversion: f64,
        cost_aversion: f64,
    ) -> Self {
        Self {
            name: name.into(),
            role_prompt: role_prompt.into(),
            risk_aversion,
            cost_aversion,
        }
    }
}

#[async_trait]
impl Persona for HeuristicPersona {
    fn name(&self) -> &str {
        &self.name
    }

    fn role_prompt(&self) -> &str {
        &self.role_prompt
    }

    async fn analyze(&self, _question: &str, proposals: &[EvolutionProposal]) -> Result<PersonaAnalysis> {
        let scored = proposals
            .iter()
            .map(|proposal| {
                let score = (1.0 - proposal.estimated_risk * self.risk_aversion
                    - proposal.estimated_cost * self.cost_aversion)
                    .clamp(0.0, 1.0);
                (proposal, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let (proposal, score) = scored
            .ok_or_else(|| Error::Unplanable("no proposals to evaluate".to_string()))?;

        Ok(PersonaAnalysis {
            recommendation: proposal.id,
            confidence: score,
            reasoning: vec![format!(
                "{} weighed risk={:.2} cost={:.2} -> score={:.2}",
                self.name, proposal.estimated_risk, proposal.estimated_cost, score
            )],
        })
    }
}

/// The seven specialty personas shipped as the default roster.
pub fn default_roster() -> Vec<Box<dyn Persona>> {
    vec![
        Box::new(HeuristicPersona::new(
            "infrastructure",
            "Evaluate deployment, scaling, and architectural impact.",
            0.7,
            0.4,
        )),
        Box::new(HeuristicPersona::new(
            "quality",
            "Evaluate testing coverage, regression risk, and defect exposure.",
            0.8,
            0.2,
        )),
        Box::new(HeuristicPersona::new(
            "scalability",
            "Evaluate performance and resource-scaling impact.",
            0.5,
            0.3,
        )),
        Box::new(HeuristicPersona::new(
            "knowledge",
            "Evaluate alignment with prior archived iterations.",
            0.4,
            0.3,
        )),
        Box::new(HeuristicPersona::new(
            "innovation",
            "Evaluate novelty and long-term upside.",
            0.2,
            0.2,
        )),
        Box::new(HeuristicPersona::new(
            "deployment",
            "Evaluate rollout and rollback safety.",
            0.7,
            0.5,
        )),
        Box::new(HeuristicPersona::new(
            "ethics",
            "Evaluate alignment and fairness implications.",
            0.9,
            0.1,
        )),
    ]
}

/// Tracked per-persona weight, adjusted cycle over cycle by historical
/// proposal success.
#[derive(Debug, Clone)]
struct PersonaWeight {
    base_weight: f64,
    current_weight: f64,
}

impl PersonaWeight {
    fn new(base_weight: f64) -> Self {
        Self {
            base_weight,
            current_weight: base_weight,
        }
    }

    /// Apply one cycle's performance factor, bounded so no single cycle can
    /// move the weight by more than `max_adjustment`.
    fn adjust(&mut self, success_rate: f64, avg_improvement: f64, max_adjustment: f64) {
        let performance_factor = 0.6 * success_rate + 0.4 * avg_improvement;
        let delta = (performance_factor - 0.5).clamp(-max_adjustment, max_adjustment);
        self.current_weight = (self.base_weight * (1.0 + delta)).max(0.0);
    }
}

struct RosterEntry {
    persona: Box<dyn Persona>,
    weight: PersonaWeight,
}

/// Bound applied per adjustment cycle to a single persona's weight
/// Resolved here as a configured constant rather than left open.
pub const MAX_WEIGHT_ADJUSTMENT_PER_CYCLE: f64 = 0.2;

pub struct PersonaOrchestrator {
    roster: Vec<RosterEntry>,
    theta_consensus: f64,
    audit: Option<Arc<AuditJournal>>,
}

/// Outcome of a deliberation.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub proposal_id: Uuid,
    pub support: f64,
    pub contributing_personas: Vec<String>,
}

impl PersonaOrchestrator {
    pub fn new(roster: Vec<Box<dyn Persona>>, theta_consensus: f64, audit: Option<Arc<AuditJournal>>) -> Self {
        let roster = roster
            .into_iter()
            .map(|persona| RosterEntry {
                persona,
                weight: PersonaWeight::new(1.0),
            })
            .collect();
        Self {
            roster,
            theta_consensus,
            audit,
        }
    }

    /// Consult every persona and compute weighted consensus. A persona whose
    /// `analyze` call fails is dropped from this round (graceful
    /// degradation) rather than failing the whole deliberation.
    pub async fn deliberate(
        &self,
        question: &str,
        proposals: &[EvolutionProposal],
    ) -> Result<ConsensusResult> {
        if proposals.is_empty() {
            return Err(Error::Unplanable("no proposals submitted for deliberation".to_string()));
        }

        let mut endorsements: Vec<(String, Uuid, f64)> = Vec::new();
        for entry in &self.roster {
            match entry.persona.analyze(question, proposals).await {
                Ok(analysis) => endorsements.push((
                    entry.persona.name().to_string(),
                    analysis.recommendation,
                    entry.weight.current_weight * analysis.confidence,
                )),
                Err(err) => {
                    if let Some(audit) = &self.audit {
                        audit
                            .emit(
                                "persona_orchestrator",
                                "persona_degraded",
                                None,
                                json!({"persona": entry.persona.name(), "error": err.kind_name()}),
                            )
                            .await?;
                    }
                }
            }
        }

        if endorsements.is_empty() {
            return Err(Error::NoConsensus("every persona failed to respond".to_string()));
        }

        let total_weight: f64 = endorsements.iter().map(|(_, _, weight)| weight).sum();

        let mut per_proposal: std::collections::HashMap<Uuid, f64> = std::collections::HashMap::new();
        for (_, proposal_id, weight) in &endorsements {
            *per_proposal.entry(*proposal_id).or_insert(0.0) += weight;
        }

        let (winner, winning_weight) = per_proposal
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
            .expect("endorsements is non-empty");

        let support = if total_weight > 0.0 {
            winning_weight / total_weight
        } else {
            0.0
        };

        if let Some(audit) = &self.audit {
            audit
                .emit(
                    "persona_orchestrator",
                    "deliberation_complete",
                    Some(winner),
                    json!({"support": support, "theta_consensus": self.theta_consensus}),
                )
                .await?;
        }

        if support < self.theta_consensus {
            return Err(Error::NoConsensus(format!(
                "winning proposal support {support:.2} below theta_consensus {:.2}",
                self.theta_consensus
            )));
        }

        Ok(ConsensusResult {
            proposal_id: winner,
            support,
            contributing_personas: endorsements
                .into_iter()
                .filter(|(_, id, _)| *id == winner)
                .map(|(name, _, _)| name)
                .collect(),
        })
    }

    /// Apply one cycle's performance results (success rate and average
    /// improvement per persona) to every persona's weight.
    pub fn adjust_weights(&mut self, results: &std::collections::HashMap<String, (f64, f64)>) {
        for entry in &mut self.roster {
            if let Some((success_rate, avg_improvement)) = results.get(entry.persona.name()) {
                entry
                    .weight
                    .adjust(*success_rate, *avg_improvement, MAX_WEIGHT_ADJUSTMENT_PER_CYCLE);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposal(risk: f64, cost: f64) -> EvolutionProposal {
        EvolutionProposal {
            id: Uuid::new_v4(),
            description: "test proposal".to_string(),
            target_concept: Uuid::new_v4(),
            estimated_cost: cost,
            estimated_risk: risk,
        }
    }

    #[tokio::test]
    async fn default_roster_reaches_consensus_on_low_risk_proposal() {
        let low_risk = proposal(0.1, 0.1);
        let high_risk = proposal(0.9, 0.8);
        let orchestrator = PersonaOrchestrator::new(default_roster(), 0.5, None);

        let result = orchestrator
            .deliberate("should we apply this change?", &[low_risk.clone(), high_risk])
            .await
            .unwrap();

        assert_eq!(result.proposal_id, low_risk.id);
        assert!(result.support >= 0.5);
    }

    #[tokio::test]
    async fn below_threshold_consensus_reports_no_consensus() {
        let a = proposal(0.5, 0.5);
        let b = proposal(0.5, 0.5);
        let orchestrator = PersonaOrchestrator::new(default_roster(), 0.99, None);

        let err = orchestrator
            .deliberate("evenly split question", &[a, b])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoConsensus(_)));
    }

    #[tokio::test]
    async fn empty_proposal_list_is_unplanable() {
        let orchestrator = PersonaOrchestrator::new(default_roster(), 0.5, None);
        let err = orchestrator.deliberate("no candidates", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Unplanable(_)));
    }

    #[test]
    fn weight_adjustment_is_bounded_per_cycle() {
        let mut weight = PersonaWeight::new(1.0);
        weight.adjust(1.0, 1.0, MAX_WEIGHT_ADJUSTMENT_PER_CYCLE);
        assert!((weight.current_weight - 1.0 * (1.0 + MAX_WEIGHT_ADJUSTMENT_PER_CYCLE)).abs() < 1e-9);

        let mut unbounded_attempt = PersonaWeight::new(1.0);
        unbounded_attempt.adjust(1.0, 1.0, 10.0);
        assert!((unbounded_attempt.current_weight - 1.5).abs() < 1e-9);
    }
}
