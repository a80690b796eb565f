//! Tri-perspective deliberation types and consensus math.
//!
//! Every member returns optimistic, balanced and critical analyses plus a
//! synthesized vote. Consensus buckets each vote by `weight * confidence`;
//! the argmax bucket wins and its share of total weight is the consensus
//! strength. Recommendation wording is derived from (vote, strength) bands.

use crate::members::CouncilMember;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A governance proposal put before the council.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub title: String,
    pub description: String,
    pub proposal_type: String,
    pub status: String,
    pub votes_for: u64,
    pub votes_against: u64,
    pub votes_abstain: u64,
    pub weight_for: f64,
    pub weight_against: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerspectiveType {
    Optimistic,
    Balanced,
    Critical,
}

/// One perspective's analysis: a short assessment, up to five key points and
/// a confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerspectiveAnalysis {
    pub perspective_type: PerspectiveType,
    pub assessment: String,
    pub key_points: Vec<String>,
    pub confidence: f64,
}

impl PerspectiveAnalysis {
    pub fn empty(perspective_type: PerspectiveType, assessment: impl Into<String>) -> Self {
        Self {
            perspective_type,
            assessment: assessment.into(),
            key_points: Vec::new(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

/// One member's deliberation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilVote {
    pub member_id: String,
    pub member_name: String,
    pub member_role: String,
    pub perspectives: Vec<PerspectiveAnalysis>,
    pub vote: VoteChoice,
    pub reasoning: String,
    pub confidence: f64,
    pub primary_benefits: Vec<String>,
    pub primary_concerns: Vec<String>,
}

impl CouncilVote {
    /// Fallback vote when a member's reply was malformed or the provider
    /// failed: ABSTAIN with empty perspectives, the failure recorded in the
    /// reasoning.
    pub fn abstain_on_error(member: &CouncilMember, error: &str) -> Self {
        Self {
            member_id: member.id.clone(),
            member_name: member.name.clone(),
            member_role: member.role.clone(),
            perspectives: vec![
                PerspectiveAnalysis::empty(
                    PerspectiveType::Optimistic,
                    "Unable to complete optimistic analysis",
                ),
                PerspectiveAnalysis::empty(
                    PerspectiveType::Balanced,
                    "Unable to complete balanced analysis",
                ),
                PerspectiveAnalysis::empty(
                    PerspectiveType::Critical,
                    "Unable to complete critical analysis",
                ),
            ],
            vote: VoteChoice::Abstain,
            reasoning: format!("Unable to complete analysis: {}", error),
            confidence: 0.0,
            primary_benefits: Vec::new(),
            primary_concerns: Vec::new(),
        }
    }

    /// Parse a member reply against the tri-perspective JSON schema.
    pub fn parse_reply(member: &CouncilMember, content: &str) -> Result<Self, String> {
        let root: Value =
            serde_json::from_str(content).map_err(|e| format!("malformed JSON: {}", e))?;

        let perspectives_data = root.get("perspectives").cloned().unwrap_or(Value::Null);
        let mut perspectives = Vec::new();
        for (key, perspective_type) in [
            ("optimistic", PerspectiveType::Optimistic),
            ("balanced", PerspectiveType::Balanced),
            ("critical", PerspectiveType::Critical),
        ] {
            let p = perspectives_data.get(key).cloned().unwrap_or(Value::Null);
            perspectives.push(PerspectiveAnalysis {
                perspective_type,
                assessment: p
                    .get("assessment")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("No {} analysis provided", key)),
                key_points: p
                    .get("key_points")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str().map(String::from))
                            .take(5)
                            .collect()
                    })
                    .unwrap_or_default(),
                confidence: p
                    .get("confidence")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.5)
                    .clamp(0.0, 1.0),
            });
        }

        let synthesis = root.get("synthesis").cloned().unwrap_or(Value::Null);
        let vote = match synthesis
            .get("vote")
            .and_then(|v| v.as_str())
            .unwrap_or("ABSTAIN")
            .to_uppercase()
            .as_str()
        {
            "APPROVE" => VoteChoice::Approve,
            "REJECT" => VoteChoice::Reject,
            _ => VoteChoice::Abstain,
        };

        let take_strings = |key: &str, cap: usize| -> Vec<String> {
            synthesis
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .take(cap)
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(Self {
            member_id: member.id.clone(),
            member_name: member.name.clone(),
            member_role: member.role.clone(),
            perspectives,
            vote,
            reasoning: synthesis
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("No reasoning provided")
                .to_string(),
            confidence: synthesis
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            primary_benefits: take_strings("primary_benefits", 3),
            primary_concerns: take_strings("primary_concerns", 3),
        })
    }
}

/// Collective council opinion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilOpinion {
    pub proposal_id: String,
    pub deliberated_at: DateTime<Utc>,
    pub member_votes: Vec<CouncilVote>,
    pub consensus_vote: VoteChoice,
    pub consensus_strength: f64,
    pub optimistic_summary: String,
    pub balanced_summary: String,
    pub critical_summary: String,
    pub key_points: Vec<String>,
    pub dissenting_opinions: Vec<String>,
    pub final_recommendation: String,
    pub total_benefits_identified: usize,
    pub total_concerns_identified: usize,
}

/// Weighted consensus over member votes.
pub fn calculate_consensus(
    votes: &[CouncilVote],
    member_weights: &HashMap<String, f64>,
) -> Consensus {
    if votes.is_empty() {
        return Consensus {
            vote: VoteChoice::Abstain,
            strength: 0.0,
            key_points: Vec::new(),
            dissenting: Vec::new(),
            recommendation: "Unable to reach consensus - no votes".to_string(),
            optimistic_summary: String::new(),
            balanced_summary: String::new(),
            critical_summary: String::new(),
            total_benefits: 0,
            total_concerns: 0,
        };
    }

    let mut weighted_approve = 0.0;
    let mut weighted_reject = 0.0;
    let mut weighted_abstain = 0.0;

    for vote in votes {
        let weight = member_weights.get(&vote.member_id).copied().unwrap_or(1.0)
            * vote.confidence;
        match vote.vote {
            VoteChoice::Approve => weighted_approve += weight,
            VoteChoice::Reject => weighted_reject += weight,
            VoteChoice::Abstain => weighted_abstain += weight,
        }
    }

    let total = weighted_approve + weighted_reject + weighted_abstain;
    let (consensus_vote, strength) =
        if weighted_approve > weighted_reject && weighted_approve > weighted_abstain {
            (
                VoteChoice::Approve,
                if total > 0.0 { weighted_approve / total } else { 0.0 },
            )
        } else if weighted_reject > weighted_approve && weighted_reject > weighted_abstain {
            (
                VoteChoice::Reject,
                if total > 0.0 { weighted_reject / total } else { 0.0 },
            )
        } else {
            (VoteChoice::Abstain, 0.5)
        };

    let mut key_points = Vec::new();
    let mut dissenting = Vec::new();
    for vote in votes {
        let line = format!("{} ({}): {}", vote.member_name, vote.member_role, vote.reasoning);
        if vote.vote == consensus_vote {
            if key_points.len() < 5 {
                key_points.push(line);
            }
        } else if dissenting.len() < 3 {
            dissenting.push(line);
        }
    }

    let mut optimistic_points = Vec::new();
    let mut balanced_points = Vec::new();
    let mut critical_points = Vec::new();
    let mut all_benefits = Vec::new();
    let mut all_concerns = Vec::new();

    for vote in votes {
        all_benefits.extend(vote.primary_benefits.iter().cloned());
        all_concerns.extend(vote.primary_concerns.iter().cloned());
        for perspective in &vote.perspectives {
            let line = format!("{}: {}", vote.member_name, perspective.assessment);
            match perspective.perspective_type {
                PerspectiveType::Optimistic => optimistic_points.push(line),
                PerspectiveType::Balanced => balanced_points.push(line),
                PerspectiveType::Critical => critical_points.push(line),
            }
        }
    }

    let summarize = |points: Vec<String>, fallback: &str| {
        if points.is_empty() {
            fallback.to_string()
        } else {
            points[..points.len().min(5)].join("\n")
        }
    };

    let recommendation = recommendation_text(
        consensus_vote,
        strength,
        all_benefits.len(),
        all_concerns.len(),
    );

    Consensus {
        vote: consensus_vote,
        strength: (strength * 1000.0).round() / 1000.0,
        key_points,
        dissenting,
        recommendation,
        optimistic_summary: summarize(optimistic_points, "No optimistic perspectives provided."),
        balanced_summary: summarize(balanced_points, "No balanced perspectives provided."),
        critical_summary: summarize(critical_points, "No critical perspectives provided."),
        total_benefits: all_benefits.len(),
        total_concerns: all_concerns.len(),
    }
}

/// Five wording bands over (vote, strength), with counts injected.
fn recommendation_text(vote: VoteChoice, strength: f64, benefits: usize, concerns: usize) -> String {
    match vote {
        VoteChoice::Approve if strength >= 0.8 => format!(
            "STRONGLY APPROVE: The Ghost Council recommends approval with high confidence. \
             Analysis identified {} key benefits across members, while noting {} concerns to \
             monitor.",
            benefits, concerns
        ),
        VoteChoice::Approve => format!(
            "APPROVE WITH CAUTION: The Ghost Council leans toward approval. Benefits ({}) \
             outweigh concerns ({}), but careful implementation is recommended.",
            benefits, concerns
        ),
        VoteChoice::Reject if strength >= 0.8 => format!(
            "STRONGLY REJECT: The Ghost Council recommends rejection. Critical analysis \
             identified {} significant concerns that outweigh the potential benefits.",
            concerns
        ),
        VoteChoice::Reject => format!(
            "LEAN REJECT: The Ghost Council has reservations. While {} benefits were noted, \
             {} concerns suggest the proposal needs revision.",
            benefits, concerns
        ),
        VoteChoice::Abstain => format!(
            "NO CONSENSUS: The Ghost Council is divided. Analysis revealed {} potential \
             benefits and {} concerns. Further community discussion is recommended before \
             proceeding.",
            benefits, concerns
        ),
    }
}

/// Intermediate consensus result consumed by the service layer.
#[derive(Debug, Clone)]
pub struct Consensus {
    pub vote: VoteChoice,
    pub strength: f64,
    pub key_points: Vec<String>,
    pub dissenting: Vec<String>,
    pub recommendation: String,
    pub optimistic_summary: String,
    pub balanced_summary: String,
    pub critical_summary: String,
    pub total_benefits: usize,
    pub total_concerns: usize,
}
