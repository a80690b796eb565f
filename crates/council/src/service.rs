//! Ghost Council service.
//!
//! Runs proposals and serious issues past the seated members sequentially
//! (deterministic ordering for logs), aggregates the weighted consensus, and
//! fronts deliberation with a content-addressed opinion cache.

use crate::deliberation::{
    calculate_consensus, CouncilOpinion, CouncilVote, Proposal, VoteChoice,
};
use crate::llm::{strip_code_fence, LlmClient, LlmMessage};
use crate::members::{members_for_profile, CouncilMember, CouncilProfile};
use crate::sanitize::{sanitize_for_prompt, ANTI_INJECTION_INSTRUCTION};
use chrono::{DateTime, Duration, Utc};
use forge_core::Clock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    Governance,
    Trust,
    System,
    Ethical,
    DataIntegrity,
}

/// A serious issue requiring council attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriousIssue {
    pub id: String,
    pub category: IssueCategory,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    pub affected_entities: Vec<String>,
    pub detected_at: DateTime<Utc>,
    pub source: String,
    pub resolved: bool,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CouncilConfig {
    pub profile: CouncilProfile,
    pub cache_enabled: bool,
    pub cache_ttl_days: i64,
    pub max_cache_entries: usize,
    /// Transient provider errors retry with 2^attempt backoff up to this
    /// many retries.
    pub max_retries: u32,
    /// Significant trust drops auto-escalate into serious issues.
    pub trust_drop_threshold: f64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            profile: CouncilProfile::Comprehensive,
            cache_enabled: true,
            cache_ttl_days: 30,
            max_cache_entries: 1000,
            max_retries: 2,
            trust_drop_threshold: 20.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CouncilStats {
    pub proposals_reviewed: u64,
    pub issues_responded: u64,
    pub unanimous_decisions: u64,
    pub split_decisions: u64,
    pub cache_hits: u64,
}

struct OpinionCache {
    entries: HashMap<String, (CouncilOpinion, DateTime<Utc>)>,
    insertion_order: VecDeque<String>,
}

impl OpinionCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
        }
    }
}

/// The Ghost Council.
pub struct GhostCouncil {
    config: CouncilConfig,
    members: Vec<CouncilMember>,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    cache: Mutex<OpinionCache>,
    active_issues: Mutex<HashMap<String, SeriousIssue>>,
    stats: Mutex<CouncilStats>,
}

impl GhostCouncil {
    pub fn new(config: CouncilConfig, llm: Arc<dyn LlmClient>, clock: Arc<dyn Clock>) -> Self {
        let members = members_for_profile(config.profile);
        info!(
            members = members.len(),
            profile = ?config.profile,
            cache_enabled = config.cache_enabled,
            "ghost council initialized"
        );
        Self {
            config,
            members,
            llm,
            clock,
            cache: Mutex::new(OpinionCache::new()),
            active_issues: Mutex::new(HashMap::new()),
            stats: Mutex::new(CouncilStats::default()),
        }
    }

    /// Build a council from the environment's provider selection. Without a
    /// transport for the configured provider - or with no provider at all -
    /// the council runs in explicit mock mode, loudly.
    pub fn from_env(
        config: CouncilConfig,
        clock: Arc<dyn Clock>,
        transport: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let provider = forge_core::CouncilProviderConfig::from_env().provider;
        let llm: Arc<dyn LlmClient> = match transport {
            Some(client) => client,
            None => {
                if !provider.is_mock() {
                    warn!(
                        "LLM provider configured but no transport wired - \
                         Ghost Council falling back to MOCK mode"
                    );
                }
                Arc::new(crate::llm::MockLlm::approving())
            }
        };
        Self::new(config, llm, clock)
    }

    /// Replace the seated bench. Used to inject bespoke personas.
    pub fn with_members(mut self, members: Vec<CouncilMember>) -> Self {
        self.members = members;
        self
    }

    pub fn members(&self) -> &[CouncilMember] {
        &self.members
    }

    pub async fn stats(&self) -> CouncilStats {
        self.stats.lock().await.clone()
    }

    /// Content address for a proposal: SHA-256 over title, description and
    /// type.
    fn proposal_cache_key(proposal: &Proposal) -> String {
        let content = format!(
            "{}:{}:{}",
            proposal.title, proposal.description, proposal.proposal_type
        );
        let digest = Sha256::digest(content.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    async fn cached_opinion(&self, key: &str) -> Option<CouncilOpinion> {
        if !self.config.cache_enabled {
            return None;
        }
        let now = self.clock.now();
        let mut cache = self.cache.lock().await;
        let entry = cache
            .entries
            .get(key)
            .map(|(opinion, cached_at)| (opinion.clone(), *cached_at));

        match entry {
            Some((opinion, cached_at))
                if now - cached_at < Duration::days(self.config.cache_ttl_days) =>
            {
                drop(cache);
                self.stats.lock().await.cache_hits += 1;
                Some(opinion)
            }
            Some(_) => {
                cache.entries.remove(key);
                cache.insertion_order.retain(|k| k != key);
                None
            }
            None => None,
        }
    }

    async fn cache_opinion(&self, key: String, opinion: CouncilOpinion) {
        if !self.config.cache_enabled {
            return;
        }
        let now = self.clock.now();
        let mut cache = self.cache.lock().await;
        if cache.entries.insert(key.clone(), (opinion, now)).is_none() {
            cache.insertion_order.push_back(key);
        }

        // Size-triggered bulk drop: shed the oldest tenth.
        if cache.entries.len() > self.config.max_cache_entries {
            let drop_count = (self.config.max_cache_entries / 10).max(1);
            for _ in 0..drop_count {
                if let Some(oldest) = cache.insertion_order.pop_front() {
                    cache.entries.remove(&oldest);
                }
            }
        }
    }

    /// Deliberate on a proposal. Identical content with `skip_cache=false`
    /// returns the cached opinion.
    pub async fn deliberate_proposal(
        &self,
        proposal: &Proposal,
        context: Option<&str>,
        skip_cache: bool,
    ) -> CouncilOpinion {
        let cache_key = Self::proposal_cache_key(proposal);
        if !skip_cache {
            if let Some(opinion) = self.cached_opinion(&cache_key).await {
                info!(proposal_id = %proposal.id, "using cached council opinion");
                return opinion;
            }
        }

        info!(
            proposal_id = %proposal.id,
            members = self.members.len(),
            "ghost council deliberating"
        );

        // Members deliberate sequentially; log ordering is deterministic.
        let mut member_votes = Vec::with_capacity(self.members.len());
        for member in &self.members {
            let vote = self.member_proposal_vote(member, proposal, context).await;
            member_votes.push(vote);
        }

        let opinion = self.build_opinion(&proposal.id, member_votes).await;
        self.cache_opinion(cache_key, opinion.clone()).await;

        let mut stats = self.stats.lock().await;
        stats.proposals_reviewed += 1;
        if opinion.consensus_strength >= 0.9 {
            stats.unanimous_decisions += 1;
        } else {
            stats.split_decisions += 1;
        }
        drop(stats);

        info!(
            proposal_id = %proposal.id,
            consensus = ?opinion.consensus_vote,
            strength = opinion.consensus_strength,
            "ghost council deliberation complete"
        );
        opinion
    }

    async fn build_opinion(
        &self,
        proposal_id: &str,
        member_votes: Vec<CouncilVote>,
    ) -> CouncilOpinion {
        let weights: HashMap<String, f64> = self
            .members
            .iter()
            .map(|m| (m.id.clone(), m.weight))
            .collect();
        let consensus = calculate_consensus(&member_votes, &weights);

        CouncilOpinion {
            proposal_id: proposal_id.to_string(),
            deliberated_at: self.clock.now(),
            member_votes,
            consensus_vote: consensus.vote,
            consensus_strength: consensus.strength,
            optimistic_summary: consensus.optimistic_summary,
            balanced_summary: consensus.balanced_summary,
            critical_summary: consensus.critical_summary,
            key_points: consensus.key_points,
            dissenting_opinions: consensus.dissenting,
            final_recommendation: consensus.recommendation,
            total_benefits_identified: consensus.total_benefits,
            total_concerns_identified: consensus.total_concerns,
        }
    }

    async fn member_proposal_vote(
        &self,
        member: &CouncilMember,
        proposal: &Proposal,
        context: Option<&str>,
    ) -> CouncilVote {
        let system_prompt = format!(
            "{persona}\n\nTRI-PERSPECTIVE ANALYSIS PROTOCOL\n\
             Analyze the proposal from THREE distinct perspectives before forming a final \
             position:\n\
             1. OPTIMISTIC - best-case outcomes, benefits, opportunities\n\
             2. BALANCED - objective facts, trade-offs, implementation realities\n\
             3. CRITICAL - risks, concerns, failure modes\n\n\
             {guard}\n\n\
             Your vote is weighted at {weight}x in the final tally.\n\n\
             Respond with a single JSON object:\n\
             {{\"perspectives\": {{\"optimistic\": {{\"assessment\": \"2-3 sentences\", \
             \"key_points\": [\"...\"], \"confidence\": 0.8}}, \"balanced\": {{...}}, \
             \"critical\": {{...}}}}, \"synthesis\": {{\"vote\": \"APPROVE\" | \"REJECT\" | \
             \"ABSTAIN\", \"reasoning\": \"2-3 sentences\", \"confidence\": 0.8, \
             \"primary_benefits\": [\"...\"], \"primary_concerns\": [\"...\"]}}}}",
            persona = member.persona,
            guard = ANTI_INJECTION_INSTRUCTION,
            weight = member.weight,
        );

        let safe_title = sanitize_for_prompt(&proposal.title, "proposal_title", 500);
        let safe_description =
            sanitize_for_prompt(&proposal.description, "proposal_description", 10_000);
        let safe_type = sanitize_for_prompt(&proposal.proposal_type, "proposal_type", 100);
        let safe_status = sanitize_for_prompt(&proposal.status, "proposal_status", 100);

        let mut user_prompt = format!(
            "{safe_title}\n\n{safe_type}\n{safe_status}\n\n{safe_description}\n\n\
             Current Votes:\n- For: {} ({:.2} weighted)\n- Against: {} ({:.2} weighted)\n\
             - Abstain: {}\n",
            proposal.votes_for,
            proposal.weight_for,
            proposal.votes_against,
            proposal.weight_against,
            proposal.votes_abstain,
        );
        if let Some(context) = context {
            let safe_context = sanitize_for_prompt(context, "additional_context", 4_000);
            user_prompt.push_str(&format!("\nAdditional Context:\n{safe_context}\n"));
        }
        user_prompt.push_str("\nProvide your tri-perspective analysis as JSON:");

        let messages = [
            LlmMessage::system(system_prompt),
            LlmMessage::user(user_prompt),
        ];

        match self.complete_with_retry(&messages, 0.4).await {
            Ok(content) => {
                let cleaned = strip_code_fence(&content);
                match CouncilVote::parse_reply(member, &cleaned) {
                    Ok(vote) => vote,
                    Err(e) => {
                        warn!(member = %member.name, error = %e, "council member reply malformed");
                        CouncilVote::abstain_on_error(member, &e)
                    }
                }
            }
            Err(e) => {
                warn!(member = %member.name, error = %e, "council member vote failed");
                CouncilVote::abstain_on_error(member, &e.to_string())
            }
        }
    }

    /// Retry transient provider failures with exponential backoff
    /// (2^attempt seconds).
    async fn complete_with_retry(
        &self,
        messages: &[LlmMessage],
        temperature: f32,
    ) -> forge_core::Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.llm.complete(messages, temperature).await {
                Ok(response) => return Ok(response.content),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = std::time::Duration::from_secs(1u64 << attempt);
                    warn!(attempt, error = %e, "llm call failed, backing off");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Respond to a serious issue. Critical severity overrides a
    /// non-unanimous REJECT to APPROVE (take action), with the override made
    /// explicit in the recommendation.
    pub async fn respond_to_issue(&self, issue: &SeriousIssue) -> CouncilOpinion {
        warn!(
            issue_id = %issue.id,
            category = ?issue.category,
            severity = ?issue.severity,
            title = %issue.title,
            "ghost council responding to issue"
        );

        self.active_issues
            .lock()
            .await
            .insert(issue.id.clone(), issue.clone());

        let mut member_votes = Vec::with_capacity(self.members.len());
        for member in &self.members {
            member_votes.push(self.member_issue_vote(member, issue).await);
        }

        let mut opinion = self
            .build_opinion(&format!("issue_{}", issue.id), member_votes)
            .await;

        if issue.severity == IssueSeverity::Critical && opinion.consensus_vote == VoteChoice::Reject
        {
            let unanimous_reject = opinion
                .member_votes
                .iter()
                .all(|v| v.vote == VoteChoice::Reject);
            if !unanimous_reject {
                opinion.consensus_vote = VoteChoice::Approve;
                opinion.final_recommendation = format!(
                    "CRITICAL ISSUE - ACTION REQUIRED: Despite some disagreement, critical \
                     severity mandates immediate response. {}",
                    opinion.final_recommendation
                );
            }
        }

        self.stats.lock().await.issues_responded += 1;
        opinion
    }

    async fn member_issue_vote(&self, member: &CouncilMember, issue: &SeriousIssue) -> CouncilVote {
        let system_prompt = format!(
            "{persona}\n\nSERIOUS ISSUE - TRI-PERSPECTIVE ANALYSIS\n\
             Severity: {severity:?}. Category: {category:?}.\n\
             Analyze from THREE perspectives: OPTIMISTIC (best case if we act), BALANCED \
             (objective assessment), CRITICAL (worst case if we do not act). Then vote \
             APPROVE (take action), REJECT (dismiss) or ABSTAIN.\n\n{guard}\n\n\
             Respond with the same JSON schema as proposal deliberations.",
            persona = member.persona,
            severity = issue.severity,
            category = issue.category,
            guard = ANTI_INJECTION_INSTRUCTION,
        );

        let safe_title = sanitize_for_prompt(&issue.title, "issue_title", 500);
        let safe_description = sanitize_for_prompt(&issue.description, "issue_description", 10_000);
        let user_prompt = format!(
            "SERIOUS ISSUE ALERT\n\n{safe_title}\n\nSource: {}\nDetected: {}\n\n\
             {safe_description}\n\nAffected entities: {}\n\n\
             Provide your tri-perspective assessment as JSON:",
            issue.source,
            issue.detected_at.to_rfc3339(),
            if issue.affected_entities.is_empty() {
                "none specified".to_string()
            } else {
                issue.affected_entities.join(", ")
            },
        );

        let messages = [
            LlmMessage::system(system_prompt),
            LlmMessage::user(user_prompt),
        ];

        match self.complete_with_retry(&messages, 0.2).await {
            Ok(content) => {
                let cleaned = strip_code_fence(&content);
                match CouncilVote::parse_reply(member, &cleaned) {
                    Ok(vote) => vote,
                    Err(e) => CouncilVote::abstain_on_error(member, &e),
                }
            }
            Err(e) => CouncilVote::abstain_on_error(member, &e.to_string()),
        }
    }

    /// Classify a typed event into a serious issue, if it warrants one.
    pub fn detect_serious_issue(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
        source: &str,
    ) -> Option<SeriousIssue> {
        let issue = match event_type {
            "security_alert" | "security_threat" => {
                let threat_level = payload
                    .get("threat_level")
                    .and_then(|v| v.as_str())
                    .unwrap_or("medium");
                if !matches!(threat_level, "high" | "critical") {
                    return None;
                }
                Some(SeriousIssue {
                    id: Uuid::new_v4().to_string(),
                    category: IssueCategory::Security,
                    severity: if threat_level == "critical" {
                        IssueSeverity::Critical
                    } else {
                        IssueSeverity::High
                    },
                    title: format!(
                        "Security Threat Detected: {}",
                        payload
                            .get("threat_type")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown")
                    ),
                    description: payload
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("A security threat has been detected")
                        .to_string(),
                    affected_entities: Vec::new(),
                    detected_at: self.clock.now(),
                    source: source.to_string(),
                    resolved: false,
                    resolution: None,
                })
            }
            "trust_updated" => {
                let old_trust = payload.get("old_trust").and_then(|v| v.as_f64()).unwrap_or(100.0);
                let new_trust = payload.get("new_trust").and_then(|v| v.as_f64()).unwrap_or(100.0);
                let drop = old_trust - new_trust;
                if drop < self.config.trust_drop_threshold {
                    return None;
                }
                Some(SeriousIssue {
                    id: Uuid::new_v4().to_string(),
                    category: IssueCategory::Trust,
                    severity: if drop >= 30.0 {
                        IssueSeverity::High
                    } else {
                        IssueSeverity::Medium
                    },
                    title: format!(
                        "Significant Trust Drop: {}",
                        payload
                            .get("user_id")
                            .and_then(|v| v.as_str())
                            .unwrap_or("Unknown")
                    ),
                    description: format!(
                        "User trust dropped by {} points (from {} to {})",
                        drop, old_trust, new_trust
                    ),
                    affected_entities: Vec::new(),
                    detected_at: self.clock.now(),
                    source: source.to_string(),
                    resolved: false,
                    resolution: None,
                })
            }
            "governance_action" => {
                let action = payload.get("action").and_then(|v| v.as_str()).unwrap_or("");
                if !matches!(
                    action,
                    "proposal_vetoed" | "emergency_action" | "constitution_violation"
                ) {
                    return None;
                }
                Some(SeriousIssue {
                    id: Uuid::new_v4().to_string(),
                    category: IssueCategory::Governance,
                    severity: IssueSeverity::High,
                    title: format!("Governance Alert: {}", action.replace('_', " ")),
                    description: payload
                        .get("description")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Governance conflict detected")
                        .to_string(),
                    affected_entities: Vec::new(),
                    detected_at: self.clock.now(),
                    source: source.to_string(),
                    resolved: false,
                    resolution: None,
                })
            }
            "system_error" => {
                let error_count = payload
                    .get("error_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1);
                let critical = payload
                    .get("severity")
                    .and_then(|v| v.as_str())
                    .map(|s| s == "critical")
                    .unwrap_or(false);
                if error_count < 3 && !critical {
                    return None;
                }
                Some(SeriousIssue {
                    id: Uuid::new_v4().to_string(),
                    category: IssueCategory::System,
                    severity: IssueSeverity::High,
                    title: "System Error: repeated failures".to_string(),
                    description: payload
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("Multiple system errors detected")
                        .to_string(),
                    affected_entities: Vec::new(),
                    detected_at: self.clock.now(),
                    source: source.to_string(),
                    resolved: false,
                    resolution: None,
                })
            }
            _ => None,
        };

        if let Some(ref issue) = issue {
            warn!(
                issue_id = %issue.id,
                category = ?issue.category,
                severity = ?issue.severity,
                "serious issue detected"
            );
        }
        issue
    }

    pub async fn active_issues(&self) -> Vec<SeriousIssue> {
        self.active_issues
            .lock()
            .await
            .values()
            .filter(|i| !i.resolved)
            .cloned()
            .collect()
    }

    pub async fn resolve_issue(&self, issue_id: &str, resolution: &str) -> bool {
        let mut issues = self.active_issues.lock().await;
        if let Some(issue) = issues.get_mut(issue_id) {
            issue.resolved = true;
            issue.resolution = Some(resolution.to_string());
            info!(issue_id, resolution, "issue resolved");
            return true;
        }
        false
    }
}
