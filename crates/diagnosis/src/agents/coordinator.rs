//! Diagnostic coordinator.
//!
//! Dispatches patient data to the specialist agents (bounded parallel, one
//! agent's failure never cancels its peers), broadcasts analyses
//! fire-and-forget, runs differential synthesis and optional consensus.
//! Agents are addressed by role over the message bus; there is no
//! object-level cycle back to the coordinator.

use crate::agents::{
    AgentError, AgentMessage, AgentRole, AnalysisContext, AnalysisPayload, DiagnosticAgent,
    DifferentialAnalysis, GeneticAnalysis, MessagePayload, PhenotypeAnalysis,
};
use crate::models::{DiagnosisHypothesis, EvidenceItem, PatientProfile};
use chrono::{DateTime, Utc};
use forge_core::Clock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub parallel_analysis: bool,
    pub require_consensus: bool,
    pub consensus_threshold: f64,
    /// Per-agent call budget.
    pub agent_timeout: std::time::Duration,
    /// Whole-diagnosis budget.
    pub total_timeout: std::time::Duration,
    pub broadcast_analyses: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            parallel_analysis: true,
            require_consensus: false,
            consensus_threshold: 0.7,
            agent_timeout: std::time::Duration::from_secs(30),
            total_timeout: std::time::Duration::from_secs(120),
            broadcast_analyses: true,
        }
    }
}

/// Outcome of a coordinated multi-agent diagnosis.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinationResult {
    pub session_id: String,
    pub is_complete: bool,
    pub phenotype_analysis: Option<PhenotypeAnalysis>,
    pub genetic_analysis: Option<GeneticAnalysis>,
    pub differential: Option<DifferentialAnalysis>,
    pub consensus_reached: Option<bool>,
    pub consensus_average_score: Option<f64>,
    /// Set when a phase degraded to partial results.
    pub degraded: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

struct CoordinationSession {
    result: CoordinationResult,
    message_history: Vec<AgentMessage>,
}

/// Orchestrates the specialist agents for one-shot collaborative diagnosis.
pub struct DiagnosticCoordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    agents: HashMap<AgentRole, Arc<dyn DiagnosticAgent>>,
    sessions: Mutex<HashMap<String, CoordinationSession>>,
}

impl DiagnosticCoordinator {
    pub fn new(config: CoordinatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            agents: HashMap::new(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_agent(&mut self, agent: Arc<dyn DiagnosticAgent>) {
        self.agents.insert(agent.role(), agent);
    }

    pub fn agent_roles(&self) -> Vec<AgentRole> {
        self.agents.keys().copied().collect()
    }

    /// Run the full multi-agent analysis. A single agent's timeout or error
    /// degrades the result to partial, never fails the whole diagnosis.
    pub async fn diagnose(
        &self,
        patient: &PatientProfile,
        session_id: Option<String>,
    ) -> CoordinationResult {
        let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut result = CoordinationResult {
            session_id: session_id.clone(),
            is_complete: false,
            phenotype_analysis: None,
            genetic_analysis: None,
            differential: None,
            consensus_reached: None,
            consensus_average_score: None,
            degraded: Vec::new(),
            created_at: self.clock.now(),
            completed_at: None,
        };
        let mut history: Vec<AgentMessage> = Vec::new();

        info!(session_id = %session_id, agents = self.agents.len(), "diagnosis started");

        // The whole pipeline runs under the total budget; a timeout yields
        // whatever partial results the phases produced so far.
        let phases = self.run_phases(patient, &mut result, &mut history);
        if tokio::time::timeout(self.config.total_timeout, phases)
            .await
            .is_err()
        {
            warn!(session_id = %session_id, "diagnosis hit the total timeout");
            result.degraded.push("total timeout exceeded".to_string());
        }

        result.is_complete = true;
        result.completed_at = Some(self.clock.now());

        self.sessions.lock().await.insert(
            session_id.clone(),
            CoordinationSession {
                result: result.clone(),
                message_history: history,
            },
        );

        info!(session_id = %session_id, degraded = result.degraded.len(), "diagnosis complete");
        result
    }

    async fn run_phases(
        &self,
        patient: &PatientProfile,
        result: &mut CoordinationResult,
        history: &mut Vec<AgentMessage>,
    ) {
        // Phase 1: specialist analyses, gathered with return-error semantics.
        let specialist_roles = [AgentRole::PhenotypeExpert, AgentRole::GeneticExpert];
        let outcomes = if self.config.parallel_analysis {
            let futures: Vec<_> = specialist_roles
                .iter()
                .filter(|role| self.agents.contains_key(role))
                .map(|role| self.run_agent_analysis(*role, patient, AnalysisContext::default()))
                .collect();
            futures::future::join_all(futures).await
        } else {
            let mut sequential = Vec::new();
            for role in specialist_roles
                .iter()
                .filter(|role| self.agents.contains_key(role))
            {
                sequential
                    .push(self.run_agent_analysis(*role, patient, AnalysisContext::default()).await);
            }
            sequential
        };

        for outcome in outcomes {
            match outcome {
                Ok((messages, payload)) => {
                    history.extend(messages);
                    match payload {
                        AnalysisPayload::Phenotype(analysis) => {
                            self.broadcast(AgentRole::PhenotypeExpert, &AnalysisPayload::Phenotype(analysis.clone()))
                                .await;
                            result.phenotype_analysis = Some(analysis);
                        }
                        AnalysisPayload::Genetic(analysis) => {
                            self.broadcast(AgentRole::GeneticExpert, &AnalysisPayload::Genetic(analysis.clone()))
                                .await;
                            result.genetic_analysis = Some(analysis);
                        }
                        AnalysisPayload::Differential(_) => {}
                    }
                }
                Err((role, e)) => {
                    warn!(role = ?role, error = %e, "specialist analysis degraded");
                    result.degraded.push(format!("{:?}: {}", role, e));
                }
            }
        }

        // Phase 2: differential synthesis over the collected analyses.
        let context = AnalysisContext {
            phenotype_analysis: result.phenotype_analysis.clone(),
            genetic_analysis: result.genetic_analysis.clone(),
        };
        match self
            .run_agent_analysis(AgentRole::DifferentialExpert, patient, context)
            .await
        {
            Ok((messages, AnalysisPayload::Differential(analysis))) => {
                history.extend(messages);
                result.differential = Some(analysis);
            }
            Ok(_) => {
                result
                    .degraded
                    .push("DifferentialExpert: unexpected payload".to_string());
            }
            Err((role, e)) => {
                error!(role = ?role, error = %e, "differential synthesis failed");
                result.degraded.push(format!("{:?}: {}", role, e));
            }
        }

        // Phase 3: optional consensus over the top hypothesis.
        if self.config.require_consensus {
            let top = result
                .differential
                .as_ref()
                .and_then(|d| d.differential.first())
                .cloned();
            if let Some(top) = top {
                let (reached, average) = self.build_consensus(&top, patient, history).await;
                result.consensus_reached = Some(reached);
                result.consensus_average_score = Some(average);
            }
        }
    }

    async fn run_agent_analysis(
        &self,
        role: AgentRole,
        patient: &PatientProfile,
        context: AnalysisContext,
    ) -> Result<(Vec<AgentMessage>, AnalysisPayload), (AgentRole, AgentError)> {
        let agent = self
            .agents
            .get(&role)
            .ok_or((role, AgentError::Internal("agent not registered".into())))?;

        let request = AgentMessage::request(
            AgentRole::Coordinator,
            role,
            MessagePayload::AnalyzeRequest {
                patient: patient.clone(),
                context,
            },
            None,
            self.clock.now(),
        );

        let reply = tokio::time::timeout(
            self.config.agent_timeout,
            agent.receive_message(request.clone()),
        )
        .await
        .map_err(|_| (role, AgentError::Timeout))?;

        match reply {
            Some(reply) => match &reply.payload {
                MessagePayload::Analysis(payload) => {
                    let payload = payload.clone();
                    Ok((vec![request, reply], payload))
                }
                MessagePayload::Error { message } => {
                    Err((role, AgentError::Internal(message.clone())))
                }
                _ => Err((role, AgentError::Malformed("unexpected reply".into()))),
            },
            None => Err((role, AgentError::Internal("no reply".into()))),
        }
    }

    /// Fire-and-forget broadcast of an analysis to the other agents. Each
    /// dispatch is independently scheduled; failures are logged, never
    /// propagated back.
    async fn broadcast(&self, source: AgentRole, analysis: &AnalysisPayload) {
        if !self.config.broadcast_analyses {
            return;
        }
        for (role, agent) in &self.agents {
            if *role == source {
                continue;
            }
            let agent = agent.clone();
            let message = AgentMessage {
                id: Uuid::new_v4().to_string(),
                sender: source,
                recipient: Some(*role),
                payload: MessagePayload::Analysis(analysis.clone()),
                session_id: None,
                in_reply_to: None,
                thread_id: None,
                priority: 2,
                timestamp: self.clock.now(),
            };
            tokio::spawn(async move {
                // Broadcast observation is advisory; nothing to do with the
                // reply even if one comes back.
                let _ = agent.receive_message(message).await;
            });
        }
    }

    /// Ask the non-differential agents to evaluate the top hypothesis and
    /// average their scores against the consensus threshold.
    async fn build_consensus(
        &self,
        top: &DiagnosisHypothesis,
        patient: &PatientProfile,
        history: &mut Vec<AgentMessage>,
    ) -> (bool, f64) {
        let evidence: Vec<EvidenceItem> =
            patient.all_evidence().into_iter().cloned().collect();
        let mut scores = Vec::new();

        for (role, agent) in &self.agents {
            if *role == AgentRole::DifferentialExpert {
                continue;
            }
            let request = AgentMessage::request(
                AgentRole::Coordinator,
                *role,
                MessagePayload::EvaluateRequest {
                    hypothesis: top.clone(),
                    evidence: evidence.clone(),
                },
                None,
                self.clock.now(),
            );

            let reply = tokio::time::timeout(
                self.config.agent_timeout / 2,
                agent.receive_message(request.clone()),
            )
            .await;

            if let Ok(Some(reply)) = reply {
                if let MessagePayload::Evaluation(evaluation) = &reply.payload {
                    scores.push(evaluation.score);
                }
                history.push(request);
                history.push(reply);
            }
        }

        if scores.is_empty() {
            return (false, 0.0);
        }
        let average = scores.iter().sum::<f64>() / scores.len() as f64;
        (average >= self.config.consensus_threshold, average)
    }

    /// Ask one agent a freeform question.
    pub async fn ask_agent(&self, role: AgentRole, question: &str) -> Option<String> {
        let agent = self.agents.get(&role)?;
        let request = AgentMessage::request(
            AgentRole::Coordinator,
            role,
            MessagePayload::Question {
                text: question.to_string(),
            },
            None,
            self.clock.now(),
        );

        let reply = tokio::time::timeout(self.config.agent_timeout, agent.receive_message(request))
            .await
            .ok()??;
        match reply.payload {
            MessagePayload::Answer { answer, .. } => Some(answer),
            _ => None,
        }
    }

    pub async fn get_result(&self, session_id: &str) -> Option<CoordinationResult> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.result.clone())
    }

    /// Message thread for a coordination session, request-before-response
    /// ordered.
    pub async fn message_history(&self, session_id: &str) -> Vec<AgentMessage> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|s| s.message_history.clone())
            .unwrap_or_default()
    }
}
