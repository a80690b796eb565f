//! Session controller.
//!
//! Owns the autonomous diagnosis loop: one mutual-exclusion lock per
//! session, bounded event channels per subscriber, pause/resume, and a
//! janitor that expires and deletes stale sessions. Different sessions are
//! fully concurrent; every mutation of a session happens under its lock.

use crate::engine::{Demographics, DiagnosisEngine};
use crate::models::{
    DiagnosisResult, DiagnosisSession, DiagnosisState, PatientProfile, VariantInput,
};
use chrono::{DateTime, Duration, Utc};
use forge_core::{Clock, Error, Result};
use futures::future::BoxFuture;
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Events emitted over a session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted,
    IntakeComplete,
    HypothesesGenerated,
    ScoringComplete,
    QuestionsReady,
    AnswerReceived,
    RefinementComplete,
    SessionPaused,
    SessionResumed,
    SessionComplete,
    SessionExpired,
    Error,
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::SessionComplete | SessionEvent::SessionExpired)
    }
}

/// Typed event delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEventData {
    pub event: SessionEvent,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

pub type EventCallback = Arc<dyn Fn(SessionEventData) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct SessionConfig {
    pub session_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_iterations: u32,
    pub auto_advance: bool,
    pub pause_for_questions: bool,
    /// Short-circuit when a top hypothesis reaches this confidence.
    pub early_termination_confidence: f64,
    /// Capacity of each subscriber's event buffer.
    pub event_buffer: usize,
    /// Janitor cadence.
    pub cleanup_interval: std::time::Duration,
    /// How long `stream_events` waits for the next event before giving up.
    pub stream_idle_timeout: std::time::Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::hours(1),
            idle_timeout: Duration::minutes(30),
            max_iterations: 10,
            auto_advance: true,
            pause_for_questions: true,
            early_termination_confidence: 0.9,
            event_buffer: 64,
            cleanup_interval: std::time::Duration::from_secs(60),
            stream_idle_timeout: std::time::Duration::from_secs(30 * 60),
        }
    }
}

/// Statistics over the controller's sessions.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub by_state: HashMap<String, usize>,
    pub average_age_seconds: f64,
}

struct SessionSlot {
    session: Arc<Mutex<DiagnosisSession>>,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<SessionEventData>>>>,
    callbacks: Arc<Mutex<Vec<EventCallback>>>,
    task: Option<JoinHandle<()>>,
}

/// Controller for autonomous diagnosis sessions.
pub struct SessionController {
    config: SessionConfig,
    engine: Arc<DiagnosisEngine>,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<String, SessionSlot>>,
    global_callbacks: Mutex<Vec<EventCallback>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionController {
    pub fn new(config: SessionConfig, engine: Arc<DiagnosisEngine>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            engine,
            clock,
            sessions: Mutex::new(HashMap::new()),
            global_callbacks: Mutex::new(Vec::new()),
            cleanup_task: Mutex::new(None),
        }
    }

    /// Start the background janitor.
    pub async fn start(self: Arc<Self>) {
        let controller = Arc::clone(&self);
        let interval = self.config.cleanup_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = controller.cleanup_expired_sessions().await {
                    error!(error = %e, "cleanup loop error");
                }
            }
        });
        *self.cleanup_task.lock().await = Some(handle);
        info!("session controller started");
    }

    /// Stop the janitor and cancel all in-flight session tasks, awaiting
    /// them with return-error semantics for orderly shutdown.
    pub async fn stop(&self) {
        if let Some(handle) = self.cleanup_task.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }

        let mut cancelled = 0usize;
        let mut sessions = self.sessions.lock().await;
        for slot in sessions.values_mut() {
            if let Some(task) = slot.task.take() {
                task.abort();
                let _ = task.await;
                cancelled += 1;
            }
        }
        info!(cancelled_tasks = cancelled, "session controller stopped");
    }

    /// Create a session. Its expiry seeds at now + session timeout.
    pub async fn create_session(
        &self,
        patient: Option<PatientProfile>,
        event_callback: Option<EventCallback>,
    ) -> DiagnosisSession {
        // The controller manages advancement, not the engine.
        let mut session = self.engine.create_session(patient, false).await;
        session.max_iterations = self.config.max_iterations;
        session.confidence_threshold = self.engine.config().confidence_threshold;
        session.expires_at = Some(self.clock.now() + self.config.session_timeout);

        let snapshot = session.clone();
        let slot = SessionSlot {
            session: Arc::new(Mutex::new(session)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            callbacks: Arc::new(Mutex::new(
                event_callback.into_iter().collect::<Vec<_>>(),
            )),
            task: None,
        };
        self.sessions
            .lock()
            .await
            .insert(snapshot.id.clone(), slot);

        self.emit(
            &snapshot.id,
            SessionEvent::SessionStarted,
            json!({
                "patient_id": snapshot.patient.id,
                "expires_at": snapshot.expires_at,
            }),
        )
        .await;

        snapshot
    }

    async fn slot_handles(
        &self,
        session_id: &str,
    ) -> Result<Arc<Mutex<DiagnosisSession>>> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(session_id)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| Error::not_found(format!("Session not found: {}", session_id)))
    }

    /// Run intake and, when auto-advance is on, drive the loop to the next
    /// pause point. All under the session lock.
    pub async fn start_diagnosis(
        &self,
        session_id: &str,
        phenotypes: &[String],
        genetic_variants: &[VariantInput],
        medical_history: &[String],
        family_history: &[String],
        demographics: Option<&Demographics>,
    ) -> Result<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;

        self.engine
            .process_intake(
                &mut session,
                phenotypes,
                genetic_variants,
                medical_history,
                family_history,
                demographics,
            )
            .await?;

        self.emit(
            session_id,
            SessionEvent::IntakeComplete,
            json!({
                "phenotype_count": session.patient.phenotypes.len(),
                "variant_count": session.patient.genetic_variants.len(),
            }),
        )
        .await;

        if self.config.auto_advance {
            self.run_autonomous_loop(&mut session).await;
        }
        Ok(session.clone())
    }

    /// Run `start_diagnosis` as a background task owned by the session, so
    /// `delete_session` and `stop` can cancel it mid-flight.
    #[allow(clippy::too_many_arguments)]
    pub async fn spawn_diagnosis(
        self: Arc<Self>,
        session_id: String,
        phenotypes: Vec<String>,
        genetic_variants: Vec<VariantInput>,
        medical_history: Vec<String>,
        family_history: Vec<String>,
        demographics: Option<Demographics>,
    ) -> Result<()> {
        // Fail fast on unknown sessions before detaching.
        self.slot_handles(&session_id).await?;

        let controller = Arc::clone(&self);
        let task_session_id = session_id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = controller
                .start_diagnosis(
                    &task_session_id,
                    &phenotypes,
                    &genetic_variants,
                    &medical_history,
                    &family_history,
                    demographics.as_ref(),
                )
                .await
            {
                error!(session_id = %task_session_id, error = %e, "background diagnosis failed");
            }
        });

        let mut sessions = self.sessions.lock().await;
        if let Some(slot) = sessions.get_mut(&session_id) {
            if let Some(previous) = slot.task.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
        Ok(())
    }

    /// Dispatch on the session state, emitting an event per transition.
    /// Terminates on pause, completion, expiry or the iteration cap.
    async fn run_autonomous_loop(&self, session: &mut DiagnosisSession) {
        while session.is_active() {
            if let Some(expires_at) = session.expires_at {
                if self.clock.now() > expires_at {
                    session.state = DiagnosisState::Expired;
                    self.emit(&session.id, SessionEvent::SessionExpired, json!({}))
                        .await;
                    break;
                }
            }
            if session.iterations >= session.max_iterations {
                break;
            }

            match session.state {
                DiagnosisState::Intake => {
                    if let Err(e) = self.engine.generate_hypotheses(session).await {
                        self.emit_error(session, &e).await;
                        break;
                    }
                    self.emit(
                        &session.id,
                        SessionEvent::HypothesesGenerated,
                        json!({"hypothesis_count": session.hypotheses.len()}),
                    )
                    .await;
                }
                DiagnosisState::Analyzing => {
                    if let Err(e) = self.engine.score_hypotheses(session).await {
                        self.emit_error(session, &e).await;
                        break;
                    }
                    self.emit(
                        &session.id,
                        SessionEvent::ScoringComplete,
                        json!({
                            "top_hypotheses": session
                                .top_hypotheses
                                .iter()
                                .take(5)
                                .map(|h| json!({"disease": h.disease_name, "score": h.combined_score}))
                                .collect::<Vec<_>>(),
                        }),
                    )
                    .await;

                    if session
                        .top_diagnosis()
                        .map(|h| h.combined_score >= self.config.early_termination_confidence)
                        .unwrap_or(false)
                    {
                        session.state = DiagnosisState::Complete;
                        break;
                    }
                }
                DiagnosisState::Questioning => {
                    if let Err(e) = self.engine.generate_questions(session).await {
                        self.emit_error(session, &e).await;
                        break;
                    }
                    self.emit(
                        &session.id,
                        SessionEvent::QuestionsReady,
                        json!({
                            "questions": session
                                .pending_questions
                                .iter()
                                .map(|q| json!({
                                    "id": q.id,
                                    "text": q.question_text,
                                    "information_gain": q.information_gain,
                                }))
                                .collect::<Vec<_>>(),
                        }),
                    )
                    .await;

                    if self.config.pause_for_questions && !session.pending_questions.is_empty() {
                        session.state = DiagnosisState::Paused;
                        self.emit(
                            &session.id,
                            SessionEvent::SessionPaused,
                            json!({
                                "reason": "awaiting_answers",
                                "pending_questions": session.pending_questions.len(),
                            }),
                        )
                        .await;
                        break;
                    }
                }
                DiagnosisState::Refining => {
                    if let Err(e) = self.engine.score_hypotheses(session).await {
                        self.emit_error(session, &e).await;
                        break;
                    }
                    self.emit(
                        &session.id,
                        SessionEvent::RefinementComplete,
                        json!({
                            "iteration": session.iterations,
                            "top_score": session
                                .top_diagnosis()
                                .map(|h| h.combined_score)
                                .unwrap_or(0.0),
                        }),
                    )
                    .await;
                }
                DiagnosisState::Paused | DiagnosisState::Complete | DiagnosisState::Expired => {
                    break;
                }
            }

            tokio::task::yield_now().await;
        }

        if session.state == DiagnosisState::Complete || session.is_confident() {
            session.state = DiagnosisState::Complete;
            self.emit(
                &session.id,
                SessionEvent::SessionComplete,
                json!({
                    "primary_diagnosis": session.top_diagnosis().map(|h| h.disease_name.clone()),
                    "confidence": session.top_diagnosis().map(|h| h.combined_score).unwrap_or(0.0),
                    "iterations": session.iterations,
                }),
            )
            .await;
        }
    }

    async fn emit_error(&self, session: &DiagnosisSession, error: &Error) {
        warn!(session_id = %session.id, error = %error, "session loop error");
        self.emit(
            &session.id,
            SessionEvent::Error,
            json!({"detail": error.to_api_response()["detail"]}),
        )
        .await;
    }

    /// Replay answers under the lock, then resume the loop. A paused
    /// session transitions to refining first.
    pub async fn answer_questions(
        &self,
        session_id: &str,
        answers: &[(String, String, Vec<VariantInput>)],
    ) -> Result<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;
        let was_paused = session.state == DiagnosisState::Paused;

        for (question_id, answer, variants) in answers {
            self.engine
                .answer_question(&mut session, question_id, answer, variants)
                .await?;
            self.emit(
                session_id,
                SessionEvent::AnswerReceived,
                json!({"question_id": question_id, "answer": answer}),
            )
            .await;
        }

        // Answer absorption re-scores, so the state has usually moved on
        // already; the resume event keys off where the session started.
        if session.state == DiagnosisState::Paused {
            session.state = DiagnosisState::Refining;
        }
        if was_paused {
            self.emit(session_id, SessionEvent::SessionResumed, json!({}))
                .await;
        }

        if self.config.auto_advance {
            self.run_autonomous_loop(&mut session).await;
        }
        Ok(session.clone())
    }

    /// Drop pending questions and finalize with current evidence.
    pub async fn skip_questions(&self, session_id: &str) -> Result<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;

        session.pending_questions.clear();
        session.state = DiagnosisState::Complete;
        session.updated_at = self.clock.now();

        self.emit(
            session_id,
            SessionEvent::SessionComplete,
            json!({
                "primary_diagnosis": session.top_diagnosis().map(|h| h.disease_name.clone()),
                "confidence": session.top_diagnosis().map(|h| h.combined_score).unwrap_or(0.0),
                "questions_skipped": true,
            }),
        )
        .await;

        Ok(session.clone())
    }

    pub async fn pause_session(&self, session_id: &str) -> Result<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;

        if session.is_active() {
            session.state = DiagnosisState::Paused;
            session.updated_at = self.clock.now();
            self.emit(
                session_id,
                SessionEvent::SessionPaused,
                json!({"reason": "user_requested"}),
            )
            .await;
        }
        Ok(session.clone())
    }

    /// Resume routes to questioning when answers are still pending, else to
    /// refining.
    pub async fn resume_session(&self, session_id: &str) -> Result<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;

        if session.state == DiagnosisState::Paused {
            session.state = if session.pending_questions.is_empty() {
                DiagnosisState::Refining
            } else {
                DiagnosisState::Questioning
            };
            session.updated_at = self.clock.now();
            self.emit(session_id, SessionEvent::SessionResumed, json!({}))
                .await;

            if self.config.auto_advance && session.state == DiagnosisState::Refining {
                self.run_autonomous_loop(&mut session).await;
            }
        }
        Ok(session.clone())
    }

    pub async fn get_result(&self, session_id: &str) -> Result<DiagnosisResult> {
        let handle = self.slot_handles(session_id).await?;
        let mut session = handle.lock().await;
        Ok(self.engine.finalize_session(&mut session).await)
    }

    pub async fn get_session(&self, session_id: &str) -> Option<DiagnosisSession> {
        let handle = self.slot_handles(session_id).await.ok()?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    pub async fn list_sessions(&self, active_only: bool) -> Vec<DiagnosisSession> {
        let handles: Vec<Arc<Mutex<DiagnosisSession>>> = {
            let sessions = self.sessions.lock().await;
            sessions.values().map(|slot| slot.session.clone()).collect()
        };

        let mut result = Vec::new();
        for handle in handles {
            let session = handle.lock().await;
            if !active_only || session.is_active() {
                result.push(session.clone());
            }
        }
        result
    }

    /// Subscribe a bounded event stream. The stream ends after a terminal
    /// event or when no event arrives within the idle timeout.
    pub async fn stream_events(
        &self,
        session_id: &str,
    ) -> Result<impl Stream<Item = SessionEventData>> {
        let subscribers = {
            let sessions = self.sessions.lock().await;
            sessions
                .get(session_id)
                .map(|slot| slot.subscribers.clone())
                .ok_or_else(|| Error::not_found(format!("Session not found: {}", session_id)))?
        };

        let (tx, mut rx) = mpsc::channel(self.config.event_buffer);
        subscribers.lock().await.push(tx);
        let idle_timeout = self.config.stream_idle_timeout;

        Ok(async_stream::stream! {
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some(event)) => {
                        let terminal = event.event.is_terminal();
                        yield event;
                        if terminal {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
        })
    }

    /// Register a callback for every session's events.
    pub async fn subscribe_global(&self, callback: EventCallback) {
        self.global_callbacks.lock().await.push(callback);
    }

    /// Delete a session, cancelling any background task. Returns `false`
    /// when the session is already gone.
    pub async fn delete_session(&self, session_id: &str) -> bool {
        let slot = self.sessions.lock().await.remove(session_id);
        let Some(mut slot) = slot else {
            return false;
        };
        if let Some(task) = slot.task.take() {
            task.abort();
            let _ = task.await;
        }
        self.engine.remove_session(session_id).await;
        true
    }

    async fn emit(&self, session_id: &str, event: SessionEvent, data: serde_json::Value) {
        let event_data = SessionEventData {
            event,
            session_id: session_id.to_string(),
            timestamp: self.clock.now(),
            data,
        };

        let (subscribers, callbacks) = {
            let sessions = self.sessions.lock().await;
            match sessions.get(session_id) {
                Some(slot) => (slot.subscribers.clone(), slot.callbacks.clone()),
                None => return,
            }
        };

        // Subscriber channels are bounded and must never block the loop:
        // a full buffer drops the event for that subscriber.
        let mut subscriber_list = subscribers.lock().await;
        subscriber_list.retain(|tx| match tx.try_send(event_data.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(session_id, "subscriber buffer full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        drop(subscriber_list);

        for callback in callbacks.lock().await.iter() {
            callback(event_data.clone()).await;
        }
        for callback in self.global_callbacks.lock().await.iter() {
            callback(event_data.clone()).await;
        }
    }

    /// One janitor pass: expire sessions past their deadline or idle too
    /// long, delete fully-expired sessions older than an hour and completed
    /// idle sessions older than two.
    pub async fn cleanup_expired_sessions(&self) -> Result<usize> {
        let now = self.clock.now();
        let snapshot: Vec<(String, Arc<Mutex<DiagnosisSession>>)> = {
            let sessions = self.sessions.lock().await;
            sessions
                .iter()
                .map(|(id, slot)| (id.clone(), slot.session.clone()))
                .collect()
        };

        let mut to_delete = Vec::new();
        for (session_id, handle) in snapshot {
            let mut session = handle.lock().await;

            let hard_expired = session.expires_at.map(|e| now > e).unwrap_or(false);
            let idle = now - session.updated_at > self.config.idle_timeout;

            if hard_expired || (idle && !session.state.is_terminal()) {
                if session.state != DiagnosisState::Expired
                    && session.state != DiagnosisState::Complete
                {
                    session.state = DiagnosisState::Expired;
                    let reason = if hard_expired { "expired" } else { "idle_timeout" };
                    self.emit(
                        &session_id,
                        SessionEvent::SessionExpired,
                        json!({"reason": reason}),
                    )
                    .await;
                }
            }

            // Deletion thresholds.
            match session.state {
                DiagnosisState::Expired => {
                    let expiry = session.expires_at.unwrap_or(session.updated_at);
                    if now - expiry > Duration::hours(1) {
                        to_delete.push(session_id.clone());
                    }
                }
                DiagnosisState::Complete => {
                    if now - session.updated_at > Duration::hours(2) {
                        to_delete.push(session_id.clone());
                    }
                }
                _ => {}
            }
        }

        let count = to_delete.len();
        for session_id in to_delete {
            self.delete_session(&session_id).await;
        }
        if count > 0 {
            info!(count, "sessions cleaned up");
        }
        Ok(count)
    }

    pub async fn session_stats(&self) -> SessionStats {
        let now = self.clock.now();
        let sessions = self.list_sessions(false).await;

        let mut by_state: HashMap<String, usize> = HashMap::new();
        let mut total_age = 0.0;
        for session in &sessions {
            let state = format!("{:?}", session.state).to_lowercase();
            *by_state.entry(state).or_default() += 1;
            total_age += (now - session.created_at).num_seconds() as f64;
        }

        SessionStats {
            total_sessions: sessions.len(),
            by_state,
            average_age_seconds: if sessions.is_empty() {
                0.0
            } else {
                total_age / sessions.len() as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::hpo::ontology::TEST_OBO;
    use crate::hpo::HpoOntologyService;
    use crate::knowledge::fixture_graph;
    use crate::scoring::ScoringConfig;
    use chrono::TimeZone;
    use forge_core::ManualClock;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    fn build(
        session_config: SessionConfig,
        engine_config: EngineConfig,
    ) -> (Arc<ManualClock>, Arc<SessionController>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        ));
        let mut ontology = HpoOntologyService::new();
        ontology.load_from_obo(TEST_OBO).unwrap();
        let engine = Arc::new(DiagnosisEngine::new(
            engine_config,
            ScoringConfig::default(),
            Arc::new(fixture_graph()),
            Arc::new(RwLock::new(ontology)),
            clock.clone(),
        ));
        let controller = Arc::new(SessionController::new(session_config, engine, clock.clone()));
        (clock, controller)
    }

    fn question_friendly() -> EngineConfig {
        EngineConfig {
            min_information_gain: 0.005,
            ..Default::default()
        }
    }

    fn seizure_phenotypes() -> Vec<String> {
        vec!["HP:0001250".to_string(), "HP:0001249".to_string()]
    }

    #[tokio::test]
    async fn pause_and_resume_through_answers() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;

        let observed: Arc<Mutex<Vec<SessionEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        controller
            .subscribe_global(Arc::new(move |event: SessionEventData| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event.event);
                })
            }))
            .await;

        let after_start = controller
            .start_diagnosis(&session.id, &seizure_phenotypes(), &[], &[], &[], None)
            .await
            .unwrap();
        assert_eq!(after_start.state, DiagnosisState::Paused);
        assert!(!after_start.pending_questions.is_empty());
        assert!(observed.lock().await.contains(&SessionEvent::SessionPaused));

        // Answer every pending question "yes".
        let answers: Vec<(String, String, Vec<VariantInput>)> = after_start
            .pending_questions
            .iter()
            .filter(|q| q.target_phenotype.is_some())
            .map(|q| (q.id.clone(), "yes".to_string(), Vec::new()))
            .collect();
        let after_answers = controller
            .answer_questions(&session.id, &answers)
            .await
            .unwrap();

        let events = observed.lock().await.clone();
        assert!(events.contains(&SessionEvent::AnswerReceived));
        assert!(events.contains(&SessionEvent::SessionResumed));
        assert!(after_answers.state == DiagnosisState::Complete
            || after_answers.state == DiagnosisState::Paused);
    }

    #[tokio::test]
    async fn skip_questions_completes_with_primary_diagnosis() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;
        controller
            .start_diagnosis(&session.id, &seizure_phenotypes(), &[], &[], &[], None)
            .await
            .unwrap();

        let done = controller.skip_questions(&session.id).await.unwrap();
        assert_eq!(done.state, DiagnosisState::Complete);

        let result = controller.get_result(&session.id).await.unwrap();
        assert!(result.primary_diagnosis.is_some());
    }

    #[tokio::test]
    async fn stream_receives_terminal_event_and_ends() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;
        let stream = controller.stream_events(&session.id).await.unwrap();
        tokio::pin!(stream);

        controller
            .start_diagnosis(&session.id, &seizure_phenotypes(), &[], &[], &[], None)
            .await
            .unwrap();
        controller.skip_questions(&session.id).await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            seen.push(event.event);
            if seen.last().unwrap().is_terminal() {
                break;
            }
        }

        assert!(seen.contains(&SessionEvent::IntakeComplete));
        assert!(seen.contains(&SessionEvent::SessionComplete));
        // Emission order is preserved per subscriber.
        let intake_pos = seen.iter().position(|e| *e == SessionEvent::IntakeComplete);
        let complete_pos = seen.iter().position(|e| *e == SessionEvent::SessionComplete);
        assert!(intake_pos < complete_pos);
    }

    #[tokio::test]
    async fn concurrent_answers_serialize() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;
        let paused = controller
            .start_diagnosis(&session.id, &seizure_phenotypes(), &[], &[], &[], None)
            .await
            .unwrap();
        let Some(question) = paused
            .pending_questions
            .iter()
            .find(|q| q.target_phenotype.is_some())
            .cloned()
        else {
            return;
        };

        let mut handles = Vec::new();
        for _ in 0..4 {
            let controller = controller.clone();
            let session_id = session.id.clone();
            let answers = vec![(question.id.clone(), "yes".to_string(), Vec::new())];
            handles.push(tokio::spawn(async move {
                controller.answer_questions(&session_id, &answers).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Only the first taker consumed the question.
        let final_session = controller.get_session(&session.id).await.unwrap();
        let count = final_session
            .answered_questions
            .iter()
            .filter(|q| q.id == question.id)
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn expired_sessions_are_reaped() {
        let (clock, controller) = build(SessionConfig::default(), EngineConfig::default());
        let session = controller.create_session(None, None).await;

        clock.advance(Duration::minutes(61));
        controller.cleanup_expired_sessions().await.unwrap();
        let expired = controller.get_session(&session.id).await.unwrap();
        assert_eq!(expired.state, DiagnosisState::Expired);

        // One hour past expiry the janitor deletes it.
        clock.advance(Duration::minutes(61));
        let cleaned = controller.cleanup_expired_sessions().await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(controller.get_session(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn idle_sessions_expire_with_reason() {
        let (clock, controller) = build(SessionConfig::default(), EngineConfig::default());
        let session = controller.create_session(None, None).await;

        let idle_expirations = Arc::new(AtomicUsize::new(0));
        let counter = idle_expirations.clone();
        controller
            .subscribe_global(Arc::new(move |event: SessionEventData| {
                let counter = counter.clone();
                Box::pin(async move {
                    if event.event == SessionEvent::SessionExpired
                        && event.data["reason"] == "idle_timeout"
                    {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                })
            }))
            .await;

        clock.advance(Duration::minutes(31));
        controller.cleanup_expired_sessions().await.unwrap();

        assert_eq!(idle_expirations.load(Ordering::SeqCst), 1);
        let expired = controller.get_session(&session.id).await.unwrap();
        assert_eq!(expired.state, DiagnosisState::Expired);
    }

    #[tokio::test]
    async fn completed_sessions_are_deleted_after_two_idle_hours() {
        let (clock, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;
        controller
            .start_diagnosis(&session.id, &seizure_phenotypes(), &[], &[], &[], None)
            .await
            .unwrap();
        controller.skip_questions(&session.id).await.unwrap();

        clock.advance(Duration::minutes(121));
        let cleaned = controller.cleanup_expired_sessions().await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(controller.get_session(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn background_diagnosis_reaches_a_pause_point() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let session = controller.create_session(None, None).await;

        controller
            .clone()
            .spawn_diagnosis(
                session.id.clone(),
                seizure_phenotypes(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
            )
            .await
            .unwrap();

        // The task owns the session lock while it runs; once released the
        // session has advanced past intake.
        let mut state = DiagnosisState::Intake;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            state = controller.get_session(&session.id).await.unwrap().state;
            if state != DiagnosisState::Intake {
                break;
            }
        }
        assert!(matches!(
            state,
            DiagnosisState::Paused | DiagnosisState::Complete
        ));

        // Deleting cancels whatever is left of the task.
        assert!(controller.delete_session(&session.id).await);
    }

    #[tokio::test]
    async fn spawn_on_unknown_session_fails_fast() {
        let (_, controller) = build(SessionConfig::default(), EngineConfig::default());
        let err = controller
            .clone()
            .spawn_diagnosis(
                "missing".to_string(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, forge_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_is_idempotent_false_the_second_time() {
        let (_, controller) = build(SessionConfig::default(), EngineConfig::default());
        let session = controller.create_session(None, None).await;

        assert!(controller.delete_session(&session.id).await);
        assert!(!controller.delete_session(&session.id).await);
    }

    #[tokio::test]
    async fn stats_count_states() {
        let (_, controller) = build(SessionConfig::default(), EngineConfig::default());
        controller.create_session(None, None).await;
        controller.create_session(None, None).await;

        let stats = controller.session_stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.by_state["intake"], 2);
    }

    #[tokio::test]
    async fn sessions_progress_independently() {
        let (_, controller) = build(SessionConfig::default(), question_friendly());
        let a = controller.create_session(None, None).await;
        let b = controller.create_session(None, None).await;

        let phenotypes = seizure_phenotypes();
        let (ra, rb) = tokio::join!(
            controller.start_diagnosis(&a.id, &phenotypes, &[], &[], &[], None),
            controller.start_diagnosis(&b.id, &phenotypes, &[], &[], &[], None),
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_ne!(ra.unwrap().id, rb.unwrap().id);
    }
}
