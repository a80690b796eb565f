//! End-to-end diagnostic session flows against the in-memory knowledge
//! graph and a small ontology.

use chrono::{TimeZone, Utc};
use forge_core::ManualClock;
use forge_diagnosis::{
    DiagnosisEngine, DiagnosisState, EngineConfig, ScoringConfig, SessionConfig,
    SessionController, SessionEvent, SessionEventData, VariantInput,
};
use forge_diagnosis::hpo::HpoOntologyService;
use forge_diagnosis::knowledge::{DiseaseRecord, StaticKnowledgeGraph};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

const OBO: &str = r#"format-version: 1.2

[Term]
id: HP:0000001
name: All

[Term]
id: HP:0012638
name: Abnormal nervous system physiology
is_a: HP:0000001 ! All

[Term]
id: HP:0001250
name: Seizure
synonym: "Seizures" EXACT []
is_a: HP:0012638 ! Abnormal nervous system physiology

[Term]
id: HP:0001249
name: Intellectual disability
is_a: HP:0012638 ! Abnormal nervous system physiology

[Term]
id: HP:0002069
name: Bilateral tonic-clonic seizure
is_a: HP:0001250 ! Seizure

[Term]
id: HP:0001251
name: Ataxia
is_a: HP:0012638 ! Abnormal nervous system physiology

[Term]
id: HP:0012171
name: Stereotypical hand wringing
is_a: HP:0012638 ! Abnormal nervous system physiology
"#;

fn graph() -> StaticKnowledgeGraph {
    StaticKnowledgeGraph::new(vec![
        DiseaseRecord {
            disease_id: "MONDO:0100135".to_string(),
            disease_name: "Dravet syndrome".to_string(),
            description: None,
            phenotypes: vec![
                ("HP:0001250".to_string(), 0.95),
                ("HP:0001249".to_string(), 0.85),
                ("HP:0002069".to_string(), 0.6),
                ("HP:0001251".to_string(), 0.5),
            ],
            genes: vec!["SCN1A".to_string()],
            prevalence: Some("1/15700".to_string()),
            inheritance: Some("autosomal dominant".to_string()),
        },
        DiseaseRecord {
            disease_id: "MONDO:0010726".to_string(),
            disease_name: "Rett syndrome".to_string(),
            description: None,
            phenotypes: vec![
                ("HP:0001249".to_string(), 0.98),
                ("HP:0001250".to_string(), 0.7),
                ("HP:0012171".to_string(), 0.8),
            ],
            genes: vec!["MECP2".to_string()],
            prevalence: Some("1/10000".to_string()),
            inheritance: Some("x-linked dominant".to_string()),
        },
    ])
}

fn controller() -> (Arc<ManualClock>, Arc<SessionController>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
    ));
    let mut ontology = HpoOntologyService::new();
    ontology.load_from_obo(OBO).unwrap();
    let engine = Arc::new(DiagnosisEngine::new(
        EngineConfig {
            min_information_gain: 0.005,
            ..Default::default()
        },
        ScoringConfig::default(),
        Arc::new(graph()),
        Arc::new(RwLock::new(ontology)),
        clock.clone(),
    ));
    let controller = Arc::new(SessionController::new(
        SessionConfig::default(),
        engine,
        clock.clone(),
    ));
    (clock, controller)
}

#[tokio::test]
async fn diagnostic_happy_path() {
    let (_, controller) = controller();
    let session = controller.create_session(None, None).await;

    let paused = controller
        .start_diagnosis(
            &session.id,
            &["HP:0001250".to_string(), "HP:0001249".to_string()],
            &[],
            &[],
            &[],
            None,
        )
        .await
        .unwrap();

    // At least one hypothesis matched both seed phenotypes.
    let matched_both = paused.hypotheses.iter().any(|h| {
        h.matched_phenotypes.contains(&"HP:0001250".to_string())
            && h.matched_phenotypes.contains(&"HP:0001249".to_string())
    });
    assert!(matched_both);

    // Top hypothesis scored at least 0.5.
    let top_before = paused.top_hypotheses[0].combined_score;
    assert!(top_before >= 0.5);

    // At most 3 phenotype questions, all above the gain floor.
    let phenotype_questions: Vec<_> = paused
        .pending_questions
        .iter()
        .filter(|q| q.target_phenotype.is_some())
        .collect();
    assert!(phenotype_questions.len() <= 3);
    for question in &phenotype_questions {
        assert!(question.information_gain >= 0.005);
    }

    // Answering the top question "yes" never lowers the top score.
    if let Some(top_question) = phenotype_questions.first() {
        let after = controller
            .answer_questions(
                &session.id,
                &[(top_question.id.clone(), "yes".to_string(), Vec::new())],
            )
            .await
            .unwrap();
        assert!(after.top_hypotheses[0].combined_score >= top_before);
    }
}

#[tokio::test]
async fn pathogenic_variant_drives_early_termination() {
    let (_, controller) = controller();
    let session = controller.create_session(None, None).await;

    let done = controller
        .start_diagnosis(
            &session.id,
            &["HP:0001250".to_string(), "HP:0001249".to_string()],
            &[VariantInput {
                gene_symbol: "SCN1A".to_string(),
                notation: "c.2447G>A".to_string(),
                pathogenicity: "pathogenic".to_string(),
                zygosity: None,
            }],
            &[],
            &["uncle with Dravet syndrome".to_string()],
            None,
        )
        .await
        .unwrap();

    assert_eq!(done.state, DiagnosisState::Complete);
    let result = controller.get_result(&session.id).await.unwrap();
    let primary = result.primary_diagnosis.unwrap();
    assert_eq!(primary.disease_name, "Dravet syndrome");
    assert!(result.confidence >= 0.7);
}

#[tokio::test]
async fn pause_resume_and_completion_events() {
    let (_, controller) = controller();

    let observed: Arc<Mutex<Vec<SessionEventData>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = observed.clone();
    let session = controller
        .create_session(
            None,
            Some(Arc::new(move |event: SessionEventData| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(event);
                })
            })),
        )
        .await;

    let paused = controller
        .start_diagnosis(
            &session.id,
            &["HP:0001250".to_string(), "HP:0001249".to_string()],
            &[],
            &[],
            &[],
            None,
        )
        .await
        .unwrap();
    assert_eq!(paused.state, DiagnosisState::Paused);
    {
        let events = observed.lock().await;
        assert!(events.iter().any(|e| e.event == SessionEvent::SessionPaused));
    }

    // Answer everything; the loop resumes and eventually completes (possibly
    // after skipping the remaining genetic question).
    let answers: Vec<(String, String, Vec<VariantInput>)> = paused
        .pending_questions
        .iter()
        .map(|q| {
            let answer = if q.target_phenotype.is_some() {
                "yes"
            } else {
                "not_done"
            };
            (q.id.clone(), answer.to_string(), Vec::new())
        })
        .collect();
    let resumed = controller.answer_questions(&session.id, &answers).await.unwrap();

    if resumed.state != DiagnosisState::Complete {
        controller.skip_questions(&session.id).await.unwrap();
    }

    let events = observed.lock().await;
    assert!(events.iter().any(|e| e.event == SessionEvent::SessionResumed));
    let complete = events
        .iter()
        .find(|e| e.event == SessionEvent::SessionComplete)
        .expect("completion event");
    assert!(complete.data["primary_diagnosis"].is_string());
}
