//! End-to-end scenarios through the full orchestrator.

use std::sync::Arc;

use consulta::{ErrorKind, Intent, MemoryStore, Origin, QueryRows, Row};

use crate::common::{request, run, ScriptedModel};

#[tokio::test]
async fn test_greeting_fast_path_skips_query_stages() {
    // Model is down; the greeting still gets its fixed fallback reply.
    let model = ScriptedModel::unavailable();
    let store = Arc::new(MemoryStore::new());

    let response = run(model, store, request("Hola", Origin::Webapp, "Recepcion")).await;

    assert_eq!(response.state.intent, Some(Intent::Greeting));
    assert!((response.state.confidence - 0.95).abs() < f32::EPSILON);
    assert!(response.state.synthesized_query.is_none());
    assert!(response.state.execution_outcome.is_none());
    assert!(!response.text.is_empty());
    assert_eq!(
        response.state.visited_stages,
        vec![
            "route_by_origin_webapp",
            "classify_intent",
            "check_permissions",
            "combine_context",
            "generate_sql",
            "execute_sql",
            "generate_response",
        ]
    );
    assert!(response.event.success);
}

#[tokio::test]
async fn test_aggregate_count_renders_single_value_template() {
    // "Cuántos" hits the fast path; the model is only needed for synthesis.
    let model = ScriptedModel::new(vec![Some(
        r#"{"sql": "SELECT COUNT(*) AS total_pacientes FROM clinic.pacientes WHERE deleted_at IS NULL", "params": {}, "target_db": "core", "tables_involved": ["clinic.pacientes"]}"#,
    )]);
    let store = Arc::new(MemoryStore::new());
    let mut rows = QueryRows::default();
    rows.columns = vec!["total_pacientes".to_string()];
    rows.rows.push(Row::from([(
        "total_pacientes".to_string(),
        serde_json::json!(42),
    )]));
    store.push_result(rows);

    let response = run(
        model.clone(),
        store,
        request("Cuántos pacientes hay", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.intent, Some(Intent::QueryAggregate));
    let query = response.state.synthesized_query.as_ref().expect("query");
    assert!(query.text.contains("COUNT"));
    assert!(query.text.contains("deleted_at IS NULL"));
    assert_eq!(response.text, "📊 **Total de pacientes: 42**");
    assert_eq!(model.calls(), 1);
    assert!(response.event.success);
}

#[tokio::test]
async fn test_zero_rows_yields_ranked_suggestions() {
    // "Busca a ..." misses the fast path, so the first reply classifies
    // and the second synthesizes.
    let model = ScriptedModel::new(vec![
        Some(
            r#"{"intent": "query_read", "confidence": 0.9, "entities": ["paciente"], "extracted_values": {"nombre_paciente": "Juan Peres"}}"#,
        ),
        Some(
            r#"{"sql": "SELECT nombres, apellidos FROM clinic.pacientes WHERE (nombres ILIKE :nombre OR apellidos ILIKE :nombre) AND deleted_at IS NULL LIMIT 10", "params": {"nombre": "%Juan Peres%"}, "target_db": "core", "tables_involved": ["clinic.pacientes"]}"#,
        ),
    ]);
    let store = Arc::new(MemoryStore::new());
    let mut empty = QueryRows::default();
    empty.columns = vec!["nombres".to_string(), "apellidos".to_string()];
    store.push_result(empty);
    store.set_values(
        "clinic.pacientes",
        "nombres",
        vec![
            "Juan Pérez".to_string(),
            "Juana Torres".to_string(),
            "Guadalupe Hernández".to_string(),
        ],
    );

    let response = run(
        model,
        store,
        request("Busca a Juan Peres", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.error.kind, ErrorKind::NoResults);
    assert!(response.state.error.suggestions.len() <= 3);
    assert!(response
        .state
        .error
        .suggestions
        .contains(&"Juan Pérez".to_string()));
    assert!(response.text.contains("¿Quizás quisiste decir"));
    assert!(response.text.contains("Juan Pérez"));
}

#[tokio::test]
async fn test_low_privilege_denied_before_synthesis() {
    let model = ScriptedModel::unavailable();
    let store = Arc::new(MemoryStore::new());

    let response = run(
        model.clone(),
        store,
        request("muéstrame los pagos", Origin::Webapp, "Recepcion"),
    )
    .await;

    assert_eq!(response.state.error.kind, ErrorKind::PermissionDenied);
    assert!(response.text.contains("finance.pagos"));
    assert!(response.state.synthesized_query.is_none());
    assert_eq!(response.state.retry_count, 0);
    // Denial happens before any model call.
    assert_eq!(model.calls(), 0);
    // Every stage still appears in the trace.
    for stage in ["generate_sql", "execute_sql", "generate_response"] {
        assert!(
            response.state.visited_stages.contains(&stage.to_string()),
            "{stage} missing from trace"
        );
    }
    assert!(!response.event.success);
}

#[tokio::test]
async fn test_repeated_failures_exhaust_retries() {
    let synthesis = r#"{"sql": "SELECT fecha FROM ops.citas WHERE deleted_at IS NULL", "params": {}, "target_db": "ops", "tables_involved": ["ops.citas"]}"#;
    // Three synthesis attempts: the initial one plus two retries.
    let model = ScriptedModel::new(vec![Some(synthesis), Some(synthesis), Some(synthesis)]);
    let store = Arc::new(MemoryStore::new());
    for _ in 0..3 {
        store.fail_with("column \"fecha\" does not exist");
    }

    let response = run(
        model.clone(),
        store,
        request("muéstrame las citas", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.retry_count, 2);
    assert_eq!(response.state.error.kind, ErrorKind::SqlError);
    assert!(response.text.contains("reformular"));
    assert_eq!(model.calls(), 3);
    assert!(!response.event.success);
}

#[tokio::test]
async fn test_retry_succeeds_on_second_attempt() {
    let bad = r#"{"sql": "SELECT fecha FROM ops.citas WHERE deleted_at IS NULL", "params": {}, "target_db": "ops", "tables_involved": ["ops.citas"]}"#;
    let good = r#"{"sql": "SELECT fecha_cita FROM ops.citas WHERE deleted_at IS NULL", "params": {}, "target_db": "ops", "tables_involved": ["ops.citas"]}"#;
    let model = ScriptedModel::new(vec![Some(bad), Some(good)]);
    let store = Arc::new(MemoryStore::new());
    store.fail_with("column \"fecha\" does not exist");
    let mut rows = QueryRows::default();
    rows.columns = vec!["fecha_cita".to_string()];
    rows.rows.push(Row::from([(
        "fecha_cita".to_string(),
        serde_json::json!("2026-08-29"),
    )]));
    store.push_result(rows);

    let response = run(
        model,
        store,
        request("muéstrame las citas", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.retry_count, 1);
    assert!(!response.state.has_error());
    assert!(response.text.contains("cita"));
    assert!(response.event.success);
}

#[tokio::test]
async fn test_patient_channel_runs_as_front_desk() {
    // Upstream claims Admin, but the patient channel pins the role, so
    // a finance query is denied.
    let model = ScriptedModel::unavailable();
    let store = Arc::new(MemoryStore::new());

    let response = run(
        model,
        store,
        request("muéstrame los pagos", Origin::WhatsappPatient, "Admin"),
    )
    .await;

    assert_eq!(response.state.identity.role, "Recepcion");
    assert_eq!(response.state.error.kind, ErrorKind::PermissionDenied);
    assert!(response
        .state
        .visited_stages
        .contains(&"route_by_origin_whatsapp_patient".to_string()));
}

#[tokio::test]
async fn test_classifier_outage_degrades_to_clarification() {
    let model = ScriptedModel::unavailable();
    let store = Arc::new(MemoryStore::new());

    let response = run(
        model,
        store,
        request("Juan Pérez", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.intent, Some(Intent::Clarification));
    assert!((response.state.confidence - 0.3).abs() < f32::EPSILON);
    // Internal degradation, still a normal reply for the user.
    assert!(!response.text.is_empty());
    assert!(response.event.success);
}

#[tokio::test]
async fn test_mutation_request_gets_read_only_refusal() {
    let model = ScriptedModel::new(vec![Some(
        r#"{"intent": "mutation_delete", "confidence": 0.9, "entities": ["cita"], "extracted_values": {}}"#,
    )]);
    let store = Arc::new(MemoryStore::new());

    let response = run(
        model,
        store,
        request("elimina la cita de Juan", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.error.kind, ErrorKind::PermissionDenied);
    assert!(response.state.entities.requires_confirmation);
    assert!(response.text.contains("solo puede consultar"));
    assert!(response.state.synthesized_query.is_none());
}
