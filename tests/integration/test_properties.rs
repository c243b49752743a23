//! Invariant checks across roles, retries and suggestions.

use std::sync::Arc;

use consulta::pipeline::classifier::fast_classify;
use consulta::pipeline::recovery::trigram_similarity;
use consulta::{
    AccessMatrix, ErrorKind, Intent, MemoryStore, Origin, PermissionGate, QueryRows, Role, Row,
};

use crate::common::{request, run, ScriptedModel};

#[test]
fn test_unknown_roles_always_denied() {
    let gate = PermissionGate::new(Arc::new(AccessMatrix::standard()));
    let intents = [
        Intent::QueryRead,
        Intent::QueryAggregate,
        Intent::MutationCreate,
        Intent::MutationDelete,
        Intent::Greeting,
        Intent::Clarification,
    ];
    for role in ["", "root", "Gerente", "admin2"] {
        for intent in intents {
            let mut state = consulta::PipelineState::new(
                "ver citas",
                Origin::Webapp,
                consulta::Identity::new(role),
                2,
            );
            state.intent = Some(intent);
            state.entities.resources = vec!["ops.citas".to_string()];
            gate.check(&mut state);
            assert_eq!(
                state.error.kind,
                ErrorKind::InvalidRole,
                "role {role:?} intent {intent:?}"
            );
        }
    }
}

#[test]
fn test_role_set_is_closed() {
    assert!(Role::parse("Admin").is_some());
    assert!(Role::parse("Podologo").is_some());
    assert!(Role::parse("Recepcion").is_some());
    for bogus in ["Administrator", "PODOLOGO2", "guest"] {
        assert!(Role::parse(bogus).is_none(), "{bogus}");
    }
}

#[test]
fn test_fast_path_is_pure() {
    let inputs = [
        "Hola",
        "Cuántos pacientes hay",
        "muéstrame las citas",
        "¿qué dice el clima?",
        "Juan Pérez",
    ];
    for input in inputs {
        let first = fast_classify(input);
        for _ in 0..5 {
            assert_eq!(fast_classify(input), first, "{input}");
        }
    }
}

#[test]
fn test_similarity_is_bounded_and_symmetric() {
    let pairs = [
        ("Juan Pérez", "Juan Peres"),
        ("uña encarnada", "una encarnada"),
        ("", "algo"),
        ("igual", "igual"),
    ];
    for (a, b) in pairs {
        let ab = trigram_similarity(a, b);
        let ba = trigram_similarity(b, a);
        assert!((0.0..=1.0).contains(&ab), "{a} / {b}: {ab}");
        assert!((ab - ba).abs() < f32::EPSILON, "{a} / {b}");
    }
}

#[tokio::test]
async fn test_synthesized_query_never_mutates_and_has_single_target() {
    let model = ScriptedModel::new(vec![Some(
        r#"{"sql": "SELECT id_cita, fecha_cita FROM ops.citas WHERE deleted_at IS NULL", "params": {}, "target_db": "ops", "tables_involved": ["ops.citas"]}"#,
    )]);
    let store = Arc::new(MemoryStore::new());
    let mut rows = QueryRows::default();
    rows.columns = vec!["id_cita".to_string(), "fecha_cita".to_string()];
    rows.rows.push(Row::from([
        ("id_cita".to_string(), serde_json::json!(1)),
        ("fecha_cita".to_string(), serde_json::json!("2026-08-29")),
    ]));
    store.push_result(rows);

    let response = run(
        model,
        store,
        request("muéstrame las citas", Origin::Webapp, "Podologo"),
    )
    .await;

    let query = response.state.synthesized_query.as_ref().expect("query");
    assert!(!query.is_mutation);
    for keyword in ["INSERT", "UPDATE", "DELETE", "DROP"] {
        assert!(!query.text.to_uppercase().contains(keyword), "{keyword}");
    }
    assert_eq!(query.resources, vec!["ops.citas".to_string()]);
}

#[tokio::test]
async fn test_small_result_payload_matches_outcome() {
    let model = ScriptedModel::new(vec![Some(
        r#"{"sql": "SELECT nombres, apellidos FROM clinic.pacientes WHERE deleted_at IS NULL", "params": {}, "target_db": "core", "tables_involved": ["clinic.pacientes"]}"#,
    )]);
    let store = Arc::new(MemoryStore::new());
    let mut rows = QueryRows::default();
    rows.columns = vec!["nombres".to_string(), "apellidos".to_string()];
    for (n, a) in [("Ana", "López"), ("Juan", "Pérez"), ("Rosa", "Martínez")] {
        rows.rows.push(Row::from([
            ("nombres".to_string(), serde_json::json!(n)),
            ("apellidos".to_string(), serde_json::json!(a)),
        ]));
    }
    store.push_result(rows);

    let response = run(
        model,
        store,
        request("listar pacientes", Origin::Webapp, "Admin"),
    )
    .await;

    assert!(!response.text.is_empty());
    let payload = response.data.expect("payload");
    assert_eq!(payload["row_count"], 3);
    assert_eq!(payload["data"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_retry_count_never_exceeds_max() {
    let synthesis = r#"{"sql": "SELECT x FROM ops.citas WHERE deleted_at IS NULL", "params": {}, "target_db": "ops", "tables_involved": ["ops.citas"]}"#;
    let model = ScriptedModel::new(vec![
        Some(synthesis),
        Some(synthesis),
        Some(synthesis),
        Some(synthesis),
    ]);
    let store = Arc::new(MemoryStore::new());
    for _ in 0..10 {
        store.fail_with("syntax error");
    }

    let response = run(
        model.clone(),
        store,
        request("muéstrame las citas", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.retry_count, response.state.max_retries);
    assert_eq!(response.state.error.kind, ErrorKind::SqlError);
    // Initial attempt plus exactly max_retries re-syntheses.
    assert_eq!(model.calls(), 1 + response.state.max_retries as usize);
}

#[tokio::test]
async fn test_suggestions_respect_threshold_and_limit() {
    let model = ScriptedModel::new(vec![
        Some(
            r#"{"intent": "query_read", "confidence": 0.9, "entities": ["paciente"], "extracted_values": {"nombre_paciente": "Maria Lopez"}}"#,
        ),
        Some(
            r#"{"sql": "SELECT nombres FROM clinic.pacientes WHERE nombres ILIKE :n AND deleted_at IS NULL", "params": {"n": "%Maria Lopez%"}, "target_db": "core", "tables_involved": ["clinic.pacientes"]}"#,
        ),
    ]);
    let store = Arc::new(MemoryStore::new());
    let mut empty = QueryRows::default();
    empty.columns = vec!["nombres".to_string()];
    store.push_result(empty);
    store.set_values(
        "clinic.pacientes",
        "nombres",
        vec![
            "María López".to_string(),
            "Maria Lopez García".to_string(),
            "Mario López".to_string(),
            "María Luisa López".to_string(),
            "Pedro Gómez".to_string(),
        ],
    );

    let response = run(
        model,
        store,
        request("encuentra a Maria Lopez", Origin::Webapp, "Admin"),
    )
    .await;

    assert_eq!(response.state.error.kind, ErrorKind::NoResults);
    let suggestions = &response.state.error.suggestions;
    assert!(!suggestions.is_empty());
    assert!(suggestions.len() <= 3);
    for suggestion in suggestions {
        assert!(
            trigram_similarity("Maria Lopez", suggestion) >= 0.3,
            "{suggestion}"
        );
    }
    assert!(!suggestions.contains(&"Pedro Gómez".to_string()));
}
