//! Intent classification stage.
//!
//! Two tiers: a deterministic fast path that matches obvious Spanish
//! phrasings without a model call, and a model-based tier with a closed
//! intent vocabulary for everything else. Classification never aborts
//! the pipeline; a failing model degrades to a low-confidence
//! clarification intent.

use std::sync::Arc;

use crate::model::{parse, ModelService};
use crate::schema::SchemaCatalog;
use crate::state::{ErrorKind, Intent, PipelineState};

// ============================================================================
// Fast-path trigger words
// ============================================================================

/// Greeting prefixes; only match short inputs so "hola, busca a Juan"
/// still reaches the model.
const GREETING_PREFIXES: &[&str] = &[
    "hola",
    "buenos días",
    "buenas tardes",
    "buenas noches",
    "hey",
    "qué tal",
];

const OUT_OF_SCOPE_WORDS: &[&str] = &["clima", "tiempo", "noticias", "chiste", "juego", "música"];

const AGGREGATE_WORDS: &[&str] = &["cuántos", "cuantos", "total de", "número de"];

const READ_PATTERNS: &[&str] = &[
    "muéstrame",
    "muestrame",
    "ver ",
    "buscar",
    "listar",
    "mostrar",
    "dame",
    "cuáles",
    "cuales",
    "quién",
    "quien",
];

const GREETING_MAX_LEN: usize = 30;

/// Deterministic classification for obvious input. First match wins;
/// returns `None` when the model tier is needed.
pub fn fast_classify(query: &str) -> Option<(Intent, f32)> {
    let lower = query.trim().to_lowercase();

    if lower.chars().count() < GREETING_MAX_LEN
        && GREETING_PREFIXES.iter().any(|g| lower.starts_with(g))
    {
        return Some((Intent::Greeting, 0.95));
    }

    if OUT_OF_SCOPE_WORDS.iter().any(|w| lower.contains(w)) {
        return Some((Intent::OutOfScope, 0.9));
    }

    if AGGREGATE_WORDS.iter().any(|w| lower.contains(w)) {
        return Some((Intent::QueryAggregate, 0.85));
    }

    if READ_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some((Intent::QueryRead, 0.8));
    }

    None
}

// ============================================================================
// Classifier stage
// ============================================================================

const CLASSIFICATION_SYSTEM_PROMPT: &str = r#"Eres un clasificador de intenciones para un sistema de gestión clínica podológica.

Tu tarea es analizar la consulta del usuario y determinar:
1. El tipo de intención
2. Las entidades mencionadas
3. Tu nivel de confianza

## Tipos de Intención Válidos:
- query_read: Consultas de lectura (buscar pacientes, ver citas, listar tratamientos)
- query_aggregate: Consultas de agregación (contar, sumar, promediar)
- mutation_create: Crear nuevos registros (agendar cita, registrar paciente)
- mutation_update: Actualizar registros existentes
- mutation_delete: Eliminar registros
- clarification: La consulta es ambigua y necesita más información
- out_of_scope: La consulta no está relacionada con la clínica
- greeting: Saludo o conversación casual

## Entidades del Dominio:
- paciente/pacientes: Datos de pacientes
- tratamiento/tratamientos: Carpetas de problemas médicos
- evolucion/evoluciones: Notas clínicas de visitas
- cita/citas: Agenda de citas
- podologo/podologos: Personal clínico
- servicio/servicios: Catálogo de servicios
- prospecto/prospectos: Leads/contactos potenciales
- pago/pagos: Pagos recibidos
- gasto/gastos: Gastos operativos

## Responde SIEMPRE en formato JSON:
{
  "intent": "query_read",
  "confidence": 0.95,
  "entities": ["paciente", "cita"],
  "extracted_values": {
    "nombre_paciente": "Juan Pérez",
    "fecha": "hoy"
  },
  "reasoning": "El usuario busca las citas de un paciente específico"
}"#;

/// Classifies the user's query into an intent plus extracted entities.
pub struct IntentClassifier {
    model: Arc<dyn ModelService>,
    catalog: Arc<SchemaCatalog>,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn ModelService>, catalog: Arc<SchemaCatalog>) -> Self {
        Self { model, catalog }
    }

    /// Classify the query in `state`, writing intent, confidence and
    /// entities. The derived resource list is computed for both tiers
    /// from the domain-noun lexicon; only extracted values need the
    /// model.
    pub async fn classify(&self, state: &mut PipelineState) {
        state.visit("classify_intent");

        if let Some((intent, confidence)) = fast_classify(&state.raw_query) {
            tracing::debug!(
                request_id = %state.request_id,
                intent = intent.as_str(),
                confidence,
                "fast-path classification"
            );
            state.intent = Some(intent);
            state.confidence = confidence;
            state.entities.resources = self.catalog.resources_in_text(&state.raw_query);
            return;
        }

        let user_prompt = format!(
            "Consulta del usuario: \"{}\"\n\n\
             Contexto adicional:\n\
             - Rol del usuario: {}\n\n\
             Clasifica esta consulta y extrae las entidades relevantes.",
            state.raw_query, state.identity.role,
        );

        let reply = match self.model.complete(CLASSIFICATION_SYSTEM_PROMPT, &user_prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(request_id = %state.request_id, error = %e, "classification failed");
                state.intent = Some(Intent::Clarification);
                state.confidence = 0.3;
                state.fail(ErrorKind::Internal, e.to_string(), None);
                state.entities.resources = self.catalog.resources_in_text(&state.raw_query);
                return;
            }
        };

        self.apply_reply(state, &reply);
    }

    /// Apply a model reply to the state. Malformed output falls through
    /// the parse chain to a guaranteed clarification default.
    fn apply_reply(&self, state: &mut PipelineState, reply: &str) {
        let parsed = parse::extract_json(reply);

        let (intent, confidence) = parsed
            .as_ref()
            .and_then(|v| {
                let intent = Intent::from_vocab(v.get("intent")?.as_str()?)?;
                let confidence = v
                    .get("confidence")
                    .and_then(|c| c.as_f64())
                    .map(|c| c.clamp(0.0, 1.0) as f32)
                    .unwrap_or(0.5);
                Some((intent, confidence))
            })
            .unwrap_or((Intent::Clarification, 0.5));

        state.intent = Some(intent);
        state.confidence = confidence;

        if let Some(value) = &parsed {
            if let Some(values) = value.get("extracted_values").and_then(|v| v.as_object()) {
                for (key, val) in values {
                    if let Some(s) = val.as_str() {
                        state.entities.values.insert(key.clone(), s.to_string());
                    }
                }
            }
            // Unrecognized nouns are dropped, not guessed at.
            if let Some(entities) = value.get("entities").and_then(|v| v.as_array()) {
                let nouns = entities.iter().filter_map(|e| e.as_str());
                for resource in self.catalog.resources_for_nouns(nouns) {
                    if !state.entities.resources.contains(&resource) {
                        state.entities.resources.push(resource);
                    }
                }
            }
        }

        let text_resources = self.catalog.resources_in_text(&state.raw_query);
        for resource in text_resources {
            if !state.entities.resources.contains(&resource) {
                state.entities.resources.push(resource);
            }
        }

        tracing::debug!(
            request_id = %state.request_id,
            intent = intent.as_str(),
            confidence,
            resources = ?state.entities.resources,
            "model classification"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_path_greeting() {
        assert_eq!(fast_classify("Hola"), Some((Intent::Greeting, 0.95)));
        assert_eq!(fast_classify("buenos días"), Some((Intent::Greeting, 0.95)));
        // Long input never matches the greeting prefix rule.
        assert_ne!(
            fast_classify("hola necesito ver todos los tratamientos del paciente"),
            Some((Intent::Greeting, 0.95))
        );
    }

    #[test]
    fn test_fast_path_out_of_scope() {
        assert_eq!(
            fast_classify("¿cómo está el clima hoy?"),
            Some((Intent::OutOfScope, 0.9))
        );
        assert_eq!(
            fast_classify("cuéntame un chiste"),
            Some((Intent::OutOfScope, 0.9))
        );
    }

    #[test]
    fn test_fast_path_aggregate() {
        assert_eq!(
            fast_classify("Cuántos pacientes hay"),
            Some((Intent::QueryAggregate, 0.85))
        );
        assert_eq!(
            fast_classify("dime el total de citas"),
            Some((Intent::QueryAggregate, 0.85))
        );
    }

    #[test]
    fn test_fast_path_read() {
        assert_eq!(
            fast_classify("muéstrame las citas de hoy"),
            Some((Intent::QueryRead, 0.8))
        );
        assert_eq!(
            fast_classify("listar tratamientos"),
            Some((Intent::QueryRead, 0.8))
        );
    }

    #[test]
    fn test_fast_path_is_deterministic() {
        for _ in 0..3 {
            assert_eq!(
                fast_classify("Cuántos pacientes hay"),
                Some((Intent::QueryAggregate, 0.85))
            );
        }
    }

    #[test]
    fn test_ambiguous_needs_model() {
        assert_eq!(fast_classify("Juan Pérez"), None);
        assert_eq!(fast_classify("la semana pasada"), None);
    }

    #[test]
    fn test_model_nouns_map_through_lexicon() {
        use crate::error::ModelError;
        use crate::state::{Identity, Origin, PipelineState};
        use async_trait::async_trait;

        struct NoModel;
        #[async_trait]
        impl ModelService for NoModel {
            async fn complete(&self, _: &str, _: &str) -> std::result::Result<String, ModelError> {
                Err(ModelError::Timeout)
            }
        }

        let classifier = IntentClassifier::new(
            Arc::new(NoModel),
            Arc::new(SchemaCatalog::standard()),
        );
        let mut state =
            PipelineState::new("info de Juan", Origin::Webapp, Identity::new("Admin"), 2);
        classifier.apply_reply(
            &mut state,
            r#"{"intent": "query_read", "confidence": 0.9,
                "entities": ["paciente", "unicornio", "pacientes"],
                "extracted_values": {}}"#,
        );

        assert_eq!(state.intent, Some(Intent::QueryRead));
        // One resource: the unknown noun is dropped, the plural dedups.
        assert_eq!(state.entities.resources, vec!["clinic.pacientes"]);
    }

    #[test]
    fn test_rule_order_first_match_wins() {
        // Contains both an out-of-scope word and a read trigger; the
        // earlier rule decides.
        assert_eq!(
            fast_classify("buscar noticias de pacientes"),
            Some((Intent::OutOfScope, 0.9))
        );
    }
}
