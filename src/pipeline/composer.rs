//! Response composition stage.
//!
//! Every pipeline run ends here and always produces exactly one
//! natural-language reply, plus a structured payload when rows were
//! returned. Branch order matters: conversational intents first, then
//! errors, then small result sets through deterministic templates, and
//! finally model-based summarization for empty or large sets.

use std::sync::Arc;

use serde_json::json;

use crate::model::ModelService;
use crate::state::{ErrorKind, ExecutionOutcome, Intent, PipelineState};
use crate::store::Row;

/// Row-count band rendered by deterministic templates.
const TEMPLATE_MAX_ROWS: usize = 5;
/// Rows included in the structured payload and summarization prompt.
const PAYLOAD_MAX_ROWS: usize = 20;

/// Composes the final user-facing reply from the pipeline state.
pub struct ResponseComposer {
    model: Arc<dyn ModelService>,
}

impl ResponseComposer {
    pub fn new(model: Arc<dyn ModelService>) -> Self {
        Self { model }
    }

    /// Produce the reply text and optional structured payload.
    pub async fn compose(&self, state: &mut PipelineState) -> (String, Option<serde_json::Value>) {
        state.visit("generate_response");

        // A blocking denial outranks the conversational reply; internal
        // classification degradation does not.
        if !state.has_blocking_error() {
            match state.intent {
                Some(Intent::Greeting) => return (self.greeting_reply(state).await, None),
                Some(Intent::OutOfScope) => return (self.out_of_scope_reply().await, None),
                Some(Intent::Clarification) => {
                    return (self.clarification_reply(state).await, None)
                }
                _ => {}
            }
        }

        if state.has_error() {
            return (self.error_reply(state), None);
        }

        let (rows, columns, elapsed_ms) = match &state.execution_outcome {
            Some(ExecutionOutcome::Success {
                rows,
                columns,
                elapsed_ms,
            }) => (rows.clone(), columns.clone(), *elapsed_ms),
            _ => {
                return (
                    "No pude completar la búsqueda. Por favor, intenta de nuevo.".to_string(),
                    None,
                );
            }
        };

        let rows = redact(rows, &state.entities.restricted_fields);
        let columns: Vec<String> = columns
            .into_iter()
            .filter(|c| !state.entities.restricted_fields.contains(c))
            .collect();

        let text = if (1..=TEMPLATE_MAX_ROWS).contains(&rows.len()) {
            format_template(&rows, &columns)
        } else {
            self.summarize(state, &rows, &columns).await
        };

        let payload = json!({
            "row_count": rows.len(),
            "columns": columns,
            "data": rows.iter().take(PAYLOAD_MAX_ROWS).collect::<Vec<_>>(),
            "execution_time_ms": elapsed_ms,
        });

        (text, Some(payload))
    }

    // ------------------------------------------------------------------
    // Conversational branches
    // ------------------------------------------------------------------

    async fn greeting_reply(&self, state: &PipelineState) -> String {
        let system = "Eres el asistente de una clínica podológica. Responde al saludo \
                      de forma amigable y menciona qué tipo de información real de la \
                      base de datos puedes consultar.";
        let user = format!(
            "El usuario me dijo: '{}'. Responde el saludo y explica brevemente qué puedes hacer.",
            state.raw_query
        );
        match self.model.complete(system, &user).await {
            Ok(reply) => reply,
            Err(_) => {
                "¡Hola! Soy tu asistente de la clínica. ¿Qué información necesitas consultar?"
                    .to_string()
            }
        }
    }

    async fn out_of_scope_reply(&self) -> String {
        let system = "Eres un asistente especializado en bases de datos de clínicas \
                      podológicas. Explica amablemente que no puedes ayudar con temas \
                      fuera de la gestión clínica.";
        let user = "Explica qué tipo de consultas SÍ puedes responder sobre la base de \
                    datos de la clínica.";
        match self.model.complete(system, user).await {
            Ok(reply) => reply,
            Err(_) => {
                "Esa consulta está fuera de mi especialidad. Puedo ayudarte con \
                 información de la base de datos de la clínica."
                    .to_string()
            }
        }
    }

    async fn clarification_reply(&self, state: &PipelineState) -> String {
        let system = "Eres un asistente de clínica podológica. La consulta del usuario \
                      es ambigua. Pide clarificación de forma amigable y sugiere formas \
                      específicas de reformular la pregunta.";
        let user = format!(
            "Usuario preguntó: '{}'\n\nGenera una respuesta que pida clarificación y \
             dé ejemplos específicos de cómo reformular la pregunta.",
            state.raw_query
        );
        match self.model.complete(system, &user).await {
            Ok(reply) => reply,
            Err(_) => {
                "🤔 No estoy seguro de qué información necesitas. ¿Podrías ser más específico?"
                    .to_string()
            }
        }
    }

    // ------------------------------------------------------------------
    // Error branch
    // ------------------------------------------------------------------

    fn error_reply(&self, state: &PipelineState) -> String {
        if let Some(message) = &state.error.user_message {
            return message.clone();
        }

        let (title, message, suggestion) = match state.error.kind {
            ErrorKind::InvalidRole => (
                "🔒 **Acceso restringido**",
                "Tu cuenta no tiene un rol válido configurado.",
                Some("Contacta al administrador para revisar tu cuenta."),
            ),
            ErrorKind::PermissionDenied => (
                "🔒 **Acceso restringido**",
                "No tienes acceso a esta información con tu rol actual.",
                Some("Contacta al administrador si necesitas acceso."),
            ),
            ErrorKind::SqlError => (
                "⚠️ **No pude completar la búsqueda**",
                "Intenta reformular tu pregunta de otra manera.",
                None,
            ),
            ErrorKind::NoResults => (
                "📭 **Sin resultados**",
                "No encontré información que coincida. Verifica que los datos estén \
                 escritos correctamente.",
                None,
            ),
            ErrorKind::Internal | ErrorKind::None => (
                "⚠️ **Algo salió mal**",
                "Tuve un problema procesando tu consulta. Intenta de nuevo en un momento.",
                None,
            ),
        };

        let mut reply = format!("{title}\n\n{message}");
        if !state.error.suggestions.is_empty() && state.error.kind == ErrorKind::NoResults {
            reply.push_str(&format!(
                "\n\n¿Quizás quisiste decir: {}?",
                state.error.suggestions.join(", ")
            ));
        }
        if let Some(suggestion) = suggestion {
            reply.push_str(&format!("\n\n💡 {suggestion}"));
        }
        reply
    }

    // ------------------------------------------------------------------
    // Summarization branch (0 rows or large result sets)
    // ------------------------------------------------------------------

    async fn summarize(&self, state: &PipelineState, rows: &[Row], columns: &[String]) -> String {
        let sample: Vec<&Row> = rows.iter().take(PAYLOAD_MAX_ROWS).collect();
        let data = serde_json::to_string(&sample).unwrap_or_else(|_| "[]".to_string());

        let system = "Eres el asistente amigable de una clínica podológica. Presenta la \
                      información de forma clara y natural en español, sin tecnicismos \
                      ni nombres de tablas. Si no hay datos, explícalo amigablemente. \
                      Termina SIEMPRE con una pregunta o sugerencia de siguiente paso.";
        let user = format!(
            "Consulta original del usuario: \"{}\"\n\n\
             Datos obtenidos:\n```json\n{}\n```\n\n\
             Total de registros: {}\n\
             Columnas: {}\n\n\
             Genera una respuesta amigable y clara para el usuario.",
            state.raw_query,
            data,
            rows.len(),
            columns.join(", "),
        );

        match self.model.complete(system, &user).await {
            Ok(reply) => {
                let reply = reply.trim().to_string();
                if reply.ends_with('?') {
                    reply
                } else {
                    format!("{reply}\n\n¿Te ayudo con algo más?")
                }
            }
            Err(e) => {
                tracing::warn!(request_id = %state.request_id, error = %e, "summarization failed");
                format_generic(rows, columns)
            }
        }
    }
}

// ============================================================================
// Deterministic templates
// ============================================================================

fn redact(rows: Vec<Row>, restricted: &[String]) -> Vec<Row> {
    if restricted.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|mut row| {
            for field in restricted {
                row.remove(field);
            }
            row
        })
        .collect()
}

fn field<'a>(row: &'a Row, name: &str) -> Option<&'a str> {
    row.get(name).and_then(|v| v.as_str())
}

fn format_template(rows: &[Row], columns: &[String]) -> String {
    let has = |c: &str| columns.iter().any(|col| col == c);

    if has("nombres") && has("apellidos") {
        format_patients(rows)
    } else if has("fecha_cita") || has("fecha_hora") || has("fecha") {
        format_appointments(rows)
    } else if has("nombre_servicio") {
        format_services(rows)
    } else {
        format_generic(rows, columns)
    }
}

fn format_patients(rows: &[Row]) -> String {
    let mut lines = vec![format!("👤 **Encontré {} paciente(s):**\n", rows.len())];
    for (i, row) in rows.iter().enumerate() {
        let nombre = format!(
            "{} {}",
            field(row, "nombres").unwrap_or(""),
            field(row, "apellidos").unwrap_or(""),
        )
        .trim()
        .to_string();
        lines.push(format!("{}. **{}**", i + 1, nombre));
        if let Some(telefono) = field(row, "telefono") {
            lines.push(format!("   📱 {telefono}"));
        }
        if let Some(email) = field(row, "email") {
            lines.push(format!("   📧 {email}"));
        }
        if let Some(nacimiento) = field(row, "fecha_nacimiento") {
            lines.push(format!("   🎂 {nacimiento}"));
        }
        lines.push(String::new());
    }
    lines.push("¿Necesitas más detalles de algún paciente?".to_string());
    lines.join("\n")
}

fn format_appointments(rows: &[Row]) -> String {
    let mut lines = vec![format!("📅 **{} cita(s) encontrada(s):**\n", rows.len())];
    for row in rows {
        let fecha = field(row, "fecha_cita")
            .or_else(|| field(row, "fecha_hora"))
            .or_else(|| field(row, "fecha"))
            .unwrap_or("");
        let quien = field(row, "paciente_nombre")
            .or_else(|| field(row, "nombres"))
            .unwrap_or("");
        lines.push(format!("• **{fecha}** - {quien}"));
        if let Some(motivo) = field(row, "motivo") {
            lines.push(format!("  {motivo}"));
        }
        if let Some(estado) = field(row, "estado").or_else(|| field(row, "status")) {
            lines.push(format!("  Estado: {estado}"));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

fn format_services(rows: &[Row]) -> String {
    let mut lines = vec!["📋 **Servicios disponibles:**\n".to_string()];
    for row in rows {
        let mut line = format!("• **{}**", field(row, "nombre_servicio").unwrap_or(""));
        if let Some(precio) = row.get("precio") {
            match precio {
                serde_json::Value::Number(n) => line.push_str(&format!(" - ${n}")),
                serde_json::Value::String(s) => line.push_str(&format!(" - {s}")),
                _ => {}
            }
        }
        if let Some(duracion) = row.get("duracion_estimada") {
            line.push_str(&format!(" ({duracion} min)"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn format_generic(rows: &[Row], columns: &[String]) -> String {
    // Single-value aggregates get a headline, not a one-row table.
    if rows.len() == 1 && columns.len() == 1 {
        let col = columns[0].to_lowercase();
        if ["count", "total", "cantidad"].iter().any(|w| col.contains(w)) {
            let value = rows[0]
                .get(&columns[0])
                .map(|v| v.to_string())
                .unwrap_or_default();
            let entity = ["pacientes", "citas", "tratamientos", "servicios"]
                .iter()
                .find(|e| col.contains(*e));
            return match entity {
                Some(entity) => format!("📊 **Total de {entity}: {value}**"),
                None => format!("📊 **Resultado: {value}**"),
            };
        }
    }

    if rows.is_empty() {
        return "📭 No encontré resultados para tu búsqueda.".to_string();
    }

    let mut lines = vec![format!("📊 **Encontré {} resultado(s):**\n", rows.len())];
    let display_cols: Vec<&String> = columns.iter().take(5).collect();
    for (i, row) in rows.iter().take(10).enumerate() {
        let values: Vec<String> = display_cols
            .iter()
            .map(|col| {
                row.get(col.as_str())
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default()
            })
            .collect();
        lines.push(format!("{}. {}", i + 1, values.join(" | ")));
    }
    if rows.len() > 10 {
        lines.push(format!("\n... y {} más", rows.len() - 10));
    }
    lines.join("\n")
}
