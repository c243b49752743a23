//! Query synthesis stage.
//!
//! Turns a classified, permitted request into a validated read-only
//! statement. The model proposes the statement; every structural
//! constraint is re-checked here before anything reaches the executor:
//! SELECT-only, a single logical target, the soft-deletion predicate,
//! and a hard row cap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{parse, ModelService};
use crate::schema::{SchemaCatalog, SchemaTarget};
use crate::state::{ErrorKind, PipelineState, SynthesizedQuery};

static MUTATION_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|GRANT|REVOKE)\b").unwrap()
});

static ACTIVE_FLAG_PREDICATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bactivo\s*=\s*true\b").unwrap());

static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)\b").unwrap());

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"Eres un experto en SQL para PostgreSQL que genera consultas para un sistema de gestión clínica podológica.

## Reglas ESTRICTAS:
1. SOLO genera consultas SELECT (lectura)
2. USA los esquemas correctos: auth., clinic., ops., finance.
3. SIEMPRE usa `deleted_at IS NULL` para tablas con soft delete (NO `activo = true`)
4. USA ILIKE para búsquedas de texto (case insensitive)
5. LIMITA resultados a {max_rows} filas máximo
6. NO uses subconsultas complejas ni funciones de ventana
7. USA alias claros para columnas en el resultado

## CRÍTICO: NO HAGAS JOINs ENTRE BASES DE DATOS DIFERENTES
- Solo puedes hacer JOIN entre tablas del MISMO esquema/base
- Si necesitas datos de múltiples bases, usa consultas separadas

## Esquema de Base de Datos:
{schema_context}

## Formato de Respuesta:
Responde SIEMPRE con JSON válido:
{
  "sql": "SELECT ... FROM ...",
  "params": {},
  "target_db": "core",
  "tables_involved": ["clinic.pacientes"],
  "explanation": "Esta consulta busca..."
}"#;

/// Builds a validated read statement from the classified request.
pub struct QuerySynthesizer {
    model: Arc<dyn ModelService>,
    catalog: Arc<SchemaCatalog>,
    max_rows: usize,
}

impl QuerySynthesizer {
    pub fn new(model: Arc<dyn ModelService>, catalog: Arc<SchemaCatalog>, max_rows: usize) -> Self {
        Self {
            model,
            catalog,
            max_rows,
        }
    }

    /// Synthesize a query for `state`. On a retry, `retry_context`
    /// carries the previous execution failure so the model can correct
    /// the statement rather than regenerate it blind.
    pub async fn synthesize(&self, state: &mut PipelineState, retry_context: Option<&str>) {
        state.visit("generate_sql");

        if state.has_blocking_error() {
            return;
        }
        let intent = match state.intent {
            Some(intent) => intent,
            None => return,
        };
        if intent.is_conversational() {
            return;
        }

        if intent.is_mutation() {
            state.fail(
                ErrorKind::PermissionDenied,
                format!("mutation intent rejected: {}", intent.as_str()),
                Some(
                    "🔒 Las operaciones de modificación deben hacerse desde la interfaz principal.\n\n\
                     Este asistente solo puede consultar información."
                        .to_string(),
                ),
            );
            return;
        }

        // Nothing to query against; the composer asks for clarification.
        if state.entities.resources.is_empty() {
            tracing::debug!(request_id = %state.request_id, "no resources extracted, skipping synthesis");
            return;
        }

        let system = SYNTHESIS_SYSTEM_PROMPT
            .replace("{max_rows}", &self.max_rows.to_string())
            .replace(
                "{schema_context}",
                &self.catalog.prompt_context(&state.entities.resources),
            );

        let mut user = format!(
            "Consulta del usuario: \"{}\"\n\n\
             Contexto detectado:\n\
             - Intención: {}\n\
             - Recursos: {}\n\
             - Valores extraídos: {}",
            state.raw_query,
            intent.as_str(),
            state.entities.resources.join(", "),
            serde_json::to_string(&state.entities.values).unwrap_or_default(),
        );
        for (key, value) in &state.context {
            user.push_str(&format!("\n- {key}: {value}"));
        }
        if let Some(context) = retry_context {
            user.push_str(&format!(
                "\n\nEl intento anterior falló con este error, corrígelo:\n{context}"
            ));
        }
        user.push_str("\n\nGenera la consulta SQL correspondiente.");

        let reply = match self.model.complete(&system, &user).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(request_id = %state.request_id, error = %e, "synthesis failed");
                self.fail_synthesis(state, e.to_string());
                return;
            }
        };

        match self.parse_and_validate(state, &reply) {
            Ok(query) => {
                tracing::debug!(
                    request_id = %state.request_id,
                    target = %query.target,
                    sql = %query.text,
                    "query synthesized"
                );
                state.synthesized_query = Some(query);
            }
            Err(reason) => {
                tracing::warn!(request_id = %state.request_id, reason = %reason, "synthesized query rejected");
                self.fail_synthesis(state, reason);
            }
        }
    }

    fn fail_synthesis(&self, state: &mut PipelineState, internal: String) {
        state.fail(
            ErrorKind::SqlError,
            internal,
            Some(
                "⚠️ No pude interpretar tu consulta correctamente.\n\n\
                 Intenta reformularla de otra manera."
                    .to_string(),
            ),
        );
    }

    /// Parse the model reply and enforce every structural constraint.
    fn parse_and_validate(
        &self,
        state: &PipelineState,
        reply: &str,
    ) -> std::result::Result<SynthesizedQuery, String> {
        let parsed = parse::extract_json(reply);

        let (sql, params, target_hint, tables) = match &parsed {
            Some(value) => {
                let sql = value
                    .get("sql")
                    .and_then(|s| s.as_str())
                    .map(str::to_string);
                let params: BTreeMap<String, serde_json::Value> = value
                    .get("params")
                    .and_then(|p| p.as_object())
                    .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                let target_hint = value
                    .get("target_db")
                    .and_then(|t| t.as_str())
                    .map(str::to_string);
                let tables: Vec<String> = value
                    .get("tables_involved")
                    .and_then(|t| t.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|t| t.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                (sql, params, target_hint, tables)
            }
            None => (
                parse::extract_select(reply),
                BTreeMap::new(),
                None,
                Vec::new(),
            ),
        };

        let sql = sql
            .or_else(|| parse::extract_select(reply))
            .ok_or_else(|| format!("no statement in model reply: {:.200}", reply))?;
        let sql = sql.trim().trim_end_matches(';').to_string();

        if !sql.to_uppercase().starts_with("SELECT") {
            return Err(format!("statement is not a SELECT: {:.100}", sql));
        }
        if MUTATION_KEYWORD.is_match(&sql) {
            return Err(format!("mutating keyword in statement: {:.100}", sql));
        }
        if ACTIVE_FLAG_PREDICATE.is_match(&sql) {
            return Err("statement filters on the active flag instead of the deletion marker".to_string());
        }

        let resources = if tables.is_empty() {
            state.entities.resources.clone()
        } else {
            tables
        };
        let resources: Vec<String> = resources
            .into_iter()
            .filter(|r| self.catalog.contains(r))
            .collect();
        if resources.is_empty() {
            return Err("statement references no known resource".to_string());
        }

        // Single logical target; cross-target needs become separate queries.
        let mut targets: Vec<SchemaTarget> = resources
            .iter()
            .filter_map(|r| self.catalog.resource(r))
            .map(|d| d.target)
            .collect();
        targets.dedup();
        if targets.len() > 1 {
            return Err(format!("statement spans multiple targets: {resources:?}"));
        }
        let target = target_hint
            .as_deref()
            .and_then(SchemaTarget::parse)
            .or_else(|| targets.first().copied())
            .ok_or_else(|| "no target for statement".to_string())?;

        for resource in &resources {
            if let Some(descriptor) = self.catalog.resource(resource) {
                if let Some(marker) = &descriptor.soft_delete_column {
                    let predicate = format!("{marker} is null");
                    if !sql.to_lowercase().contains(&predicate) {
                        return Err(format!("missing soft-delete predicate for {resource}"));
                    }
                }
            }
        }

        let sql = self.clamp_limit(sql);

        Ok(SynthesizedQuery {
            text: sql,
            params,
            target,
            resources,
            is_mutation: false,
        })
    }

    /// Append the row cap, or tighten an existing LIMIT above the cap.
    fn clamp_limit(&self, sql: String) -> String {
        if let Some(captures) = LIMIT_CLAUSE.captures(&sql) {
            let limit: usize = captures[1].parse().unwrap_or(self.max_rows);
            if limit > self.max_rows {
                return LIMIT_CLAUSE
                    .replace(&sql, format!("LIMIT {}", self.max_rows).as_str())
                    .to_string();
            }
            sql
        } else {
            format!("{sql} LIMIT {}", self.max_rows)
        }
    }
}
