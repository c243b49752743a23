//! Permission gate stage.
//!
//! Runs after classification and before synthesis. Denials are not Rust
//! errors; they are recorded in the pipeline state with a friendly
//! user-facing message, and the orchestrator routes straight to the
//! response composer.

use std::sync::Arc;

use crate::access::{AccessMatrix, Role};
use crate::state::{ErrorKind, Intent, PipelineState};

/// Applies the role matrix to a classified request.
pub struct PermissionGate {
    matrix: Arc<AccessMatrix>,
}

impl PermissionGate {
    pub fn new(matrix: Arc<AccessMatrix>) -> Self {
        Self { matrix }
    }

    /// Check the request in `state` against the matrix.
    ///
    /// The role is validated first: an unknown role is denied whatever
    /// the intent. For the known roles, conversational intents pass
    /// untouched and query intents are checked against every resource
    /// they involve; a single denied resource denies the whole request,
    /// and the denial names the exact resources rather than a generic
    /// refusal.
    pub fn check(&self, state: &mut PipelineState) {
        state.visit("check_permissions");

        let role = match Role::parse(&state.identity.role) {
            Some(role) => role,
            None => {
                tracing::warn!(
                    request_id = %state.request_id,
                    role = %state.identity.role,
                    "rejecting request with unknown role"
                );
                state.fail(
                    ErrorKind::InvalidRole,
                    format!("unknown role: {}", state.identity.role),
                    Some("Tu cuenta no tiene un rol válido configurado.".to_string()),
                );
                return;
            }
        };

        let intent = match state.intent {
            Some(intent) => intent,
            None => return,
        };
        if intent.is_conversational() {
            return;
        }

        let is_write = intent.is_mutation();
        let denied: Vec<String> = state
            .entities
            .resources
            .iter()
            .filter(|r| !self.matrix.can_access(role, r, is_write))
            .cloned()
            .collect();

        if !denied.is_empty() {
            tracing::warn!(
                request_id = %state.request_id,
                role = %role,
                denied = ?denied,
                "permission denied"
            );
            let detail = if is_write {
                "No tienes permisos para modificar esta información. \
                 Solo puedes consultar datos."
            } else {
                "No tienes acceso a ver esta información con tu rol actual."
            };
            state.fail(
                ErrorKind::PermissionDenied,
                format!("access denied for {} to {}", role, denied.join(", ")),
                Some(format!(
                    "🔒 **Acceso restringido**\n\n{detail}\n\nRecursos: {}",
                    denied.join(", ")
                )),
            );
            state.error.suggestions = vec![
                "Contacta al administrador si necesitas acceso.".to_string(),
                "Verifica que estás consultando información dentro de tu área.".to_string(),
            ];
            return;
        }

        // Front desk may list patients but never their medical history;
        // the columns are stripped at render time.
        if state
            .entities
            .resources
            .iter()
            .any(|r| !self.matrix.restricted_columns(role, r).is_empty())
        {
            let mut fields: Vec<String> = Vec::new();
            for resource in &state.entities.resources {
                for column in self.matrix.restricted_columns(role, resource) {
                    if !fields.contains(column) {
                        fields.push(column.clone());
                    }
                }
            }
            tracing::debug!(
                request_id = %state.request_id,
                role = %role,
                fields = ?fields,
                "applying column restrictions"
            );
            state.entities.restricted_fields = fields;
        }

        if intent == Intent::MutationDelete {
            state.entities.requires_confirmation = true;
        }
    }
}
