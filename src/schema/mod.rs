//! Schema metadata for the clinic's multi-schema relational store.
//!
//! Provides the read-only resource catalog consumed by the query
//! synthesizer and fuzzy recovery: resource names, columns, searchable
//! columns, soft-delete markers, and foreign relations, plus the
//! Spanish domain-noun lexicon that maps user vocabulary to resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Schema Target
// ============================================================================

/// Logical database a resource lives in.
///
/// Joins are only valid between resources of the same target; the
/// `finance.*` resources are physically colocated with `ops.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaTarget {
    Auth,
    Core,
    Ops,
}

impl SchemaTarget {
    /// Parse a target from a model-provided name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "auth" => Some(SchemaTarget::Auth),
            "core" | "clinic" => Some(SchemaTarget::Core),
            "ops" | "finance" => Some(SchemaTarget::Ops),
            _ => None,
        }
    }
}

impl std::fmt::Display for SchemaTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaTarget::Auth => write!(f, "auth"),
            SchemaTarget::Core => write!(f, "core"),
            SchemaTarget::Ops => write!(f, "ops"),
        }
    }
}

// ============================================================================
// Resource Descriptor
// ============================================================================

/// A foreign-key relation between resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Column on this resource holding the key.
    pub column: String,
    /// Fully qualified resource the key points to.
    pub references: String,
    /// Referenced column.
    pub referenced_column: String,
}

/// Metadata for one named data collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Fully qualified name, e.g. `clinic.pacientes`.
    pub name: String,
    /// Logical database the resource lives in.
    pub target: SchemaTarget,
    /// Short description used in the synthesis prompt.
    pub description: String,
    /// Main columns.
    pub columns: Vec<String>,
    /// Columns suitable for text search and fuzzy matching.
    pub searchable_columns: Vec<String>,
    /// Soft-delete marker column, if the resource uses soft deletion.
    pub soft_delete_column: Option<String>,
    /// Foreign relations to other resources.
    pub relations: Vec<Relation>,
}

impl ResourceDescriptor {
    fn new(name: &str, target: SchemaTarget, description: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            target,
            description: description.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            searchable_columns: Vec::new(),
            soft_delete_column: None,
            relations: Vec::new(),
        }
    }

    fn searchable(mut self, columns: &[&str]) -> Self {
        self.searchable_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    fn soft_delete(mut self, column: &str) -> Self {
        self.soft_delete_column = Some(column.to_string());
        self
    }

    fn relation(mut self, column: &str, references: &str, referenced_column: &str) -> Self {
        self.relations.push(Relation {
            column: column.to_string(),
            references: references.to_string(),
            referenced_column: referenced_column.to_string(),
        });
        self
    }
}

// ============================================================================
// Schema Catalog
// ============================================================================

/// Immutable catalog of resources plus the domain-noun lexicon.
///
/// Built once at startup and injected into the pipeline; read-only
/// thereafter.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    resources: BTreeMap<String, ResourceDescriptor>,
    lexicon: BTreeMap<String, String>,
}

impl SchemaCatalog {
    /// Build the standard clinic catalog.
    pub fn standard() -> Self {
        let descriptors = vec![
            // auth
            ResourceDescriptor::new(
                "auth.clinicas",
                SchemaTarget::Auth,
                "Clínicas registradas en el sistema",
                &["id_clinica", "nombre", "direccion", "telefono"],
            )
            .soft_delete("deleted_at"),
            ResourceDescriptor::new(
                "auth.sys_usuarios",
                SchemaTarget::Auth,
                "Usuarios del sistema con sus credenciales y roles",
                &["id_usuario", "username", "email", "rol", "activo"],
            ),
            ResourceDescriptor::new(
                "auth.audit_logs",
                SchemaTarget::Auth,
                "Registro de auditoría de cambios en el sistema",
                &["id", "tabla_afectada", "accion", "usuario_id", "timestamp"],
            ),
            // core
            ResourceDescriptor::new(
                "clinic.pacientes",
                SchemaTarget::Core,
                "Expedientes de pacientes con datos personales",
                &[
                    "id_paciente",
                    "nombres",
                    "apellidos",
                    "fecha_nacimiento",
                    "sexo",
                    "telefono",
                    "email",
                    "domicilio",
                    "antecedentes_patologicos",
                    "antecedentes_familiares",
                    "alergias",
                    "medicamentos",
                    "observaciones_medicas",
                ],
            )
            .searchable(&["nombres", "apellidos", "telefono", "email"])
            .soft_delete("deleted_at"),
            ResourceDescriptor::new(
                "clinic.tratamientos",
                SchemaTarget::Core,
                "Carpetas de problemas/tratamientos por paciente",
                &[
                    "id_tratamiento",
                    "paciente_id",
                    "motivo_consulta_principal",
                    "diagnostico_inicial",
                    "estado_tratamiento",
                    "fecha_inicio",
                    "plan_general",
                ],
            )
            .soft_delete("deleted_at")
            .relation("paciente_id", "clinic.pacientes", "id_paciente"),
            ResourceDescriptor::new(
                "clinic.evoluciones_clinicas",
                SchemaTarget::Core,
                "Notas clínicas SOAP de cada visita",
                &[
                    "id_evolucion",
                    "tratamiento_id",
                    "podologo_id",
                    "fecha_consulta",
                    "subjetivo",
                    "objetivo",
                    "analisis",
                    "plan",
                ],
            )
            .soft_delete("deleted_at")
            .relation("tratamiento_id", "clinic.tratamientos", "id_tratamiento")
            .relation("podologo_id", "ops.podologos", "id_podologo"),
            ResourceDescriptor::new(
                "clinic.evidencias",
                SchemaTarget::Core,
                "Fotos clínicas asociadas a evoluciones",
                &["id_evidencia", "evolucion_id", "tipo", "url", "descripcion"],
            )
            .soft_delete("deleted_at")
            .relation("evolucion_id", "clinic.evoluciones_clinicas", "id_evolucion"),
            // ops
            ResourceDescriptor::new(
                "ops.podologos",
                SchemaTarget::Ops,
                "Personal clínico (podólogos)",
                &[
                    "id_podologo",
                    "nombre_completo",
                    "cedula_profesional",
                    "especialidad",
                    "activo",
                ],
            )
            .searchable(&["nombre_completo", "especialidad"])
            .soft_delete("deleted_at"),
            ResourceDescriptor::new(
                "ops.citas",
                SchemaTarget::Ops,
                "Agenda de citas de la clínica",
                &[
                    "id_cita",
                    "paciente_id",
                    "podologo_id",
                    "servicio_id",
                    "fecha_cita",
                    "hora_inicio",
                    "hora_fin",
                    "status",
                    "notas_agendamiento",
                ],
            )
            .soft_delete("deleted_at")
            .relation("paciente_id", "clinic.pacientes", "id_paciente")
            .relation("podologo_id", "ops.podologos", "id_podologo")
            .relation("servicio_id", "ops.catalogo_servicios", "id_servicio"),
            ResourceDescriptor::new(
                "ops.catalogo_servicios",
                SchemaTarget::Ops,
                "Catálogo de servicios ofrecidos con precios",
                &[
                    "id_servicio",
                    "nombre_servicio",
                    "descripcion",
                    "precio_base",
                    "duracion_minutos",
                    "activo",
                ],
            )
            .searchable(&["nombre_servicio", "descripcion"]),
            ResourceDescriptor::new(
                "ops.solicitudes_prospectos",
                SchemaTarget::Ops,
                "Leads/prospectos que solicitan información",
                &[
                    "id_prospecto",
                    "nombre",
                    "telefono",
                    "email",
                    "motivo_consulta",
                    "estado",
                ],
            )
            .searchable(&["nombre", "telefono", "motivo_consulta"]),
            // finance (colocated with ops)
            ResourceDescriptor::new(
                "finance.pagos",
                SchemaTarget::Ops,
                "Pagos recibidos de pacientes",
                &[
                    "id_pago",
                    "paciente_id",
                    "fecha_emision",
                    "total_facturado",
                    "monto_pagado",
                    "saldo_pendiente",
                    "status_pago",
                ],
            )
            .soft_delete("deleted_at")
            .relation("paciente_id", "clinic.pacientes", "id_paciente"),
            ResourceDescriptor::new(
                "finance.transacciones",
                SchemaTarget::Ops,
                "Registro detallado de transacciones financieras",
                &[
                    "id_transaccion",
                    "pago_id",
                    "monto",
                    "metodo_pago_id",
                    "fecha",
                    "recibido_por",
                ],
            )
            .relation("pago_id", "finance.pagos", "id_pago"),
            ResourceDescriptor::new(
                "finance.gastos",
                SchemaTarget::Ops,
                "Gastos operativos de la clínica",
                &[
                    "id_gasto",
                    "categoria_id",
                    "monto",
                    "iva",
                    "monto_total",
                    "concepto",
                    "fecha_gasto",
                    "status",
                ],
            )
            .soft_delete("deleted_at"),
        ];

        let mut resources = BTreeMap::new();
        for descriptor in descriptors {
            resources.insert(descriptor.name.clone(), descriptor);
        }

        Self {
            resources,
            lexicon: standard_lexicon(),
        }
    }

    /// Look up a resource by fully qualified name.
    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(name)
    }

    /// Whether a resource exists in the catalog.
    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Resolve a domain noun to a resource name. Unknown nouns yield `None`.
    pub fn resolve_noun(&self, noun: &str) -> Option<&str> {
        self.lexicon
            .get(noun.trim().to_lowercase().as_str())
            .map(|s| s.as_str())
    }

    /// Derive the deduplicated resource list for a piece of text by
    /// scanning its words through the lexicon.
    pub fn resources_in_text(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != 'á' && c != 'é' && c != 'í' && c != 'ó' && c != 'ú' && c != 'ñ')
        {
            if let Some(resource) = self.resolve_noun(word) {
                if !found.iter().any(|f| f == resource) {
                    found.push(resource.to_string());
                }
            }
        }
        found
    }

    /// Map a list of nouns to resources, dropping unrecognized ones.
    pub fn resources_for_nouns<'a>(&self, nouns: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut found = Vec::new();
        for noun in nouns {
            if let Some(resource) = self.resolve_noun(noun) {
                if !found.iter().any(|f| f == resource) {
                    found.push(resource.to_string());
                }
            }
        }
        found
    }

    /// Resources directly related to the given one.
    pub fn related(&self, name: &str) -> Vec<String> {
        let Some(descriptor) = self.resource(name) else {
            return Vec::new();
        };
        let mut related: Vec<String> = descriptor
            .relations
            .iter()
            .map(|r| r.references.clone())
            .collect();
        related.sort();
        related.dedup();
        related
    }

    /// Render the catalog as context for the synthesis prompt.
    pub fn prompt_context(&self, resources: &[String]) -> String {
        let mut lines = vec![
            "## Esquema de Base de Datos".to_string(),
            String::new(),
            "IMPORTANTE: las tablas con soft delete usan `deleted_at IS NULL`".to_string(),
            "para filtrar registros activos. NO uses `activo = true` en ellas.".to_string(),
        ];

        let mut selected: Vec<&ResourceDescriptor> = if resources.is_empty() {
            self.resources.values().collect()
        } else {
            // include the requested resources plus their direct relations
            let mut names: Vec<String> = resources.to_vec();
            for resource in resources {
                names.extend(self.related(resource));
            }
            names.sort();
            names.dedup();
            names.iter().filter_map(|n| self.resources.get(n)).collect()
        };
        selected.sort_by(|a, b| a.name.cmp(&b.name));

        for descriptor in &selected {
            lines.push(String::new());
            lines.push(format!(
                "**{}** ({}): {}",
                descriptor.name, descriptor.target, descriptor.description
            ));
            lines.push(format!("  - Columnas: {}", descriptor.columns.join(", ")));
            if !descriptor.searchable_columns.is_empty() {
                lines.push(format!(
                    "  - Búsqueda por: {}",
                    descriptor.searchable_columns.join(", ")
                ));
            }
            if let Some(column) = &descriptor.soft_delete_column {
                lines.push(format!("  - Soft delete: usa `{} IS NULL`", column));
            }
            for relation in &descriptor.relations {
                lines.push(format!(
                    "  - JOIN: {}.{} -> {}.{}",
                    descriptor.name, relation.column, relation.references, relation.referenced_column
                ));
            }
        }

        lines.join("\n")
    }
}

/// Spanish domain-noun to resource mapping.
fn standard_lexicon() -> BTreeMap<String, String> {
    let entries = [
        ("paciente", "clinic.pacientes"),
        ("pacientes", "clinic.pacientes"),
        ("cliente", "clinic.pacientes"),
        ("clientes", "clinic.pacientes"),
        ("tratamiento", "clinic.tratamientos"),
        ("tratamientos", "clinic.tratamientos"),
        ("problema", "clinic.tratamientos"),
        ("problemas", "clinic.tratamientos"),
        ("padecimiento", "clinic.tratamientos"),
        ("evolución", "clinic.evoluciones_clinicas"),
        ("evolucion", "clinic.evoluciones_clinicas"),
        ("evoluciones", "clinic.evoluciones_clinicas"),
        ("nota", "clinic.evoluciones_clinicas"),
        ("notas", "clinic.evoluciones_clinicas"),
        ("visita", "clinic.evoluciones_clinicas"),
        ("visitas", "clinic.evoluciones_clinicas"),
        ("cita", "ops.citas"),
        ("citas", "ops.citas"),
        ("agenda", "ops.citas"),
        ("turno", "ops.citas"),
        ("turnos", "ops.citas"),
        ("podólogo", "ops.podologos"),
        ("podologo", "ops.podologos"),
        ("podólogos", "ops.podologos"),
        ("podologos", "ops.podologos"),
        ("doctor", "ops.podologos"),
        ("doctores", "ops.podologos"),
        ("especialista", "ops.podologos"),
        ("servicio", "ops.catalogo_servicios"),
        ("servicios", "ops.catalogo_servicios"),
        ("procedimiento", "ops.catalogo_servicios"),
        ("prospecto", "ops.solicitudes_prospectos"),
        ("prospectos", "ops.solicitudes_prospectos"),
        ("lead", "ops.solicitudes_prospectos"),
        ("leads", "ops.solicitudes_prospectos"),
        ("pago", "finance.pagos"),
        ("pagos", "finance.pagos"),
        ("transacción", "finance.transacciones"),
        ("transaccion", "finance.transacciones"),
        ("transacciones", "finance.transacciones"),
        ("gasto", "finance.gastos"),
        ("gastos", "finance.gastos"),
        ("usuario", "auth.sys_usuarios"),
        ("usuarios", "auth.sys_usuarios"),
        ("auditoría", "auth.audit_logs"),
        ("auditoria", "auth.audit_logs"),
    ];
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_noun() {
        let catalog = SchemaCatalog::standard();
        assert_eq!(catalog.resolve_noun("pacientes"), Some("clinic.pacientes"));
        assert_eq!(catalog.resolve_noun("  Citas "), Some("ops.citas"));
        assert_eq!(catalog.resolve_noun("clima"), None);
    }

    #[test]
    fn test_resources_in_text_deduplicates() {
        let catalog = SchemaCatalog::standard();
        let resources = catalog.resources_in_text("citas de pacientes y más citas");
        assert_eq!(resources, vec!["ops.citas", "clinic.pacientes"]);
    }

    #[test]
    fn test_unrecognized_nouns_dropped() {
        let catalog = SchemaCatalog::standard();
        let resources = catalog.resources_for_nouns(["paciente", "astronauta"]);
        assert_eq!(resources, vec!["clinic.pacientes"]);
    }

    #[test]
    fn test_soft_delete_markers() {
        let catalog = SchemaCatalog::standard();
        let patients = catalog.resource("clinic.pacientes").unwrap();
        assert_eq!(patients.soft_delete_column.as_deref(), Some("deleted_at"));
        let services = catalog.resource("ops.catalogo_servicios").unwrap();
        assert!(services.soft_delete_column.is_none());
    }

    #[test]
    fn test_related_resources() {
        let catalog = SchemaCatalog::standard();
        let related = catalog.related("ops.citas");
        assert!(related.contains(&"clinic.pacientes".to_string()));
        assert!(related.contains(&"ops.podologos".to_string()));
    }

    #[test]
    fn test_prompt_context_includes_relations() {
        let catalog = SchemaCatalog::standard();
        let context = catalog.prompt_context(&["ops.citas".to_string()]);
        assert!(context.contains("ops.citas"));
        // direct relations pulled in for join guidance
        assert!(context.contains("clinic.pacientes"));
        assert!(context.contains("deleted_at IS NULL"));
    }

    #[test]
    fn test_target_parse() {
        assert_eq!(SchemaTarget::parse("finance"), Some(SchemaTarget::Ops));
        assert_eq!(SchemaTarget::parse("clinic"), Some(SchemaTarget::Core));
        assert_eq!(SchemaTarget::parse("mystery"), None);
    }
}
