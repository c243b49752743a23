//! Role-based access control.
//!
//! The access matrix is immutable and role-keyed: per-role read and
//! write resource sets, plus column-level restrictions for roles that
//! may see a resource but not all of its fields. The [`PermissionGate`]
//! applies the matrix to a classified request before any query is
//! synthesized.

mod gate;

pub use gate::PermissionGate;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ============================================================================
// Roles
// ============================================================================

/// Closed set of staff roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access to every resource.
    Admin,
    /// Clinical staff: clinical records plus scheduling.
    Podologo,
    /// Front desk: scheduling and contact data only.
    Recepcion,
}

impl Role {
    /// Parse a role name as delivered by the upstream auth layer.
    /// Unknown names yield `None`; the gate turns that into an
    /// invalid-role denial rather than guessing a default.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "podologo" | "podólogo" => Some(Self::Podologo),
            "recepcion" | "recepción" => Some(Self::Recepcion),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Admin => "Admin",
            Self::Podologo => "Podologo",
            Self::Recepcion => "Recepcion",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Access Matrix
// ============================================================================

/// Per-role permissions over named resources.
#[derive(Debug, Clone)]
pub struct AccessMatrix {
    read: BTreeMap<Role, BTreeSet<String>>,
    write: BTreeMap<Role, BTreeSet<String>>,
    /// Role -> resource -> columns that role may not see.
    restricted: BTreeMap<Role, BTreeMap<String, Vec<String>>>,
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl AccessMatrix {
    /// The standard clinic permission matrix.
    pub fn standard() -> Self {
        let all = set(&[
            "auth.clinicas",
            "auth.sys_usuarios",
            "auth.audit_logs",
            "clinic.pacientes",
            "clinic.tratamientos",
            "clinic.evoluciones_clinicas",
            "clinic.evidencias",
            "ops.podologos",
            "ops.citas",
            "ops.catalogo_servicios",
            "ops.solicitudes_prospectos",
            "finance.pagos",
            "finance.transacciones",
            "finance.gastos",
        ]);

        let mut read = BTreeMap::new();
        read.insert(Role::Admin, all.clone());
        read.insert(
            Role::Podologo,
            set(&[
                "clinic.pacientes",
                "clinic.tratamientos",
                "clinic.evoluciones_clinicas",
                "clinic.evidencias",
                "ops.podologos",
                "ops.citas",
                "ops.catalogo_servicios",
                "ops.solicitudes_prospectos",
                "auth.audit_logs",
            ]),
        );
        read.insert(
            Role::Recepcion,
            set(&[
                "clinic.pacientes",
                "ops.citas",
                "ops.catalogo_servicios",
                "ops.solicitudes_prospectos",
                "ops.podologos",
            ]),
        );

        let mut write = BTreeMap::new();
        let mut admin_write = all;
        // Audit logs are append-only from the application's side.
        admin_write.remove("auth.audit_logs");
        write.insert(Role::Admin, admin_write);
        write.insert(
            Role::Podologo,
            set(&[
                "clinic.pacientes",
                "clinic.tratamientos",
                "clinic.evoluciones_clinicas",
                "clinic.evidencias",
                "ops.citas",
            ]),
        );
        write.insert(
            Role::Recepcion,
            set(&["ops.citas", "ops.solicitudes_prospectos", "clinic.pacientes"]),
        );

        let mut restricted = BTreeMap::new();
        let mut recepcion_restricted = BTreeMap::new();
        recepcion_restricted.insert(
            "clinic.pacientes".to_string(),
            vec![
                "antecedentes_patologicos".to_string(),
                "antecedentes_familiares".to_string(),
                "alergias".to_string(),
                "medicamentos".to_string(),
                "observaciones_medicas".to_string(),
            ],
        );
        restricted.insert(Role::Recepcion, recepcion_restricted);

        Self {
            read,
            write,
            restricted,
        }
    }

    /// Resources the role may read or write.
    pub fn allowed(&self, role: Role, write: bool) -> &BTreeSet<String> {
        static EMPTY: BTreeSet<String> = BTreeSet::new();
        let matrix = if write { &self.write } else { &self.read };
        matrix.get(&role).unwrap_or(&EMPTY)
    }

    /// Whether the role may access a single resource.
    pub fn can_access(&self, role: Role, resource: &str, write: bool) -> bool {
        self.allowed(role, write).contains(resource)
    }

    /// Columns of `resource` the role may not see, if any.
    pub fn restricted_columns(&self, role: Role, resource: &str) -> &[String] {
        self.restricted
            .get(&role)
            .and_then(|m| m.get(resource))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
