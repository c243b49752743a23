//! Fuzzy recovery stage.
//!
//! When a query succeeds but returns zero rows, the culprit is usually
//! a misspelled name. This stage compares the string entities from the
//! query against stored values of the searchable columns using trigram
//! similarity, and attaches the best matches as suggestions. It is
//! side-effect-free; any store failure degrades silently to "no
//! suggestions".

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::schema::SchemaCatalog;
use crate::state::{ErrorKind, PipelineState};
use crate::store::RelationalStore;

/// Candidate values fetched per column when looking for matches.
const CANDIDATE_POOL: usize = 500;

/// A ranked approximate match. Transient: produced here, consumed once
/// by the composer, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionMatch {
    pub value: String,
    pub similarity: f32,
    pub column: String,
}

// ============================================================================
// Trigram similarity
// ============================================================================

/// Trigram-set Jaccard similarity over lowercased input, with the
/// string padded by two leading and one trailing space so short words
/// still produce boundary trigrams.
pub fn trigram_similarity(a: &str, b: &str) -> f32 {
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.len() + tb.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f32 / union as f32
    }
}

fn trigrams(s: &str) -> BTreeSet<Vec<char>> {
    let normalized = s.trim().to_lowercase();
    if normalized.is_empty() {
        return BTreeSet::new();
    }
    let padded: Vec<char> = format!("  {normalized} ").chars().collect();
    padded.windows(3).map(|w| w.to_vec()).collect()
}

// ============================================================================
// Recovery stage
// ============================================================================

/// Produces ranked suggestions for a zero-row result.
pub struct FuzzyRecovery {
    store: Arc<dyn RelationalStore>,
    catalog: Arc<SchemaCatalog>,
    threshold: f32,
    limit: usize,
}

impl FuzzyRecovery {
    pub fn new(
        store: Arc<dyn RelationalStore>,
        catalog: Arc<SchemaCatalog>,
        threshold: f32,
        limit: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            threshold,
            limit,
        }
    }

    /// Attempt recovery for a zero-row success.
    ///
    /// Tries the most salient entity first, then the remaining string
    /// entities, stopping at the first that yields matches. When
    /// suggestions are found, a `NO_RESULTS` error with a friendly
    /// message is recorded; otherwise the state is left untouched and
    /// the composer summarizes the empty result instead.
    pub async fn recover(&self, state: &mut PipelineState) {
        state.visit("fuzzy_recovery");

        for term in self.candidate_terms(state) {
            let matches = self.find_matches(state, &term).await;
            if matches.is_empty() {
                continue;
            }
            let suggestions: Vec<String> = matches.into_iter().map(|m| m.value).collect();
            tracing::debug!(
                request_id = %state.request_id,
                term = %term,
                suggestions = ?suggestions,
                "fuzzy suggestions found"
            );
            state.fail(
                ErrorKind::NoResults,
                format!("no exact match for '{term}'"),
                Some(format!(
                    "📭 No encontré resultados exactos.\n\n\
                     ¿Quizás quisiste decir: {}?",
                    suggestions.join(", ")
                )),
            );
            state.error.suggestions = suggestions;
            return;
        }

        tracing::debug!(request_id = %state.request_id, "no fuzzy suggestions");
    }

    /// Entity values worth matching, most salient first: name-like keys,
    /// then the rest by descending length. Values too short to carry a
    /// useful trigram signal are dropped.
    fn candidate_terms(&self, state: &PipelineState) -> Vec<String> {
        let mut named: Vec<(bool, String)> = state
            .entities
            .values
            .iter()
            .filter(|(_, v)| v.chars().count() > 2)
            .map(|(k, v)| (k.contains("nombre"), v.clone()))
            .collect();
        named.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.len().cmp(&a.1.len())));
        named.into_iter().map(|(_, v)| v).collect()
    }

    async fn find_matches(&self, state: &PipelineState, term: &str) -> Vec<SuggestionMatch> {
        let mut matches: Vec<SuggestionMatch> = Vec::new();

        for resource in &state.entities.resources {
            let descriptor = match self.catalog.resource(resource) {
                Some(descriptor) => descriptor,
                None => continue,
            };
            for column in &descriptor.searchable_columns {
                let values = match self
                    .store
                    .distinct_values(resource, column, CANDIDATE_POOL)
                    .await
                {
                    Ok(values) => values,
                    Err(e) => {
                        tracing::debug!(
                            request_id = %state.request_id,
                            resource = %resource,
                            column = %column,
                            error = %e,
                            "suggestion lookup failed, skipping"
                        );
                        continue;
                    }
                };
                for value in values {
                    let similarity = trigram_similarity(term, &value);
                    if similarity >= self.threshold {
                        matches.push(SuggestionMatch {
                            value,
                            similarity,
                            column: column.clone(),
                        });
                    }
                }
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.dedup_by(|a, b| a.value == b.value);
        matches.truncate(self.limit);
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Identity, Intent, Origin};
    use crate::store::MemoryStore;

    #[test]
    fn test_similarity_identical() {
        assert!((trigram_similarity("Juan Pérez", "juan pérez") - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_similarity_close_misspelling() {
        let sim = trigram_similarity("Juan Peres", "Juan Pérez");
        assert!(sim > 0.3, "similarity was {sim}");
    }

    #[test]
    fn test_similarity_unrelated() {
        let sim = trigram_similarity("Juan Pérez", "Catálogo de servicios");
        assert!(sim < 0.1, "similarity was {sim}");
    }

    #[test]
    fn test_similarity_empty() {
        assert_eq!(trigram_similarity("", "Juan"), 0.0);
        assert_eq!(trigram_similarity("  ", ""), 0.0);
    }

    fn zero_row_state() -> PipelineState {
        let mut state = PipelineState::new(
            "busca a Juan Peres",
            Origin::Webapp,
            Identity::new("Admin"),
            2,
        );
        state.intent = Some(Intent::QueryRead);
        state.entities.resources = vec!["clinic.pacientes".to_string()];
        state
            .entities
            .values
            .insert("nombre_paciente".to_string(), "Juan Peres".to_string());
        state
    }

    fn recovery(store: Arc<MemoryStore>) -> FuzzyRecovery {
        FuzzyRecovery::new(store, Arc::new(SchemaCatalog::standard()), 0.3, 3)
    }

    #[tokio::test]
    async fn test_suggestions_found() {
        let store = Arc::new(MemoryStore::new());
        store.set_values(
            "clinic.pacientes",
            "nombres",
            vec![
                "Juan Pérez".to_string(),
                "Juana Torres".to_string(),
                "Pedro Gómez".to_string(),
            ],
        );

        let mut state = zero_row_state();
        recovery(store).recover(&mut state).await;

        assert_eq!(state.error.kind, ErrorKind::NoResults);
        assert!(state.error.suggestions.contains(&"Juan Pérez".to_string()));
        assert!(state.error.suggestions.len() <= 3);
        assert!(state
            .error
            .user_message
            .unwrap()
            .contains("¿Quizás quisiste decir"));
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_matches() {
        let store = Arc::new(MemoryStore::new());
        store.set_values(
            "clinic.pacientes",
            "nombres",
            vec!["Guadalupe Hernández".to_string()],
        );

        let mut state = zero_row_state();
        recovery(store).recover(&mut state).await;

        // Nothing above threshold: no error recorded, composer handles it.
        assert!(!state.has_error());
        assert!(state.error.suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_silently() {
        let store = Arc::new(MemoryStore::new());
        // No values configured at all; lookups return empty, never error.
        let mut state = zero_row_state();
        recovery(store).recover(&mut state).await;

        assert!(!state.has_error());
        assert_eq!(state.visited_stages.last().unwrap(), "fuzzy_recovery");
    }

    #[tokio::test]
    async fn test_limit_respected() {
        let store = Arc::new(MemoryStore::new());
        store.set_values(
            "clinic.pacientes",
            "nombres",
            vec![
                "Juan Peres".to_string(),
                "Juan Perez".to_string(),
                "Juan Pérez".to_string(),
                "Juan Peres López".to_string(),
                "Juan Peralta".to_string(),
            ],
        );

        let mut state = zero_row_state();
        recovery(store).recover(&mut state).await;

        assert_eq!(state.error.kind, ErrorKind::NoResults);
        assert!(state.error.suggestions.len() <= 3);
    }
}
