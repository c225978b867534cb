//! Code, name and alias matching
//!
//! Matching order: exact administrative code, normalized canonical name,
//! curated alias table. Never guesses: anything that survives all three
//! lookups comes back `Unresolved` with the original string attached for
//! diagnostics.

use super::text::normalize_name;
use super::ResolutionContext;
use crate::types::{MatchMethod, Resolution, UnresolvedReason};
use tracing::trace;

impl ResolutionContext {
    /// Resolve a textual location reference (code or name)
    pub fn resolve_text(&mut self, raw: &str) -> Resolution {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            self.stats_mut().unresolved += 1;
            return Resolution::Unresolved {
                raw: raw.to_string(),
                reason: UnresolvedReason::EmptyLocation,
            };
        }

        // Codes are matched verbatim, not normalized
        if let Some(entity_id) = self.code_lookup(trimmed) {
            self.stats_mut().by_code += 1;
            return Resolution::Resolved {
                entity_id,
                method: MatchMethod::AdministrativeCode,
            };
        }

        let normalized = normalize_name(trimmed);

        if let Some(entity_id) = self.name_lookup(&normalized) {
            self.stats_mut().by_name += 1;
            return Resolution::Resolved {
                entity_id,
                method: MatchMethod::NormalizedName,
            };
        }

        if let Some(entity_id) = self.alias_lookup(&normalized) {
            self.stats_mut().by_alias += 1;
            return Resolution::Resolved {
                entity_id,
                method: MatchMethod::Alias,
            };
        }

        trace!(raw, normalized, "Location text matched nothing");
        self.stats_mut().unresolved += 1;
        Resolution::Unresolved {
            raw: raw.to_string(),
            reason: UnresolvedReason::UnknownName,
        }
    }
}
