use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::VerificationParams;
use crate::engine::types::{AuthoritySource, SourceCitation, VerifiedContent};
use crate::error::VerificationError;

/// Per-tenant ledger of verified content units and the authority sources
/// backing them. Freshness only; similarity and retrieval live elsewhere.
#[derive(Debug, Clone, Default)]
pub struct VerificationLedger {
    contents: HashMap<Uuid, VerifiedContent>,
    sources: HashMap<Uuid, AuthoritySource>,
}

impl VerificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source(
        &mut self,
        source_id: Uuid,
        source_name: &str,
        base_url: &str,
        trust_score: f64,
    ) -> Result<AuthoritySource, VerificationError> {
        if !(0.0..=1.0).contains(&trust_score) {
            return Err(VerificationError::InvalidConfidence(trust_score));
        }
        let source = AuthoritySource {
            source_id,
            source_name: source_name.to_string(),
            base_url: base_url.to_string(),
            trust_score,
        };
        self.sources.insert(source_id, source.clone());
        Ok(source)
    }

    pub fn source(&self, source_id: Uuid) -> Option<&AuthoritySource> {
        self.sources.get(&source_id)
    }

    /// Upsert: created on first verification, refreshed (deadline rolled
    /// forward, score and citations replaced) on re-verification. Validation
    /// happens before any mutation.
    #[allow(clippy::too_many_arguments)]
    pub fn mark_verified(
        &mut self,
        tenant_id: Uuid,
        content_id: Uuid,
        concept_id: Uuid,
        content_text: &str,
        confidence_score: f64,
        reverify_after: NaiveDate,
        citations: Vec<SourceCitation>,
        now: DateTime<Utc>,
    ) -> Result<VerifiedContent, VerificationError> {
        if !(0.0..=1.0).contains(&confidence_score) {
            return Err(VerificationError::InvalidConfidence(confidence_score));
        }
        for citation in &citations {
            if !self.sources.contains_key(&citation.source_id) {
                return Err(VerificationError::UnknownSource(citation.source_id));
            }
        }

        let entry = self
            .contents
            .entry(content_id)
            .and_modify(|c| {
                c.confidence_score = confidence_score;
                c.verified_at = now;
                c.needs_reverification_after = reverify_after;
                c.sources = citations.clone();
                c.version += 1;
            })
            .or_insert_with(|| VerifiedContent {
                content_id,
                tenant_id,
                concept_id,
                content_text: content_text.to_string(),
                confidence_score,
                verified_at: now,
                needs_reverification_after: reverify_after,
                sources: citations,
                version: 0,
            });
        Ok(entry.clone())
    }

    pub fn content(&self, content_id: Uuid) -> Option<&VerifiedContent> {
        self.contents.get(&content_id)
    }

    /// Content whose re-verification deadline has passed, oldest deadline
    /// first. Computed fresh on every call.
    pub fn due_for_reverification(&self, as_of: NaiveDate) -> Vec<VerifiedContent> {
        let mut due: Vec<VerifiedContent> = self
            .contents
            .values()
            .filter(|c| c.needs_reverification_after <= as_of)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.needs_reverification_after
                .cmp(&b.needs_reverification_after)
                .then(a.content_id.cmp(&b.content_id))
        });
        due
    }

    /// Blends the content's own confidence with the best linked source's
    /// trust. Consumers decide the disclaimer threshold; this only supplies
    /// the number, deterministically.
    pub fn trust_weighted_confidence(
        &self,
        content_id: Uuid,
        params: &VerificationParams,
    ) -> Result<f64, VerificationError> {
        let content = self
            .contents
            .get(&content_id)
            .ok_or(VerificationError::UnknownContent(content_id))?;

        let max_trust = content
            .sources
            .iter()
            .filter_map(|link| self.sources.get(&link.source_id))
            .map(|s| s.trust_score)
            .fold(0.0_f64, f64::max);

        Ok((content.confidence_score * params.content_weight
            + max_trust * params.source_weight)
            .min(1.0))
    }

    pub fn remove_concept_content(&mut self, concept_id: Uuid) {
        self.contents.retain(|_, c| c.concept_id != concept_id);
    }

    pub fn contents(&self) -> impl Iterator<Item = &VerifiedContent> {
        self.contents.values()
    }
}
