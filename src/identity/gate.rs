// src/identity/gate.rs
//
// The identity gate decides whether a candidate record is allowed to exist.
// It is the only path through which new entities enter the catalog and the
// re-validation step the audit engine runs over existing ones.

use anyhow::Result;
use log::{debug, info};
use strsim::jaro_winkler;

use crate::config::PipelineConfig;
use crate::identity::source::{search_with_backoff, AuthoritativeSource};
use crate::models::{EntityKind, RejectionReason, ValidationOutcome, ValidationResult};
use crate::normalize::{canonicalize, canonicalize_bounded, slugify};

/// A record proposed for creation (or re-validated during audit).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub kind: EntityKind,
    pub name: String,
    /// Release year for movies, birth year for people.
    pub year: Option<i32>,
    /// Whether the source is expected to know a release year for this kind
    /// of record. Movies without one are malformed.
    pub require_year: bool,
}

impl Candidate {
    pub fn movie(name: impl Into<String>, year: Option<i32>) -> Self {
        Self {
            kind: EntityKind::Movie,
            name: name.into(),
            year,
            require_year: true,
        }
    }

    pub fn person(name: impl Into<String>, birth_year: Option<i32>) -> Self {
        Self {
            kind: EntityKind::Person,
            name: name.into(),
            year: birth_year,
            require_year: false,
        }
    }
}

/// Validate a candidate against the authoritative source.
///
/// Read-only: the single side effect is the external lookup. The caller
/// decides whether to persist anything. Transport failures surface as
/// `LookupFailed`, never as `Rejected`.
pub async fn validate_candidate(
    candidate: &Candidate,
    source: &dyn AuthoritativeSource,
    config: &PipelineConfig,
) -> Result<ValidationResult> {
    let canonical_name = canonicalize_bounded(&candidate.name, config.sweep.max_canonical_len);
    let slug = slugify(&candidate.name);

    // Malformation checks come first; no point burning a lookup on garbage.
    let mut reasons = malformation_reasons(candidate, &canonical_name, config);
    if !reasons.is_empty() {
        debug!("Candidate {:?} malformed: {:?}", candidate.name, reasons);
        return Ok(ValidationResult {
            outcome: ValidationOutcome::Rejected,
            reasons,
            canonical_name,
            slug,
            external_id: None,
            source_name: None,
            confidence: 0.0,
        });
    }

    let lookup = search_with_backoff(
        source,
        &candidate.name,
        candidate.year,
        config.gate.lookup_max_retries,
        config.gate.lookup_backoff,
    )
    .await;

    let record = match lookup {
        Ok(record) => record,
        Err(err) => {
            // Transient. The candidate stays exactly as it was; the caller
            // retries on the next sweep.
            info!("Lookup failed for {:?}: {}", candidate.name, err);
            return Ok(ValidationResult {
                outcome: ValidationOutcome::LookupFailed,
                reasons: Vec::new(),
                canonical_name,
                slug,
                external_id: None,
                source_name: None,
                confidence: 0.0,
            });
        }
    };

    let Some(record) = record else {
        // The source answered and knows nothing: allowed to exist, flagged.
        return Ok(ValidationResult {
            outcome: ValidationOutcome::Unverified,
            reasons: Vec::new(),
            canonical_name,
            slug,
            external_id: None,
            source_name: None,
            confidence: 0.0,
        });
    };

    if record.kind != candidate.kind {
        debug!(
            "Candidate {:?} requested as {} but source returned {}",
            candidate.name,
            candidate.kind.as_str(),
            record.kind.as_str()
        );
        reasons.push(RejectionReason::WrongEntityType);
        return Ok(ValidationResult {
            outcome: ValidationOutcome::Rejected,
            reasons,
            canonical_name,
            slug,
            external_id: Some(record.external_id),
            source_name: Some(record.canonical_name),
            confidence: 0.0,
        });
    }

    let confidence = score_confidence(
        &canonical_name,
        &canonicalize(&record.canonical_name),
        candidate.year,
        record.year,
    );

    // Only the higher floor verifies. Below the lower floor the hit is too
    // weak to even adopt the external identifier; the record may exist but
    // carries no claimed source identity.
    let outcome = if confidence >= config.gate.verified_floor {
        ValidationOutcome::Verified
    } else {
        ValidationOutcome::Unverified
    };
    let adopt_id = confidence >= config.gate.unverified_floor;

    Ok(ValidationResult {
        outcome,
        reasons: Vec::new(),
        canonical_name,
        slug,
        external_id: adopt_id.then_some(record.external_id),
        source_name: Some(record.canonical_name),
        confidence,
    })
}

fn malformation_reasons(
    candidate: &Candidate,
    canonical_name: &str,
    config: &PipelineConfig,
) -> Vec<RejectionReason> {
    let mut reasons = Vec::new();
    let trimmed = candidate.name.trim();

    if trimmed.is_empty() {
        reasons.push(RejectionReason::EmptyName);
        return reasons;
    }
    if canonical_name.is_empty() {
        // Non-empty input that canonicalizes to nothing is punctuation noise.
        reasons.push(RejectionReason::PunctuationOnlyName);
    }
    if trimmed.chars().count() > config.gate.max_name_len {
        reasons.push(RejectionReason::NameTooLong);
    }
    if candidate.require_year && candidate.year.is_none() {
        reasons.push(RejectionReason::MissingReleaseYear);
    }
    reasons
}

/// Confidence that the returned record is the requested entity:
/// identifier presence, canonical-name similarity, year proximity.
fn score_confidence(
    requested: &str,
    returned: &str,
    requested_year: Option<i32>,
    returned_year: Option<i32>,
) -> f64 {
    // An external id was found at all: worth a floor of trust.
    let id_component = 0.2;

    let name_sim = jaro_winkler(requested, returned);
    let name_component = 0.6 * name_sim;

    let year_component = match (requested_year, returned_year) {
        (Some(a), Some(b)) => {
            let gap = (a - b).abs();
            match gap {
                0 => 0.2,
                1 => 0.15,
                2 => 0.1,
                _ => 0.0,
            }
        }
        // Year unknown on either side: neither reward nor punish.
        _ => 0.1,
    };

    (id_component + name_component + year_component).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::source::testing::StaticSource;
    use crate::identity::source::SourceRecord;

    fn movie_record(name: &str, year: Option<i32>) -> SourceRecord {
        SourceRecord {
            external_id: "tt0100100".to_string(),
            kind: EntityKind::Movie,
            canonical_name: name.to_string(),
            year,
            imagery: vec!["https://cdn.source.example/poster/1.jpg".to_string()],
        }
    }

    fn person_record(name: &str) -> SourceRecord {
        SourceRecord {
            external_id: "nm0200200".to_string(),
            kind: EntityKind::Person,
            canonical_name: name.to_string(),
            year: None,
            imagery: vec![],
        }
    }

    fn config() -> PipelineConfig {
        let mut cfg = PipelineConfig::default();
        cfg.gate.lookup_backoff = std::time::Duration::from_millis(1);
        cfg
    }

    #[tokio::test]
    async fn exact_match_verifies() {
        let source = StaticSource::new()
            .with_record("ranuva veeran", movie_record("Ranuva Veeran", Some(1981)));
        let candidate = Candidate::movie("Ranuva Veeran", Some(1981));

        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Verified);
        assert_eq!(result.external_id.as_deref(), Some("tt0100100"));
        assert!(result.confidence >= 0.9);
        assert_eq!(result.slug, "ranuva-veeran");
    }

    #[tokio::test]
    async fn wrong_entity_type_rejects() {
        // Scenario: movie candidate, source returns a person.
        let source =
            StaticSource::new().with_record("ranuva veeran", person_record("Ranuva Veeran"));
        let candidate = Candidate::movie("Ranuva Veeran", Some(1981));

        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Rejected);
        assert_eq!(result.reasons, vec![RejectionReason::WrongEntityType]);
    }

    #[tokio::test]
    async fn empty_name_rejects_without_lookup() {
        let source = StaticSource::new();
        let candidate = Candidate::movie("   ", Some(1981));

        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Rejected);
        assert_eq!(result.reasons, vec![RejectionReason::EmptyName]);
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn punctuation_only_name_rejects() {
        let source = StaticSource::new();
        let candidate = Candidate::person("?!...", None);
        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Rejected);
        assert!(result.reasons.contains(&RejectionReason::PunctuationOnlyName));
    }

    #[tokio::test]
    async fn movie_without_year_rejects() {
        let source = StaticSource::new();
        let candidate = Candidate::movie("Mayabazar", None);
        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Rejected);
        assert!(result.reasons.contains(&RejectionReason::MissingReleaseYear));
    }

    #[tokio::test]
    async fn person_without_year_is_fine() {
        let source = StaticSource::new().with_record("nagarjuna", person_record("Nagarjuna"));
        let candidate = Candidate::person("Nagarjuna", None);
        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_ne!(result.outcome, ValidationOutcome::Rejected);
    }

    #[tokio::test]
    async fn lookup_failure_is_distinct_from_rejection() {
        let source = StaticSource::new().failing_first(100);
        let candidate = Candidate::movie("Mayabazar", Some(1957));

        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::LookupFailed);
        assert!(result.reasons.is_empty());
    }

    #[tokio::test]
    async fn canonical_name_respects_configured_bound() {
        let source = StaticSource::new();
        let mut cfg = config();
        cfg.sweep.max_canonical_len = 10;
        let candidate = Candidate::person("Nandamuri Taraka Rama Rao", None);

        let result = validate_candidate(&candidate, &source, &cfg).await.unwrap();
        assert!(result.canonical_name.chars().count() <= 10);
        assert_eq!(result.canonical_name, "nandamuri");
    }

    #[tokio::test]
    async fn no_source_result_is_unverified_not_rejected() {
        let source = StaticSource::new();
        let candidate = Candidate::person("Completely Unknown Actor", None);

        let result = validate_candidate(&candidate, &source, &config()).await.unwrap();
        assert_eq!(result.outcome, ValidationOutcome::Unverified);
        assert!(result.external_id.is_none());
    }

    #[tokio::test]
    async fn distant_year_lowers_confidence() {
        let source = StaticSource::new()
            .with_record("mayabazar", movie_record("Mayabazar", Some(1957)));

        let close = validate_candidate(&Candidate::movie("Mayabazar", Some(1957)), &source, &config())
            .await
            .unwrap();
        let far = validate_candidate(&Candidate::movie("Mayabazar", Some(1995)), &source, &config())
            .await
            .unwrap();
        assert!(close.confidence > far.confidence);
    }

    #[test]
    fn confidence_scoring_rewards_similarity_and_proximity() {
        let exact = score_confidence("mayabazar", "mayabazar", Some(1957), Some(1957));
        assert!(exact >= 0.95);

        let near = score_confidence("mayabazar", "mayabazar", Some(1958), Some(1957));
        assert!(near < exact && near >= 0.9);

        let different = score_confidence("mayabazar", "pathala bhairavi", Some(1957), Some(1951));
        assert!(different < 0.75);
    }
}
