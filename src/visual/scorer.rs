// src/visual/scorer.rs
//
// Scores how trustworthy an image reference is, purely from (URL, declared
// source). Tier 1: the authoritative source's own CDN or a verified archival
// partner. Tier 2: a registry-known secondary source with attribution.
// Tier 3: absent, placeholder, or unrecognized -- the archive-card path.
//
// The optional reachability probe is the only network I/O and lives in its
// own function; batch sweeps never call it.

use log::debug;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use url::Url;

use crate::config::VisualConfig;
use crate::models::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VisualTier {
    Tier1,
    Tier2,
    Tier3,
}

impl VisualTier {
    pub fn as_u8(&self) -> u8 {
        match self {
            VisualTier::Tier1 => 1,
            VisualTier::Tier2 => 2,
            VisualTier::Tier3 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisualType {
    OriginalPoster,
    ArchivalStill,
    Placeholder,
}

#[derive(Debug, Clone, Serialize)]
pub struct VisualConfidence {
    pub tier: VisualTier,
    pub confidence: f64,
    pub visual_type: VisualType,
    pub reason: String,
    /// Attribution text required by the source registry, Tier 2 only.
    pub attribution: Option<String>,
}

impl VisualConfidence {
    pub fn needs_archive_card(&self) -> bool {
        self.tier == VisualTier::Tier3
    }
}

/// A registry-known secondary archival source.
#[derive(Debug, Clone)]
pub struct SecondarySource {
    pub base_confidence: f64,
    pub attribution: String,
}

/// Explicitly constructed, immutable registry of known image sources.
/// Built once at startup and passed in; there is no global registry.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    /// Hosts belonging to the authoritative source's CDN or verified
    /// archival partners.
    trusted_hosts: Vec<String>,
    /// Secondary sources keyed by declared source tag.
    secondary: HashMap<String, SecondarySource>,
    placeholder_patterns: Vec<Regex>,
}

impl SourceRegistry {
    pub fn new(
        trusted_hosts: Vec<String>,
        secondary: HashMap<String, SecondarySource>,
        placeholder_patterns: Vec<Regex>,
    ) -> Self {
        Self {
            trusted_hosts,
            secondary,
            placeholder_patterns,
        }
    }

    /// The production registry: the source CDN, one archival partner, the
    /// crowd-sourced media repository, and the placeholder URL shapes legacy
    /// scrapes left behind.
    pub fn standard() -> Self {
        let mut secondary = HashMap::new();
        secondary.insert(
            "wikimedia".to_string(),
            SecondarySource {
                base_confidence: 0.75,
                attribution: "Image via Wikimedia Commons".to_string(),
            },
        );
        secondary.insert(
            "archive_org".to_string(),
            SecondarySource {
                base_confidence: 0.7,
                attribution: "Image via Internet Archive".to_string(),
            },
        );
        secondary.insert(
            "fan_wiki".to_string(),
            SecondarySource {
                base_confidence: 0.6,
                attribution: "Image via community wiki".to_string(),
            },
        );

        let placeholder_patterns = [
            r"(?i)placeholder",
            r"(?i)no[-_]?(image|poster|photo)",
            r"(?i)default[-_]?(poster|avatar|profile)",
            r"(?i)missing[-_]?(image|still)",
            r"(?i)/blank\.(png|jpg|jpeg|gif)$",
            r"(?i)1x1\.(png|gif)$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect();

        Self::new(
            vec![
                "image.tmdb.org".to_string(),
                "cdn.catalogsource.example".to_string(),
                "stills.nfai-archive.example".to_string(),
            ],
            secondary,
            placeholder_patterns,
        )
    }

    pub fn is_trusted_host(&self, host: &str) -> bool {
        self.trusted_hosts
            .iter()
            .any(|h| host == h || host.ends_with(&format!(".{h}")))
    }

    pub fn secondary_source(&self, tag: &str) -> Option<&SecondarySource> {
        self.secondary.get(&tag.trim().to_lowercase())
    }

    pub fn is_placeholder_url(&self, url: &str) -> bool {
        self.placeholder_patterns.iter().any(|re| re.is_match(url))
    }
}

/// Pure scoring of an image reference. `None` / empty URL is a Tier-3
/// absence, never an error.
pub fn score_visual(
    image: Option<&ImageRef>,
    registry: &SourceRegistry,
    cfg: &VisualConfig,
) -> VisualConfidence {
    let url_str = image.and_then(|i| i.url.as_deref()).unwrap_or("").trim();

    if url_str.is_empty() {
        return VisualConfidence {
            tier: VisualTier::Tier3,
            confidence: 0.0,
            visual_type: VisualType::Placeholder,
            reason: "no image reference".to_string(),
            attribution: None,
        };
    }

    if registry.is_placeholder_url(url_str) {
        debug!("Placeholder pattern matched: {}", url_str);
        return VisualConfidence {
            tier: VisualTier::Tier3,
            confidence: cfg.tier3_confidence,
            visual_type: VisualType::Placeholder,
            reason: "url matches a known placeholder pattern".to_string(),
            attribution: None,
        };
    }

    let host = Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()));

    if let Some(host) = host.as_deref() {
        if registry.is_trusted_host(host) {
            return VisualConfidence {
                tier: VisualTier::Tier1,
                confidence: cfg.tier1_confidence,
                visual_type: VisualType::OriginalPoster,
                reason: format!("trusted origin {host}"),
                attribution: None,
            };
        }
    }

    let declared = image.and_then(|i| i.source.as_deref()).unwrap_or("");
    if let Some(src) = registry.secondary_source(declared) {
        let confidence = src.base_confidence.clamp(cfg.tier2_floor, cfg.tier2_ceil);
        return VisualConfidence {
            tier: VisualTier::Tier2,
            confidence,
            visual_type: VisualType::ArchivalStill,
            reason: format!("registered secondary source {declared}"),
            attribution: Some(src.attribution.clone()),
        };
    }

    VisualConfidence {
        tier: VisualTier::Tier3,
        confidence: cfg.tier3_confidence,
        visual_type: VisualType::Placeholder,
        reason: match host {
            Some(h) => format!("unrecognized source {h}"),
            None => "unparsable image url".to_string(),
        },
        attribution: None,
    }
}

/// The one network-touching operation of this module, kept out of the pure
/// scoring path and off by default in batch runs. A Tier-1/2 image whose URL
/// no longer answers is demoted to Tier 3.
pub async fn demote_if_unreachable(
    scored: VisualConfidence,
    url: &str,
    client: &reqwest::Client,
) -> VisualConfidence {
    if scored.tier == VisualTier::Tier3 {
        return scored;
    }
    let reachable = match client.head(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    };
    if reachable {
        scored
    } else {
        VisualConfidence {
            tier: VisualTier::Tier3,
            confidence: 0.0,
            visual_type: VisualType::Placeholder,
            reason: format!("image url unreachable (was {:?})", scored.reason),
            attribution: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(url: &str, source: Option<&str>) -> ImageRef {
        ImageRef {
            url: Some(url.to_string()),
            source: source.map(|s| s.to_string()),
            tier: None,
            confidence: None,
        }
    }

    fn cfg() -> VisualConfig {
        VisualConfig::default()
    }

    #[test]
    fn trusted_cdn_is_tier1() {
        let registry = SourceRegistry::standard();
        let img = image("https://image.tmdb.org/t/p/original/abc.jpg", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier1);
        assert!(scored.confidence >= 0.9);
        assert_eq!(scored.visual_type, VisualType::OriginalPoster);
        assert!(!scored.needs_archive_card());
    }

    #[test]
    fn trusted_subdomain_is_tier1() {
        let registry = SourceRegistry::standard();
        let img = image("https://eu.cdn.catalogsource.example/p/9.jpg", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier1);
    }

    #[test]
    fn registered_secondary_source_is_tier2_with_attribution() {
        let registry = SourceRegistry::standard();
        let img = image(
            "https://upload.wikimedia.org/wikipedia/commons/poster.jpg",
            Some("wikimedia"),
        );
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier2);
        assert!((0.6..=0.8).contains(&scored.confidence));
        assert!(scored.attribution.as_deref().unwrap().contains("Wikimedia"));
        assert_eq!(scored.visual_type, VisualType::ArchivalStill);
    }

    #[test]
    fn placeholder_pattern_is_tier3_even_on_trusted_host() {
        // Scenario: poster URL matching a known placeholder pattern.
        let registry = SourceRegistry::standard();
        let img = image("https://image.tmdb.org/t/p/no-poster-available.png", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier3);
        assert!(scored.needs_archive_card());
        assert_eq!(scored.visual_type, VisualType::Placeholder);
    }

    #[test]
    fn unrecognized_source_is_tier3() {
        let registry = SourceRegistry::standard();
        let img = image("https://random-blog.example/poster.jpg", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier3);
        assert!((0.3..=0.5).contains(&scored.confidence));
    }

    #[test]
    fn absent_image_is_tier3_zero_confidence() {
        let registry = SourceRegistry::standard();
        let scored = score_visual(None, &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier3);
        assert_eq!(scored.confidence, 0.0);
        assert!(scored.needs_archive_card());
    }

    #[test]
    fn unparsable_url_is_tier3_not_panic() {
        let registry = SourceRegistry::standard();
        let img = image("not a url at all", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(scored.tier, VisualTier::Tier3);
    }

    #[test]
    fn undeclared_source_on_unknown_host_is_tier3() {
        let registry = SourceRegistry::standard();
        let img = image("https://upload.wikimedia.org/commons/x.jpg", None);
        let scored = score_visual(Some(&img), &registry, &cfg());
        // Host is known to humans but without a declared registry tag there
        // is no attribution to show, so it cannot be Tier 2.
        assert_eq!(scored.tier, VisualTier::Tier3);
    }

    #[test]
    fn scoring_is_deterministic() {
        let registry = SourceRegistry::standard();
        let img = image("https://image.tmdb.org/t/p/original/abc.jpg", None);
        let a = score_visual(Some(&img), &registry, &cfg());
        let b = score_visual(Some(&img), &registry, &cfg());
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.confidence, b.confidence);
    }
}
