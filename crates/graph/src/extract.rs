//! Entity and relation extraction.
//!
//! Two mechanisms coexist: a pattern-based extractor (fast, low precision)
//! and a generation-based extractor via the gateway (higher precision,
//! disabled when no backend is reachable). Both produce the same
//! [`Extraction`] shape that callers feed into the graph.

use hearthmind_core::entity::EntityKind;
use hearthmind_core::error::GraphError;
use hearthmind_core::gateway::{Gateway, GenerateOptions};
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

/// A candidate entity before it enters the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntity {
    pub name: String,
    pub kind: EntityKind,
    pub confidence: f64,
}

/// A candidate relation, referring to entities by name.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRelation {
    pub src: String,
    pub kind: String,
    pub dst: String,
    pub confidence: f64,
}

/// The result of one extraction pass over a piece of text.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub entities: Vec<CandidateEntity>,
    pub relations: Vec<CandidateRelation>,
}

/// Regex-driven extraction: capitalized name sequences classified by
/// surface cues, plus a small verb table for relations.
pub struct PatternExtractor {
    name_re: Regex,
    relation_verbs: Vec<(&'static str, &'static str)>,
    org_markers: Vec<&'static str>,
    place_markers: Vec<&'static str>,
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self {
            // Two or more capitalized words, or one capitalized word
            // followed by an org marker.
            name_re: Regex::new(r"\b[A-Z][a-z]+(?:\s+(?:[A-Z][a-z]+|Inc\.?|Corp\.?|Ltd\.?|LLC))+\b")
                .expect("static regex"),
            relation_verbs: vec![
                ("works at", "works_at"),
                ("works for", "works_at"),
                ("is part of", "part_of"),
                ("belongs to", "part_of"),
                ("is located in", "located_in"),
                ("is based in", "located_in"),
                ("founded", "founded"),
                ("manages", "manages"),
                ("reports to", "reports_to"),
                ("owns", "owns"),
            ],
            org_markers: vec!["Inc", "Corp", "Ltd", "LLC", "Company", "University"],
            place_markers: vec!["City", "Street", "Avenue", "Valley"],
        }
    }

    fn classify(&self, name: &str) -> EntityKind {
        if self.org_markers.iter().any(|m| name.contains(m)) {
            EntityKind::Org
        } else if self.place_markers.iter().any(|m| name.contains(m)) {
            EntityKind::Place
        } else {
            // Multi-word capitalized sequences default to person names.
            EntityKind::Person
        }
    }

    /// Extract candidates from a chunk of text. Pattern confidence is a
    /// flat 0.5; the generative pass outranks it when both observe the
    /// same entity.
    pub fn extract(&self, text: &str) -> Extraction {
        let mut entities: Vec<CandidateEntity> = Vec::new();
        for m in self.name_re.find_iter(text) {
            let name = m.as_str().trim_end_matches('.').to_string();
            if entities.iter().any(|e| e.name == name) {
                continue;
            }
            entities.push(CandidateEntity {
                kind: self.classify(&name),
                name,
                confidence: 0.5,
            });
        }

        let mut relations = Vec::new();
        let lowered = text.to_lowercase();
        for (verb, kind) in &self.relation_verbs {
            let mut offset = 0;
            while let Some(pos) = lowered[offset..].find(verb) {
                let absolute = offset + pos;
                let before = &text[..absolute];
                let after = &text[absolute + verb.len()..];

                let src = entities
                    .iter()
                    .filter(|e| before.contains(&e.name))
                    .max_by_key(|e| before.rfind(&e.name).unwrap_or(0));
                let dst = entities
                    .iter()
                    .filter(|e| after.contains(&e.name))
                    .min_by_key(|e| after.find(&e.name).unwrap_or(usize::MAX));

                if let (Some(src), Some(dst)) = (src, dst)
                    && src.name != dst.name
                {
                    relations.push(CandidateRelation {
                        src: src.name.clone(),
                        kind: kind.to_string(),
                        dst: dst.name.clone(),
                        confidence: 0.5,
                    });
                }
                offset = absolute + verb.len();
            }
        }

        Extraction {
            entities,
            relations,
        }
    }
}

/// Gateway-backed extraction. Prompts the model for a line-oriented format
/// and parses it defensively; a missing backend yields an empty extraction
/// rather than an error so ingest degrades to the pattern pass alone.
pub struct GenerativeExtractor {
    gateway: Arc<dyn Gateway>,
}

impl GenerativeExtractor {
    pub fn new(gateway: Arc<dyn Gateway>) -> Self {
        Self { gateway }
    }

    /// Extract candidates from text via the generation backend.
    pub async fn extract(&self, text: &str) -> Result<Extraction, GraphError> {
        if !self.gateway.is_available().await {
            debug!("generative extraction skipped: no generation backend");
            return Ok(Extraction::default());
        }

        let prompt = format!(
            "Extract named entities and relations from the text below.\n\
             Output one item per line, nothing else:\n\
             ENTITY: <name> | <person|org|place|concept|doc|event|product>\n\
             REL: <source name> | <relation> | <target name>\n\n\
             Text:\n{text}"
        );
        let opts = GenerateOptions::default()
            .with_temperature(0.0)
            .with_max_tokens(512);

        let output = self
            .gateway
            .generate(&prompt, &opts)
            .await
            .map_err(|e| GraphError::Extraction(e.to_string()))?;

        Ok(Self::parse(&output))
    }

    fn parse(output: &str) -> Extraction {
        let mut extraction = Extraction::default();
        for line in output.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("ENTITY:") {
                let parts: Vec<&str> = rest.split('|').map(str::trim).collect();
                if parts.len() == 2 && !parts[0].is_empty() {
                    extraction.entities.push(CandidateEntity {
                        name: parts[0].to_string(),
                        kind: parse_kind(parts[1]),
                        confidence: 0.8,
                    });
                }
            } else if let Some(rest) = line.strip_prefix("REL:") {
                let parts: Vec<&str> = rest.split('|').map(str::trim).collect();
                if parts.len() == 3 && parts.iter().all(|p| !p.is_empty()) {
                    extraction.relations.push(CandidateRelation {
                        src: parts[0].to_string(),
                        kind: parts[1].to_lowercase().replace(' ', "_"),
                        dst: parts[2].to_string(),
                        confidence: 0.8,
                    });
                }
            }
        }
        extraction
    }
}

fn parse_kind(raw: &str) -> EntityKind {
    match raw.to_lowercase().as_str() {
        "person" => EntityKind::Person,
        "org" | "organization" => EntityKind::Org,
        "place" | "location" => EntityKind::Place,
        "concept" => EntityKind::Concept,
        "doc" | "document" => EntityKind::Doc,
        "event" => EntityKind::Event,
        "product" => EntityKind::Product,
        _ => EntityKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearthmind_gateway::testing::StaticGateway;

    #[test]
    fn pattern_extracts_people_and_orgs() {
        let extractor = PatternExtractor::new();
        let out = extractor.extract("Ada Lovelace works at Acme Corp in the winter.");

        let names: Vec<&str> = out.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"Ada Lovelace"));
        assert!(names.contains(&"Acme Corp"));

        let ada = out.entities.iter().find(|e| e.name == "Ada Lovelace").unwrap();
        assert_eq!(ada.kind, EntityKind::Person);
        let acme = out.entities.iter().find(|e| e.name == "Acme Corp").unwrap();
        assert_eq!(acme.kind, EntityKind::Org);
    }

    #[test]
    fn pattern_extracts_relations_between_entities() {
        let extractor = PatternExtractor::new();
        let out = extractor.extract("Ada Lovelace works at Acme Corp.");
        assert_eq!(out.relations.len(), 1);
        let rel = &out.relations[0];
        assert_eq!(rel.src, "Ada Lovelace");
        assert_eq!(rel.kind, "works_at");
        assert_eq!(rel.dst, "Acme Corp");
    }

    #[test]
    fn pattern_skips_single_lowercase_words() {
        let extractor = PatternExtractor::new();
        let out = extractor.extract("the quick brown fox jumps over the lazy dog");
        assert!(out.entities.is_empty());
        assert!(out.relations.is_empty());
    }

    #[test]
    fn generative_parse_is_defensive() {
        let out = GenerativeExtractor::parse(
            "ENTITY: Grace Hopper | person\n\
             ENTITY: | org\n\
             REL: Grace Hopper | invented | COBOL\n\
             REL: broken line\n\
             chatter the model added",
        );
        assert_eq!(out.entities.len(), 1);
        assert_eq!(out.entities[0].kind, EntityKind::Person);
        assert_eq!(out.relations.len(), 1);
        assert_eq!(out.relations[0].kind, "invented");
    }

    #[tokio::test]
    async fn generative_extraction_round_trip() {
        let gateway = Arc::new(StaticGateway::new(vec![
            "ENTITY: Grace Hopper | person\nENTITY: Navy | org\nREL: Grace Hopper | served in | Navy",
        ]));
        let extractor = GenerativeExtractor::new(gateway);
        let out = extractor.extract("Grace Hopper served in the Navy.").await.unwrap();
        assert_eq!(out.entities.len(), 2);
        assert_eq!(out.relations[0].kind, "served_in");
        assert!((out.relations[0].confidence - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_to_empty() {
        let extractor = GenerativeExtractor::new(Arc::new(StaticGateway::unavailable()));
        let out = extractor.extract("anything").await.unwrap();
        assert!(out.entities.is_empty());
    }
}
