use std::collections::HashMap;

use serde::Deserialize;

/// One citation detail keyed by a `FileN` style reference moniker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Citation {
    pub citation: String,
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub page_number: String,
}

/// One-shot metadata payload delivered by the `startup` event.
///
/// Every field is optional on the wire and defaults to empty, so "received
/// but empty" stays distinguishable from "never received" at the session
/// level, where metadata is held as `Option<StartupMetadata>`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartupMetadata {
    #[serde(default)]
    pub data_points: Vec<String>,
    #[serde(default)]
    pub web_citation_lookup: HashMap<String, Citation>,
    #[serde(default)]
    pub work_citation_lookup: HashMap<String, Citation>,
    #[serde(default)]
    pub thought_chain: serde_json::Value,
}

impl StartupMetadata {
    /// Parses the raw `startup` payload text.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// True once at least one citation lookup is non-empty.
    ///
    /// This is the readiness signal gating finalization; a payload with two
    /// empty lookups does not count as ready.
    pub fn citations_ready(&self) -> bool {
        !self.web_citation_lookup.is_empty() || !self.work_citation_lookup.is_empty()
    }
}

/// Immutable final-answer record, emitted at most once per session.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    pub answer: String,
    pub data_points: Vec<String>,
    pub web_citation_lookup: HashMap<String, Citation>,
    pub work_citation_lookup: HashMap<String, Citation>,
    pub thought_chain: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_startup_payload() {
        let payload = r#"{
            "data_points": ["docs/report.pdf| relevant excerpt"],
            "web_citation_lookup": {},
            "work_citation_lookup": {
                "File0": {
                    "citation": "report.pdf",
                    "source_path": "https://example/report.pdf",
                    "page_number": "3"
                }
            },
            "thought_chain": {"work_query": "original question"}
        }"#;

        let metadata = StartupMetadata::parse(payload).unwrap();
        assert_eq!(metadata.data_points.len(), 1);
        assert_eq!(metadata.work_citation_lookup["File0"].page_number, "3");
        assert!(metadata.citations_ready());
    }

    #[test]
    fn absent_fields_default_to_empty() {
        let metadata = StartupMetadata::parse("{}").unwrap();
        assert!(metadata.data_points.is_empty());
        assert!(metadata.web_citation_lookup.is_empty());
        assert!(metadata.work_citation_lookup.is_empty());
        assert!(!metadata.citations_ready());
    }

    #[test]
    fn either_citation_lookup_satisfies_readiness() {
        let web_only = StartupMetadata::parse(
            r#"{"web_citation_lookup": {"File0": {"citation": "page.html"}}}"#,
        )
        .unwrap();
        assert!(web_only.citations_ready());

        let work_only = StartupMetadata::parse(
            r#"{"work_citation_lookup": {"File0": {"citation": "doc.pdf"}}}"#,
        )
        .unwrap();
        assert!(work_only.citations_ready());
    }

    #[test]
    fn rejects_malformed_payload() {
        assert!(StartupMetadata::parse("not json").is_err());
    }
}
