// canonguard-core/src/fingerprint.rs
//! Structural fingerprints of declaration documents.
//!
//! A [`Fingerprint`] is the identity of a document: four required fields that
//! must all be present, plus optional fields used only for tie-breaking and
//! reporting. The [`FingerprintExtractor`] reads a document and either produces
//! a fully-populated fingerprint or reports why the document is not a candidate.

use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::SchemaConfig;
use crate::errors::ExtractError;

/// Identity fields of one document. Construction guarantees every required field
/// is non-empty and trimmed; there is no partially-populated fingerprint.
/// Serialise-only, so the invariant cannot be bypassed by deserialisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint {
    taxpayer_id: String,
    form_code: String,
    period_type: String,
    period: String,
    sequence: Option<String>,
    title: Option<String>,
    taxpayer_name: Option<String>,
}

impl Fingerprint {
    /// Builds a fingerprint from its required fields, trimming each. Returns
    /// `None` if any of them is empty after trimming.
    pub fn new(
        taxpayer_id: impl Into<String>,
        form_code: impl Into<String>,
        period_type: impl Into<String>,
        period: impl Into<String>,
    ) -> Option<Self> {
        Some(Self {
            taxpayer_id: non_empty(taxpayer_id.into())?,
            form_code: non_empty(form_code.into())?,
            period_type: non_empty(period_type.into())?,
            period: non_empty(period.into())?,
            sequence: None,
            title: None,
            taxpayer_name: None,
        })
    }

    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence = non_empty(sequence.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = non_empty(title.into());
        self
    }

    pub fn with_taxpayer_name(mut self, name: impl Into<String>) -> Self {
        self.taxpayer_name = non_empty(name.into());
        self
    }

    pub fn taxpayer_id(&self) -> &str {
        &self.taxpayer_id
    }

    pub fn form_code(&self) -> &str {
        &self.form_code
    }

    pub fn period_type(&self) -> &str {
        &self.period_type
    }

    pub fn period(&self) -> &str {
        &self.period
    }

    pub fn sequence(&self) -> Option<&str> {
        self.sequence.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn taxpayer_name(&self) -> Option<&str> {
        self.taxpayer_name.as_deref()
    }

    /// The four fields that together define a document's identity.
    pub fn identity(&self) -> (&str, &str, &str, &str) {
        (&self.taxpayer_id, &self.form_code, &self.period_type, &self.period)
    }

    /// Populated fields as an ordered map, for audit events and display.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("taxpayer_id".to_string(), self.taxpayer_id.clone());
        map.insert("form_code".to_string(), self.form_code.clone());
        map.insert("period_type".to_string(), self.period_type.clone());
        map.insert("period".to_string(), self.period.clone());
        for (key, value) in [
            ("sequence", &self.sequence),
            ("title", &self.title),
            ("taxpayer_name", &self.taxpayer_name),
        ] {
            if let Some(v) = value {
                map.insert(key.to_string(), v.clone());
            }
        }
        map
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

// Slot order used while scanning a document.
const TAXPAYER_ID: usize = 0;
const FORM_CODE: usize = 1;
const PERIOD_TYPE: usize = 2;
const PERIOD: usize = 3;
const SEQUENCE: usize = 4;
const TITLE: usize = 5;
const TAXPAYER_NAME: usize = 6;
const SLOT_COUNT: usize = 7;

/// Reads documents of one schema and derives their fingerprints.
#[derive(Debug, Clone)]
pub struct FingerprintExtractor {
    schema: SchemaConfig,
}

impl FingerprintExtractor {
    pub fn new(schema: SchemaConfig) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }

    /// Extracts a fingerprint, logging the reason when there is none.
    ///
    /// Parse failures are logged as errors but never escalated; a missing
    /// required field is an informational "not a candidate".
    pub fn extract(&self, path: &Path) -> Option<Fingerprint> {
        match self.try_extract(path) {
            Ok(fp) => Some(fp),
            Err(e @ ExtractError::MissingField { .. }) => {
                info!("Not a candidate: {}", e);
                None
            }
            Err(e @ ExtractError::Io { .. }) => {
                warn!("Could not read document: {}", e);
                None
            }
            Err(e) => {
                warn!("Parse failure: {}", e);
                None
            }
        }
    }

    /// Reads `path` and extracts its fingerprint.
    pub fn try_extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| ExtractError::Encoding(path.to_path_buf()))?;
        self.extract_from_str(text, path)
    }

    /// Extracts a fingerprint from in-memory content. `origin` is only used in
    /// error messages.
    pub fn extract_from_str(&self, text: &str, origin: &Path) -> Result<Fingerprint, ExtractError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);
        let doc = roxmltree::Document::parse(text).map_err(|e| ExtractError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;

        let tags: [&str; SLOT_COUNT] = [
            &self.schema.taxpayer_id_tag,
            &self.schema.form_code_tag,
            &self.schema.period_type_tag,
            &self.schema.period_tag,
            &self.schema.sequence_tag,
            &self.schema.title_tag,
            &self.schema.taxpayer_name_tag,
        ];

        // Outer Option: element seen. Inner Option: it carried non-blank text.
        // Only the first element per tag counts, even when its text is blank.
        let mut slots: [Option<Option<String>>; SLOT_COUNT] = Default::default();

        for node in doc.root_element().descendants().skip(1) {
            if !node.is_element() {
                continue;
            }
            let name = node.tag_name();
            if name.namespace() != Some(self.schema.namespace.as_str()) {
                continue;
            }
            for (slot, tag) in slots.iter_mut().zip(tags.iter()) {
                if slot.is_none() && name.name() == *tag {
                    *slot = Some(node.text().and_then(|t| non_empty(t.to_string())));
                }
            }
            if slots.iter().all(Option::is_some) {
                break;
            }
        }

        let mut values: [Option<String>; SLOT_COUNT] = slots.map(Option::flatten);

        for idx in [TAXPAYER_ID, FORM_CODE, PERIOD_TYPE, PERIOD] {
            if values[idx].is_none() {
                return Err(ExtractError::MissingField {
                    path: origin.to_path_buf(),
                    field: tags[idx].to_string(),
                });
            }
        }

        let take = |v: &mut Option<String>| v.take().unwrap_or_default();
        let fp = Fingerprint {
            taxpayer_id: take(&mut values[TAXPAYER_ID]),
            form_code: take(&mut values[FORM_CODE]),
            period_type: take(&mut values[PERIOD_TYPE]),
            period: take(&mut values[PERIOD]),
            sequence: values[SEQUENCE].take(),
            title: values[TITLE].take(),
            taxpayer_name: values[TAXPAYER_NAME].take(),
        };
        debug!(
            "Extracted fingerprint from {}: {:?}",
            origin.display(),
            fp.identity()
        );
        Ok(fp)
    }
}
