//! Shared data model for the indexing pipeline and its error taxonomy.
//!
//! The types here encode the two correctness linchpins of the whole system:
//!
//! * [`derive_identity`] — a position-independent, normalized key for a
//!   logical content unit, stable across runs.
//! * [`vector_id_for`] — a deterministic UUID derived from that identity, so
//!   re-indexing the same unit always overwrites the same vector record.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Namespace for UUIDv5 vector ids. Fixed forever; changing it would orphan
/// every previously indexed vector.
const VECTOR_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x7a, 0x1f, 0x4c, 0x02, 0x9d, 0x3e, 0x45, 0xb1, 0x8f, 0x66, 0x21, 0xd4, 0x5a, 0x0b, 0xc9, 0x37,
]);

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace regex"));

// ── ContentUnit ────────────────────────────────────────────────────────

/// One semantically atomic piece of source content — a question/answer pair
/// or a titled section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    /// Stable key for this logical unit, deterministic across runs.
    pub identity: String,
    /// Full textual payload (question + answer, or section body).
    pub text: String,
    /// Arbitrary attributes carried through to the index payload
    /// (source URL, category, language).
    pub metadata: serde_json::Value,
}

impl ContentUnit {
    /// Creates a unit with an explicit identity.
    pub fn new(identity: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            text: text.into(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Creates a unit from a question/answer pair, deriving the identity from
    /// the normalized question text.
    pub fn from_qa(question: &str, answer: &str) -> Self {
        Self {
            identity: derive_identity(question),
            text: format!("{question}\n\n{answer}"),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Attaches metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Computes this unit's content fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// The deterministic vector id for this unit's identity.
    pub fn vector_id(&self) -> Uuid {
        vector_id_for(&self.identity)
    }
}

/// Derives a stable identity from a question title or section heading.
///
/// The form is position-independent: lowercased, punctuation stripped,
/// whitespace collapsed. An edited question therefore becomes a NEW unit
/// rather than a CHANGED one — an accepted approximation, since detecting
/// true renames would require fuzzy matching.
pub fn derive_identity(title: &str) -> String {
    let lowered: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();
    WHITESPACE.replace_all(lowered.trim(), " ").into_owned()
}

/// Derives the vector-store record id for an identity.
///
/// UUIDv5 over a fixed namespace: the same identity yields the same id in
/// any run, which is what makes upserts naturally idempotent.
pub fn vector_id_for(identity: &str) -> Uuid {
    Uuid::new_v5(&VECTOR_ID_NAMESPACE, identity.as_bytes())
}

// ── Fingerprint ────────────────────────────────────────────────────────

/// Cheap digest of a unit's text and metadata, used to detect change without
/// comparing full text or re-embedding.
///
/// Computed locally — fingerprint comparison never touches the network, and
/// change detection must rely on fingerprints, never on vector equality
/// (embedding models are not bit-stable across calls).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprints a content unit.
    pub fn of(unit: &ContentUnit) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(unit.text.as_bytes());
        // serde_json renders object keys in sorted order, so this is a
        // canonical form.
        hasher.update(unit.metadata.to_string().as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Hex representation of the digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── RetrievalResult ────────────────────────────────────────────────────

/// One ranked match returned to a chat/search consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// The indexed text payload.
    pub text: String,
    /// Similarity score, descending across a result set.
    pub score: f32,
    /// Metadata carried from the original content unit.
    pub metadata: serde_json::Value,
}

// ── IndexError ─────────────────────────────────────────────────────────

/// Errors surfaced by the indexing and retrieval subsystems.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Source unreachable or returned no usable units. The run aborts with
    /// no state mutated.
    #[error("extraction failed: {reason}")]
    Extraction {
        /// Why the extraction was rejected.
        reason: String,
    },

    /// An embedding request failed for a batch of inputs.
    #[error("embedding request failed: {0}")]
    Embedding(String),

    /// A vector store operation failed. Transient failures are retried with
    /// bounded backoff at the store layer; what escapes here is either
    /// exhausted retries or a permanent (bad request) failure.
    #[error("vector store error: {message}")]
    Store {
        /// Human-readable description.
        message: String,
        /// Whether retrying could plausibly succeed.
        transient: bool,
    },

    /// Tracked-state persistence failed.
    #[error("state persistence failed: {0}")]
    State(String),

    /// A run was requested while another run holds the run lock.
    #[error("an indexing run is already in progress")]
    Busy,

    /// Filesystem error while reading or writing local state.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    /// Constructs a transient store error.
    pub fn store_transient(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: true,
        }
    }

    /// Constructs a permanent store error.
    pub fn store_permanent(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: false,
        }
    }

    /// True when the error is worth retrying at the store layer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { transient: true, .. })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
