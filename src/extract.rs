//! The extractor boundary.
//!
//! Raw page collection (browser automation, accordion scraping) lives outside
//! this crate; the pipeline only depends on the [`ContentExtractor`] trait.
//! Any malformed or suspiciously small extraction is rejected by the pipeline
//! before a single mutation happens.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{ContentUnit, IndexError};

/// Produces the current snapshot of source content units.
///
/// Implementations perform whatever I/O is needed (headless browser, HTTP
/// fetch, file read) and return units in source order. The pipeline treats
/// the result as the complete snapshot: identities absent from it are
/// candidates for removal.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Collects one snapshot of the source.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Extraction`] when the source is unreachable or
    /// produced unusable output.
    async fn extract(&self) -> Result<Vec<ContentUnit>, IndexError>;
}

/// In-memory extractor for tests and local development.
///
/// Units can be swapped between runs to simulate a changing source.
#[derive(Debug, Default)]
pub struct FixtureExtractor {
    units: Mutex<Vec<ContentUnit>>,
    fail_next: Mutex<Option<String>>,
}

impl FixtureExtractor {
    /// Creates an extractor that returns the given units.
    pub fn new(units: Vec<ContentUnit>) -> Self {
        Self {
            units: Mutex::new(units),
            fail_next: Mutex::new(None),
        }
    }

    /// Replaces the snapshot returned by subsequent extractions.
    pub fn set_units(&self, units: Vec<ContentUnit>) {
        *self.units.lock() = units;
    }

    /// Makes the next extraction fail with the given reason.
    pub fn fail_next(&self, reason: impl Into<String>) {
        *self.fail_next.lock() = Some(reason.into());
    }
}

#[async_trait]
impl ContentExtractor for FixtureExtractor {
    async fn extract(&self) -> Result<Vec<ContentUnit>, IndexError> {
        if let Some(reason) = self.fail_next.lock().take() {
            return Err(IndexError::Extraction { reason });
        }
        Ok(self.units.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_returns_current_units() {
        let extractor = FixtureExtractor::new(vec![ContentUnit::from_qa("Q?", "A.")]);
        assert_eq!(extractor.extract().await.unwrap().len(), 1);

        extractor.set_units(vec![
            ContentUnit::from_qa("Q?", "A."),
            ContentUnit::from_qa("Second?", "B."),
        ]);
        assert_eq!(extractor.extract().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fixture_can_simulate_failure() {
        let extractor = FixtureExtractor::new(vec![ContentUnit::from_qa("Q?", "A.")]);
        extractor.fail_next("source offline");

        let err = extractor.extract().await.unwrap_err();
        assert!(matches!(err, IndexError::Extraction { .. }));

        // Failure is one-shot.
        assert!(extractor.extract().await.is_ok());
    }
}
