//! Mode-aware transcript cache.
//!
//! Records are keyed by episode identity and carry one transcript, summary
//! and paragraph summary per processing mode. A strict read for one mode
//! never sees what was written under the other.

mod sqlite;

pub use sqlite::{CacheStats, TranscriptCache};

use crate::error::HentError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Processing namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Trimmed audio, used while iterating on the pipeline.
    Test,
    /// Complete episodes.
    Full,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Test => "test",
            Mode::Full => "full",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = HentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "test" => Ok(Mode::Test),
            "full" => Ok(Mode::Full),
            other => Err(HentError::InvalidInput(format!(
                "unknown mode '{}', expected test or full",
                other
            ))),
        }
    }
}

/// Which mode columns a read may return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeSelector {
    /// Only the given mode.
    Strict(Mode),
    /// Whichever mode is populated, full first. Must be asked for explicitly.
    Any,
}

impl From<Mode> for ModeSelector {
    fn from(mode: Mode) -> Self {
        ModeSelector::Strict(mode)
    }
}

impl FromStr for ModeSelector {
    type Err = HentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("any") {
            Ok(ModeSelector::Any)
        } else {
            s.parse::<Mode>().map(ModeSelector::Strict)
        }
    }
}

/// Identity tier that produced a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Guid,
    /// Podcast, normalized title and publication day.
    ExactDate,
    /// Podcast and normalized title, most recent airing.
    TitleOnly,
}

impl MatchTier {
    /// Whether the match may pair the transcript with the wrong airing.
    pub fn is_degraded(&self) -> bool {
        matches!(self, MatchTier::TitleOnly)
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchTier::Guid => "guid",
            MatchTier::ExactDate => "exact_date",
            MatchTier::TitleOnly => "title_only",
        };
        f.write_str(s)
    }
}

/// A transcript found in the cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedTranscript {
    pub record_id: i64,
    pub transcript: String,
    /// Where the transcript came from (publisher, transcription service, ...).
    pub source: Option<String>,
    /// Mode whose column supplied the transcript.
    pub mode: Mode,
    pub summary: Option<String>,
    pub paragraph_summary: Option<String>,
    pub tier: MatchTier,
    pub degraded: bool,
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Hit(CachedTranscript),
    Miss,
}

impl CacheLookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    pub fn hit(self) -> Option<CachedTranscript> {
        match self {
            CacheLookup::Hit(t) => Some(t),
            CacheLookup::Miss => None,
        }
    }
}

/// What to store for one identity and mode.
#[derive(Debug, Clone, Default)]
pub struct CacheEntry<'a> {
    pub transcript: &'a str,
    pub source: Option<&'a str>,
    pub summary: Option<&'a str>,
    pub paragraph_summary: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("TEST".parse::<Mode>().unwrap(), Mode::Test);
        assert_eq!(Mode::Full.to_string(), "full");
        assert!("both".parse::<Mode>().is_err());
        assert_eq!("any".parse::<ModeSelector>().unwrap(), ModeSelector::Any);
        assert_eq!(
            "full".parse::<ModeSelector>().unwrap(),
            ModeSelector::Strict(Mode::Full)
        );
    }

    #[test]
    fn test_only_title_match_is_degraded() {
        assert!(!MatchTier::Guid.is_degraded());
        assert!(!MatchTier::ExactDate.is_degraded());
        assert!(MatchTier::TitleOnly.is_degraded());
    }
}
