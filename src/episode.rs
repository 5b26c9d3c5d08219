//! Episode model and identity helpers.

use crate::cache::Mode;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// A podcast episode as produced by discovery.
///
/// Treated as a value: the only fields filled in after creation are
/// `audio_url` and `apple_podcast_id`, when a later stage resolves them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Episode {
    /// Podcast name.
    pub podcast: String,
    /// Episode title.
    pub title: String,
    /// Publication timestamp as reported by the publisher.
    pub published: DateTime<Utc>,
    /// Enclosure or resolved audio URL.
    pub audio_url: Option<String>,
    /// Publisher transcript URL (if any).
    pub transcript_url: Option<String>,
    /// Show notes.
    pub description: Option<String>,
    /// Episode web page.
    pub link: Option<String>,
    /// Duration string as the publisher wrote it.
    pub duration: Option<String>,
    /// Stable feed GUID (if any).
    pub guid: Option<String>,
    /// Apple Podcasts collection id, once known.
    pub apple_podcast_id: Option<String>,
}

impl Episode {
    /// Create an episode with only its identifying fields.
    pub fn new(podcast: impl Into<String>, title: impl Into<String>, published: DateTime<Utc>) -> Self {
        Self {
            podcast: podcast.into(),
            title: title.into(),
            published,
            audio_url: None,
            transcript_url: None,
            description: None,
            link: None,
            duration: None,
            guid: None,
            apple_podcast_id: None,
        }
    }

    pub fn with_audio_url(mut self, url: impl Into<String>) -> Self {
        self.audio_url = Some(url.into());
        self
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    /// Attach an audio URL resolved after discovery.
    pub fn attach_audio_url(&mut self, url: impl Into<String>) {
        self.audio_url = Some(url.into());
    }

    /// Attach an Apple Podcasts id resolved after discovery.
    pub fn attach_apple_id(&mut self, id: impl Into<String>) {
        self.apple_podcast_id = Some(id.into());
    }

    /// Stable key used by state snapshots: `podcast|title|publishedISO8601`.
    pub fn state_key(&self) -> String {
        format!("{}|{}|{}", self.podcast, self.title, self.published.to_rfc3339())
    }

    /// Publication day. Publishers disagree on time of day and timezone.
    pub fn published_date(&self) -> NaiveDate {
        self.published.date_naive()
    }

    pub fn identity(&self) -> EpisodeIdentity {
        EpisodeIdentity::from(self)
    }
}

/// Identity used to match episodes across sources and runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeIdentity {
    pub podcast: String,
    /// Title as published.
    pub title: String,
    /// Title after [`normalize_title`].
    pub title_key: String,
    pub date: NaiveDate,
    pub guid: Option<String>,
}

impl EpisodeIdentity {
    /// GUID equality when both sides carry one, else podcast + normalized title + day.
    pub fn matches(&self, other: &EpisodeIdentity) -> bool {
        if let (Some(a), Some(b)) = (&self.guid, &other.guid) {
            return a == b;
        }
        self.podcast == other.podcast && self.title_key == other.title_key && self.date == other.date
    }
}

impl From<&Episode> for EpisodeIdentity {
    fn from(episode: &Episode) -> Self {
        Self {
            podcast: episode.podcast.clone(),
            title: episode.title.clone(),
            title_key: normalize_title(&episode.title),
            date: episode.published_date(),
            guid: episode.guid.clone().filter(|g| !g.trim().is_empty()),
        }
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a URL points at YouTube.
pub fn is_youtube_url(url: &str) -> bool {
    url.contains("youtube.com") || url.contains("youtu.be")
}

fn episode_number_regexes() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [r"#(\d+)", r"(?i)episode\s+(\d+)", r"(?i)ep\.?\s*(\d+)", r"\b(\d+)\b"]
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Episode number taken from the title, `ep000` when none is present.
pub fn extract_episode_number(title: &str) -> String {
    for re in episode_number_regexes() {
        if let Some(caps) = re.captures(title) {
            if let Some(m) = caps.get(1) {
                return format!("ep{}", m.as_str());
            }
        }
    }
    "ep000".to_string()
}

/// Six hex characters derived from podcast, title and publication day.
pub fn content_hash(episode: &Episode) -> String {
    let input = format!(
        "{}|{}|{}",
        episode.podcast,
        episode.title,
        episode.published.format("%Y-%m-%d")
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..6].to_string()
}

/// Standard audio file name: `YYYYMMDD_Podcast_epNNN_hash6_mode.mp3`.
///
/// The mode is part of the name so a trimmed test download is never reused
/// for a full run.
pub fn audio_filename(episode: &Episode, mode: Mode) -> String {
    let podcast: String = episode
        .podcast
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .take(20)
        .collect();

    format!(
        "{}_{}_{}_{}_{}.mp3",
        episode.published.format("%Y%m%d"),
        podcast,
        extract_episode_number(&episode.title),
        content_hash(episode),
        mode
    )
}

/// Parse a publisher duration string into minutes.
///
/// Accepts `HH:MM:SS`, `MM:SS`, `1h 30m`, `90 minutes` and bare minutes.
pub fn parse_duration_minutes(raw: &str) -> Option<f64> {
    let value = raw.trim().to_lowercase();
    if value.is_empty() || value == "unknown" || value == "none" {
        return None;
    }

    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        let nums: Option<Vec<f64>> = parts.iter().map(|p| p.trim().parse::<f64>().ok()).collect();
        return match nums.as_deref() {
            Some([h, m, s]) => Some(h * 60.0 + m + s / 60.0),
            Some([m, s]) => Some(m + s / 60.0),
            _ => None,
        };
    }

    static HOURS_MINUTES: OnceLock<Option<Regex>> = OnceLock::new();
    let hm = HOURS_MINUTES.get_or_init(|| Regex::new(r"(\d+)h\s*(\d+)m").ok());
    if let Some(caps) = hm.as_ref().and_then(|re| re.captures(&value)) {
        let h: f64 = caps[1].parse().ok()?;
        let m: f64 = caps[2].parse().ok()?;
        return Some(h * 60.0 + m);
    }

    if value.contains("minute") {
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        return digits.parse().ok();
    }

    value.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn episode() -> Episode {
        Episode::new(
            "The Drive",
            "#318 - Sleep, Stress & Longevity",
            Utc.with_ymd_and_hms(2025, 1, 14, 9, 30, 0).unwrap(),
        )
    }

    #[test]
    fn test_state_key() {
        assert_eq!(
            episode().state_key(),
            "The Drive|#318 - Sleep, Stress & Longevity|2025-01-14T09:30:00+00:00"
        );
    }

    #[test]
    fn test_identity_ignores_time_of_day() {
        let a = episode();
        let mut b = episode();
        b.published = Utc.with_ymd_and_hms(2025, 1, 14, 23, 59, 0).unwrap();
        b.title = "#318 -- sleep, stress & longevity ".to_string();
        assert!(a.identity().matches(&b.identity()));

        b.published = Utc.with_ymd_and_hms(2025, 1, 15, 0, 1, 0).unwrap();
        assert!(!a.identity().matches(&b.identity()));
    }

    #[test]
    fn test_normalize_title_folds_non_ascii_case() {
        assert_eq!(normalize_title("Émission: L'ÉTÉ à Paris"), normalize_title("émission l été À paris"));
        assert_eq!(normalize_title("ÜBER Straße"), "über straße");
    }

    #[test]
    fn test_identity_prefers_guid() {
        let a = episode().with_guid("abc");
        let b = episode().with_guid("def");
        assert!(!a.identity().matches(&b.identity()));
    }

    #[test]
    fn test_audio_filename_is_mode_specific() {
        let ep = episode();
        let test_name = audio_filename(&ep, Mode::Test);
        let full_name = audio_filename(&ep, Mode::Full);

        assert!(test_name.starts_with("20250114_TheDrive_ep318_"));
        assert!(test_name.ends_with("_test.mp3"));
        assert!(full_name.ends_with("_full.mp3"));
        assert_ne!(test_name, full_name);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_minutes("1:30:00"), Some(90.0));
        assert_eq!(parse_duration_minutes("45:30"), Some(45.5));
        assert_eq!(parse_duration_minutes("1h 15m"), Some(75.0));
        assert_eq!(parse_duration_minutes("90 minutes"), Some(90.0));
        assert_eq!(parse_duration_minutes("42"), Some(42.0));
        assert_eq!(parse_duration_minutes("Unknown"), None);
    }
}
