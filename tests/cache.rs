//! Mode isolation and identity tiers of the transcript cache.

use chrono::{TimeZone, Utc};
use hent::cache::{CacheEntry, MatchTier, Mode, ModeSelector, TranscriptCache};
use hent::episode::Episode;

fn episode(day: u32) -> Episode {
    Episode::new(
        "Acquired",
        "Costco",
        Utc.with_ymd_and_hms(2025, 3, day, 6, 30, 0).unwrap(),
    )
}

fn entry(transcript: &str) -> CacheEntry<'_> {
    CacheEntry {
        transcript,
        source: Some("transcribed"),
        ..Default::default()
    }
}

#[test]
fn write_in_test_mode_is_invisible_to_full_reads() {
    let cache = TranscriptCache::in_memory().unwrap();
    let ep = episode(3);
    cache.write(&ep, Mode::Test, &entry("T1")).unwrap();

    let full = cache.read(&ep.identity(), ModeSelector::Strict(Mode::Full)).unwrap();
    assert!(!full.is_hit());

    let test = cache
        .read(&ep.identity(), ModeSelector::Strict(Mode::Test))
        .unwrap()
        .hit()
        .unwrap();
    assert_eq!(test.transcript, "T1");
    assert_eq!(test.mode, Mode::Test);
}

#[test]
fn any_mode_read_must_be_requested() {
    let cache = TranscriptCache::in_memory().unwrap();
    let ep = episode(3);
    cache.write(&ep, Mode::Test, &entry("T1")).unwrap();

    let any = cache.read(&ep.identity(), ModeSelector::Any).unwrap().hit().unwrap();
    assert_eq!(any.transcript, "T1");
    assert_eq!(any.mode, Mode::Test);
}

#[test]
fn date_one_day_off_resolves_as_degraded_title_match() {
    let cache = TranscriptCache::in_memory().unwrap();
    cache.write(&episode(3), Mode::Full, &entry("full transcript")).unwrap();

    let hit = cache
        .read(&episode(4).identity(), ModeSelector::Strict(Mode::Full))
        .unwrap()
        .hit()
        .unwrap();
    assert_eq!(hit.transcript, "full transcript");
    assert_eq!(hit.tier, MatchTier::TitleOnly);
    assert!(hit.degraded);
}

#[test]
fn title_only_matching_can_be_disabled() {
    let cache = TranscriptCache::in_memory().unwrap().with_title_only_match(false);
    cache.write(&episode(3), Mode::Full, &entry("full transcript")).unwrap();

    let lookup = cache
        .read(&episode(4).identity(), ModeSelector::Strict(Mode::Full))
        .unwrap();
    assert!(!lookup.is_hit());
}

#[test]
fn guid_match_wins_over_title() {
    let cache = TranscriptCache::in_memory().unwrap();
    let original = episode(3).with_guid("acq-costco");
    cache.write(&original, Mode::Full, &entry("by guid")).unwrap();

    let mut renamed = episode(3).with_guid("acq-costco");
    renamed.title = "Costco (Remastered)".into();
    let hit = cache
        .read(&renamed.identity(), ModeSelector::Strict(Mode::Full))
        .unwrap()
        .hit()
        .unwrap();
    assert_eq!(hit.tier, MatchTier::Guid);
    assert!(!hit.degraded);
}

#[test]
fn rewrite_updates_same_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let ep = episode(3);

    let first = {
        let cache = TranscriptCache::new(&path).unwrap();
        cache.write(&ep, Mode::Full, &entry("v1")).unwrap()
    };

    let cache = TranscriptCache::new(&path).unwrap();
    let second = cache.write(&ep, Mode::Full, &entry("v2")).unwrap();
    assert_eq!(first, second);

    let hit = cache
        .read(&ep.identity(), ModeSelector::Strict(Mode::Full))
        .unwrap()
        .hit()
        .unwrap();
    assert_eq!(hit.transcript, "v2");
    assert_eq!(hit.tier, MatchTier::ExactDate);
}
