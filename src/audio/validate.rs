//! Sanity checks on downloaded audio.

use crate::error::SourceError;
use std::io::Read;
use std::path::Path;

/// Container or codec recognised from a file's first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Mp4,
    Ogg,
    Wav,
    Flac,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp4 => "m4a",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
        }
    }
}

/// Detect the audio format from a file header.
pub fn sniff(header: &[u8]) -> Option<AudioFormat> {
    if header.starts_with(b"ID3") {
        return Some(AudioFormat::Mp3);
    }
    // MPEG audio frame sync
    if header.len() >= 2 && header[0] == 0xFF && matches!(header[1], 0xFB | 0xF3 | 0xF2) {
        return Some(AudioFormat::Mp3);
    }
    if header.len() >= 8 && &header[4..8] == b"ftyp" {
        return Some(AudioFormat::Mp4);
    }
    if header.starts_with(b"OggS") {
        return Some(AudioFormat::Ogg);
    }
    if header.starts_with(b"RIFF") {
        return Some(AudioFormat::Wav);
    }
    if header.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    None
}

/// Size bounds applied to every download.
#[derive(Debug, Clone, Copy)]
pub struct SizeLimits {
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            min_bytes: 10_000,
            max_bytes: 500_000_000,
        }
    }
}

/// Check that `path` holds plausible audio. Returns the detected format.
pub fn validate_audio_file(path: &Path, limits: SizeLimits) -> Result<AudioFormat, SourceError> {
    let size = std::fs::metadata(path)
        .map_err(|e| SourceError::Validation(format!("cannot stat {}: {}", path.display(), e)))?
        .len();

    if size < limits.min_bytes {
        return Err(SourceError::Validation(format!(
            "file is {} bytes, below the {} byte minimum",
            size, limits.min_bytes
        )));
    }
    if size > limits.max_bytes {
        return Err(SourceError::Validation(format!(
            "file is {} bytes, above the {} byte limit",
            size, limits.max_bytes
        )));
    }

    let mut header = [0u8; 16];
    let read = std::fs::File::open(path)
        .and_then(|mut f| f.read(&mut header))
        .map_err(|e| SourceError::Validation(format!("cannot read {}: {}", path.display(), e)))?;
    let header = &header[..read];

    if let Some(format) = sniff(header) {
        return Ok(format);
    }

    let text = String::from_utf8_lossy(header).to_lowercase();
    if text.contains("<!doc") || text.contains("<html") {
        return Err(SourceError::Validation("file is an HTML page".into()));
    }
    Err(SourceError::Validation("no known audio signature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, header: &[u8], size: usize) -> std::path::PathBuf {
        let mut bytes = header.to_vec();
        bytes.resize(size, 0);
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_sniff_signatures() {
        assert_eq!(sniff(b"ID3\x04"), Some(AudioFormat::Mp3));
        assert_eq!(sniff(&[0xFF, 0xFB, 0x90]), Some(AudioFormat::Mp3));
        assert_eq!(sniff(b"\0\0\0\x20ftypM4A "), Some(AudioFormat::Mp4));
        assert_eq!(sniff(b"OggS\0"), Some(AudioFormat::Ogg));
        assert_eq!(sniff(b"fLaC"), Some(AudioFormat::Flac));
        assert_eq!(sniff(b"<html>"), None);
    }

    #[test]
    fn test_validate_rejects_small_and_html() {
        let dir = tempfile::tempdir().unwrap();
        let limits = SizeLimits::default();

        let ok = write(dir.path(), "a.mp3", b"ID3", 20_000);
        assert_eq!(validate_audio_file(&ok, limits).unwrap(), AudioFormat::Mp3);

        let tiny = write(dir.path(), "b.mp3", b"ID3", 500);
        assert!(validate_audio_file(&tiny, limits).is_err());

        let html = write(dir.path(), "c.mp3", b"<!DOCTYPE html><html>", 20_000);
        let err = validate_audio_file(&html, limits).unwrap_err();
        assert_eq!(err, SourceError::Validation("file is an HTML page".into()));
    }
}
