//! yt-dlp subprocess wrapper.
//!
//! Used for YouTube sources: searching for an episode's video and
//! extracting its audio as MP3. Each invocation is tried with every
//! configured cookie source in turn, then once without cookies.

use crate::config::{Settings, YoutubeSettings};
use crate::error::{HentError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Where yt-dlp gets its cookies from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    /// Netscape-format cookie jar.
    File(PathBuf),
    /// Browser profile name, as understood by `--cookies-from-browser`.
    Browser(String),
}

impl CookieSource {
    fn args(&self) -> Vec<String> {
        match self {
            CookieSource::File(path) => {
                vec!["--cookies".to_string(), path.to_string_lossy().into_owned()]
            }
            CookieSource::Browser(name) => vec!["--cookies-from-browser".to_string(), name.clone()],
        }
    }
}

/// Runs yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    cookies: Vec<CookieSource>,
}

impl YtDlp {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            cookies: Vec::new(),
        }
    }

    /// Binary plus cookie sources (file first, then browsers).
    pub fn from_settings(settings: &YoutubeSettings) -> Self {
        let file = settings
            .cookies_file
            .as_deref()
            .map(|p| CookieSource::File(Settings::expand_path(p)));
        let browsers = settings
            .cookies_from_browser
            .iter()
            .map(|b| CookieSource::Browser(b.clone()));
        Self::new(settings.ytdlp_path.clone()).with_cookies(file.into_iter().chain(browsers).collect())
    }

    pub fn with_cookies(mut self, cookies: Vec<CookieSource>) -> Self {
        self.cookies = cookies;
        self
    }

    /// Argument lists to try for one invocation, in order.
    fn attempts(&self, args: &[&str]) -> Vec<Vec<String>> {
        let base: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let mut attempts: Vec<Vec<String>> = self
            .cookies
            .iter()
            .filter(|source| match source {
                CookieSource::File(path) if !path.exists() => {
                    debug!(path = %path.display(), "cookie file missing, skipping");
                    false
                }
                _ => true,
            })
            .map(|source| source.args().into_iter().chain(base.iter().cloned()).collect())
            .collect();
        attempts.push(base);
        attempts
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        let result = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match result {
            Ok(o) => o,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HentError::ToolNotFound(self.binary.clone()));
            }
            Err(e) => {
                return Err(HentError::ToolFailed(format!("yt-dlp execution failed: {e}")));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HentError::ToolFailed(format!("yt-dlp failed: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run with each cookie source, then without; the last failure wins.
    async fn run_with_cookies(&self, args: &[&str]) -> Result<String> {
        let mut last_error = None;
        for attempt in self.attempts(args) {
            match self.run(&attempt).await {
                Ok(stdout) => return Ok(stdout),
                Err(e @ HentError::ToolNotFound(_)) => return Err(e),
                Err(e) => {
                    debug!(error = %e, "yt-dlp attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| HentError::ToolFailed("yt-dlp was not run".into())))
    }

    /// Watch URLs of the first `limit` search results for `query`.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<String>> {
        let target = format!("ytsearch{}:{}", limit.max(1), query);
        let stdout = self
            .run_with_cookies(&["--get-id", "--flat-playlist", "--no-warnings", target.as_str()])
            .await?;

        let urls: Vec<String> = stdout
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| format!("https://www.youtube.com/watch?v={}", id))
            .collect();
        debug!(count = urls.len(), "YouTube search results");
        Ok(urls)
    }

    /// Extract audio from `url` into `dest` (an `.mp3` path).
    ///
    /// Anything yt-dlp left under `dest`'s stem is removed unless the
    /// download completes, including when this future is dropped.
    #[instrument(skip(self, dest))]
    pub async fn download_audio(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        let dir = dest
            .parent()
            .ok_or_else(|| HentError::InvalidInput(format!("no parent directory for {:?}", dest)))?;
        std::fs::create_dir_all(dir)?;

        let stem = dest
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HentError::InvalidInput(format!("bad file name {:?}", dest)))?;
        let template = dir.join(format!("{}.%(ext)s", stem));
        let template = template.to_string_lossy();

        info!("Downloading audio from {}", url);

        let partials = PartialFiles::new(dir, stem);
        self.run_with_cookies(&[
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            "0",
            "--output",
            template.as_ref(),
            "--no-playlist",
            "--quiet",
            "--no-warnings",
            url,
        ])
        .await?;

        let produced = find_audio_file(dir, stem)?;
        if produced != dest {
            std::fs::rename(&produced, dest)?;
        }
        partials.keep();
        Ok(dest.to_path_buf())
    }
}

/// Files named `<stem>.*` in a directory, deleted on drop unless kept.
struct PartialFiles<'a> {
    dir: &'a Path,
    prefix: String,
    armed: bool,
}

impl<'a> PartialFiles<'a> {
    fn new(dir: &'a Path, stem: &str) -> Self {
        Self {
            dir,
            prefix: format!("{stem}."),
            armed: true,
        }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFiles<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(entries) = std::fs::read_dir(self.dir) else {
            return;
        };
        for entry in entries.flatten() {
            if !entry.file_name().to_string_lossy().starts_with(&self.prefix) {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => debug!(path = %entry.path().display(), "removed partial download"),
                Err(e) => warn!(path = %entry.path().display(), "could not remove partial download: {e}"),
            }
        }
    }
}

/// Locate the file yt-dlp produced for `stem`.
fn find_audio_file(dir: &Path, stem: &str) -> Result<PathBuf> {
    for ext in &["mp3", "opus", "m4a", "webm", "ogg"] {
        let candidate = dir.join(format!("{}.{}", stem, ext));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let prefix = format!("{stem}.");
    let entries = std::fs::read_dir(dir)?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && !name.ends_with(".part") {
            return Ok(entry.path());
        }
    }

    Err(HentError::ToolFailed("audio file not found after yt-dlp download".into()))
}

/// Video id of a YouTube URL.
pub fn extract_video_id(input: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| {
            Regex::new(
                r"(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([a-zA-Z0-9_-]{11})",
            )
            .ok()
        })
        .as_ref()?;
    re.captures(input.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_extract_video_id() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=10").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?list=x&v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(extract_video_id("https://example.com/a.mp3"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_not_found() {
        let ytdlp = YtDlp::new("hent-no-such-binary").with_cookies(vec![CookieSource::Browser("firefox".into())]);
        let err = ytdlp.search("anything", 1).await.unwrap_err();
        assert!(matches!(err, HentError::ToolNotFound(_)));
    }

    #[test]
    fn test_cookie_sources_tried_before_plain_run() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("cookies.txt");
        std::fs::write(&jar, "# Netscape HTTP Cookie File\n").unwrap();

        let ytdlp = YtDlp::new("yt-dlp").with_cookies(vec![
            CookieSource::File(jar.clone()),
            CookieSource::File(dir.path().join("missing.txt")),
            CookieSource::Browser("firefox".into()),
        ]);
        let attempts = ytdlp.attempts(&["--get-id", "ytsearch1:x"]);

        let jar = jar.to_string_lossy().into_owned();
        assert_eq!(
            attempts,
            vec![
                vec!["--cookies", jar.as_str(), "--get-id", "ytsearch1:x"],
                vec!["--cookies-from-browser", "firefox", "--get-id", "ytsearch1:x"],
                vec!["--get-id", "ytsearch1:x"],
            ]
        );
    }

    #[test]
    fn test_from_settings_orders_file_then_browsers() {
        let settings = YoutubeSettings {
            cookies_file: Some("/tmp/hent-cookies.txt".into()),
            cookies_from_browser: vec!["firefox".into(), "chrome".into()],
            ..Default::default()
        };
        let ytdlp = YtDlp::from_settings(&settings);
        assert_eq!(ytdlp.binary, "yt-dlp");
        assert_eq!(
            ytdlp.cookies,
            vec![
                CookieSource::File(PathBuf::from("/tmp/hent-cookies.txt")),
                CookieSource::Browser("firefox".into()),
                CookieSource::Browser("chrome".into()),
            ]
        );

        assert_eq!(YtDlp::from_settings(&YoutubeSettings::default()).attempts(&["-U"]), vec![vec!["-U"]]);
    }

    #[test]
    fn test_find_audio_file_prefers_known_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ep.webm"), b"x").unwrap();
        std::fs::write(dir.path().join("ep.m4a"), b"x").unwrap();
        let found = find_audio_file(dir.path(), "ep").unwrap();
        assert_eq!(found, dir.path().join("ep.m4a"));
    }

    #[test]
    fn test_partial_files_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ep.webm.part", "ep.f251.webm", "ep2.mp3", "other.mp3"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        PartialFiles::new(dir.path(), "ep2").keep();
        drop(PartialFiles::new(dir.path(), "ep"));

        assert_eq!(names(dir.path()), vec!["ep2.mp3", "other.mp3"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_download_leaves_no_partials() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp");
        std::fs::write(
            &script,
            "#!/bin/sh\n\
             while [ $# -gt 0 ]; do\n\
               if [ \"$1\" = \"--output\" ]; then out=\"$2\"; fi\n\
               shift\n\
             done\n\
             touch \"$(echo \"$out\" | sed 's/%(ext)s/webm.part/')\"\n\
             echo 'HTTP Error 403: Forbidden' >&2\n\
             exit 1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let out_dir = dir.path().join("audio");
        let ytdlp = YtDlp::new(script.to_string_lossy());
        let err = ytdlp
            .download_audio("https://www.youtube.com/watch?v=dQw4w9WgXcQ", &out_dir.join("ep.mp3"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("403"));
        assert!(names(&out_dir).is_empty());
    }
}
