//! Audio file handling: validation and yt-dlp extraction.

mod validate;
mod ytdlp;

pub use validate::{sniff, validate_audio_file, AudioFormat, SizeLimits};
pub use ytdlp::{extract_video_id, CookieSource, YtDlp};
