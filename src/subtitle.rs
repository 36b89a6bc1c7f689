#![forbid(unsafe_code)]

//! Transcript extraction for the `script` command.
//!
//! Two sources, tried in order: a locally cached transcript file produced by
//! the Yuntu scraping workflow, and — when the cache misses — a
//! download → ffmpeg → Whisper pipeline against the speech-to-text providers.

use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use reqwest::blocking::{Client, multipart};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::tikhub::DouyinApi;

const GROQ_TRANSCRIPTION_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const OPENAI_TRANSCRIPTION_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);

/// One tagged paragraph of a cached script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSegment {
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub content: String,
}

/// A transcript as the Yuntu scraping workflow cached it. Several fields keep
/// loose `Value` types because the scraper stores strings or lists depending
/// on what the dashboard rendered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedTranscript {
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content_formula: Value,
    #[serde(default)]
    pub script_segments: Vec<ScriptSegment>,
    #[serde(default)]
    pub raw_script: String,
    #[serde(default)]
    pub talent_name: Option<String>,
    #[serde(default)]
    pub views: Value,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptCache {
    #[serde(default)]
    videos: Vec<CachedTranscript>,
}

/// Looks a video up in the transcript cache, matching the exact id first and
/// then an id substring in the cached title. Unreadable caches are treated as
/// empty rather than failing the command.
pub fn lookup_cached(path: &Path, video_id: &str) -> Result<Option<CachedTranscript>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            debug!("transcript cache unreadable: {err}");
            return Ok(None);
        }
    };
    let cache: TranscriptCache = match serde_json::from_str(&content) {
        Ok(cache) => cache,
        Err(err) => {
            debug!("transcript cache unparseable: {err}");
            return Ok(None);
        }
    };

    let hit = cache.videos.into_iter().find(|video| {
        video.video_id.as_deref() == Some(video_id) || video.title.contains(video_id)
    });
    if hit.is_some() {
        info!("transcript for {video_id} found in local cache");
    }
    Ok(hit)
}

/// One timed piece of a Whisper transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    #[serde(default)]
    pub start: f64,
    #[serde(default)]
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<TranscriptionSegment>,
}

/// Result of running the full download → transcribe pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedTranscript {
    pub video_id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<TranscriptionSegment>,
    pub method: String,
    pub extracted_at: String,
    pub char_count: usize,
}

/// Whisper-compatible speech-to-text client. Groq is free and tried first;
/// OpenAI is the paid fallback.
pub struct SpeechToText {
    client: Client,
    groq_api_key: Option<String>,
    openai_api_key: Option<String>,
}

impl SpeechToText {
    pub fn new(groq_api_key: Option<String>, openai_api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("building speech-to-text HTTP client")?;
        Ok(Self {
            client,
            groq_api_key,
            openai_api_key,
        })
    }

    pub fn transcribe(&self, audio_path: &Path) -> Result<WhisperTranscription> {
        if let Some(key) = &self.groq_api_key {
            info!("transcribing with Groq Whisper");
            match self.request(GROQ_TRANSCRIPTION_URL, key, "whisper-large-v3", audio_path) {
                Ok(result) => return Ok(result),
                Err(err) => warn!("Groq transcription failed: {err:#}"),
            }
        }

        let Some(key) = &self.openai_api_key else {
            bail!("speech-to-text requires GROQ_API_KEY or OPENAI_API_KEY");
        };
        info!("transcribing with OpenAI Whisper");
        self.request(OPENAI_TRANSCRIPTION_URL, key, "whisper-1", audio_path)
    }

    fn request(
        &self,
        url: &str,
        api_key: &str,
        model: &str,
        audio_path: &Path,
    ) -> Result<WhisperTranscription> {
        let form = multipart::Form::new()
            .file("file", audio_path)
            .with_context(|| format!("attaching {}", audio_path.display()))?
            .text("model", model.to_string())
            .text("language", "zh")
            .text("response_format", "verbose_json");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .multipart(form)
            .timeout(TRANSCRIBE_TIMEOUT)
            .send()
            .context("requesting transcription")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            bail!("transcription endpoint returned {status}: {body}");
        }

        let parsed: WhisperResponse = response.json().context("decoding transcription")?;
        Ok(WhisperTranscription {
            text: parsed.text,
            segments: parsed.segments,
        })
    }
}

/// Text plus whatever timing information the provider returned.
#[derive(Debug, Clone)]
pub struct WhisperTranscription {
    pub text: String,
    pub segments: Vec<TranscriptionSegment>,
}

/// Fails fast when an external tool the pipeline shells out to is missing.
fn ensure_program_available(program: &str) -> Result<()> {
    match Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => Ok(()),
        Err(_) => bail!("{program} is not installed or not on PATH"),
    }
}

/// Extracts a mono 16 kHz mp3 track, which is what the Whisper endpoints
/// expect for speech.
fn extract_audio(video_path: &Path, audio_path: &Path) -> Result<()> {
    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(video_path)
        .arg("-vn")
        .args(["-acodec", "libmp3lame", "-ar", "16000", "-ac", "1"])
        .arg(audio_path)
        .output()
        .context("running ffmpeg")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffmpeg failed: {}", stderr.trim());
    }
    info!("audio track extracted");
    Ok(())
}

/// Full pipeline for a cache miss: download the video into a temp dir, strip
/// the audio, transcribe it.
pub fn extract_transcript(
    api: &DouyinApi,
    stt: &SpeechToText,
    video_id: &str,
) -> Result<ExtractedTranscript> {
    ensure_program_available("ffmpeg")?;

    let workdir = tempfile::tempdir().context("creating temp directory")?;
    let video_path = workdir.path().join("video.mp4");
    let audio_path = workdir.path().join("audio.mp3");

    info!("downloading video {video_id}");
    let play_url = api.fetch_play_url(video_id)?;
    let bytes = api.download_file(&play_url, &video_path)?;
    info!("downloaded {:.1} MB", bytes as f64 / 1024.0 / 1024.0);

    extract_audio(&video_path, &audio_path)?;

    let transcription = stt.transcribe(&audio_path)?;
    let char_count = transcription.text.chars().count();
    info!("transcription finished: {char_count} character(s)");

    Ok(ExtractedTranscript {
        video_id: video_id.to_string(),
        text: transcription.text,
        segments: transcription.segments,
        method: "whisper".to_string(),
        extracted_at: Utc::now().to_rfc3339(),
        char_count,
    })
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as i64;
    let hours = total_ms / 3_600_000;
    let minutes = total_ms % 3_600_000 / 60_000;
    let secs = total_ms % 60_000 / 1000;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Renders timed segments as SubRip cues, numbered from 1.
pub fn render_srt(segments: &[TranscriptionSegment]) -> String {
    let mut srt = String::new();
    for (index, segment) in segments.iter().enumerate() {
        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            format_srt_time(segment.start),
            format_srt_time(segment.end),
            segment.text.trim()
        ));
    }
    srt
}
