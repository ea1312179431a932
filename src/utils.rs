use std::collections::HashSet;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::network::ResourceType;
use url::Url;
use uuid::Uuid;

use crate::error::CaptureError;

/// Resource-type slugs accepted in a capture request's `blockResources` list.
pub const KNOWN_RESOURCE_TYPES: &[&str] = &[
    "document",
    "stylesheet",
    "image",
    "media",
    "font",
    "script",
    "texttrack",
    "xhr",
    "fetch",
    "eventsource",
    "websocket",
    "manifest",
    "other",
];

/// Set of resource types aborted during navigation.
///
/// Requests whose CDP resource type is in the set are failed with
/// `BlockedByClient`; everything else continues unmodified.
#[derive(Debug, Clone, Default)]
pub struct BlockList {
    kinds: HashSet<String>,
}

impl BlockList {
    pub fn parse(kinds: &[String]) -> Result<Self, CaptureError> {
        let mut set = HashSet::new();
        for kind in kinds {
            let slug = kind.trim().to_ascii_lowercase();
            if !KNOWN_RESOURCE_TYPES.contains(&slug.as_str()) {
                return Err(CaptureError::validation(
                    "invalid_block_resource",
                    format!("unknown resource type `{kind}`"),
                ));
            }
            set.insert(slug);
        }
        Ok(Self { kinds: set })
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn blocks(&self, resource_type: &ResourceType) -> bool {
        self.kinds.contains(resource_type_slug(resource_type))
    }
}

/// Canonical slug for a CDP resource type; unlisted variants fold into "other".
pub fn resource_type_slug(resource_type: &ResourceType) -> &'static str {
    match resource_type {
        ResourceType::Document => "document",
        ResourceType::Stylesheet => "stylesheet",
        ResourceType::Image => "image",
        ResourceType::Media => "media",
        ResourceType::Font => "font",
        ResourceType::Script => "script",
        ResourceType::TextTrack => "texttrack",
        ResourceType::Xhr => "xhr",
        ResourceType::Fetch => "fetch",
        ResourceType::EventSource => "eventsource",
        ResourceType::WebSocket => "websocket",
        ResourceType::Manifest => "manifest",
        _ => "other",
    }
}

/// Validate a capture target or webhook URL: must parse and be http(s).
pub fn validate_target_url(raw: &str) -> Result<Url, CaptureError> {
    let url = Url::parse(raw).map_err(|e| {
        CaptureError::validation("invalid_url", format!("cannot parse `{raw}`: {e}"))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(CaptureError::validation(
            "invalid_url",
            format!("unsupported scheme `{other}`"),
        )),
    }
}

/// Deterministic artifact key namespaced by account and job.
pub fn artifact_key(account_id: &str, job_id: Uuid, extension: &str) -> String {
    format!("captures/{account_id}/{job_id}.{extension}")
}

/// Content type for an artifact key extension; unknown extensions fall back
/// to a safe default.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Count the pages in a rendered PDF.
///
/// Scans for `/Type /Page` object markers, excluding the `/Type /Pages` tree
/// node. Good enough for the uncompressed object tables Chrome emits.
pub fn count_pdf_pages(bytes: &[u8]) -> u32 {
    let pages = count_occurrences(bytes, b"/Type /Pages") + count_occurrences(bytes, b"/Type/Pages");
    let all = count_occurrences(bytes, b"/Type /Page") + count_occurrences(bytes, b"/Type/Page");
    all.saturating_sub(pages).max(1) as u32
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| w == &needle).count()
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    if total_secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    if total_secs < 60 {
        return format!("{:.1}s", duration.as_secs_f64());
    }
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

pub fn format_bytes(bytes: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
