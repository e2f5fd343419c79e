use std::sync::LazyLock;

use regex::Regex;

static MEDIA_URL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^https?://\S+\.(jpg|jpeg|png|gif|webp|mp4|mov|avi)(\?\S*)?$").ok()
});

/// If `text` is a bare link to an image or video, return the trimmed URL.
pub fn media_url(text: &str) -> Option<&str> {
    let text = text.trim();
    MEDIA_URL
        .as_ref()
        .filter(|re| re.is_match(text))
        .map(|_| text)
}

/// Guess a MIME type from a URL's file extension.
pub fn mime_from_url(url: &str) -> Option<&'static str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "pdf" => "application/pdf",
        _ => return None,
    })
}

/// Strip parameters (`; charset=...`) from a Content-Type header value.
pub fn essence(content_type: &str) -> &str {
    content_type.split(';').next().unwrap_or(content_type).trim()
}
