//! Content-type resolution for uploads.

/// Resolve the MIME type of an artifact, in order: extension lookup on the
/// key, magic-byte sniffing on the head of the body, UTF-8 validity, and
/// finally `application/octet-stream`.
///
/// `head` is at most the first 512 bytes of the payload.
pub fn detect_content_type(key: &str, head: &[u8]) -> String {
    if let Some(mime) = mime_guess::from_path(key).first_raw() {
        return mime.to_string();
    }

    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    if std::str::from_utf8(head).is_ok() {
        return "text/plain; charset=utf-8".to_string();
    }

    "application/octet-stream".to_string()
}
