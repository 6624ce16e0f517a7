//! Inline file payloads for generation requests.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Encode `bytes` as a `data:` URL, for files the generation service cannot
/// fetch itself.
pub fn data_url(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        assert_eq!(data_url("image/png", b"png!"), "data:image/png;base64,cG5nIQ==");
        assert_eq!(data_url("audio/mpeg", b""), "data:audio/mpeg;base64,");
    }
}
