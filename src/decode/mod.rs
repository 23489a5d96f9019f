//! Response decoding.
//!
//! Turns a raw HTTP response into decoded text or a decoded image, or a
//! typed error. Decoding is pure: it performs no I/O and holds no state,
//! so provider-format drift stays isolated in this one module.
//!
//! Non-success statuses are classified here into `Provider` errors (the
//! retry policy decides whether 429/5xx get another attempt). Success
//! bodies are decoded per the request's kind:
//!
//! - Text: JSON body with a `text` field, or the provider's completion
//!   shape (`choices[0].text`).
//! - Image: raw encoded image bytes, handed to the [`ImageDecoder`]
//!   collaborator.

mod mask;

pub use mask::mask_center_square;

use std::io::Cursor;

use image::{ImageReader, RgbaImage};

use crate::error::GenerationError;
use crate::request::{GenerationKind, GenerationPayload};
use crate::transport::RawResponse;

/// How much of an error body to carry into diagnostics.
const ERROR_BODY_SNIPPET_LEN: usize = 200;

/// External image-decoding collaborator.
///
/// Takes encoded bytes, returns a decoded bitmap. Abstracted behind a
/// trait so tests can decode without real image payloads.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, GenerationError>;
}

/// Image decoder backed by the `image` crate.
///
/// Formats are sniffed from the bytes; an unrecognized signature is
/// `UnsupportedFormat`, a recognized-but-corrupt payload is
/// `MalformedResponse`.
#[derive(Debug, Default, Clone)]
pub struct ImageRsDecoder;

impl ImageDecoder for ImageRsDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<RgbaImage, GenerationError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| GenerationError::MalformedResponse(format!("format sniff failed: {e}")))?;

        if reader.format().is_none() {
            return Err(GenerationError::UnsupportedFormat(
                "unrecognized image signature".to_string(),
            ));
        }

        let image = reader
            .decode()
            .map_err(|e| GenerationError::MalformedResponse(format!("image decode failed: {e}")))?;
        Ok(image.to_rgba8())
    }
}

/// Decodes a raw response into a payload for the given request kind.
pub fn decode_response<D: ImageDecoder>(
    kind: GenerationKind,
    response: &RawResponse,
    decoder: &D,
) -> Result<GenerationPayload, GenerationError> {
    if !response.is_success() {
        return Err(provider_error(response));
    }

    match kind {
        GenerationKind::Text => decode_text(&response.body),
        GenerationKind::Image => {
            let bitmap = decoder.decode(&response.body)?;
            Ok(GenerationPayload::Image(std::sync::Arc::new(bitmap)))
        }
    }
}

/// Builds a `Provider` error from a non-success response, carrying a
/// truncated body snippet for diagnostics.
fn provider_error(response: &RawResponse) -> GenerationError {
    let snippet: String = String::from_utf8_lossy(&response.body)
        .chars()
        .take(ERROR_BODY_SNIPPET_LEN)
        .collect();
    let message = if snippet.trim().is_empty() {
        "no response body".to_string()
    } else {
        snippet
    };
    GenerationError::Provider {
        status: response.status,
        message,
    }
}

fn decode_text(body: &[u8]) -> Result<GenerationPayload, GenerationError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| GenerationError::MalformedResponse(format!("body is not JSON: {e}")))?;

    if let Some(text) = value.get("text").and_then(|t| t.as_str()) {
        return Ok(GenerationPayload::Text(text.to_string()));
    }

    // Completion-style shape used by the provider's text endpoint
    if let Some(text) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("text"))
        .and_then(|t| t.as_str())
    {
        return Ok(GenerationPayload::Text(text.to_string()));
    }

    Err(GenerationError::MalformedResponse(
        "no text field in response".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut buffer = Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("failed to encode PNG");
        buffer.into_inner()
    }

    #[test]
    fn test_decode_text_success() {
        let response = RawResponse::new(200, br#"{"text":"A gleaming blade."}"#.to_vec());
        let payload = decode_response(GenerationKind::Text, &response, &ImageRsDecoder).unwrap();
        assert_eq!(payload.as_text(), Some("A gleaming blade."));
    }

    #[test]
    fn test_decode_text_completion_shape() {
        let response = RawResponse::new(
            200,
            br#"{"choices":[{"text":"An ancient oak door."}]}"#.to_vec(),
        );
        let payload = decode_response(GenerationKind::Text, &response, &ImageRsDecoder).unwrap();
        assert_eq!(payload.as_text(), Some("An ancient oak door."));
    }

    #[test]
    fn test_decode_text_missing_field() {
        let response = RawResponse::new(200, br#"{"message":"hi"}"#.to_vec());
        let result = decode_response(GenerationKind::Text, &response, &ImageRsDecoder);
        assert!(matches!(
            result,
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decode_text_invalid_json() {
        let response = RawResponse::new(200, b"not json at all".to_vec());
        let result = decode_response(GenerationKind::Text, &response, &ImageRsDecoder);
        assert!(matches!(
            result,
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_decode_image_success() {
        let response = RawResponse::new(200, png_bytes(32, 16));
        let payload = decode_response(GenerationKind::Image, &response, &ImageRsDecoder).unwrap();
        let image = payload.as_image().unwrap();
        assert_eq!(image.width(), 32);
        assert_eq!(image.height(), 16);
    }

    #[test]
    fn test_decode_image_unknown_signature() {
        let response = RawResponse::new(200, vec![0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);
        let result = decode_response(GenerationKind::Image, &response, &ImageRsDecoder);
        assert!(matches!(
            result,
            Err(GenerationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_decode_image_corrupt_payload() {
        // Valid PNG signature, garbage after
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend_from_slice(&[0xFF; 16]);
        let response = RawResponse::new(200, bytes);
        let result = decode_response(GenerationKind::Image, &response, &ImageRsDecoder);
        assert!(matches!(
            result,
            Err(GenerationError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_provider_error_carries_status_and_snippet() {
        let response = RawResponse::new(429, b"rate limit exceeded".to_vec());
        let result = decode_response(GenerationKind::Text, &response, &ImageRsDecoder);
        match result {
            Err(GenerationError::Provider { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limit exceeded");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_provider_error_empty_body() {
        let response = RawResponse::new(500, Vec::new());
        match decode_response(GenerationKind::Text, &response, &ImageRsDecoder) {
            Err(GenerationError::Provider { status, message }) => {
                assert_eq!(status, 500);
                assert_eq!(message, "no response body");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[test]
    fn test_provider_error_snippet_truncated() {
        let body = vec![b'x'; 5000];
        let response = RawResponse::new(503, body);
        match decode_response(GenerationKind::Text, &response, &ImageRsDecoder) {
            Err(GenerationError::Provider { message, .. }) => {
                assert_eq!(message.len(), ERROR_BODY_SNIPPET_LEN);
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }
}
