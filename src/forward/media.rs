//! Loading outbound media from base64 payloads or URLs

use crate::config::MediaConfig;
use crate::error::{Error, Result};
use base64::Engine;
use bytes::{Bytes, BytesMut};

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Raw media ready for upload
#[derive(Debug, Clone)]
pub struct LoadedMedia {
    pub data: Bytes,
    pub mime_type: String,
}

pub struct MediaLoader {
    client: reqwest::Client,
    max_bytes: usize,
}

impl MediaLoader {
    pub fn new(config: &MediaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout())
            .user_agent(concat!("relaygate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Decode a base64 payload, optionally wrapped as a `data:` URL
    pub fn decode(&self, encoded: &str) -> Result<LoadedMedia> {
        let (declared, payload) = split_data_url(encoded.trim());

        // Decoded size is at most 3/4 of the encoded length
        let estimate = payload.len() / 4 * 3;
        if estimate > self.max_bytes {
            return Err(Error::MediaTooLarge {
                size: estimate,
                limit: self.max_bytes,
            });
        }

        let data = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| Error::InvalidRequest(format!("invalid base64 media: {}", e)))?;
        self.check_size(data.len())?;

        let mime_type = declared
            .map(String::from)
            .unwrap_or_else(|| sniff_mime(&data).to_string());
        Ok(LoadedMedia {
            data: Bytes::from(data),
            mime_type,
        })
    }

    /// Download `url`, aborting as soon as the body exceeds the limit
    pub async fn download(&self, url: &str) -> Result<LoadedMedia> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::InvalidRequest(format!(
                "media download from {} failed with {}",
                url, status
            )));
        }
        if let Some(length) = response.content_length() {
            self.check_size(length as usize)?;
        }

        let header_mime = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != OCTET_STREAM);

        let mut buf = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            self.check_size(buf.len() + chunk.len())?;
            buf.extend_from_slice(&chunk);
        }
        let data = buf.freeze();

        let mime_type = header_mime.unwrap_or_else(|| sniff_mime(&data).to_string());
        tracing::debug!(url = %url, bytes = data.len(), mime = %mime_type, "Media downloaded");
        Ok(LoadedMedia { data, mime_type })
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_bytes {
            return Err(Error::MediaTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// `data:<mime>;base64,<payload>` into its declared mime and payload
fn split_data_url(input: &str) -> (Option<&str>, &str) {
    let Some(rest) = input.strip_prefix("data:") else {
        return (None, input);
    };
    match rest.split_once(',') {
        Some((meta, payload)) => {
            let mime = meta.split(';').next().filter(|m| !m.is_empty());
            (mime, payload)
        }
        None => (None, rest),
    }
}

/// Guess a MIME type from magic bytes
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        "image/gif"
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.len() >= 8 && &data[4..8] == b"ftyp" {
        "video/mp4"
    } else if data.starts_with(b"OggS") {
        "audio/ogg"
    } else if data.starts_with(b"ID3") || data.starts_with(&[0xFF, 0xFB]) {
        "audio/mpeg"
    } else if data.starts_with(b"%PDF-") {
        "application/pdf"
    } else {
        OCTET_STREAM
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn loader(max_bytes: usize) -> MediaLoader {
        MediaLoader::new(&MediaConfig {
            max_bytes,
            download_timeout_secs: 5,
        })
        .unwrap()
    }

    fn encode(data: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(data)
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(PNG), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"\0\0\0\x18ftypmp42"), "video/mp4");
        assert_eq!(sniff_mime(b"OggS\0\x02"), "audio/ogg");
        assert_eq!(sniff_mime(b"ID3\x04"), "audio/mpeg");
        assert_eq!(sniff_mime(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff_mime(b"hello"), OCTET_STREAM);
        assert_eq!(sniff_mime(b""), OCTET_STREAM);
    }

    #[test]
    fn test_decode_plain_and_data_url() {
        let loader = loader(1024);
        let media = loader.decode(&encode(PNG)).unwrap();
        assert_eq!(media.mime_type, "image/png");
        assert_eq!(&media.data[..], PNG);

        let media = loader
            .decode(&format!("data:application/pdf;base64,{}", encode(b"not really")))
            .unwrap();
        assert_eq!(media.mime_type, "application/pdf");
        assert_eq!(&media.data[..], b"not really");
    }

    #[test]
    fn test_decode_rejects_oversized_payload() {
        let loader = loader(16);
        let err = loader.decode(&encode(&[7u8; 64])).unwrap_err();
        assert!(matches!(err, Error::MediaTooLarge { limit: 16, .. }));
        assert_eq!(err.code(), "MEDIA_TOO_LARGE");
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        assert!(matches!(
            loader(1024).decode("***"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_download_uses_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain; charset=utf-8")
                    .set_body_bytes(b"hello".to_vec()),
            )
            .mount(&server)
            .await;

        let media = loader(1024)
            .download(&format!("{}/doc", server.uri()))
            .await
            .unwrap();
        assert_eq!(media.mime_type, "text/plain");
        assert_eq!(&media.data[..], b"hello");
    }

    #[tokio::test]
    async fn test_download_sniffs_generic_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", OCTET_STREAM)
                    .set_body_bytes(PNG.to_vec()),
            )
            .mount(&server)
            .await;

        let media = loader(1024).download(&server.uri()).await.unwrap();
        assert_eq!(media.mime_type, "image/png");
    }

    #[tokio::test]
    async fn test_download_over_cap_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 4096]))
            .mount(&server)
            .await;

        let err = loader(1024).download(&server.uri()).await.unwrap_err();
        assert!(matches!(err, Error::MediaTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn test_download_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        assert!(matches!(
            loader(1024).download(&server.uri()).await,
            Err(Error::InvalidRequest(_))
        ));
    }
}
