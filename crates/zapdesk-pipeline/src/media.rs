// SPDX-FileCopyrightText: 2026 Zapdesk Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Attachments saved on the local filesystem.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use zapdesk_core::types::{AdapterType, HealthStatus, LocalMedia, MediaLocation, MediaRef};
use zapdesk_core::{Adapter, MediaStore, ZapdeskError};

/// Stores files as `{media_dir}/{uuid}.{ext}` and serves them under
/// `{public_base}/{uuid}.{ext}`.
pub struct FsMediaStore {
    http: reqwest::Client,
    root: PathBuf,
    public_base: String,
}

impl FsMediaStore {
    pub fn new(
        root: impl Into<PathBuf>,
        public_base: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ZapdeskError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ZapdeskError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            root: root.into(),
            public_base: public_base.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn io_error(what: &str, path: &Path, e: std::io::Error) -> ZapdeskError {
    ZapdeskError::Channel {
        message: format!("failed to {what} {}: {e}", path.display()),
        source: Some(Box::new(e)),
    }
}

/// File extension for a MIME type, ignoring parameters such as `codecs`.
fn extension_for(mime: &str) -> &'static str {
    match mime.split(';').next().unwrap_or("").trim() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/3gpp" => "3gp",
        "audio/ogg" => "ogg",
        "audio/mpeg" => "mp3",
        "audio/mp4" | "audio/aac" => "m4a",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        _ => "bin",
    }
}

#[async_trait]
impl Adapter for FsMediaStore {
    fn name(&self) -> &str {
        "fs-media"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Media
    }

    async fn health_check(&self) -> Result<HealthStatus, ZapdeskError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(HealthStatus::Healthy),
            Ok(_) => Ok(HealthStatus::Unhealthy(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Ok(HealthStatus::Degraded(format!("{}: {e}", self.root.display()))),
        }
    }

    async fn shutdown(&self) -> Result<(), ZapdeskError> {
        Ok(())
    }
}

#[async_trait]
impl MediaStore for FsMediaStore {
    async fn download(
        &self,
        location: &MediaLocation,
        media: &MediaRef,
    ) -> Result<LocalMedia, ZapdeskError> {
        let mut request = self.http.get(&location.url);
        if let Some(token) = &location.bearer {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ZapdeskError::Channel {
                message: format!("media download failed: {e}"),
                source: Some(Box::new(e)),
            })?;

        let mime_type = media
            .mime_type
            .clone()
            .or_else(|| {
                response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| media.kind.default_mime().to_string());

        let bytes = response.bytes().await.map_err(|e| ZapdeskError::Channel {
            message: format!("media body read failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error("create", &self.root, e))?;
        let name = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(&mime_type));
        let path = self.root.join(&name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| io_error("write", &path, e))?;
        debug!(path = %path.display(), size = bytes.len(), "media stored");

        Ok(LocalMedia {
            path: name,
            mime_type,
            filename: media.filename.clone(),
            size: bytes.len() as u64,
        })
    }

    fn public_url(&self, media: &LocalMedia) -> String {
        format!("{}/{}", self.public_base.trim_end_matches('/'), media.path)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zapdesk_core::types::MediaKind;

    use super::*;

    fn image_ref() -> MediaRef {
        MediaRef {
            kind: MediaKind::Image,
            reference: "MEDIA9".into(),
            mime_type: None,
            filename: Some("foto.png".into()),
        }
    }

    #[tokio::test]
    async fn downloads_with_bearer_into_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/file/MEDIA9"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3, 4]),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path(), "/media/", Duration::from_secs(5)).unwrap();
        let location = MediaLocation {
            url: format!("{}/file/MEDIA9", server.uri()),
            bearer: Some("tok".into()),
        };
        let file = store.download(&location, &image_ref()).await.unwrap();

        assert_eq!(file.mime_type, "image/png");
        assert!(file.path.ends_with(".png"));
        assert_eq!(file.size, 4);
        assert_eq!(std::fs::read(dir.path().join(&file.path)).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(store.public_url(&file), format!("/media/{}", file.path));
    }

    #[tokio::test]
    async fn http_errors_surface_as_channel_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let store = FsMediaStore::new(dir.path(), "/media", Duration::from_secs(5)).unwrap();
        let location = MediaLocation {
            url: format!("{}/gone", server.uri()),
            bearer: None,
        };
        let err = store.download(&location, &image_ref()).await.unwrap_err();
        assert!(matches!(err, ZapdeskError::Channel { .. }));
    }

    #[test]
    fn extensions_ignore_parameters() {
        assert_eq!(extension_for("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }
}
