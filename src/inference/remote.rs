//! # Remote Detection Backend
//!
//! HTTP client for the hosted wound-detection service. Frames are JPEG
//! encoded and POSTed as multipart uploads; the response is a JSON
//! prediction list. One `reqwest::Client` is shared across all sessions so
//! connections are reused; every request carries a hard timeout and any
//! failure (network, timeout, non-2xx, unparseable body) is reported to the
//! router, which decides on fallback.

use crate::inference::RawPrediction;
use crate::media::DecodedImage;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// JPEG quality for frames uploaded to the remote backend.
const UPLOAD_JPEG_QUALITY: u8 = 85;

/// Remote backend settings. A backend is considered configured only when
/// both the URL and the API key are non-empty.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub model_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.model_url.is_empty() && !self.api_key.is_empty()
    }
}

/// Failure of a single remote inference request.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("failed to encode frame as JPEG: {0}")]
    Encode(String),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned HTTP {0}")]
    HttpStatus(u16),
}

/// Response envelope returned by the detection service.
#[derive(Debug, Deserialize)]
pub struct RemoteResponse {
    #[serde(default)]
    pub predictions: Vec<RawPrediction>,
}

/// Client for the remote detection service.
pub struct RemoteDetector {
    client: reqwest::Client,
    config: RemoteConfig,
    confidence_threshold: f32,
}

impl RemoteDetector {
    /// ## Parameters:
    /// - **client**: process-shared HTTP client (connection reuse)
    /// - **config**: backend URL, credential and request timeout
    /// - **confidence_threshold**: forwarded to the service as a percentage
    pub fn new(client: reqwest::Client, config: RemoteConfig, confidence_threshold: f32) -> Self {
        Self {
            client,
            config,
            confidence_threshold,
        }
    }

    /// Run one detection request for `image`.
    pub async fn detect(&self, image: &DecodedImage) -> Result<Vec<RawPrediction>, RemoteError> {
        let jpeg = encode_jpeg(image)?;

        let form = Form::new().part(
            "file",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")
                .map_err(|e| RemoteError::Encode(e.to_string()))?,
        );

        let confidence_pct = (self.confidence_threshold * 100.0).round() as u32;
        let response = self
            .client
            .post(&self.config.model_url)
            .query(&[
                ("api_key", self.config.api_key.as_str()),
                ("confidence", &confidence_pct.to_string()),
            ])
            .multipart(form)
            .timeout(self.config.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RemoteError::HttpStatus(response.status().as_u16()));
        }

        let body: RemoteResponse = response.json().await?;
        Ok(body.predictions)
    }
}

/// Encode RGB8 pixels as JPEG bytes.
fn encode_jpeg(image: &DecodedImage) -> Result<Vec<u8>, RemoteError> {
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, UPLOAD_JPEG_QUALITY)
        .encode(
            &image.pixels,
            image.width,
            image.height,
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| RemoteError::Encode(e.to_string()))?;
    Ok(bytes)
}
