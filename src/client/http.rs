//! HTTP canvas client

use async_trait::async_trait;
use image::RgbaImage;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{CanvasClient, ClientError, PlacementRequest, PlacementStatus, UserState};
use crate::coords::ChunkCoord;

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlacementResponse {
    #[serde(default)]
    painted: Option<usize>,
}

/// Canvas client backed by a REST API.
///
/// Endpoints, relative to `base_url`:
/// - `GET files/s0/tiles/{x}/{y}.png` chunk raster (404 when empty)
/// - `POST s0/pixel/{x}/{y}` placement
/// - `GET me` charges and owned colors
#[derive(Debug, Clone)]
pub struct HttpCanvasClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCanvasClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("pixelwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    pub fn chunk_url(&self, chunk: ChunkCoord) -> String {
        self.url(&format!("files/s0/tiles/{}/{}.png", chunk.x, chunk.y))
    }

    pub fn placement_url(&self, chunk: ChunkCoord) -> String {
        self.url(&format!("s0/pixel/{}/{}", chunk.x, chunk.y))
    }
}

#[async_trait]
impl CanvasClient for HttpCanvasClient {
    async fn fetch_chunk(&self, chunk: ChunkCoord) -> Result<Option<RgbaImage>, ClientError> {
        let response = self.http.get(self.chunk_url(chunk)).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                let image = image::load_from_memory(&bytes)
                    .map_err(|e| ClientError::Decode(e.to_string()))?;
                Ok(Some(image.to_rgba8()))
            }
            status => Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn submit_placement(
        &self,
        chunk: ChunkCoord,
        request: &PlacementRequest,
    ) -> Result<PlacementStatus, ClientError> {
        let response = self.http.post(self.placement_url(chunk)).json(request).send().await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(PlacementStatus::RateLimited);
        }
        if !status.is_success() {
            return Ok(PlacementStatus::Rejected {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        let body: PlacementResponse = response.json().await?;
        Ok(PlacementStatus::Placed { painted: body.painted.unwrap_or(request.len()) })
    }

    async fn query_user_state(&self) -> Result<UserState, ClientError> {
        let response = self.http.get(self.url("me")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let client = HttpCanvasClient::new("http://localhost:8080/").unwrap();
        assert_eq!(
            client.chunk_url(ChunkCoord::new(12, 34)),
            "http://localhost:8080/files/s0/tiles/12/34.png"
        );
        assert_eq!(client.placement_url(ChunkCoord::new(1, 2)), "http://localhost:8080/s0/pixel/1/2");
    }
}
