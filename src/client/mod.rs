//! Remote canvas client abstraction
//!
//! The scheduler talks to the canvas only through [`CanvasClient`]. Concrete
//! clients live in submodules: an HTTP client for a real backend and an
//! in-memory canvas for dry runs and tests. [`WithAuth`] wraps any client and
//! fills in the auth token of outgoing placements.

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use async_trait::async_trait;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::BTreeSet;

use crate::charges::Charges;
use crate::coords::ChunkCoord;
use crate::palette::owned_colors;

pub use memory::MemoryCanvas;

/// Error type for canvas client operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Request could not be sent or the connection failed
    #[error("network error: {0}")]
    Transport(String),
    /// Server answered with an unexpected status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    /// Response body could not be decoded
    #[error("could not decode response: {0}")]
    Decode(String),
    /// A required control surface is absent or disabled
    #[error("not ready: {0}")]
    NotReady(String),
}

impl ClientError {
    /// Returns true if the error means a precondition was not met, as
    /// opposed to a failed network exchange.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, ClientError::NotReady(_))
    }
}

/// Body of a placement request, scoped to one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub colors: Vec<u8>,
    /// Flattened in-chunk coordinates: `[x0, y0, x1, y1, ...]`
    pub coords: Vec<u32>,
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl PlacementRequest {
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Iterate `(x, y, color_id)` triples.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32, u8)> + '_ {
        self.coords.chunks_exact(2).zip(&self.colors).map(|(xy, &c)| (xy[0], xy[1], c))
    }
}

/// Outcome of a placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementStatus {
    /// All pixels were accepted
    Placed { painted: usize },
    /// Too many requests; retry after a cooldown
    RateLimited,
    /// Any other refusal
    Rejected { status: u16, message: String },
}

/// Quota and entitlement state of the current identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserState {
    pub charges: Charges,
    /// Absent when the backend did not report entitlements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_colors_bitmap: Option<u64>,
}

impl UserState {
    /// Colors this identity may place, or `None` without entitlement data.
    pub fn owned_colors(&self) -> Option<BTreeSet<u8>> {
        self.extra_colors_bitmap.map(owned_colors)
    }
}

/// Access to the shared canvas.
#[async_trait]
pub trait CanvasClient: Send + Sync {
    /// Current raster of one chunk, or `None` if the chunk does not exist yet.
    async fn fetch_chunk(&self, chunk: ChunkCoord) -> Result<Option<RgbaImage>, ClientError>;

    /// Submit a batch of placements inside one chunk.
    async fn submit_placement(
        &self,
        chunk: ChunkCoord,
        request: &PlacementRequest,
    ) -> Result<PlacementStatus, ClientError>;

    /// Current charges and owned-color bitmap.
    async fn query_user_state(&self) -> Result<UserState, ClientError>;

    /// Make sure whatever surface placement goes through is ready to accept
    /// a submission. Clients without such a surface are always ready.
    async fn open_placement_surface(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// Decorator that injects an auth token into every placement request.
pub struct WithAuth<C> {
    inner: C,
    token: String,
}

impl<C: CanvasClient> WithAuth<C> {
    pub fn new(inner: C, token: impl Into<String>) -> Self {
        Self { inner, token: token.into() }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: CanvasClient> CanvasClient for WithAuth<C> {
    async fn fetch_chunk(&self, chunk: ChunkCoord) -> Result<Option<RgbaImage>, ClientError> {
        self.inner.fetch_chunk(chunk).await
    }

    async fn submit_placement(
        &self,
        chunk: ChunkCoord,
        request: &PlacementRequest,
    ) -> Result<PlacementStatus, ClientError> {
        if request.auth_token.is_some() {
            return self.inner.submit_placement(chunk, request).await;
        }
        let mut authed = request.clone();
        authed.auth_token = Some(self.token.clone());
        self.inner.submit_placement(chunk, &authed).await
    }

    async fn query_user_state(&self) -> Result<UserState, ClientError> {
        self.inner.query_user_state().await
    }

    async fn open_placement_surface(&self) -> Result<(), ClientError> {
        self.inner.open_placement_surface().await
    }
}
