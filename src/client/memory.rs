//! In-memory canvas
//!
//! Behaves like a backend closely enough to drive the scheduler without a
//! network: chunks are plain images, charges replenish with (tokio) time and
//! faults such as rate limiting or failing fetches can be injected.

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use super::{CanvasClient, ClientError, PlacementRequest, PlacementStatus, UserState};
use crate::charges::Charges;
use crate::coords::ChunkCoord;
use crate::palette::palette_color;

#[derive(Debug)]
struct CanvasState {
    chunks: HashMap<ChunkCoord, RgbaImage>,
    charges: Charges,
    charges_at: Instant,
    extra_colors_bitmap: Option<u64>,
    rate_limit_next: usize,
    failing_fetches: HashSet<ChunkCoord>,
    user_state_available: bool,
    surface_ready: bool,
    placements: Vec<(ChunkCoord, PlacementRequest)>,
    rate_limited: usize,
}

impl CanvasState {
    fn settle_charges(&mut self) {
        let now = Instant::now();
        self.charges.replenish(now - self.charges_at);
        self.charges_at = now;
    }
}

/// A canvas held entirely in memory.
#[derive(Debug)]
pub struct MemoryCanvas {
    tile_size: u32,
    state: Mutex<CanvasState>,
}

impl MemoryCanvas {
    pub fn new(tile_size: u32, charges: Charges) -> Self {
        Self {
            tile_size,
            state: Mutex::new(CanvasState {
                chunks: HashMap::new(),
                charges,
                charges_at: Instant::now(),
                extra_colors_bitmap: Some(0),
                rate_limit_next: 0,
                failing_fetches: HashSet::new(),
                user_state_available: true,
                surface_ready: true,
                placements: Vec::new(),
                rate_limited: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CanvasState> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Set the owned-color bitmap reported by `query_user_state`; `None`
    /// withholds entitlement data.
    pub fn set_extra_colors(&self, bitmap: Option<u64>) {
        self.lock().extra_colors_bitmap = bitmap;
    }

    /// Answer the next `n` placements with a rate-limit status.
    pub fn rate_limit_next(&self, n: usize) {
        self.lock().rate_limit_next = n;
    }

    /// Make fetches of `chunk` fail until cleared.
    pub fn fail_fetches(&self, chunk: ChunkCoord, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_fetches.insert(chunk);
        } else {
            state.failing_fetches.remove(&chunk);
        }
    }

    pub fn set_user_state_available(&self, available: bool) {
        self.lock().user_state_available = available;
    }

    pub fn set_surface_ready(&self, ready: bool) {
        self.lock().surface_ready = ready;
    }

    /// Overwrite the charge pool.
    pub fn set_charges(&self, charges: Charges) {
        let mut state = self.lock();
        state.charges = charges;
        state.charges_at = Instant::now();
    }

    pub fn charges(&self) -> Charges {
        let mut state = self.lock();
        state.settle_charges();
        state.charges
    }

    /// Paint a pixel directly, bypassing charges (other canvas users).
    pub fn paint(&self, chunk: ChunkCoord, x: u32, y: u32, color: Rgba<u8>) {
        let size = self.tile_size;
        let mut state = self.lock();
        let image = state.chunks.entry(chunk).or_insert_with(|| RgbaImage::new(size, size));
        image.put_pixel(x, y, color);
    }

    /// Replace a chunk's raster, e.g. with one of the wrong size.
    pub fn put_chunk(&self, chunk: ChunkCoord, image: RgbaImage) {
        self.lock().chunks.insert(chunk, image);
    }

    pub fn pixel(&self, chunk: ChunkCoord, x: u32, y: u32) -> Rgba<u8> {
        self.lock()
            .chunks
            .get(&chunk)
            .and_then(|image| image.get_pixel_checked(x, y).copied())
            .unwrap_or(Rgba([0, 0, 0, 0]))
    }

    /// Accepted placement requests, in order.
    pub fn placements(&self) -> Vec<(ChunkCoord, PlacementRequest)> {
        self.lock().placements.clone()
    }

    /// Total pixels accepted so far.
    pub fn placed_pixels(&self) -> usize {
        self.lock().placements.iter().map(|(_, r)| r.len()).sum()
    }

    /// Number of requests answered with a rate-limit status.
    pub fn rate_limited_count(&self) -> usize {
        self.lock().rate_limited
    }
}

#[async_trait]
impl CanvasClient for MemoryCanvas {
    async fn fetch_chunk(&self, chunk: ChunkCoord) -> Result<Option<RgbaImage>, ClientError> {
        let state = self.lock();
        if state.failing_fetches.contains(&chunk) {
            return Err(ClientError::Transport(format!("chunk {} unavailable", chunk)));
        }
        Ok(state.chunks.get(&chunk).cloned())
    }

    async fn submit_placement(
        &self,
        chunk: ChunkCoord,
        request: &PlacementRequest,
    ) -> Result<PlacementStatus, ClientError> {
        let size = self.tile_size;
        let mut state = self.lock();
        if state.rate_limit_next > 0 {
            state.rate_limit_next -= 1;
            state.rate_limited += 1;
            return Ok(PlacementStatus::RateLimited);
        }

        state.settle_charges();
        if (state.charges.whole() as usize) < request.len() {
            return Ok(PlacementStatus::Rejected {
                status: 403,
                message: "not enough charges".to_string(),
            });
        }

        for (x, y, color_id) in request.pixels() {
            if x >= size || y >= size {
                return Ok(PlacementStatus::Rejected {
                    status: 400,
                    message: format!("pixel ({}, {}) outside chunk", x, y),
                });
            }
            if palette_color(color_id).and_then(|c| c.rgb).is_none() {
                return Ok(PlacementStatus::Rejected {
                    status: 400,
                    message: format!("color {} cannot be placed", color_id),
                });
            }
        }

        let image = state.chunks.entry(chunk).or_insert_with(|| RgbaImage::new(size, size));
        for (x, y, color_id) in request.pixels() {
            if let Some([r, g, b]) = palette_color(color_id).and_then(|c| c.rgb) {
                image.put_pixel(x, y, Rgba([r, g, b, 255]));
            }
        }
        state.charges.consume(request.len());
        state.placements.push((chunk, request.clone()));
        Ok(PlacementStatus::Placed { painted: request.len() })
    }

    async fn query_user_state(&self) -> Result<UserState, ClientError> {
        let mut state = self.lock();
        if !state.user_state_available {
            return Err(ClientError::Status { status: 503, body: "user state unavailable".into() });
        }
        state.settle_charges();
        Ok(UserState { charges: state.charges, extra_colors_bitmap: state.extra_colors_bitmap })
    }

    async fn open_placement_surface(&self) -> Result<(), ClientError> {
        if self.lock().surface_ready {
            Ok(())
        } else {
            Err(ClientError::NotReady("placement surface disabled".to_string()))
        }
    }
}
