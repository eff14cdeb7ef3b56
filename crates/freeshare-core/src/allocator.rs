// SPDX-License-Identifier: AGPL-3.0
// FreeShare Core - Share code allocation
//
// Draws random 5-digit codes until one is not in use. The check and the later
// record write are separate steps, so two concurrent uploads can still land
// on the same code.

use crate::directory::FileDirectory;
use crate::types::{AppError, ShareCode};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Hands out share codes that are free at check time
pub struct CodeAllocator {
    rng: Mutex<StdRng>,
    max_attempts: Option<u32>,
}

impl CodeAllocator {
    /// Allocator seeded from OS entropy, retrying until a free code is found
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Allocator drawing from a caller-supplied generator
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            max_attempts: None,
        }
    }

    /// Give up with [`AppError::AllocationExhausted`] after `max_attempts` draws
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn draw(&self) -> ShareCode {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ShareCode::new(rng.gen_range(ShareCode::MIN..=ShareCode::MAX))
    }

    /// Draw codes until `directory` reports one as unused
    pub async fn allocate(&self, directory: &FileDirectory) -> Result<ShareCode, AppError> {
        let mut attempts: u32 = 0;
        loop {
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    tracing::warn!("Giving up on code allocation after {} attempts", attempts);
                    return Err(AppError::AllocationExhausted(attempts));
                }
            }
            attempts += 1;

            let candidate = self.draw();
            if !directory.exists_by_code(candidate).await {
                tracing::debug!("Allocated code {} after {} attempt(s)", candidate, attempts);
                return Ok(candidate);
            }
            tracing::debug!("Code {} already in use, drawing again", candidate);
        }
    }
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self::new()
    }
}
