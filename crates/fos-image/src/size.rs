//! Size resolution
//!
//! Requests either carry an explicit size or wait for their target's layout
//! pass to report measured bounds. The measurement is a one-shot value set
//! by the layout side; the pipeline only ever awaits it.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use smol::channel::{self, Receiver, Sender};

use crate::request::{ImageRequest, Size, SizeSpec};

/// One-shot measured bounds of a target
#[derive(Debug, Clone)]
pub struct Bounds {
    inner: Arc<BoundsInner>,
}

#[derive(Debug)]
struct BoundsInner {
    value: OnceLock<(u32, u32)>,
    notify: Sender<()>,
    closed: Receiver<()>,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new()
    }
}

impl Bounds {
    /// Unmeasured bounds
    pub fn new() -> Self {
        let (notify, closed) = channel::bounded(1);
        Self {
            inner: Arc::new(BoundsInner {
                value: OnceLock::new(),
                notify,
                closed,
            }),
        }
    }

    /// Bounds that are already measured
    pub fn measured_at(width: u32, height: u32) -> Self {
        let bounds = Self::new();
        bounds.report(width, height);
        bounds
    }

    /// Report the measured bounds; only the first report counts
    pub fn report(&self, width: u32, height: u32) -> bool {
        let first = self.inner.value.set((width, height)).is_ok();
        if first {
            self.inner.notify.close();
        }
        first
    }

    /// Measured bounds, if reported
    pub fn get(&self) -> Option<(u32, u32)> {
        self.inner.value.get().copied()
    }

    /// Wait for the measurement
    pub async fn measured(&self) -> (u32, u32) {
        if let Some(value) = self.get() {
            return value;
        }
        let _ = self.inner.closed.recv().await;
        self.get().unwrap_or((0, 0))
    }
}

/// Turns a request's size specification into a concrete size
#[derive(Debug, Clone, Copy)]
pub struct SizeResolver {
    /// Used when bounds are zero, unavailable, or not reported in time
    pub fallback: Size,
    pub timeout: Duration,
}

impl SizeResolver {
    pub fn new(fallback: Size, timeout: Duration) -> Self {
        Self { fallback, timeout }
    }

    pub async fn resolve(&self, request: &ImageRequest) -> Size {
        match request.size_spec() {
            SizeSpec::Explicit(size) => size,
            SizeSpec::FromTarget => {
                let Some(bounds) = request.target().and_then(|target| target.bounds()) else {
                    return self.fallback;
                };
                let measured = smol::future::or(
                    async { Some(bounds.measured().await) },
                    async {
                        smol::Timer::after(self.timeout).await;
                        None
                    },
                )
                .await;

                match measured {
                    Some((width, height)) => Size::try_pixels(width, height).unwrap_or(self.fallback),
                    None => {
                        tracing::debug!(timeout = ?self.timeout, "target not measured in time, using fallback size");
                        self.fallback
                    }
                }
            }
        }
    }
}

impl Default for SizeResolver {
    fn default() -> Self {
        Self::new(Size::Original, Duration::from_secs(5))
    }
}
