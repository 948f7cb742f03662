//! Target sink contract
//!
//! A target is whatever ultimately displays the visual: a widget, a canvas
//! slot, a test recorder.

use crate::bitmap::Image;
use crate::request::DataSource;
use crate::size::Bounds;

/// Consumer of a request's visual
pub trait Target: Send + Sync {
    /// Request accepted; show the placeholder if one is configured
    fn on_start(&self, placeholder: Option<&Image>) {
        let _ = placeholder;
    }

    /// Request delivered a visual
    fn on_success(&self, image: &Image, data_source: DataSource);

    /// Request failed; show the configured error or fallback visual, if any
    fn on_error(&self, image: Option<&Image>) {
        let _ = image;
    }

    /// Measurement cell for "size from target" requests
    ///
    /// `None` means the target can never be measured and the loader's
    /// fallback size is used.
    fn bounds(&self) -> Option<Bounds> {
        None
    }

    /// Whether this target needs a decoded visual to render
    fn requires_decoded(&self) -> bool {
        true
    }
}
