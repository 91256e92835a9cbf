//! Decides when artwork is fetched for a rendered album list.
//!
//! Visible rows load first. Once they settle, the rest of the list is swept in
//! small low-priority batches. A separate debounced hover path warms artwork for
//! an artist's albums before the user opens them.

pub mod hover;
pub mod load_state;
pub mod scheduler;

use std::time::Duration;

use crate::config::ViewportConfig;

pub use hover::{CatalogSource, HoverPreloader, ImagePrefetcher};
pub use load_state::{LoadState, RowLoad};
pub use scheduler::{ListLoadSession, ViewportLoadScheduler};

/// Presentation adapter that receives resolved artwork for a row.
pub trait ArtworkSink: Send + Sync {
    /// `None` means the row was attempted and no artwork exists.
    fn paint(&self, index: usize, url: Option<&str>);
}

/// Direct visibility check used when the observer never reports anything.
pub trait VisibilityProbe: Send + Sync {
    fn visible_rows(&self) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportSettings {
    pub settle_delay: Duration,
    pub background_batch_size: usize,
    pub background_batch_pause: Duration,
    pub visibility_timeout: Duration,
    pub hover_debounce: Duration,
    pub hover_warm_count: usize,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self::from(&ViewportConfig::default())
    }
}

impl From<&ViewportConfig> for ViewportSettings {
    fn from(config: &ViewportConfig) -> Self {
        Self {
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            background_batch_size: config.background_batch_size.max(1),
            background_batch_pause: Duration::from_millis(config.background_batch_pause_ms),
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            hover_debounce: Duration::from_millis(config.hover_debounce_ms),
            hover_warm_count: config.hover_warm_count,
        }
    }
}
