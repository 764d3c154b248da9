//! Top-level error type for the bar

use thiserror::Error;

use crate::config::ConfigError;
use crate::font::FontError;
use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum BarError {
    #[error("font setup failed")]
    Font(#[from] FontError),

    #[error("window system error")]
    Platform(#[from] PlatformError),

    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    #[error("failed to write click action")]
    ClickOutput(#[source] std::io::Error),

    #[error("failed to start runtime")]
    Runtime(#[source] std::io::Error),
}
