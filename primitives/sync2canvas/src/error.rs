//! Top-level error for one run.

use thiserror::Error;

use crate::config::ConfigError;
use crate::convert::ConversionError;
use crate::sink::PublishError;
use crate::source::FetchError;
use crate::writer::WriteError;

/// The step that failed, wrapping that step's error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error")]
    Config(#[from] ConfigError),

    #[error("failed to fetch page")]
    Fetch(#[from] FetchError),

    #[error("failed to convert page")]
    Conversion(#[from] ConversionError),

    #[error("failed to publish canvas")]
    Publish(#[from] PublishError),

    #[error("failed to write output")]
    Write(#[from] WriteError),
}
