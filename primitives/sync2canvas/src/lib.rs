//! sync2canvas - Confluence Page to Slack Canvas
//!
//! Fetches one Confluence page, converts its storage-format markup to Slack
//! canvas Markdown, publishes it as a new canvas in a channel and writes two
//! local artifacts (`{title}.md` and `{title}_payload.json`).
//!
//! The run is a straight pipeline:
//!
//! ```text
//! Config → PageSource::fetch → CanvasSink::host_file (per attachment)
//!        → Converter::render_hosted → CanvasSink::publish → ArtifactWriter::write
//! ```
//!
//! - [`config`]: CLI arguments, credentials and the [`Config`] struct
//! - [`source`]: the [`PageSource`] port and its Confluence adapter
//! - [`convert`](mod@convert): HTML/storage-format to Markdown conversion
//! - [`sink`]: the [`CanvasSink`] port and its Slack adapter
//! - [`writer`]: output files
//! - [`pipeline`]: composes the steps above

pub mod config;
pub mod convert;
pub mod document;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod source;
pub mod writer;

pub use config::{Args, Config};
pub use convert::{ConversionResult, Converter, convert};
pub use document::Document;
pub use error::Error;
pub use pipeline::{Pipeline, Report};
pub use sink::{Canvas, CanvasReceipt, CanvasSink, HostedFile, SlackCanvasSink};
pub use source::{ConfluenceSource, PageSource};
pub use writer::{ArtifactWriter, Artifacts};
