//! One run: fetch → host attachments → convert → publish → write.
//!
//! Each step starts only after the previous one succeeded; the first error
//! aborts the run and nothing already done is undone. Attachment hosting is
//! the exception: a file that cannot be downloaded or uploaded is logged and
//! keeps its Confluence download link.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::convert::Converter;
use crate::error::Error;
use crate::sink::{Canvas, CanvasSink};
use crate::source::PageSource;
use crate::writer::{ArtifactWriter, Artifacts};

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub page_id: String,
    pub canvas_id: String,
    pub artifacts: Artifacts,
}

/// Composes a page source, a converter, a canvas sink and a writer.
pub struct Pipeline<'a, S: ?Sized, K: ?Sized> {
    source: &'a S,
    converter: &'a Converter,
    sink: &'a K,
    writer: &'a ArtifactWriter,
}

impl<'a, S, K> Pipeline<'a, S, K>
where
    S: PageSource + ?Sized,
    K: CanvasSink + ?Sized,
{
    pub fn new(
        source: &'a S,
        converter: &'a Converter,
        sink: &'a K,
        writer: &'a ArtifactWriter,
    ) -> Self {
        Self {
            source,
            converter,
            sink,
            writer,
        }
    }

    /// Publishes `page_id` into `channel_id` and writes the local artifacts.
    ///
    /// # Errors
    ///
    /// Returns the first step error, wrapped in [`Error`].
    pub async fn run(&self, page_id: &str, channel_id: &str) -> Result<Report, Error> {
        let document = self.source.fetch(page_id).await?;
        let hosted = self.host_attachments(&document.id, &document.raw_markup).await;
        let result = self.converter.render_hosted(&document, &hosted)?;

        let receipt = self
            .sink
            .publish(&Canvas {
                channel_id: channel_id.to_string(),
                title: result.title.clone(),
                markdown: result.markdown_text.clone(),
            })
            .await?;

        let artifacts = self.writer.write(&result).await?;

        info!(
            page_id,
            channel_id,
            canvas_id = %receipt.canvas_id,
            "Published page as canvas"
        );
        Ok(Report {
            page_id: document.id,
            canvas_id: receipt.canvas_id,
            artifacts,
        })
    }

    /// Re-hosts every embedded attachment, mapping file name to permalink.
    async fn host_attachments(&self, page_id: &str, raw_markup: &str) -> HashMap<String, String> {
        let mut hosted = HashMap::new();
        for filename in self.converter.attachments(raw_markup) {
            let contents = match self.source.attachment(page_id, &filename).await {
                Ok(contents) => contents,
                Err(err) => {
                    warn!(%filename, error = %err, "Attachment download failed; linking to Confluence");
                    continue;
                }
            };
            match self.sink.host_file(&filename, contents).await {
                Ok(file) => {
                    hosted.insert(filename, file.permalink);
                }
                Err(err) => {
                    warn!(%filename, error = %err, "Attachment upload failed; linking to Confluence");
                }
            }
        }
        hosted
    }
}
