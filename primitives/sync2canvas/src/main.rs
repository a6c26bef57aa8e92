//! sync2canvas - Confluence Page to Slack Canvas
//!
//! # Usage
//!
//! ```bash
//! export AWSELB_COOKIE=... JSESSIONID=... SLACK_BOT_TOKEN=xoxb-...
//!
//! # Publish page 123 into channel C0123
//! sync2canvas --page-id 123 --channel-id C0123
//!
//! # Another Confluence instance, attributed, files under ./pages
//! sync2canvas -p 123 -c C0123 -u https://wiki.example.com --attribute-author -o pages
//! ```

use std::error::Error as _;
use std::process::ExitCode;

use clap::Parser;
use reqwest::Client;
use sync2canvas::{
    ArtifactWriter, Args, Config, ConfluenceSource, Converter, Error, Pipeline, SlackCanvasSink,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync2canvas=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let config = Config::from_env(args)?;

    let client = Client::new();
    let source = ConfluenceSource::new(client.clone(), &config.confluence);
    let sink = SlackCanvasSink::new(client, &config.slack);
    let converter = Converter::from_config(&config);
    let writer = ArtifactWriter::new(&config.output_dir).with_title_heading(config.title_heading);

    let report = Pipeline::new(&source, &converter, &sink, &writer)
        .run(&config.page_id, &config.channel_id)
        .await?;

    info!(
        page_id = %report.page_id,
        canvas_id = %report.canvas_id,
        markdown = %report.artifacts.markdown_path.display(),
        payload = %report.artifacts.payload_path.display(),
        "Done"
    );
    Ok(())
}
