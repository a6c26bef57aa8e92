//! Command-line arguments and run configuration.
//!
//! Flags come from [`Args`] (clap). Credentials come from the environment
//! through a lookup function so the caller decides where they are read from.
//! Both are folded into one [`Config`] before any network call is made.

use std::path::PathBuf;

use clap::Parser;
use reqwest::Url;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Default Confluence instance.
pub const DEFAULT_CONFLUENCE_URL: &str = "https://sync.hudlnet.com";

/// Default Slack Web API base.
pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Default Jira instance used for `jira` macro links.
pub const DEFAULT_JIRA_URL: &str = "https://hudl-jira.atlassian.net";

/// Environment variable holding the load balancer session cookie.
pub const AWSELB_COOKIE_VAR: &str = "AWSELB_COOKIE";

/// Environment variable holding the Confluence session cookie.
pub const JSESSIONID_VAR: &str = "JSESSIONID";

/// Environment variable holding the Slack bot token.
pub const SLACK_BOT_TOKEN_VAR: &str = "SLACK_BOT_TOKEN";

/// Publishes a Confluence page as a Slack canvas.
#[derive(Parser, Debug, Clone)]
#[command(name = "sync2canvas", version)]
#[command(about = "Converts a Confluence page to Markdown and publishes it as a Slack canvas")]
#[command(
    after_help = "Environment:\n  AWSELB_COOKIE    Confluence load balancer session cookie\n  JSESSIONID       Confluence session cookie\n  SLACK_BOT_TOKEN  Slack bot token"
)]
pub struct Args {
    /// ID of the Confluence page to fetch.
    #[arg(short, long)]
    pub page_id: String,

    /// Slack channel the canvas is created in.
    #[arg(short, long)]
    pub channel_id: String,

    /// Base URL of the Confluence instance.
    #[arg(short = 'u', long, default_value = DEFAULT_CONFLUENCE_URL)]
    pub base_confluence_url: String,

    /// Directory the Markdown and payload files are written to.
    #[arg(short, long, env = "SYNC2CANVAS_OUTPUT_DIR", default_value = "output")]
    pub output_dir: PathBuf,

    /// Base URL of the Slack Web API.
    #[arg(long, env = "SYNC2CANVAS_SLACK_API_URL", default_value = DEFAULT_SLACK_API_URL)]
    pub slack_api_url: String,

    /// Jira instance that `jira` macros link to.
    #[arg(long, env = "SYNC2CANVAS_JIRA_URL", default_value = DEFAULT_JIRA_URL)]
    pub jira_url: String,

    /// Prefix the published Markdown with the page author.
    #[arg(long)]
    pub attribute_author: bool,

    /// Start the Markdown file with the page title as a heading.
    #[arg(long)]
    pub title_heading: bool,
}

/// Errors raised while building a [`Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid {flag} '{value}': {reason}")]
    InvalidUrl {
        flag: &'static str,
        value: String,
        reason: String,
    },

    #[error("{flag} must be an http(s) URL, got '{value}'")]
    UnsupportedScheme { flag: &'static str, value: String },
}

/// Session cookies presented to Confluence.
#[derive(Debug)]
pub struct SessionCookies {
    pub aws_elb: SecretString,
    pub jsessionid: SecretString,
}

impl SessionCookies {
    /// Renders the `Cookie` header value.
    pub fn header_value(&self) -> String {
        format!(
            "AWSELBAuthSessionCookie-0={}; seraph.confluence={}",
            self.aws_elb.expose_secret(),
            self.jsessionid.expose_secret()
        )
    }
}

/// Confluence connection settings.
#[derive(Debug)]
pub struct ConfluenceConfig {
    pub base_url: Url,
    pub cookies: SessionCookies,
}

/// Slack connection settings.
#[derive(Debug)]
pub struct SlackConfig {
    pub api_url: Url,
    pub bot_token: SecretString,
}

/// Everything one run needs, resolved up front.
#[derive(Debug)]
pub struct Config {
    pub page_id: String,
    pub channel_id: String,
    pub confluence: ConfluenceConfig,
    pub slack: SlackConfig,
    pub jira_url: Url,
    pub output_dir: PathBuf,
    pub attribute_author: bool,
    pub title_heading: bool,
}

impl Config {
    /// Builds the configuration from parsed arguments and an environment lookup.
    ///
    /// Credentials are checked in the order `AWSELB_COOKIE`, `JSESSIONID`,
    /// `SLACK_BOT_TOKEN`. An empty value counts as missing.
    pub fn from_args<F>(args: Args, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let aws_elb = required_env(&env, AWSELB_COOKIE_VAR)?;
        let jsessionid = required_env(&env, JSESSIONID_VAR)?;
        let bot_token = required_env(&env, SLACK_BOT_TOKEN_VAR)?;

        Ok(Self {
            page_id: args.page_id,
            channel_id: args.channel_id,
            confluence: ConfluenceConfig {
                base_url: parse_url("--base-confluence-url", &args.base_confluence_url)?,
                cookies: SessionCookies {
                    aws_elb,
                    jsessionid,
                },
            },
            slack: SlackConfig {
                api_url: parse_url("--slack-api-url", &args.slack_api_url)?,
                bot_token,
            },
            jira_url: parse_url("--jira-url", &args.jira_url)?,
            output_dir: args.output_dir,
            attribute_author: args.attribute_author,
            title_heading: args.title_heading,
        })
    }

    /// Reads credentials from the process environment.
    pub fn from_env(args: Args) -> Result<Self, ConfigError> {
        Self::from_args(args, |key| std::env::var(key).ok())
    }
}

fn required_env<F>(env: &F, key: &'static str) -> Result<SecretString, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .filter(|value| !value.trim().is_empty())
        .map(SecretString::new)
        .ok_or(ConfigError::MissingEnv(key))
}

fn parse_url(flag: &'static str, value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value.trim()).map_err(|err| ConfigError::InvalidUrl {
        flag,
        value: value.to_string(),
        reason: err.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme {
            flag,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["sync2canvas", "--page-id", "123", "--channel-id", "C1"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    fn env_with(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn full_env() -> impl Fn(&str) -> Option<String> {
        env_with(&[
            ("AWSELB_COOKIE", "elb-secret"),
            ("JSESSIONID", "jsession-secret"),
            ("SLACK_BOT_TOKEN", "xoxb-token"),
        ])
    }

    #[test]
    fn missing_page_id_is_rejected_by_parser() {
        let err = Args::try_parse_from(["sync2canvas", "--channel-id", "C1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn missing_channel_id_is_rejected_by_parser() {
        let err = Args::try_parse_from(["sync2canvas", "-p", "123"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn short_flags_and_default_base_url() {
        let args = Args::try_parse_from(["sync2canvas", "-p", "42", "-c", "C9"]).unwrap();
        assert_eq!(args.page_id, "42");
        assert_eq!(args.channel_id, "C9");
        assert_eq!(args.base_confluence_url, DEFAULT_CONFLUENCE_URL);
        assert!(!args.attribute_author);
    }

    #[test]
    fn builds_config_from_args_and_env() {
        let config = Config::from_args(
            args(&["-u", "https://wiki.example.com", "-o", "out"]),
            full_env(),
        )
        .unwrap();

        assert_eq!(config.page_id, "123");
        assert_eq!(config.channel_id, "C1");
        assert_eq!(config.confluence.base_url.as_str(), "https://wiki.example.com/");
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.slack.bot_token.expose_secret(), "xoxb-token");
    }

    #[test]
    fn missing_slack_token_is_reported_by_name() {
        let env = env_with(&[("AWSELB_COOKIE", "elb"), ("JSESSIONID", "session")]);
        let err = Config::from_args(args(&[]), env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("SLACK_BOT_TOKEN")));
    }

    #[test]
    fn empty_cookie_counts_as_missing() {
        let env = env_with(&[
            ("AWSELB_COOKIE", "  "),
            ("JSESSIONID", "session"),
            ("SLACK_BOT_TOKEN", "xoxb-token"),
        ]);
        let err = Config::from_args(args(&[]), env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv("AWSELB_COOKIE")));
    }

    #[test]
    fn rejects_malformed_base_url() {
        let err = Config::from_args(args(&["-u", "not a url"]), full_env()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidUrl {
                flag: "--base-confluence-url",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = Config::from_args(args(&["--slack-api-url", "ftp://slack"]), full_env())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
    }

    #[test]
    fn cookie_header_uses_confluence_cookie_names() {
        let config = Config::from_args(args(&[]), full_env()).unwrap();
        assert_eq!(
            config.confluence.cookies.header_value(),
            "AWSELBAuthSessionCookie-0=elb-secret; seraph.confluence=jsession-secret"
        );
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = Config::from_args(args(&[]), full_env()).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("xoxb-token"));
        assert!(!debug.contains("elb-secret"));
        assert!(!debug.contains("jsession-secret"));
    }
}
