//! Command-line interface definition.

use clap::{Parser, Subcommand, ValueEnum};
use prooflayer_node::request::detect_content_type;
use prooflayer_node::{ContentType, InboundRequest, ServiceConfig};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use color_eyre::eyre::{bail, eyre, WrapErr};
use std::path::PathBuf;

/// Score content for AI generation through pluggable analysis backends.
#[derive(Parser, Debug)]
#[command(name = "prooflayer-node")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level.
    #[arg(long, default_value = "info", env = "RUST_LOG", global = true)]
    pub log_level: String,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text", env = "PROOFLAYER_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Path to configuration file.
    #[arg(long, short, env = "PROOFLAYER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Verify one piece of content as the configured local caller.
    Verify(VerifyArgs),

    /// Probe the local caller's stored credential for a backend.
    TestCredential {
        /// Backend whose credential to probe.
        #[arg(long)]
        backend: String,
    },

    /// Write a default configuration file.
    InitConfig {
        /// Destination; defaults to `prooflayer.toml`.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Arguments of `verify`.
#[derive(clap::Args, Debug)]
pub struct VerifyArgs {
    /// Media or text file to verify.
    #[arg(long, conflicts_with = "text", required_unless_present = "text")]
    pub file: Option<PathBuf>,

    /// Inline text to verify.
    #[arg(long)]
    pub text: Option<String>,

    /// `image`, `audio`, `video` or `text`; detected from the MIME type when omitted.
    #[arg(long)]
    pub content_type: Option<String>,

    /// MIME type of the file.
    #[arg(long)]
    pub mime: Option<String>,

    /// Preferred backend (`openai`, `anthropic`, `gemini`).
    #[arg(long, env = "PROOFLAYER_BACKEND")]
    pub backend: Option<String>,
}

impl Cli {
    /// Load the configuration file, or defaults when none is given.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn load_config(&self) -> color_eyre::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .wrap_err_with(|| format!("loading {}", path.display()))?,
            None => ServiceConfig::default(),
        };
        config.log_level.clone_from(&self.log_level);
        Ok(config)
    }
}

impl VerifyArgs {
    /// Build the inbound request body for these arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the content type cannot
    /// be determined.
    pub fn to_inbound(&self) -> color_eyre::Result<InboundRequest> {
        if let Some(text) = &self.text {
            return Ok(InboundRequest {
                content_type: ContentType::Text.to_string(),
                content: text.clone(),
                mime_type: self.mime.clone(),
                provider: self.backend.clone(),
                file_name: None,
                file_size: None,
            });
        }

        let path = self.file.as_ref().ok_or_else(|| eyre!("--file or --text is required"))?;
        let bytes = std::fs::read(path).wrap_err_with(|| format!("reading {}", path.display()))?;

        let content_type = match (&self.content_type, &self.mime) {
            (Some(ct), _) => ct.clone(),
            (None, Some(mime)) => match detect_content_type(mime) {
                Some(ct) => ct.to_string(),
                None => bail!("cannot infer content type from {mime}, pass --content-type"),
            },
            (None, None) => bail!("pass --content-type or --mime for file input"),
        };

        let content = if content_type == ContentType::Text.as_str() {
            String::from_utf8(bytes.clone()).wrap_err("text file is not UTF-8")?
        } else {
            STANDARD.encode(&bytes)
        };

        Ok(InboundRequest {
            content_type,
            content,
            mime_type: self.mime.clone(),
            provider: self.backend.clone(),
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            file_size: u64::try_from(bytes.len()).ok(),
        })
    }
}
