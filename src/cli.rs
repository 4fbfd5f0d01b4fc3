use clap::{Args, Parser, Subcommand};

use crate::extract::ExtractionProfile;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Overrides for the upstream settings read from `KOMIKU_PROXY_*`.
#[derive(Debug, Default, Args)]
pub struct UpstreamArgs {
    /// Origin site root (http/https).
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Timeout for one upstream fetch, redirects included.
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Maximum redirects followed per fetch.
    #[arg(long, global = true)]
    pub max_redirects: Option<usize>,

    /// Maximum resource mappings kept in memory (0 = unbounded).
    #[arg(long, global = true)]
    pub store_capacity: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP API.
    Serve(ServeArgs),
    /// Print the catalog listing as JSON.
    Catalog,
    /// Print one item's detail as JSON.
    Item(ItemArgs),
    /// Print one chapter's page images as JSON.
    Images(ImagesArgs),
    /// Run an extraction profile over a saved page.
    Extract(ExtractArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Directory of static assets served under `/`.
    #[arg(long)]
    pub static_dir: Option<String>,
}

#[derive(Debug, Args)]
pub struct ItemArgs {
    /// Item slug, as in `/manga/<entity-id>/`.
    pub entity_id: String,
}

#[derive(Debug, Args)]
pub struct ImagesArgs {
    pub entity_id: String,

    /// Chapter path or same-site chapter URL.
    pub chapter_ref: String,
}

#[derive(Debug, Args)]
pub struct ExtractArgs {
    /// Extraction profile to run.
    #[arg(long, value_enum)]
    pub profile: ExtractionProfile,

    /// Saved HTML file.
    #[arg(long)]
    pub input: String,

    /// URL the page was fetched from; relative links resolve against it.
    #[arg(long, default_value = "https://komiku.id/")]
    pub page_url: String,
}
