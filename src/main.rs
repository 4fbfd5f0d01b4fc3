use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use komiku_proxy::cli::{Cli, Command, UpstreamArgs};
use komiku_proxy::config::ProxyConfig;
use komiku_proxy::proxy::ProxyService;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    komiku_proxy::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Serve(args) => {
            let config = load_config(&cli.upstream)?;
            komiku_proxy::server::run(config, args)
                .await
                .context("serve")?;
        }
        Command::Catalog => {
            let service = build_service(&cli.upstream)?;
            let listing = service.list_catalog().await.context("catalog")?;
            komiku_proxy::formats::print_json(&listing)?;
        }
        Command::Item(args) => {
            let service = build_service(&cli.upstream)?;
            let detail = service
                .get_item_detail(&args.entity_id)
                .await
                .with_context(|| format!("item {}", args.entity_id))?;
            komiku_proxy::formats::print_json(&detail)?;
        }
        Command::Images(args) => {
            let service = build_service(&cli.upstream)?;
            let images = service
                .get_item_images(&args.entity_id, &args.chapter_ref)
                .await
                .with_context(|| format!("images {} {}", args.entity_id, args.chapter_ref))?;
            komiku_proxy::formats::print_json(&images)?;
        }
        Command::Extract(args) => {
            komiku_proxy::extract::run(args).context("extract")?;
        }
    }

    Ok(())
}

fn load_config(upstream: &UpstreamArgs) -> anyhow::Result<ProxyConfig> {
    let mut config = ProxyConfig::from_env().context("load config")?;
    config
        .apply_overrides(upstream)
        .context("apply cli overrides")?;
    config.validate().context("validate config")?;
    Ok(config)
}

fn build_service(upstream: &UpstreamArgs) -> anyhow::Result<ProxyService> {
    let config = load_config(upstream)?;
    ProxyService::from_config(&config).context("build proxy service")
}
