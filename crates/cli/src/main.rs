use std::path::PathBuf;

use house_disclosure_lake::option::{Command, Opt};

#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    try_main().await.inspect_err(|error| {
        tracing::error!(%error);
        let mut current = error.source();
        let mut depth = 0;
        while let Some(source) = current {
            tracing::info!(%source, depth, "error caused by");
            current = source.source();
            depth += 1;
        }
    })
}

async fn try_main() -> anyhow::Result<()> {
    let (opt, config_read_from) = Opt::try_build()?;

    std::panic::set_hook(Box::new(house_disclosure_lake::on_panic));
    house_disclosure_lake::setup_logging(&opt)?;

    print_launch_resume(&opt, config_read_from);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight work");
        let _ = shutdown_tx.send(true);
    });

    let ctx = house_disclosure_lake::build_pipeline_context(&opt)?;

    match opt.command.clone() {
        Command::Run { years } => {
            house_disclosure_lake::run(ctx, &opt, years, shutdown_rx).await;
        }
        Command::Ingest { year, force_refresh } => {
            house_disclosure_lake::ingest(&ctx, &opt, year, force_refresh).await?;
        }
        Command::Status { years } => {
            house_disclosure_lake::status(&ctx, &opt, years).await?;
        }
    }

    Ok(())
}

fn print_launch_resume(opt: &Opt, config_read_from: Option<PathBuf>) {
    let build_info = build_info::BuildInfo::from_build();

    tracing::info!(
        config_file = %config_read_from.map(|p| p.display().to_string()).unwrap_or_else(|| "none".to_string()),
        source = %opt.source_name,
        archive_base_url = %opt.archive_base_url,
        bronze_path = %opt.bronze_path.display(),
        silver_path = %opt.silver_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        commit_sha = build_info.commit_sha1.unwrap_or("unknown"),
        branch = build_info.branch.unwrap_or("unknown"),
        "house-disclosure-lake starting"
    );
}
