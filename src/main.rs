use clap::Parser;
use tracing_subscriber::EnvFilter;

mod ai;
mod app;
mod cli;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod scheduler;
mod services;
mod settings;
#[cfg(test)]
mod test_support;

use app::App;
use cli::Cli;
use config::Config;
use error::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // Info by default; RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    if config.api_key().is_none() {
        tracing::warn!("No Gemini API key configured; posts will be stored but not classified");
    }

    let mut app = App::new(&config).await?;
    let result = app.run(cli.command).await;
    app.shutdown().await?;

    let output = result?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
