//! docmap CLI: crawl a documentation site and map it into modules.
//!
//! Crawls from one or more seed URLs, segments every page, infers topics
//! with an LLM and prints the consolidated module/submodule list as JSON.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
