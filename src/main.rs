// Module declarations
mod aip;
mod bag;
mod cli;
mod config;
mod creator;
mod deposit;
mod downloader;
mod entity;
mod fetcher;
mod graph;
mod logging;
mod ordering;
mod queue;
mod store;
mod worker;

// Re-export module items at the crate root so cross-module references
// share a single namespace.
#[allow(unused_imports)]
pub(crate) use aip::*;
#[allow(unused_imports)]
pub(crate) use bag::*;
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use config::*;
#[allow(unused_imports)]
pub(crate) use creator::*;
#[allow(unused_imports)]
pub(crate) use deposit::*;
#[allow(unused_imports)]
pub(crate) use downloader::*;
#[allow(unused_imports)]
pub(crate) use entity::*;
#[allow(unused_imports)]
pub(crate) use fetcher::*;
#[allow(unused_imports)]
pub(crate) use graph::*;
#[allow(unused_imports)]
pub(crate) use logging::*;
#[allow(unused_imports)]
pub(crate) use ordering::*;
#[allow(unused_imports)]
pub(crate) use queue::*;
#[allow(unused_imports)]
pub(crate) use store::*;
#[allow(unused_imports)]
pub(crate) use worker::*;

use clap::Parser;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let config = cli.load_config()?;

    match cli.command {
        Command::Run => {
            install_signal_handlers();
            let ctx = RunContext::new();
            worker::run(&config, &ctx)?;
            Ok(())
        }

        Command::Preserve { uuid, entity_type } => {
            let entity = Entity::new(&uuid, &entity_type);
            worker::preserve_single(&config, &entity)?;
            println!("{uuid} preserved");
            Ok(())
        }
    }
}
