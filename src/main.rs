// minicoin - educational peer-to-peer cryptocurrency node

use clap::Parser;
use minicoin::{Cli, CliHandler};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let handler = CliHandler::new(cli.data_dir.clone());

    if let Err(e) = handler.handle(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
