use clap::Parser;
use cli::{list::ListOptions, render::RenderOptions, Command};
use tracing_subscriber::{prelude::*, EnvFilter};

mod cli;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser)]
enum Commands {
    Render(RenderOptions),
    List(ListOptions),
}

fn main() -> miette::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
        .with(EnvFilter::from_env("PLATEN_LOG"))
        .init();

    match args.command {
        Commands::Render(options) => options.run()?,
        Commands::List(options) => options.run()?,
    }

    Ok(())
}
