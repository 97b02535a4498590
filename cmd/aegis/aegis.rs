use aegis::cli::CLI;
use aegis::initializers::init_tracing;
use clap::Parser;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();
    init_tracing(&opts);
    command.run(&opts).await
}
