use clap::Parser;
use picatalog::Opts;
use picatalog::cli::SubCommandExtend;
use picatalog::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Info(config) => config.run(&opts).await,
        SubCommand::Import(config) => config.run(&opts).await,
        SubCommand::Query(config) => config.run(&opts).await,
        SubCommand::Thumbnail(config) => config.run(&opts).await,
        SubCommand::Person(config) => config.run(&opts).await,
        SubCommand::Repair(config) => config.run(&opts).await,
        SubCommand::Reset(config) => config.run(&opts).await,
        SubCommand::Selftest(config) => config.run(&opts).await,
    }
}
