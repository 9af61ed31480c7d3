use clap::Parser;
use riskdesk::cli::{run, Cli};
use riskdesk::logging::init_logging;

fn main() -> std::process::ExitCode {
    init_logging();
    run(Cli::parse())
}
