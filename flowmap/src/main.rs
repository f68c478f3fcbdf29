use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use flowmap::handlers::{
    handle_graph, handle_hosts, handle_init, handle_listen, handle_refresh, handle_replay,
    handle_send, print_banner,
};
use tracing_subscriber::EnvFilter;

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();

    if let Err(e) = run(&chosen_command).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(chosen_command: &ArgMatches) -> Result<()> {
    let quiet = chosen_command.get_flag("quiet");
    let log_level = chosen_command
        .get_one::<String>("log-level")
        .map_or("info", String::as_str);
    init_logging(log_level)?;

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    match chosen_command.subcommand() {
        // No subcommand provided, just show the banner
        None => Ok(()),
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("listen", primary_command)) => handle_listen(primary_command, quiet).await,
        Some(("graph", primary_command)) => handle_graph(primary_command),
        Some(("hosts", primary_command)) => handle_hosts(primary_command),
        Some(("refresh", primary_command)) => handle_refresh(primary_command),
        Some(("replay", primary_command)) => handle_replay(primary_command).await,
        Some(("send", primary_command)) => handle_send(primary_command).await,
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

/// RUST_LOG wins over `--log-level`.
fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("invalid log level: {}", level))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
