use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, TimeDelta, Utc};
use clap::ArgMatches;
use colored::Colorize;
use flowmap_collector::FlowRecord;
use flowmap_collector::exporter::{DEFAULT_TEMPLATE_ID, encode_flows, ipv4_template, ipv6_template};
use flowmap_collector::record::{IPPROTO_TCP, IPPROTO_UDP};
use flowmap_collector::replay::{self, ReplayOptions};
use flowmap_core::config::Config;
use flowmap_core::data::Database;
use flowmap_core::import::ImportPoolOptions;
use flowmap_core::ingest::{ListenOptions, RefreshOptions, execute_listen, generate_graph};
use flowmap_core::model::Host;
use flowmap_core::refresh::{DnsRefresher, SystemResolver};
use flowmap_core::report::{ReportFormat, generate_report, save_report};
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CONFIG_FILE: &str = "flowmap.json";
const DATABASE_FILE: &str = "flowmap.db";

pub fn print_banner() {
    let banner = r#"
   ___ _
  / __\ | _____      ___ __ ___   __ _ _ __
 / _\ | |/ _ \ \ /\ / / '_ ` _ \ / _` | '_ \
/ /   | | (_) \ V  V /| | | | | | (_| | |_) |
\/    |_|\___/ \_/\_/ |_| |_| |_|\__,_| .__/
                                      |_|    "#;
    println!("{}", banner.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "NetFlow host traffic mapper".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

// Helper functions shared by the handlers

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Load the config file if one was given, otherwise the built-in defaults.
pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            let path = expand_path(&path.to_string_lossy());
            Config::load(&path).with_context(|| format!("loading config from {}", path.display()))
        }
        None => Ok(Config::default()),
    }
}

/// `--db` wins over the config file.
pub fn resolve_database_path(db_flag: Option<&str>, config: &Config) -> PathBuf {
    expand_path(db_flag.unwrap_or(&config.database))
}

/// Open an existing database. Creating one is `init`'s job.
pub fn open_database(path: &Path) -> Result<Database> {
    if !Database::exists(path) {
        bail!(
            "no database at {} (run `flowmap init` first)",
            path.display()
        );
    }
    Database::new(path).with_context(|| format!("opening database {}", path.display()))
}

/// Parse a point in time relative to `now`.
///
/// Accepts `now`, RFC 3339, unix seconds, or an age like `90s`, `30m`, `2h`, `7d`
/// meaning that long before `now`.
pub fn parse_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(time) = DateTime::parse_from_rfc3339(input) {
        return Ok(time.with_timezone(&Utc));
    }

    if let Ok(secs) = input.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| anyhow!("timestamp out of range: {}", input));
    }

    let Some((split, _)) = input.char_indices().last() else {
        bail!("empty time");
    };
    let (amount, unit) = input.split_at(split);
    let amount: i64 = amount
        .parse()
        .map_err(|_| anyhow!("invalid time '{}'", input))?;
    let age = match unit {
        "s" => TimeDelta::try_seconds(amount),
        "m" => TimeDelta::try_minutes(amount),
        "h" => TimeDelta::try_hours(amount),
        "d" => TimeDelta::try_days(amount),
        _ => None,
    }
    .ok_or_else(|| anyhow!("invalid time '{}'", input))?;

    now.checked_sub_signed(age)
        .ok_or_else(|| anyhow!("time out of range: {}", input))
}

pub fn parse_protocol(input: &str) -> Result<u8> {
    match input.to_lowercase().as_str() {
        "tcp" => Ok(IPPROTO_TCP),
        "udp" => Ok(IPPROTO_UDP),
        other => other
            .parse()
            .map_err(|_| anyhow!("unknown protocol '{}'", input)),
    }
}

/// A datagram carrying one flow, with a template matching the address family.
pub fn synthetic_datagram(
    source: IpAddr,
    destination: IpAddr,
    byte_count: u64,
    packet_count: u64,
    protocol: u8,
) -> Result<Vec<u8>> {
    let template = match (source, destination) {
        (IpAddr::V4(_), IpAddr::V4(_)) => ipv4_template(DEFAULT_TEMPLATE_ID),
        (IpAddr::V6(_), IpAddr::V6(_)) => ipv6_template(DEFAULT_TEMPLATE_ID),
        _ => bail!("source and destination must be the same address family"),
    };

    let record = FlowRecord {
        protocol,
        byte_count,
        packet_count,
        ..FlowRecord::new(source, destination)
    };
    Ok(encode_flows(0, &template, &[record]))
}

/// Combine the config file with command line overrides.
pub fn build_listen_options(
    config: &Config,
    database: PathBuf,
    port: Option<u16>,
    bind: Option<IpAddr>,
    workers: Option<usize>,
    no_refresh: bool,
) -> ListenOptions {
    let bind = SocketAddr::new(
        bind.unwrap_or(config.listen.bind),
        port.unwrap_or(config.listen.port),
    );

    let refresh = (config.refresh.enabled && !no_refresh).then(|| RefreshOptions {
        interval: config.refresh.interval(),
        cutoff: config.refresh.cutoff(),
    });

    ListenOptions {
        bind,
        database,
        pool: ImportPoolOptions {
            workers: workers.unwrap_or(config.import.workers),
            queue_capacity: config.import.queue_capacity,
        },
        refresh,
        show_progress: true,
    }
}

pub fn format_hosts(hosts: &[Host]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<6} {:<40} {:<40} {}\n",
        "ID", "ADDRESS", "DNS NAME", "RESOLVED"
    ));

    for host in hosts {
        let (name, resolved) = match &host.dns {
            Some(dns) => (
                dns.name.clone(),
                dns.last_resolved_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            None => ("-".to_string(), "never".to_string()),
        };
        out.push_str(&format!(
            "{:<6} {:<40} {:<40} {}\n",
            host.id,
            host.address.to_string(),
            name,
            resolved
        ));
    }

    out
}

/// Cancel the returned token on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, shutting down");
            token.cancel();
        }
    });
    cancel
}

fn config_and_database(args: &ArgMatches) -> Result<(Config, PathBuf)> {
    let config = load_config(args.get_one::<PathBuf>("config"))?;
    let db_path = resolve_database_path(args.get_one::<String>("db").map(String::as_str), &config);
    Ok((config, db_path))
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  FLOWMAP INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = expand_path(
        args.get_one::<String>("PATH")
            .map(String::as_str)
            .unwrap_or("~/.config/flowmap/"),
    );
    let force = args.get_flag("force");
    let db_path = config_dir.join(DATABASE_FILE);
    let config_path = config_dir.join(CONFIG_FILE);

    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    if Database::exists(&db_path) && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Database already exists at:");
        println!(
            "  {} {}",
            "•".yellow(),
            db_path.display().to_string().bright_white()
        );
        println!();

        let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Keeping existing database", "→".blue());
            println!();
        } else {
            Database::drop(&db_path)
                .with_context(|| format!("removing {}", db_path.display()))?;
            println!("{} Existing database removed", "✓".green().bold());
            println!();
        }
    } else if force && Database::exists(&db_path) {
        println!(
            "{} Deleting existing database (force mode)",
            "→".yellow().bold()
        );
        Database::drop(&db_path).with_context(|| format!("removing {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
        println!();
    }

    let written_config = init_config_dir(&config_dir, &db_path, &config_path, force)?;

    if !Database::exists(&db_path) {
        println!("{} Creating database...", "→".blue());
        Database::new(&db_path)
            .with_context(|| format!("creating database {}", db_path.display()))?;
        println!(
            "{} Database initialized: {}",
            "✓".green().bold(),
            db_path.display().to_string().bright_white()
        );
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    if written_config {
        println!(
            "{} Config: {}",
            "✓".green().bold(),
            config_path.display().to_string().bright_white()
        );
    }
    println!();
    Ok(())
}

/// Create the directory and write a default config pointing at `db_path`.
///
/// An existing config is only replaced with `force`. Returns whether one was written.
pub fn init_config_dir(config_dir: &Path, db_path: &Path, config_path: &Path, force: bool) -> Result<bool> {
    fs::create_dir_all(config_dir)
        .with_context(|| format!("creating {}", config_dir.display()))?;

    if config_path.exists() && !force {
        println!(
            "{} Keeping existing config {}",
            "→".blue(),
            config_path.display().to_string().bright_white()
        );
        return Ok(false);
    }

    let config = Config {
        database: db_path.display().to_string(),
        ..Config::default()
    };
    let json = serde_json::to_string_pretty(&config)?;
    fs::write(config_path, json).with_context(|| format!("writing {}", config_path.display()))?;
    println!(
        "  {} {}",
        "✓".green(),
        config_path.display().to_string().bright_white()
    );
    Ok(true)
}

pub async fn handle_listen(args: &ArgMatches, quiet: bool) -> Result<()> {
    let (config, db_path) = config_and_database(args)?;
    open_database(&db_path)?;

    let mut options = build_listen_options(
        &config,
        db_path,
        args.get_one::<u16>("port").copied(),
        args.get_one::<IpAddr>("bind").copied(),
        args.get_one::<usize>("workers").copied(),
        args.get_flag("no-refresh"),
    );
    options.show_progress = !quiet;

    println!(
        "\n{} Listening for NetFlow v9 / IPFIX on {}",
        "→".blue(),
        options.bind.to_string().bright_white()
    );
    println!("Workers: {}", options.pool.workers);
    println!(
        "Reverse DNS: {}\n",
        if options.refresh.is_some() { "enabled" } else { "disabled" }
    );

    let summary = execute_listen(options, cancel_on_ctrl_c()).await?;

    println!("\n{} Collector stopped\n", "✓".green().bold());
    println!("  Datagrams:  {}", summary.datagrams);
    println!("  Flows:      {}", summary.records);
    println!("  Rejected:   {}", summary.rejected);
    println!("  Imported:   {}", summary.imported);
    println!("  Failed:     {}", summary.failed);
    println!("  Dropped:    {}", summary.dropped);
    Ok(())
}

pub fn handle_graph(args: &ArgMatches) -> Result<()> {
    let (config, db_path) = config_and_database(args)?;
    let db = open_database(&db_path)?;

    let now = Utc::now();
    let from = parse_time(args.get_one::<String>("from").map_or("1h", String::as_str), now)?;
    let to = parse_time(args.get_one::<String>("to").map_or("now", String::as_str), now)?;
    if from >= to {
        bail!("--from must be before --to");
    }

    let format = args
        .get_one::<String>("format")
        .and_then(|f| ReportFormat::from_str(f))
        .unwrap_or(ReportFormat::Text);

    let details = generate_graph(&db, from, to, &config.layers)?;
    let report = generate_report(&details, format)?;

    match args.get_one::<PathBuf>("output") {
        Some(path) => {
            save_report(&report, path)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!(
                "{} Report saved to {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", report),
    }
    Ok(())
}

pub fn handle_hosts(args: &ArgMatches) -> Result<()> {
    let (_, db_path) = config_and_database(args)?;
    let db = open_database(&db_path)?;

    let hosts = db.list_hosts()?;
    if hosts.is_empty() {
        println!("No hosts recorded yet.");
        return Ok(());
    }

    print!("{}", format_hosts(&hosts));
    println!(
        "\n{} host(s), {} trace(s)",
        hosts.len().to_string().cyan(),
        db.count_traces()?.to_string().cyan()
    );
    Ok(())
}

pub fn handle_refresh(args: &ArgMatches) -> Result<()> {
    let (config, db_path) = config_and_database(args)?;
    let db = open_database(&db_path)?;

    let refresher = DnsRefresher::new(db, SystemResolver).with_cutoff(config.refresh.cutoff());
    let summary = refresher.refresh_once(Utc::now())?;

    println!("{} Reverse DNS refresh complete", "✓".green().bold());
    println!("  Checked:   {}", summary.checked);
    println!("  Resolved:  {}", summary.resolved);
    println!("  Failed:    {}", summary.failed);
    println!("  Renamed:   {}", summary.renamed);
    Ok(())
}

pub async fn handle_replay(args: &ArgMatches) -> Result<()> {
    let file = args
        .get_one::<PathBuf>("FILE")
        .ok_or_else(|| anyhow!("FILE is required"))?;
    let target = *args
        .get_one::<SocketAddr>("target")
        .ok_or_else(|| anyhow!("--target is required"))?;
    let interval = Duration::from_millis(*args.get_one::<u64>("interval-ms").unwrap_or(&1000));
    let rounds = match args.get_one::<usize>("rounds").copied().unwrap_or(1) {
        0 => None,
        n => Some(n),
    };

    let payloads = replay::load_payloads(file)
        .with_context(|| format!("loading payloads from {}", file.display()))?;
    println!(
        "{} Replaying {} payload(s) to {}",
        "→".blue(),
        payloads.len(),
        target.to_string().bright_white()
    );

    let options = ReplayOptions::new(target)
        .with_interval(interval)
        .with_rounds(rounds);
    let sent = replay::replay(&payloads, &options, cancel_on_ctrl_c()).await?;

    println!("{} Sent {} datagram(s)", "✓".green().bold(), sent);
    Ok(())
}

pub async fn handle_send(args: &ArgMatches) -> Result<()> {
    let source = *args
        .get_one::<IpAddr>("src")
        .ok_or_else(|| anyhow!("--src is required"))?;
    let destination = *args
        .get_one::<IpAddr>("dst")
        .ok_or_else(|| anyhow!("--dst is required"))?;
    let target = *args
        .get_one::<SocketAddr>("target")
        .ok_or_else(|| anyhow!("--target is required"))?;
    let bytes = *args.get_one::<u64>("bytes").unwrap_or(&1000);
    let packets = *args.get_one::<u64>("packets").unwrap_or(&1);
    let protocol = parse_protocol(args.get_one::<String>("protocol").map_or("udp", String::as_str))?;

    let payload = synthetic_datagram(source, destination, bytes, packets, protocol)?;
    replay::send_datagram(&payload, target).await?;

    println!(
        "{} Sent flow {} → {} ({} bytes, {} packet(s)) to {}",
        "✓".green().bold(),
        source,
        destination,
        bytes,
        packets,
        target
    );
    Ok(())
}
