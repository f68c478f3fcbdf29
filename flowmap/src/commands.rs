use crate::CLAP_STYLING;
use clap::{arg, command};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("flowmap")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("flowmap")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(--"log-level" <LEVEL>)
                .required(false)
                .global(true)
                .help("Log level or filter directive (RUST_LOG takes precedence)")
                .default_value("info"),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the flowmap database and config on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory to store the flowmap database and config")
                        .default_value("~/.config/flowmap/"),
                )
                .arg(
                    arg!(-f - -"force")
                        .help(
                            "Forces the overwriting of any existing database and config at the \
                        specified location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("listen")
                .about(
                    "Collect NetFlow v9 and IPFIX datagrams and store every flow as a trace between two \
                hosts.",
                )
                .arg(config_arg())
                .arg(db_arg())
                .arg(
                    arg!(-p --"port" <PORT>)
                        .required(false)
                        .help("UDP port to listen on (default: 2055)")
                        .value_parser(clap::value_parser!(u16)),
                )
                .arg(
                    arg!(-b --"bind" <ADDRESS>)
                        .required(false)
                        .help("Address to bind (default: 0.0.0.0)")
                        .value_parser(clap::value_parser!(IpAddr)),
                )
                .arg(
                    arg!(-t --"workers" <NUM_WORKERS>)
                        .required(false)
                        .help("The number of import workers, each with its own database connection")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"no-refresh")
                        .required(false)
                        .help("Do not run the reverse DNS refresher")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("graph")
                .about("Build the host traffic graph for a time window and run the configured layers")
                .arg(config_arg())
                .arg(db_arg())
                .arg(
                    arg!(--"from" <TIME>)
                        .required(false)
                        .help("Window start: RFC 3339, unix seconds, or an age such as 30m, 2h, 7d")
                        .default_value("1h"),
                )
                .arg(
                    arg!(--"to" <TIME>)
                        .required(false)
                        .help("Window end (exclusive), same forms as --from")
                        .default_value("now"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv")
                        .value_parser(["text", "json", "csv"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("hosts")
                .about("List every known host and its reverse DNS name")
                .arg(config_arg())
                .arg(db_arg()),
        )
        .subcommand(
            command!("refresh")
                .about("Run one reverse DNS refresh cycle over stale and unresolved hosts")
                .arg(config_arg())
                .arg(db_arg()),
        )
        .subcommand(
            command!("replay")
                .about("Replay hex-encoded NetFlow payloads from a file to a collector")
                .arg(
                    arg!(<FILE>)
                        .required(true)
                        .help("File with one hex-encoded datagram per line")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(target_arg())
                .arg(
                    arg!(-i --"interval-ms" <MILLIS>)
                        .required(false)
                        .help("Pause between datagrams")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1000"),
                )
                .arg(
                    arg!(-r --"rounds" <COUNT>)
                        .required(false)
                        .help("Times to go through the file, 0 to loop until interrupted")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("1"),
                ),
        )
        .subcommand(
            command!("send")
                .about("Send a single synthetic flow to a collector")
                .arg(
                    arg!(-s --"src" <ADDRESS>)
                        .required(true)
                        .help("Source address of the flow")
                        .value_parser(clap::value_parser!(IpAddr)),
                )
                .arg(
                    arg!(-d --"dst" <ADDRESS>)
                        .required(true)
                        .help("Destination address of the flow")
                        .value_parser(clap::value_parser!(IpAddr)),
                )
                .arg(target_arg())
                .arg(
                    arg!(--"bytes" <COUNT>)
                        .required(false)
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1000"),
                )
                .arg(
                    arg!(--"packets" <COUNT>)
                        .required(false)
                        .value_parser(clap::value_parser!(u64))
                        .default_value("1"),
                )
                .arg(
                    arg!(--"protocol" <PROTOCOL>)
                        .required(false)
                        .help("tcp, udp or an IANA protocol number")
                        .default_value("udp"),
                ),
        )
}

fn config_arg() -> clap::Arg {
    arg!(-c --"config" <PATH>)
        .required(false)
        .help("JSON config file (default: built-in defaults)")
        .value_parser(clap::value_parser!(PathBuf))
}

fn db_arg() -> clap::Arg {
    arg!(--"db" <PATH>)
        .required(false)
        .help("Database path (default: ~/.config/flowmap/flowmap.db)")
}

fn target_arg() -> clap::Arg {
    arg!(-T --"target" <ADDRESS>)
        .required(false)
        .help("Collector to send to")
        .value_parser(clap::value_parser!(SocketAddr))
        .default_value("127.0.0.1:2055")
}
