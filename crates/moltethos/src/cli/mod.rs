pub mod handlers;

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("moltethos")
        .version(env!("CARGO_PKG_VERSION"))
        .about("ERC-8004 agent registration worker and queue tools")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Config file layered over the global config"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit JSON instead of text"),
        )
        .subcommand(cmd_worker())
        .subcommand(cmd_submit())
        .subcommand(cmd_status())
        .subcommand(cmd_list())
        .subcommand(cmd_feedback())
        .subcommand(cmd_scan())
}

fn cmd_worker() -> Command {
    Command::new("worker")
        .about("Process the registration queue")
        .subcommand_required(true)
        .subcommand(Command::new("run").about("Process on every poll tick and insert until SIGINT/SIGTERM"))
        .subcommand(Command::new("once").about("Run a single processing pass and exit"))
}

fn cmd_submit() -> Command {
    Command::new("submit")
        .about("Queue a registration")
        .arg(
            Arg::new("credential")
                .long("credential")
                .required(true)
                .env("MOLTBOOK_API_KEY")
                .hide_env_values(true)
                .help("Moltbook API key proving the agent's identity"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .help("Name to register instead of the Moltbook display name; the key is still checked"),
        )
        .arg(
            Arg::new("agent-type")
                .long("agent-type")
                .help("Agent category written to the agent card"),
        )
        .arg(Arg::new("webpage-url").long("webpage-url").help("Agent homepage"))
        .arg(
            Arg::new("agent-ref")
                .long("agent-ref")
                .help("External agent reference, such as a Moltbook profile id"),
        )
        .arg(
            Arg::new("wait")
                .long("wait")
                .action(ArgAction::SetTrue)
                .help("Process the queue now and report the outcome"),
        )
}

fn cmd_status() -> Command {
    Command::new("status")
        .about("Show one registration")
        .arg(Arg::new("id").required(true).help("Record id returned by submit"))
        .arg(
            Arg::new("watch")
                .long("watch")
                .action(ArgAction::SetTrue)
                .help("Keep polling until the record leaves pending"),
        )
        .arg(
            Arg::new("interval")
                .long("interval")
                .value_name("SECS")
                .default_value("2")
                .value_parser(value_parser!(u64).range(1..))
                .help("Polling interval for --watch"),
        )
}

fn cmd_list() -> Command {
    Command::new("list")
        .about("List registrations, newest first")
        .arg(
            Arg::new("status")
                .long("status")
                .value_parser(["pending", "registered", "error"])
                .help("Only records with this status"),
        )
}

fn cmd_feedback() -> Command {
    Command::new("feedback")
        .about("Reviews, vouches and slashes")
        .subcommand_required(true)
        .subcommand(
            Command::new("add")
                .about("Record feedback for an agent")
                .arg(Arg::new("agent").long("agent").required(true).help("Agent name"))
                .arg(
                    Arg::new("value")
                        .long("value")
                        .required(true)
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i64))
                        .help("1 or -1 for a review, 100 to vouch, -100 to slash"),
                )
                .arg(Arg::new("reviewer").long("reviewer").help("Defaults to Anonymous"))
                .arg(Arg::new("comment").long("comment"))
                .arg(Arg::new("tx").long("tx").help("On-chain feedback transaction")),
        )
        .subcommand(
            Command::new("list")
                .about("Recent feedback for an agent")
                .arg(Arg::new("agent").required(true)),
        )
        .subcommand(Command::new("stats").about("Feedback count and total per agent"))
}

fn cmd_scan() -> Command {
    Command::new("scan")
        .about("Reputation statistics from 8004scan")
        .subcommand_required(true)
        .subcommand(
            Command::new("stats")
                .about("Statistics for every listed agent, or one token id")
                .arg(Arg::new("token-id").long("token-id")),
        )
}
