// Copyright © 2019 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

#[macro_use]
extern crate log;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use checkup::Config;
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{Map, Value};
use stats_parser::{
    extract_json, parse_forwarder_stats, parse_global_stats, parse_port_stats, StatsIndex,
    GLOBAL_STATS_METHOD, PORT_STATS_METHOD,
};

#[derive(Parser, Debug)]
#[command(
    name = "dpdk-checkup",
    version = env!("BUILT_VERSION"),
    author,
    about = "Inspect DPDK checkup transcripts and parameters."
)]
struct Args {
    /// Increase logging verbosity, may be repeated
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Parse a captured `show fwd stats all` transcript
    FwdStats { file: PathBuf },
    /// Extract the reply to one RPC method from a verbose trex-console transcript
    GenReply {
        file: PathBuf,
        #[arg(long, default_value = GLOBAL_STATS_METHOD)]
        method: String,
    },
    /// Resolve a JSON object of checkup parameters into a configuration
    Config {
        file: PathBuf,
        #[arg(long, default_value = "default")]
        namespace: String,
    },
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn forwarder_stats(text: &str) -> Result<Value> {
    let stats = parse_forwarder_stats(text)?;
    let mut records = Map::new();
    for index in StatsIndex::ALL {
        records.insert(index.to_string(), serde_json::to_value(stats[index])?);
    }
    Ok(Value::Object(records))
}

fn generator_reply(text: &str, method: &str) -> Result<Value> {
    let reply = match method {
        GLOBAL_STATS_METHOD => serde_json::to_value(parse_global_stats(text)?)?,
        PORT_STATS_METHOD => serde_json::to_value(parse_port_stats(text)?)?,
        _ => {
            let body = extract_json(text, method)?;
            serde_json::from_str(&body)
                .with_context(|| format!("Reply to {method} is not valid JSON"))?
        }
    };
    Ok(reply)
}

fn config(text: &str, namespace: &str) -> Result<Config> {
    let params: BTreeMap<String, String> =
        serde_json::from_str(text).context("Expected a JSON object of string parameters")?;
    Ok(Config::from_params(namespace, &params)?)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.command {
        Command::FwdStats { file } => {
            info!("Parsing forwarder statistics from {}", file.display());
            let stats = forwarder_stats(&read(&file)?)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::GenReply { file, method } => {
            info!("Extracting {method} reply from {}", file.display());
            let reply = generator_reply(&read(&file)?, &method)?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
        }
        Command::Config { file, namespace } => {
            let config = config(&read(&file)?, &namespace)?;
            println!("{config:#?}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_parsing() {
        let args = Args::parse_from(["dpdk-checkup", "-vv", "fwd-stats", "/tmp/stats.txt"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(
            args.command,
            Command::FwdStats {
                file: PathBuf::from("/tmp/stats.txt")
            }
        );

        let args = Args::parse_from(["dpdk-checkup", "gen-reply", "out.txt"]);
        assert_eq!(
            args.command,
            Command::GenReply {
                file: PathBuf::from("out.txt"),
                method: "get_global_stats".to_string(),
            }
        );

        let args = Args::parse_from(["dpdk-checkup", "config", "p.json", "--namespace", "dpdk"]);
        assert_eq!(
            args.command,
            Command::Config {
                file: PathBuf::from("p.json"),
                namespace: "dpdk".to_string(),
            }
        );
    }

    #[test]
    fn test_generator_reply_other_method() {
        let text = "[verbose] Sending Request To Server:\n\n{\"method\": \"get_version\"}\n\n\
                    [verbose] Server Response:\n\n{\"result\": {\"version\": \"v3.02\"}}\n\n";
        let reply = generator_reply(text, "get_version").unwrap();
        assert_eq!(reply["result"]["version"], "v3.02");
    }

    #[test]
    fn test_config_requires_object_of_strings() {
        assert!(config("[1, 2]", "default").is_err());
        assert!(config(r#"{"spec.timeout": 5}"#, "default").is_err());

        let config = config(
            r#"{"spec.timeout": "10m", "spec.param.networkAttachmentDefinitionName": "sriov"}"#,
            "dpdk",
        )
        .unwrap();
        assert_eq!(config.namespace, "dpdk");
        assert_eq!(config.network_attachment_definition_name, "sriov");
    }
}
