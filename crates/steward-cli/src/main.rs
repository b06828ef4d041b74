// Copyright 2025 Steward Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Steward CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Check a configuration and list its policies
//! steward validate -c steward.json
//!
//! # Print the normalized endpoints of a snapshot
//! steward inspect -s orders.json --service orders
//!
//! # Run 500 calls over 16 tasks with one failing instance
//! steward simulate -c steward.json -s orders.json --service orders \
//!     --calls 500 --concurrency 16 --failing i-2
//! ```
//!
//! Reports are printed to stdout as JSON; logs go to stderr.

use anyhow::Result;
use argh::FromArgs;
use steward_cli::SimulateOptions;

#[derive(FromArgs)]
/// Steward - microservice governance tooling
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Validate(ValidateArgs),
    Simulate(SimulateArgs),
    Inspect(InspectArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "validate")]
/// validate a configuration file
struct ValidateArgs {
    /// path to the JSON configuration
    #[argh(option, short = 'c')]
    config: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "simulate")]
/// drive governed calls against a snapshot
struct SimulateArgs {
    /// path to the JSON configuration
    #[argh(option, short = 'c')]
    config: String,

    /// path to the endpoint snapshot
    #[argh(option, short = 's')]
    snapshot: String,

    /// microservice the snapshot belongs to
    #[argh(option)]
    service: String,

    /// total number of calls
    #[argh(option, default = "100")]
    calls: usize,

    /// number of concurrent tasks
    #[argh(option, default = "8")]
    concurrency: usize,

    /// instance id whose calls fail (repeatable)
    #[argh(option)]
    failing: Vec<String>,

    /// request method used for policy matching
    #[argh(option, default = "\"GET\".into()")]
    method: String,

    /// request path used for policy matching
    #[argh(option, default = "\"/\".into()")]
    path: String,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "inspect")]
/// print the normalized form of a snapshot
struct InspectArgs {
    /// path to the endpoint snapshot
    #[argh(option, short = 's')]
    snapshot: String,

    /// microservice the snapshot belongs to
    #[argh(option)]
    service: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, RUST_LOG overrides
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Validate(args) => {
            let report = steward_cli::validate(&args.config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Inspect(args) => {
            let rendered = steward_cli::inspect(&args.snapshot, &args.service)?;
            println!("{}", serde_json::to_string_pretty(&rendered)?);
        }
        Commands::Simulate(args) => {
            let config = steward_cli::load_config(&args.config)?;
            let groups = steward_cli::load_snapshot(&args.snapshot)?;
            let options = SimulateOptions {
                service: args.service,
                calls: args.calls,
                concurrency: args.concurrency,
                failing: args.failing.into_iter().collect(),
                method: args.method,
                path: args.path,
            };
            let report = steward_cli::simulate(config, groups, options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, argh::EarlyExit> {
        Cli::from_args(&["steward"], args)
    }

    #[test]
    fn test_parse_validate() {
        let cli = parse(&["validate", "-c", "steward.json"]).unwrap();
        match cli.command {
            Commands::Validate(ValidateArgs { config }) => assert_eq!(config, "steward.json"),
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_parse_simulate_defaults() {
        let cli = parse(&["simulate", "-c", "c.json", "-s", "s.json", "--service", "orders"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.service, "orders");
                assert_eq!(args.calls, 100);
                assert_eq!(args.concurrency, 8);
                assert!(args.failing.is_empty());
                assert_eq!(args.method, "GET");
                assert_eq!(args.path, "/");
            }
            _ => panic!("Expected Simulate command"),
        }
    }

    #[test]
    fn test_parse_simulate_repeated_failing() {
        let cli = parse(&[
            "simulate", "-c", "c.json", "-s", "s.json", "--service", "orders",
            "--failing", "i-1", "--failing", "i-2", "--calls", "10",
        ])
        .unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.failing, vec!["i-1".to_string(), "i-2".to_string()]);
                assert_eq!(args.calls, 10);
            }
            _ => panic!("Expected Simulate command"),
        }
    }

    #[test]
    fn test_parse_inspect_requires_service() {
        assert!(parse(&["inspect", "-s", "s.json"]).is_err());
        let cli = parse(&["inspect", "-s", "s.json", "--service", "orders"]).unwrap();
        assert!(matches!(cli.command, Commands::Inspect(_)));
    }
}
