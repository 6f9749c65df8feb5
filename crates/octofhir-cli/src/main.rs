mod auth;
mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

use cli::{Cli, Commands};
use commands::watch::WatchSettings;
use output::print_error;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let profile = &cli.profile;
    let profile_cfg = config::load_profile(profile)?;
    observability::init_tracing_with_level(profile_cfg.log_level.as_deref().unwrap_or("warn"));

    match &cli.command {
        Commands::Login(args) => {
            let endpoint = config::resolve_endpoint(&cli.endpoint, profile)?.context(
                "No endpoint configured. Use --endpoint, set OCTOFHIR_REALTIME_URL, or run: octofhir-live config set endpoint <url>",
            )?;
            commands::auth::login(&endpoint, args, profile).await?;
        }
        Commands::Logout => {
            commands::auth::logout(profile)?;
        }
        Commands::Whoami => {
            commands::auth::whoami(profile)?;
        }
        Commands::Watch(args) => {
            let settings = WatchSettings {
                endpoint: config::resolve_endpoint(&cli.endpoint, profile)?,
                config_path: cli.config.clone(),
                log_level: profile_cfg.log_level.clone(),
            };
            commands::watch::watch(settings, args, profile).await?;
        }
        Commands::Config(args) => match &args.command {
            cli::ConfigCommands::Show => {
                println!("{}: {}", "Profile".cyan(), profile);
                println!(
                    "{}: {}",
                    "Endpoint".cyan(),
                    profile_cfg.endpoint.as_deref().unwrap_or("(not set)")
                );
                println!(
                    "{}: {}",
                    "Log level".cyan(),
                    profile_cfg.log_level.as_deref().unwrap_or("(from realtime config)")
                );
            }
            cli::ConfigCommands::Set(set_args) => {
                let mut cfg = profile_cfg.clone();
                cfg.set(&set_args.key, &set_args.value)?;
                config::save_profile(profile, &cfg)?;
                output::print_success(&format!("Set {} = {}", set_args.key, set_args.value));
            }
        },
    }

    Ok(())
}
