// Copyright (C) 2025 Berth Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Berth Control CLI
//!
//! CLI tool for managing apps on a berth server.
//!
//! Usage:
//!   berthctl [--server <url>] <command> [options]
//!
//! Commands:
//!   list                          List all apps
//!   status <app>                  Show full app status
//!   create <app> [--env K=V ...]  Create a new app
//!   start <app>                   Start an app
//!   stop <app>                    Stop an app
//!   restart <app>                 Restart an app
//!   switch <app> <version>        Switch an app to an existing version
//!   config <app> [--env K=V ...]  Show or replace the app's environment
//!   deploy <app> <archive.tar.gz> [--no-switch]

use std::collections::HashMap;
use std::process::ExitCode;

use berth_client::BerthClient;

fn print_usage() {
    eprintln!(
        r#"Usage: berthctl [--server <url>] <command> [options]

Manage apps on a berth server.

COMMANDS:
    list                            List all apps
    status <app>                    Show full app status
    create <app>                    Create a new app
    start <app>                     Start an app
    stop <app>                      Stop an app
    restart <app>                   Restart an app
    switch <app> <version>          Switch an app to an existing version
    config <app>                    Show or replace the app's environment
    deploy <app> <archive.tar.gz>   Deploy an archive as a new version

CREATE / CONFIG OPTIONS:
    --env <KEY=VALUE>               Environment entry (repeatable)

DEPLOY OPTIONS:
    --no-switch                     Deploy without switching to the new version

ENVIRONMENT:
    BERTH_SERVER                    Server address (default: http://127.0.0.1:3000)

EXAMPLES:
    # Create an app and deploy a release
    berthctl create web --env PORT=8080
    berthctl deploy web ./release.tar.gz

    # Roll back to a previous version
    berthctl switch web 3
"#
    );
}

#[derive(Debug)]
enum Command {
    List,
    Status { app: String },
    Create { app: String, env: HashMap<String, String> },
    Start { app: String },
    Stop { app: String },
    Restart { app: String },
    Switch { app: String, version: u64 },
    Config { app: String, env: Option<HashMap<String, String>> },
    Deploy { app: String, archive: String, no_switch: bool },
}

fn parse_env_pair(pair: &str) -> Result<(String, String), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid --env entry (expected KEY=VALUE): {pair}")),
    }
}

fn parse_args_from_vec(args: &[String]) -> Result<(Option<String>, Command), String> {
    let mut server: Option<String> = None;
    let mut rest: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                i += 1;
                server = Some(args.get(i).ok_or("--server requires a URL")?.clone());
            }
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    if rest.is_empty() {
        return Err("No command specified".to_string());
    }

    let command = match rest[0].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "list" => Command::List,
        "status" => Command::Status {
            app: rest.get(1).ok_or("App name required")?.clone(),
        },
        "start" => Command::Start {
            app: rest.get(1).ok_or("App name required")?.clone(),
        },
        "stop" => Command::Stop {
            app: rest.get(1).ok_or("App name required")?.clone(),
        },
        "restart" => Command::Restart {
            app: rest.get(1).ok_or("App name required")?.clone(),
        },
        "create" => {
            let app = rest.get(1).ok_or("App name required")?.clone();
            let env = parse_env_options(&rest[2..])?.unwrap_or_default();
            Command::Create { app, env }
        }
        "switch" => {
            let app = rest.get(1).ok_or("App name required")?.clone();
            let version = rest
                .get(2)
                .ok_or("Version number required")?
                .parse()
                .map_err(|_| "Invalid version number".to_string())?;
            Command::Switch { app, version }
        }
        "config" => {
            let app = rest.get(1).ok_or("App name required")?.clone();
            let env = parse_env_options(&rest[2..])?;
            Command::Config { app, env }
        }
        "deploy" => {
            let app = rest.get(1).ok_or("App name required")?.clone();
            let archive = rest.get(2).ok_or("Archive path required")?.clone();
            let mut no_switch = false;
            for arg in &rest[3..] {
                match arg.as_str() {
                    "--no-switch" => no_switch = true,
                    other => return Err(format!("Unknown argument: {other}")),
                }
            }
            Command::Deploy { app, archive, no_switch }
        }
        other => return Err(format!("Unknown command: {other}")),
    };

    Ok((server, command))
}

/// Parse repeated `--env KEY=VALUE` options. `None` means no --env was given,
/// which the config command uses to mean "show, don't replace".
fn parse_env_options(args: &[String]) -> Result<Option<HashMap<String, String>>, String> {
    let mut env: Option<HashMap<String, String>> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--env" => {
                i += 1;
                let pair = args.get(i).ok_or("--env requires KEY=VALUE")?;
                let (key, value) = parse_env_pair(pair)?;
                env.get_or_insert_with(HashMap::new).insert(key, value);
            }
            other => return Err(format!("Unknown argument: {other}")),
        }
        i += 1;
    }
    Ok(env)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let (server, command) = match parse_args_from_vec(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let client = match server {
        Some(url) => BerthClient::new(url),
        None => BerthClient::from_env(),
    };

    match execute_command(&client, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn execute_command(client: &BerthClient, command: Command) -> Result<(), String> {
    match command {
        Command::List => {
            for name in client.apps().await.map_err(|e| e.to_string())? {
                println!("{}", name);
            }
        }

        Command::Status { app } => {
            let status = client.status(&app).await.map_err(|e| e.to_string())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?
            );
        }

        Command::Create { app, env } => {
            client.create_app(&app, env).await.map_err(|e| e.to_string())?;
            println!("Created: {}", app);
        }

        Command::Start { app } => {
            client.start(&app).await.map_err(|e| e.to_string())?;
            println!("Started: {}", app);
        }

        Command::Stop { app } => {
            client.stop(&app).await.map_err(|e| e.to_string())?;
            println!("Stopped: {}", app);
        }

        Command::Restart { app } => {
            client.restart(&app).await.map_err(|e| e.to_string())?;
            println!("Restarted: {}", app);
        }

        Command::Switch { app, version } => {
            client
                .switch_to(&app, version)
                .await
                .map_err(|e| e.to_string())?;
            println!("Switched {} to version {}", app, version);
        }

        Command::Config { app, env } => match env {
            Some(env) => {
                let config = client.set_env(&app, env).await.map_err(|e| e.to_string())?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?
                );
            }
            None => {
                let status = client.status(&app).await.map_err(|e| e.to_string())?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status.config).map_err(|e| e.to_string())?
                );
            }
        },

        Command::Deploy { app, archive, no_switch } => {
            let result = client
                .deploy(&app, archive.as_ref(), no_switch)
                .await
                .map_err(|e| e.to_string())?;
            println!("Deployed {} as version {}", app, result.version);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<String> {
        std::iter::once("berthctl")
            .chain(args.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_simple_commands() {
        let (server, command) = parse_args_from_vec(&argv(&["list"])).unwrap();
        assert!(server.is_none());
        assert!(matches!(command, Command::List));

        let (_, command) = parse_args_from_vec(&argv(&["start", "web"])).unwrap();
        assert!(matches!(command, Command::Start { app } if app == "web"));

        let (_, command) = parse_args_from_vec(&argv(&["switch", "web", "3"])).unwrap();
        assert!(matches!(command, Command::Switch { app, version: 3 } if app == "web"));
    }

    #[test]
    fn parses_server_flag_anywhere() {
        let (server, command) =
            parse_args_from_vec(&argv(&["--server", "http://host:9000", "list"])).unwrap();
        assert_eq!(server.as_deref(), Some("http://host:9000"));
        assert!(matches!(command, Command::List));

        let (server, _) =
            parse_args_from_vec(&argv(&["status", "web", "--server", "http://host:9000"])).unwrap();
        assert_eq!(server.as_deref(), Some("http://host:9000"));
    }

    #[test]
    fn parses_env_pairs() {
        let (_, command) =
            parse_args_from_vec(&argv(&["create", "web", "--env", "A=1", "--env", "B=x=y"]))
                .unwrap();
        let Command::Create { env, .. } = command else {
            panic!("expected create");
        };
        assert_eq!(env.get("A").unwrap(), "1");
        assert_eq!(env.get("B").unwrap(), "x=y");
    }

    #[test]
    fn config_without_env_means_show() {
        let (_, command) = parse_args_from_vec(&argv(&["config", "web"])).unwrap();
        assert!(matches!(command, Command::Config { env: None, .. }));

        let (_, command) =
            parse_args_from_vec(&argv(&["config", "web", "--env", "A=1"])).unwrap();
        assert!(matches!(command, Command::Config { env: Some(_), .. }));
    }

    #[test]
    fn deploy_flags() {
        let (_, command) =
            parse_args_from_vec(&argv(&["deploy", "web", "r.tar.gz", "--no-switch"])).unwrap();
        assert!(
            matches!(command, Command::Deploy { no_switch: true, archive, .. } if archive == "r.tar.gz")
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse_args_from_vec(&argv(&[])).is_err());
        assert!(parse_args_from_vec(&argv(&["bogus"])).is_err());
        assert!(parse_args_from_vec(&argv(&["switch", "web", "abc"])).is_err());
        assert!(parse_args_from_vec(&argv(&["create", "web", "--env", "NOEQUALS"])).is_err());
    }
}
