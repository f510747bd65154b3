//! tidekv - A Multi-Reactor In-Memory Key-Value Server
//!
//! Entry point. Depending on the positional arguments this either runs the
//! server or opens an interactive console against a running one.

use anyhow::Context;
use std::io::Write;
use tidekv::client::KvClient;
use tidekv::config::ServerConfig;
use tidekv::protocol::Task;
use tidekv::server::Server;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Worker count used when only a port is given
const PORT_ONLY_WORKERS: usize = 2;

/// What the process was asked to do
#[derive(Debug)]
enum Mode {
    Server(ServerConfig),
    Client { host: String, port: u16 },
}

/// Parse configuration from command-line arguments
fn parse_args(args: &[String]) -> Result<Mode, String> {
    let mut workers = None;
    let mut capacity = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--workers" | "-w" => {
                let value = args.get(i + 1).ok_or("--workers requires a value")?;
                workers = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid worker count: {}", value))?,
                );
                i += 2;
            }
            "--capacity" | "-c" => {
                let value = args.get(i + 1).ok_or("--capacity requires a value")?;
                capacity = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("invalid buffer capacity: {}", value))?,
                );
                i += 2;
            }
            arg if arg.starts_with('-') => return Err(format!("Unknown argument: {}", arg)),
            arg => {
                positional.push(arg.to_string());
                i += 1;
            }
        }
    }

    let parse_port =
        |value: &str| value.parse::<u16>().map_err(|_| format!("invalid port number: {}", value));

    match positional.as_slice() {
        [] => {
            let mut config = ServerConfig::default();
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(capacity) = capacity {
                config = config.with_buffer_capacity(capacity);
            }
            Ok(Mode::Server(config))
        }
        [port] => {
            let mut config = ServerConfig::new(parse_port(port)?)
                .with_workers(workers.unwrap_or(PORT_ONLY_WORKERS));
            if let Some(capacity) = capacity {
                config = config.with_buffer_capacity(capacity);
            }
            Ok(Mode::Server(config))
        }
        [host, port] => Ok(Mode::Client {
            host: host.clone(),
            port: parse_port(port)?,
        }),
        _ => Err("too many arguments".to_string()),
    }
}

fn print_help() {
    println!(
        r#"
tidekv - A Multi-Reactor In-Memory Key-Value Server

USAGE:
    tidekv [OPTIONS]                 Start a server on {host}:{port}
    tidekv [OPTIONS] <PORT>          Start a server on PORT ({workers} workers)
    tidekv <HOST> <PORT>             Open a console to a running server

OPTIONS:
    -w, --workers <N>        Number of reactor threads
    -c, --capacity <BYTES>   Per-connection buffer capacity (largest request)
    -v, --version            Print version information
        --help               Print this help message

CONSOLE:
    GET <key>
    PUT <key> <value>
    DEL <key>
    QUIT

LOGGING:
    Set RUST_LOG (e.g. RUST_LOG=debug) to change verbosity.
"#,
        host = tidekv::DEFAULT_HOST,
        port = tidekv::DEFAULT_PORT,
        workers = PORT_ONLY_WORKERS,
    );
}

fn print_banner(server: &Server, workers: usize) {
    println!(
        r#"
tidekv v{} - Multi-Reactor In-Memory Key-Value Server
──────────────────────────────────────────────────────
Server started on {} with {} reactors
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        tidekv::VERSION,
        server.local_addr(),
        workers
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help") {
        print_help();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("tidekv version {}", tidekv::VERSION);
        return Ok(());
    }

    let mode = match parse_args(&args) {
        Ok(mode) => mode,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            print_help();
            std::process::exit(1);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_names(true)
        .init();

    match mode {
        Mode::Server(config) => run_server(config).await,
        Mode::Client { host, port } => run_console(&host, port).await,
    }
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let workers = config.workers;
    let server = Server::bind(config).context("failed to start server")?;
    print_banner(&server, workers);

    let shutdown = server.shutdown_handle();
    let mut running = tokio::task::spawn_blocking(move || server.run());

    tokio::select! {
        result = &mut running => {
            result??;
        }
        received = signal::ctrl_c() => {
            if let Err(e) = received {
                error!(error = %e, "Failed to listen for Ctrl+C");
            }
            info!("Shutdown signal received, stopping server...");
            shutdown.shutdown();
            running.await??;
        }
    }

    Ok(())
}

/// One parsed console line
#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Request(Task),
    Quit,
    Empty,
}

fn parse_console_line(line: &str) -> Result<ConsoleCommand, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ConsoleCommand::Empty);
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let command = parts.next().unwrap_or_default().to_ascii_uppercase();
    let key = parts.next().map(str::to_string);
    let rest = parts.next().map(|v| v.trim_start().to_string());

    match (command.as_str(), key, rest) {
        ("QUIT" | "EXIT", None, None) => Ok(ConsoleCommand::Quit),
        ("GET", Some(key), None) => Ok(ConsoleCommand::Request(Task::get(key))),
        ("DEL" | "DELETE", Some(key), None) => Ok(ConsoleCommand::Request(Task::delete(key))),
        ("PUT" | "SET", Some(key), Some(value)) if !value.is_empty() => {
            Ok(ConsoleCommand::Request(Task::put(key, value)))
        }
        ("GET" | "DEL" | "DELETE" | "PUT" | "SET" | "QUIT" | "EXIT", _, _) => {
            Err(format!("wrong number of arguments for '{}'", command))
        }
        _ => Err(format!("unknown command '{}'", command)),
    }
}

async fn run_console(host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{}:{}", host, port);
    let mut client = KvClient::connect(addr.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    println!("Connected to {}. Type QUIT to exit.", addr);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", addr);
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let task = match parse_console_line(&line) {
            Ok(ConsoleCommand::Request(task)) => task,
            Ok(ConsoleCommand::Quit) => break,
            Ok(ConsoleCommand::Empty) => continue,
            Err(msg) => {
                println!("(error) {}", msg);
                continue;
            }
        };

        let outcome = match task.value.as_ref() {
            Some(value) => client.put(&task.key, value).await,
            None if task.kind == tidekv::OpKind::Get => client.get(&task.key).await,
            None => client.delete(&task.key).await,
        };

        match outcome {
            Ok(Some(value)) => println!("\"{}\"", String::from_utf8_lossy(&value)),
            Ok(None) => println!("(nil)"),
            Err(e) => {
                error!(error = %e, "Request failed");
                return Err(e.into());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_no_args_runs_default_server() {
        match parse_args(&[]).unwrap() {
            Mode::Server(config) => {
                assert_eq!(config.port, 8080);
                assert_eq!(config.workers, 4);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_port_only_uses_two_workers() {
        match parse_args(&args(&["9000"])).unwrap() {
            Mode::Server(config) => {
                assert_eq!(config.port, 9000);
                assert_eq!(config.workers, 2);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_defaults() {
        match parse_args(&args(&["-w", "8", "--capacity", "4096", "9000"])).unwrap() {
            Mode::Server(config) => {
                assert_eq!(config.workers, 8);
                assert_eq!(config.buffer_capacity, 4096);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_host_and_port_run_client() {
        match parse_args(&args(&["localhost", "8080"])).unwrap() {
            Mode::Client { host, port } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 8080);
            }
            other => panic!("unexpected mode: {:?}", other),
        }
    }

    #[test]
    fn test_bad_args_rejected() {
        assert!(parse_args(&args(&["notaport"])).is_err());
        assert!(parse_args(&args(&["--workers"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
        assert!(parse_args(&args(&["a", "1", "b"])).is_err());
    }

    #[test]
    fn test_console_commands() {
        assert_eq!(
            parse_console_line("get name").unwrap(),
            ConsoleCommand::Request(Task::get("name"))
        );
        assert_eq!(
            parse_console_line("PUT greeting hello world").unwrap(),
            ConsoleCommand::Request(Task::put("greeting", "hello world"))
        );
        assert_eq!(
            parse_console_line("DEL name").unwrap(),
            ConsoleCommand::Request(Task::delete("name"))
        );
        assert_eq!(parse_console_line("quit").unwrap(), ConsoleCommand::Quit);
        assert_eq!(parse_console_line("   ").unwrap(), ConsoleCommand::Empty);
        assert!(parse_console_line("PUT key").is_err());
        assert!(parse_console_line("INCR key").is_err());
    }
}
