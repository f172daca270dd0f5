mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::PogoClient;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pogo")]
#[command(about = "Local code-search daemon client")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Visit a file or directory, adopting its repository if new
  Visit { path: String },
  /// List adopted project paths
  Projects,
  /// Search code in the project containing PATH (default: cwd)
  Search {
    query: String,
    path: Option<String>,
    /// List matching files only, de-duplicated and sorted
    #[arg(short = 'l', long)]
    list: bool,
  },
  /// Control the pogo server
  Server {
    #[command(subcommand)]
    command: ServerCommands,
  },
}

#[derive(Subcommand)]
enum ServerCommands {
  /// Start the pogo server if it is not already running
  Start,
  /// Stop the pogo server
  Stop,
  /// Report whether the pogo server is running
  Status,
}

fn absolutize(path: &str) -> Result<String> {
  let p = PathBuf::from(path);
  let abs = if p.is_absolute() {
    p
  } else {
    std::env::current_dir()?.join(p)
  };
  Ok(abs.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  let client = PogoClient::new();

  match cli.command {
    Commands::Visit { path } => {
      let response = client.visit(&absolutize(&path)?).await?;
      println!("{}", response.project.path);
    }
    Commands::Projects => {
      let mut paths: Vec<String> = client.projects().await?.into_iter().map(|p| p.path).collect();
      paths.sort();
      for path in paths {
        println!("{path}");
      }
    }
    Commands::Search { query, path, list } => {
      let dir = match path {
        Some(path) => absolutize(&path)?,
        None => std::env::current_dir()?.to_string_lossy().into_owned(),
      };
      let response = client.search(&query, &dir).await?;
      let mut files = response.results.files.unwrap_or_default();
      // Most-relevant first: files with the most matching lines on top.
      files.sort_by(|a, b| b.matches.len().cmp(&a.matches.len()));

      if list {
        let unique: BTreeSet<String> = files.into_iter().map(|f| f.path).collect();
        for path in unique {
          println!("{path}");
        }
      } else {
        for file in files {
          println!("{}", file.path);
          for m in file.matches {
            println!("{}: {}", m.line, m.content);
          }
        }
      }
    }
    Commands::Server { command } => match command {
      ServerCommands::Start => {
        if client.health().await {
          println!("The server is already running");
        } else {
          println!("Starting pogo server...");
          client.ensure_running().await?;
          println!("The server is up");
        }
      }
      ServerCommands::Stop => {
        let pid_file = pogo_core::pid_file_path();
        let pid = std::fs::read_to_string(&pid_file)
          .map_err(|_| anyhow::anyhow!("no pid file at {pid_file:?}; is the server running?"))?;
        std::process::Command::new("kill").arg(pid.trim()).status()?;
        println!("Sent stop signal to pogod ({})", pid.trim());
      }
      ServerCommands::Status => {
        if client.health().await {
          println!("pogo is up and bouncing");
        } else {
          println!("The server is not running");
          std::process::exit(1);
        }
      }
    },
  }
  Ok(())
}
