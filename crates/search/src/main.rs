use anyhow::Result;
use pogo_search::SearchEngine;
use tracing_subscriber::EnvFilter;

/// The search plugin executable. Launched by the pogo daemon; speaks the
/// plugin protocol on stdin/stdout, so all logging goes to stderr.
#[tokio::main]
async fn main() -> Result<()> {
  if let Err(e) = pogo_plugin::verify_cookie_env() {
    eprintln!("{e}");
    std::process::exit(1);
  }

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with_writer(std::io::stderr)
    .init();

  let engine = SearchEngine::spawn();
  pogo_plugin::serve(engine.clone()).await?;
  engine.shutdown();
  Ok(())
}
