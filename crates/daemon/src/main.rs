use anyhow::Result;
use pogo_daemon::{Daemon, PidLock};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
  let log_dir = pogo_core::home_dir();
  if std::fs::create_dir_all(&log_dir).is_err() {
    tracing_subscriber::fmt()
      .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
      .init();
    return None;
  }

  let appender = tracing_appender::rolling::daily(log_dir, "pogod.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::registry()
    .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
    .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();
  Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  let _guard = init_logging();

  let lock = match PidLock::acquire(pogo_core::pid_file_path()) {
    Ok(lock) => lock,
    Err(e) => {
      eprintln!("Cannot get lock: {e}");
      std::process::exit(1);
    }
  };

  let daemon = Daemon::new(
    &pogo_core::plugin_dir(),
    pogo_core::projects_file(),
    pogo_core::listen_addr().to_string(),
  );
  let result = daemon.run().await;

  lock.release();
  result?;
  Ok(())
}
