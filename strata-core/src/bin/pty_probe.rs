// strata-core/src/bin/pty_probe.rs
//
// Runs a shell through the full pipeline and prints each finished block as
// JSON. Lines typed on stdin are submitted to the shell.
//
//   pty_probe [--integrate]
//
// `--integrate` writes the bash/zsh hook into the shell first.

#[cfg(unix)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    probe::run().await
}

#[cfg(not(unix))]
fn main() {
    eprintln!("pty_probe needs a Unix pseudo-terminal");
}

#[cfg(unix)]
mod probe {
    use anyhow::{Context, Result};
    use strata_core::blocks::SegmenterEvent;
    use strata_core::{hooks, Config, EngineEvent, TerminalEngine};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        // RUST_LOG=strata_core=trace
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,strata_core=debug"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
            .try_init();
    }

    pub async fn run() -> Result<()> {
        init_tracing();
        let integrate = std::env::args().any(|a| a == "--integrate");

        let config = Config::load().context("failed to load config")?;
        let shell = config.resolve_shell();
        tracing::info!(%shell, integrate, "pty_probe starting (Ctrl+C to exit)");

        let (engine, mut events) =
            TerminalEngine::start(&config).context("failed to start terminal engine")?;

        if integrate {
            match hooks::hook_for_shell(&shell) {
                Some(hook) => {
                    engine.write(hook.to_string());
                }
                None => tracing::warn!(%shell, "no integration hook for this shell"),
            }
        }

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Ctrl+C received, exiting");
                    break;
                }

                line = lines.next_line() => {
                    let Some(line) = line.context("stdin read failed")? else {
                        tracing::info!("stdin closed, exiting");
                        break;
                    };
                    engine.submit(&line);
                }

                event = events.recv() => {
                    match event {
                        Some(EngineEvent::Block(SegmenterEvent::BlockFinalized(block))) => {
                            let json = serde_json::to_string_pretty(&block)
                                .context("failed to serialize block")?;
                            println!("{json}");
                        }
                        Some(EngineEvent::Closed { exit_code }) => {
                            tracing::info!(?exit_code, "shell exited");
                            break;
                        }
                        Some(EngineEvent::Error(e)) => tracing::warn!(error = %e, "session error"),
                        Some(_) => {}
                        None => break,
                    }
                }
            }
        }

        let snapshot = engine.snapshot();
        eprintln!("── final screen ──\n{}", snapshot.text());

        let exit_code = engine.shutdown().await;
        tracing::info!(?exit_code, "pty_probe done");
        Ok(())
    }
}
