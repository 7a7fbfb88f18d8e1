//! offload-worker: isolated process running offloaded tasks.
//!
//! Reads length-prefixed rkyv commands from stdin and answers on stdout.
//! Logs and JavaScript console output go to stderr.

use std::io::{self, BufReader, BufWriter, Write};
use std::panic::{self, AssertUnwindSafe};

use anyhow::Context;
use offload_core::ipc::{WorkerCommand, WorkerResponse, read_message, write_message};
use offload_worker::WorkerRuntime;

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build worker event loop")?;
    let _guard = rt.enter();

    let mut runtime = WorkerRuntime::from_env()?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = BufWriter::new(stdout.lock());

    loop {
        let command: WorkerCommand = match read_message(&mut reader) {
            Ok(command) => command,
            Err(e) => {
                // EOF - parent closed the pipe
                tracing::debug!("Stopping worker: {}", e);
                break;
            }
        };

        match command {
            WorkerCommand::Ping => {
                write_message(
                    &mut writer,
                    &WorkerResponse::Pong {
                        pid: std::process::id(),
                    },
                )?;
            }

            WorkerCommand::Shutdown => {
                write_message(&mut writer, &WorkerResponse::ShuttingDown)?;
                break;
            }

            WorkerCommand::Execute { task } => {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| rt.block_on(runtime.run(task))));

                match outcome {
                    Ok(report) => write_message(&mut writer, &WorkerResponse::Report(report))?,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        write_message(&mut writer, &WorkerResponse::Panic { message })?;
                        // Engine state is unknown after a panic
                        writer.flush()?;
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    writer.flush()?;
    Ok(())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
