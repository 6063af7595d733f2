//! `fileframe` binary: file management against a device reached through a
//! TCP byte bridge.

mod cli;

use std::io::Write;

use clap::Parser;
use cli::{Cli, Command};
use fileframe::{Session, SessionConfig, StreamLink};
use tokio::net::TcpStream;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = SessionConfig::default()
        .receive_capacity(cli.receive_capacity)
        .max_fragment_len(cli.fragment_len)
        .pacing_delay(cli.pacing_delay())
        .operation_timeout(cli.operation_timeout());

    let stream = TcpStream::connect(&cli.connect).await?;
    stream.set_nodelay(true)?;
    tracing::info!(peer = %cli.connect, "connected");
    let session = Session::from_stream(stream, config);
    run(&session, cli.command).await
}

async fn run(
    session: &Session<StreamLink<TcpStream>>,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Ls { path } => {
            let mut out = std::io::stdout().lock();
            for entry in session.list_dir(&path).await? {
                let kind = if entry.is_dir { 'd' } else { '-' };
                writeln!(
                    out,
                    "{kind} {:>10} {:>14} {}",
                    entry.file_size, entry.modified_epoch_millis, entry.path
                )?;
            }
        }
        Command::Get { remote, local } => {
            let content = session.read_file(&remote).await?;
            match local {
                Some(local) => std::fs::write(local, &content)?,
                None => std::io::stdout().lock().write_all(&content)?,
            }
        }
        Command::Put {
            local,
            remote,
            offset,
        } => {
            let content = std::fs::read(&local)?;
            let modified = std::fs::metadata(&local)?.modified().ok();
            let ack = session
                .write_file(&remote, offset, content, modified)
                .await?;
            tracing::info!(path = %remote, end = ack.end_offset, "written");
        }
        Command::Mkdir { path } => session.make_dir(&path, None).await?,
        Command::Rm { path } => session.delete(&path).await?,
        Command::Mv { from, to } => session.move_path(&from, &to).await?,
    }
    Ok(())
}
