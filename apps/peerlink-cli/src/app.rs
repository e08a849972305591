//! Command implementations.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use peerlink_channel::{LocalRendezvous, TcpSignaling};
use peerlink_protocol::{ChatRecord, Party, TransferDirection, TransferStatus};
use peerlink_session::{Session, SessionConfig, SessionEvent, SessionState};
use peerlink_transfer::{FileSource, ReceivedFile};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Command};
use crate::config::Config;

/// Runs the selected command to completion.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let download_dir = cli
        .download_dir
        .clone()
        .unwrap_or_else(|| config.download_dir.clone());
    let session_config = config.session_config();

    match cli.command {
        Command::Host { id, listen } => {
            let listen = listen.unwrap_or_else(|| config.listen_addr.clone());
            let session = Session::new(TcpSignaling::new(listen.clone()), session_config);
            let events = Events {
                rx: take_events(&session).await?,
                download_dir,
            };

            let room = session.start_as_host(id.as_deref()).await?;
            println!("room {room} open on {listen}");
            println!("on the other device run: peerlink join {room} --connect <this-host>:<port>");
            interactive(session, events).await
        }
        Command::Join { room, connect } => {
            let connect = connect.unwrap_or_else(|| config.connect_addr.clone());
            let session = Session::new(TcpSignaling::new(connect.clone()), session_config);
            let mut events = Events {
                rx: take_events(&session).await?,
                download_dir,
            };

            println!("joining {room} at {connect}...");
            let joined = {
                let join = session.join_as_guest(&room);
                tokio::pin!(join);
                loop {
                    tokio::select! {
                        result = &mut join => break result,
                        Some(event) = events.rx.recv() => {
                            handle_event(event, &events.download_dir).await;
                        }
                    }
                }
            };
            joined?;
            interactive(session, events).await
        }
        Command::Selftest { file } => selftest(&file, &download_dir, session_config).await,
    }
}

async fn take_events(session: &Session) -> anyhow::Result<mpsc::Receiver<SessionEvent>> {
    session
        .take_events()
        .await
        .context("session events already taken")
}

/// Event receiver plus where received files go.
struct Events {
    rx: mpsc::Receiver<SessionEvent>,
    download_dir: PathBuf,
}

/// Reads commands from stdin until `/quit`, end of input or Ctrl-C.
///
/// Plain lines are sent as chat; `/send PATH` sends a file.
async fn interactive(session: Session, mut events: Events) -> anyhow::Result<()> {
    println!("type a message, /send PATH, or /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            Some(event) = events.rx.recv() => {
                handle_event(event, &events.download_dir).await;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(e) = handle_line(&session, line).await {
                    println!("! {e:#}");
                }
            }
        }
    }

    session.exit().await?;
    Ok(())
}

async fn handle_line(session: &Session, line: &str) -> anyhow::Result<()> {
    if let Some(path) = line.strip_prefix("/send ") {
        let source = FileSource::open(Path::new(path.trim()))
            .await
            .with_context(|| format!("cannot open {path}"))?;
        let (name, size) = (source.name().to_string(), source.size());
        let id = session.send_file(source).await?;
        debug!(transfer = %id, "file announced");
        println!("* offering {name} ({size} bytes)");
    } else if line.starts_with('/') {
        bail!("unknown command {line}");
    } else {
        session.send_text(line).await?;
    }
    Ok(())
}

async fn handle_event(event: SessionEvent, download_dir: &Path) {
    match event {
        SessionEvent::StateChanged(state) => match state {
            SessionState::Live => println!("* connected"),
            SessionState::Disconnected => println!("* peer disconnected"),
            SessionState::Failed(reason) => println!("! {reason}"),
            other => debug!(state = %other, "state"),
        },
        SessionEvent::Retrying {
            attempt,
            max_attempts,
            delay,
        } => println!(
            "* no answer, retrying ({attempt}/{max_attempts}) in {:.1}s",
            delay.as_secs_f64()
        ),
        SessionEvent::SignalingStatus(status) => debug!(?status, "signaling status"),
        SessionEvent::Message(ChatRecord::Text {
            sender: Party::Remote,
            content,
            ..
        }) => println!("< {content}"),
        SessionEvent::Message(ChatRecord::FileProgress {
            name,
            size,
            direction: TransferDirection::Incoming,
            ..
        }) => println!("* receiving {name} ({size} bytes)"),
        SessionEvent::Message(_) => {}
        SessionEvent::Progress(p) => {
            let arrow = match p.direction {
                TransferDirection::Outgoing => "->",
                TransferDirection::Incoming => "<-",
            };
            print!(
                "\r{arrow} {:>3}% {:>10}/{} bytes {:>8.0} KiB/s",
                p.percent,
                p.bytes_transferred,
                p.total_bytes,
                p.bytes_per_second / 1024.0
            );
            if p.status == TransferStatus::Completed {
                println!();
            }
            let _ = std::io::stdout().flush();
        }
        SessionEvent::FileReceived(file) => save(&file, download_dir).await,
        SessionEvent::TransferFailed {
            transfer_id,
            reason,
            ..
        } => {
            println!();
            println!("! transfer {transfer_id} failed: {reason}");
        }
    }
}

async fn save(file: &ReceivedFile, download_dir: &Path) {
    match file.save_into(download_dir).await {
        Ok(path) => println!("* saved {} (sha256 {})", path.display(), file.sha256_hex()),
        Err(e) => {
            warn!(error = %e, name = %file.meta().name, "failed to save received file");
            println!("! could not save {}: {e}", file.meta().name);
        }
    }
}

/// Sends `file` from a guest session to a host session in this process and
/// checks the saved copy.
async fn selftest(file: &Path, download_dir: &Path, config: SessionConfig) -> anyhow::Result<()> {
    let original = tokio::fs::read(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let expected = hex::encode(Sha256::digest(&original));

    let rendezvous = LocalRendezvous::new();
    let host = Session::new(rendezvous.clone(), config.clone());
    let mut host_events = take_events(&host).await?;
    let room = host.start_as_host(None).await?;

    let guest = Session::new(rendezvous, config);
    guest.join_as_guest(&room).await?;
    host.wait_for_state(|s| *s == SessionState::Live).await?;
    println!("* loopback session {room} live");

    let source = FileSource::open(file).await?;
    let id = guest.send_file(source).await?;

    let received = loop {
        match host_events.recv().await {
            Some(SessionEvent::FileReceived(received)) if received.meta().id == id => {
                break received;
            }
            Some(SessionEvent::TransferFailed { reason, .. }) => bail!("transfer failed: {reason}"),
            Some(SessionEvent::StateChanged(SessionState::Disconnected)) => {
                bail!("loopback session dropped")
            }
            Some(SessionEvent::Progress(p)) => {
                debug!(percent = p.percent, "selftest progress");
            }
            Some(_) => {}
            None => bail!("host session stopped"),
        }
    };

    let path = received.save_into(download_dir).await?;
    let saved = tokio::fs::read(&path).await?;
    let actual = hex::encode(Sha256::digest(&saved));

    guest.exit().await?;
    host.exit().await?;

    if actual != expected {
        bail!("checksum mismatch: sent {expected}, saved {actual}");
    }
    println!("* ok: {} bytes, sha256 {actual}", saved.len());
    println!("* saved to {}", path.display());
    Ok(())
}
