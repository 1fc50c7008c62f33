// src/server/mod.rs

//! NDJSON server over a Unix domain socket (named pipe on Windows).
//!
//! Each connection is one task. Requests on a connection are processed in
//! issue order so responses correlate positionally; change events for the
//! connection's subscriptions are multiplexed onto the same stream between
//! response lines. Malformed lines are logged and dropped; they never
//! terminate the connection or desynchronize the response queue.

pub mod protocol;
pub mod session;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::daemon::Daemon;
use crate::watch::backend::WatchBackend;
use crate::watch::registry::ChangeNotification;

use protocol::{ChangeEvent, Request};
use session::Session;

/// Per-connection buffer for pending change notifications.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// Restore persisted watches, bind the socket and serve until the listener
/// fails. Bind failures are fatal.
pub async fn run<B: WatchBackend>(
    daemon: Arc<Daemon<B>>,
    socket_path: &str,
) -> anyhow::Result<()> {
    daemon.restore();
    accept_connections(daemon, socket_path).await
}

#[cfg(unix)]
async fn accept_connections<B: WatchBackend>(
    daemon: Arc<Daemon<B>>,
    socket_path: &str,
) -> anyhow::Result<()> {
    // Refuse to start when a live daemon already answers; a socket file
    // nobody answers on is stale and safe to remove.
    if tokio::net::UnixStream::connect(socket_path).await.is_ok() {
        anyhow::bail!("another daemon is already listening on {socket_path}");
    }
    let _ = std::fs::remove_file(socket_path);

    let listener = tokio::net::UnixListener::bind(socket_path)
        .with_context(|| format!("binding {socket_path}"))?;
    info!(socket = %socket_path, "daemon listening");

    loop {
        let (stream, _) = listener.accept().await?;
        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(daemon, stream).await {
                debug!(error = %e, "connection closed");
            }
        });
    }
}

#[cfg(windows)]
async fn accept_connections<B: WatchBackend>(
    daemon: Arc<Daemon<B>>,
    pipe_name: &str,
) -> anyhow::Result<()> {
    use tokio::net::windows::named_pipe::ServerOptions;

    let mut server = ServerOptions::new()
        .first_pipe_instance(true)
        .create(pipe_name)
        .with_context(|| format!("creating pipe {pipe_name}"))?;
    info!(pipe = %pipe_name, "daemon listening");

    loop {
        server.connect().await?;
        let stream = server;

        // The next instance must exist before we start serving this one.
        server = ServerOptions::new()
            .first_pipe_instance(false)
            .create(pipe_name)?;

        let daemon = Arc::clone(&daemon);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(daemon, stream).await {
                debug!(error = %e, "connection closed");
            }
        });
    }
}

/// Serve one client connection, then tear down its subscriptions.
async fn handle_connection<B, S>(daemon: Arc<Daemon<B>>, stream: S) -> anyhow::Result<()>
where
    B: WatchBackend,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut session = Session::new();
    let result = connection_loop(&daemon, stream, &mut session).await;
    daemon.drop_connection(session.into_subscriptions());
    result
}

async fn connection_loop<B, S>(
    daemon: &Arc<Daemon<B>>,
    stream: S,
    session: &mut Session,
) -> anyhow::Result<()>
where
    B: WatchBackend,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    // This connection's delivery channel; `watch` requests register clones
    // of the sender with the registry.
    let (event_tx, mut event_rx) =
        mpsc::channel::<ChangeNotification>(NOTIFICATION_CHANNEL_CAPACITY);

    loop {
        tokio::select! {
            maybe_line = lines.next_line() => {
                let Some(line) = maybe_line? else {
                    break; // EOF
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let request = match serde_json::from_str::<Request>(trimmed) {
                    Ok(request) => request,
                    Err(e) => {
                        debug!(error = %e, "dropping malformed request line");
                        continue;
                    }
                };

                let response = session.process(daemon, request, &event_tx).await;
                let mut json = serde_json::to_string(&response)?;
                json.push('\n');
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }

            Some(note) = event_rx.recv() => {
                let event = ChangeEvent {
                    key: note.key,
                    paths: note.paths,
                };
                let mut json = serde_json::to_string(&event)?;
                json.push('\n');
                writer.write_all(json.as_bytes()).await?;
                writer.flush().await?;
            }
        }
    }

    Ok(())
}
