//! WebSocket transport: listener, per-connection tasks and frame dispatch.
//!
//! Each accepted socket gets three tasks: a writer draining the outbound
//! channel into the sink, a heartbeat probing liveness, and the read loop
//! below, which decodes frames and dispatches them to whichever handler the
//! [`RouteTable`] currently names for the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::game::session::SessionCommand;
use crate::matchmaking::manager::ManagerEvent;
use crate::net::connection::{
    spawn_heartbeat, ConnectionId, Liveness, Outbound, Route, RouteTable,
};
use crate::net::protocol::{self, ServerMessage};

/// Accepts WebSocket connections and runs their read loops
pub struct GameServer {
    listener: TcpListener,
    routes: Arc<RouteTable>,
    manager_tx: mpsc::UnboundedSender<ManagerEvent>,
    heartbeat_interval: Duration,
}

impl GameServer {
    pub async fn bind(
        config: &ServerConfig,
        routes: Arc<RouteTable>,
        manager_tx: mpsc::UnboundedSender<ManagerEvent>,
    ) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            routes,
            manager_tx,
            heartbeat_interval: config.heartbeat_interval,
        })
    }

    /// The bound address, useful when the port was 0
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop, runs until the process is shut down
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let routes = self.routes.clone();
            let manager_tx = self.manager_tx.clone();
            let heartbeat_interval = self.heartbeat_interval;
            tokio::spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer, routes, manager_tx, heartbeat_interval).await
                {
                    debug!("connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    routes: Arc<RouteTable>,
    manager_tx: mpsc::UnboundedSender<ManagerEvent>,
    heartbeat_interval: Duration,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let is_close = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || is_close {
                break;
            }
        }
    });

    let conn = routes.register().await;
    info!("connection {} accepted from {}", conn, peer);

    let liveness = Arc::new(Liveness::new());
    let (kill_tx, mut kill_rx) = watch::channel(false);
    let heartbeat = spawn_heartbeat(
        conn,
        outbound.clone(),
        liveness.clone(),
        kill_tx,
        heartbeat_interval,
    );

    let _ = manager_tx.send(ManagerEvent::Connected { conn, outbound: outbound.clone() });

    loop {
        tokio::select! {
            _ = kill_rx.changed() => break,
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_text(conn, &text, &routes, &manager_tx, &outbound).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    send_error(&outbound, "Binary messages are not supported");
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = outbound.send(Message::Pong(data));
                }
                Some(Ok(Message::Pong(_))) => liveness.mark_alive(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("connection {} read error: {}", conn, e);
                    break;
                }
            },
        }
    }

    heartbeat.abort();
    if let Some(Route::Session(commands)) = routes.route_of(conn).await {
        let _ = commands.send(SessionCommand::Disconnected { conn });
    }
    let _ = manager_tx.send(ManagerEvent::Disconnected { conn });
    routes.remove(conn).await;
    writer.abort();
    info!("connection {} closed", conn);
    Ok(())
}

/// Decode one text frame and hand it to the connection's current owner
async fn handle_text(
    conn: ConnectionId,
    text: &str,
    routes: &RouteTable,
    manager_tx: &mpsc::UnboundedSender<ManagerEvent>,
    outbound: &Outbound,
) {
    let msg = match protocol::decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("connection {} sent an undecodable frame: {}", conn, e);
            send_error(outbound, &e.to_string());
            return;
        }
    };

    match routes.route_of(conn).await {
        Some(Route::Session(commands)) => {
            // A session that just ended may have dropped its receiver before
            // the route was released, those frames belong to the manager
            if let Err(mpsc::error::SendError(cmd)) =
                commands.send(SessionCommand::Frame { conn, msg })
            {
                if let SessionCommand::Frame { msg, .. } = cmd {
                    let _ = manager_tx.send(ManagerEvent::Frame { conn, msg });
                }
            }
        }
        Some(Route::Manager) => {
            let _ = manager_tx.send(ManagerEvent::Frame { conn, msg });
        }
        None => {}
    }
}

fn send_error(outbound: &Outbound, message: &str) {
    let frame = ServerMessage::Error { message: message.to_string() };
    if let Ok(text) = protocol::encode(&frame) {
        let _ = outbound.send(Message::Text(text));
    }
}
