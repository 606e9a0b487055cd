//! TCP front end of the simulator.
//!
//! One task is spawned per accepted connection. A connection is served until the
//! peer closes it, sends an empty line, or a transport error occurs. Handlers
//! share nothing except the [`CommandProtocol`] (and through it the device state).

use crate::config::SimConfig;
use crate::device::SharedDevice;
use crate::error::SimResult;
use crate::noise::NoiseSource;
use crate::protocol::{
    Command, CommandProtocol, CMD_GET_STATUS, CMD_NEXT_POINT, CMD_RESET_POINT,
    CMD_SET_PARAMS_PREFIX, CMD_START_COLLECT,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn, Instrument};

/// Listener plus the protocol shared by every connection it accepts.
pub struct SimulatorServer {
    listener: TcpListener,
    protocol: CommandProtocol,
    read_buffer_size: usize,
}

impl SimulatorServer {
    /// Bind the listener described by `config` and set up fresh device state.
    pub async fn bind(config: &SimConfig) -> SimResult<Self> {
        let listener = TcpListener::bind(config.server.bind_address()).await?;
        Ok(Self::from_listener(listener, config))
    }

    /// Serve on an already bound listener (tests bind port 0).
    pub fn from_listener(listener: TcpListener, config: &SimConfig) -> Self {
        let protocol = CommandProtocol::new(
            SharedDevice::new(config.parameters.clone()),
            Arc::new(NoiseSource::new(config.collect.noise_seed)),
            config.collect.settings(),
        );
        Self {
            listener,
            protocol,
            read_buffer_size: config.server.read_buffer_size,
        }
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SimResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever.
    pub async fn run(self) -> SimResult<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Connections already being served keep running after the accept loop ends.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> SimResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!("Simulator listening on {}", addr);
        info!(
            "Supported commands: {}, {}, {}, {}, {}<json>",
            CMD_START_COLLECT, CMD_NEXT_POINT, CMD_RESET_POINT, CMD_GET_STATUS, CMD_SET_PARAMS_PREFIX
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((socket, peer)) => {
                            let protocol = self.protocol.clone();
                            let buffer_size = self.read_buffer_size;
                            let span = tracing::info_span!("client", %peer);
                            tokio::spawn(
                                async move {
                                    if let Err(e) = handle_client(socket, peer, protocol, buffer_size).await {
                                        warn!("Client {} closed on error: {}", peer, e);
                                    }
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
            }
        }
        Ok(())
    }
}

async fn handle_client(
    mut socket: TcpStream,
    peer: SocketAddr,
    protocol: CommandProtocol,
    buffer_size: usize,
) -> SimResult<()> {
    info!("Client connected: {}", peer);
    let (mut reader, mut writer) = socket.split();
    let result = serve_connection(&mut reader, &mut writer, &protocol, buffer_size).await;
    info!("Client {} disconnected", peer);
    result
}

/// Drive the protocol over one byte stream.
///
/// Each read is treated as exactly one command line; nothing is buffered across
/// reads. Returns `Ok(())` on peer close or an empty line, and the first decode or
/// I/O error otherwise. Errors are not logged here; the caller reports them.
pub async fn serve_connection<R, W>(
    reader: &mut R,
    writer: &mut W,
    protocol: &CommandProtocol,
    buffer_size: usize,
) -> SimResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            debug!("Peer closed the connection");
            return Ok(());
        }

        let text = std::str::from_utf8(&buf[..n])?;

        let Some(command) = Command::parse(text) else {
            debug!("Empty command, closing connection");
            return Ok(());
        };
        debug!(?command, "Command received");

        protocol.execute(command, writer).await?;
    }
}
