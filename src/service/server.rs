use std::{io, net::SocketAddr};

use log::{error, info};
use tokio::{
    net::{TcpListener, ToSocketAddrs},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use super::connection::handle_connection;
use crate::scheduler::JobQueue;

/// The TCP front end, one task per accepted client.
pub struct Server {
    listener: TcpListener,
    queue: JobQueue,
    max_frame_len: usize,
    connections: JoinSet<()>,
}

impl Server {
    /// Binds a new `Server`.
    ///
    /// # Arguments
    /// * `addr` - The address to listen on.
    /// * `queue` - Where parsed jobs are pushed.
    /// * `max_frame_len` - The per-frame size limit for every connection.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        queue: JobQueue,
        max_frame_len: usize,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self {
            listener,
            queue,
            max_frame_len,
            connections: JoinSet::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients until `cancel` fires.
    ///
    /// A failed accept is logged and the loop goes on. Open connections are aborted
    /// on the way out; jobs they already queued stay queued.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("listening at {}", self.describe_addr());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => error!("accept failed: {e}"),
                },
                Some(res) = self.connections.join_next(), if !self.connections.is_empty() => {
                    if let Err(e) = res {
                        error!("connection task failed: {e}");
                    }
                }
            }
        }

        self.connections.shutdown().await;
        info!("stopped listening");
    }

    fn spawn_connection(&mut self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        info!("client connected from {peer}");

        let (rx, tx) = stream.into_split();
        let queue = self.queue.clone();
        let max_frame_len = self.max_frame_len;

        self.connections.spawn(async move {
            let summary = handle_connection(rx, tx, &queue, max_frame_len).await;
            info!(
                "client {peer} disconnected: queued={} dropped={} malformed={}",
                summary.queued, summary.dropped, summary.malformed
            );
        });
    }

    fn describe_addr(&self) -> String {
        self.local_addr()
            .map_or_else(|e| format!("<unknown: {e}>"), |addr| addr.to_string())
    }
}
