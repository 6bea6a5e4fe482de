//! The write side of a client connection.

use std::{io, sync::Arc};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::Mutex,
};

use super::msg::Response;
use crate::error::JobError;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// A cloneable handle to one connection's writer.
///
/// Every job read from a connection carries a clone. The lock is per connection,
/// so responses to the same client never interleave while different clients
/// never wait on each other.
#[derive(Clone)]
pub struct ResponseSender {
    tx: Arc<Mutex<Writer>>,
}

impl ResponseSender {
    /// Creates a new `ResponseSender`.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub fn new<W>(tx: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            tx: Arc::new(Mutex::new(Box::new(tx))),
        }
    }

    /// Serializes `response` and writes it as a single line.
    ///
    /// # Arguments
    /// * `response` - The finished job's response.
    ///
    /// # Returns
    /// A `JobError::Encode` if serialization fails or `JobError::Send` if the write fails.
    pub async fn send(&self, response: &Response) -> Result<(), JobError> {
        let line = response.to_line()?;
        self.send_line(&line).await.map_err(JobError::Send)
    }

    /// Writes already encoded bytes under the connection lock.
    ///
    /// # Arguments
    /// * `line` - The bytes to write, in one piece.
    pub async fn send_line(&self, line: &[u8]) -> io::Result<()> {
        let mut tx = self.tx.lock().await;
        tx.write_all(line).await?;
        tx.flush().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;

    #[tokio::test]
    async fn concurrent_sends_do_not_interleave() {
        const SENDERS: usize = 8;
        const LINE_LEN: usize = 4096;

        let (local, mut remote) = tokio::io::duplex(1024);
        let sender = ResponseSender::new(local);

        let mut tasks = Vec::new();
        for i in 0..SENDERS {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                let mut line = vec![b'a' + i as u8; LINE_LEN - 1];
                line.push(b'\n');
                sender.send_line(&line).await
            }));
        }

        let reader = tokio::spawn(async move {
            let mut buf = vec![0; SENDERS * LINE_LEN];
            remote.read_exact(&mut buf).await.map(|_| buf)
        });

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let buf = reader.await.unwrap().unwrap();
        for line in buf.split(|&b| b == b'\n').filter(|l| !l.is_empty()) {
            assert_eq!(line.len(), LINE_LEN - 1);
            assert!(line.iter().all(|&b| b == line[0]));
        }
    }
}
