use futures::StreamExt;
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;

use crate::{
    error::EnqueueError,
    protocol::{Frame, FrameCodec, ResponseSender},
    scheduler::{Job, JobQueue},
};

/// What happened on a connection, reported when it closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub queued: usize,
    pub dropped: usize,
    pub malformed: usize,
}

/// Reads frames from one client until `EXIT`, end of stream, or a read error.
///
/// Every job frame is enqueued without waiting and carries a handle to `tx`, so
/// workers can answer after this loop has moved on. Malformed frames are logged and
/// skipped. A full queue drops the job.
///
/// # Arguments
/// * `rx` - The read half of the connection.
/// * `tx` - The write half, shared by every response to this client.
/// * `queue` - Where jobs go.
/// * `max_frame_len` - Frames larger than this are discarded.
pub async fn handle_connection<R, W>(
    rx: R,
    tx: W,
    queue: &JobQueue,
    max_frame_len: usize,
) -> ConnectionSummary
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let reply = ResponseSender::new(tx);
    let mut frames = FramedRead::new(rx, FrameCodec::new(max_frame_len));
    let mut summary = ConnectionSummary::default();

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("connection read failed: {e}");
                break;
            }
        };

        match frame {
            Ok(Frame::Exit) => {
                info!("client sent EXIT");
                break;
            }
            Ok(Frame::Job(payload)) => {
                let (user, idx) = (payload.username.clone(), payload.idx);
                match queue.try_enqueue(Job::new(payload, reply.clone())) {
                    Ok(()) => {
                        summary.queued += 1;
                        info!("job queued: user={user} idx={idx}");
                    }
                    Err(EnqueueError::Full(_)) => {
                        summary.dropped += 1;
                        warn!("job lost: user={user} idx={idx} queue full");
                    }
                    Err(EnqueueError::Closed(_)) => {
                        summary.dropped += 1;
                        warn!("job lost: user={user} idx={idx} queue closed");
                    }
                }
            }
            Err(e) => {
                summary.malformed += 1;
                warn!("malformed frame: {e}");
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;
    use crate::protocol::{encode_job_frame, JobPayload};

    fn frame(idx: i64) -> Vec<u8> {
        let payload = JobPayload {
            username: "ana".into(),
            algorithm: "cgnr".into(),
            model: "model.csv".into(),
            signal: "signal".into(),
            idx,
        };
        encode_job_frame("ana", &payload).unwrap()
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_queued_in_order() {
        let first = frame(0);
        let second = frame(1);
        let (head, tail) = first.split_at(first.len() / 2);

        let rx = Builder::new()
            .read(head)
            .read(tail)
            .read(&second)
            .read(b"EXIT")
            .build();
        let queue = JobQueue::bounded(4);

        let summary = handle_connection(rx, tokio::io::sink(), &queue, 1 << 16).await;

        assert_eq!(
            summary,
            ConnectionSummary {
                queued: 2,
                ..Default::default()
            }
        );
        assert_eq!(queue.recv().await.unwrap().payload.idx, 0);
        assert_eq!(queue.recv().await.unwrap().payload.idx, 1);
    }

    #[tokio::test]
    async fn malformed_frames_do_not_close_the_connection() {
        let mut bytes = b"hello there\n".to_vec();
        bytes.extend_from_slice(b"2_|ana|not json\n");
        bytes.extend_from_slice(&frame(5));

        let rx = Builder::new().read(&bytes).build();
        let queue = JobQueue::bounded(4);

        let summary = handle_connection(rx, tokio::io::sink(), &queue, 1 << 16).await;

        assert_eq!(summary.queued, 1);
        assert_eq!(summary.malformed, 2);
        assert_eq!(queue.recv().await.unwrap().payload.idx, 5);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let mut bytes = Vec::new();
        for idx in 0..3 {
            bytes.extend_from_slice(&frame(idx));
        }

        let rx = Builder::new().read(&bytes).build();
        let queue = JobQueue::bounded(1);

        let summary = handle_connection(rx, tokio::io::sink(), &queue, 1 << 16).await;

        assert_eq!(summary.queued, 1);
        assert_eq!(summary.dropped, 2);
        assert_eq!(queue.recv().await.unwrap().payload.idx, 0);
    }

    #[tokio::test]
    async fn exit_stops_reading() {
        let mut bytes = b"EXIT:ana left\n".to_vec();
        bytes.extend_from_slice(&frame(9));

        let rx = Builder::new().read(&bytes).build();
        let queue = JobQueue::bounded(4);

        let summary = handle_connection(rx, tokio::io::sink(), &queue, 1 << 16).await;

        assert_eq!(summary, ConnectionSummary::default());
        assert!(queue.is_empty());
    }
}
