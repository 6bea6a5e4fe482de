use std::{fs, io, net::SocketAddr, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

use tomograph::{
    error::SampleError,
    protocol::{encode_job_frame, JobPayload, Response},
    resources::{Capacity, HistoryEntry, ResourceMonitor, Usage},
    scheduler::{Limits, SchedulerConfig},
    solver::SolverParams,
    storage::CsvSource,
    Pipeline, Scheduler, Server,
};

struct IdleHost;

#[async_trait]
impl ResourceMonitor for IdleHost {
    async fn current_usage(&self) -> Result<Usage, SampleError> {
        Ok(Usage { cpu: 1.0, mem: 1.0 })
    }

    fn capacity(&self) -> Capacity {
        Capacity {
            logical_cores: 4,
            total_memory: 1 << 30,
        }
    }
}

struct Harness {
    addr: SocketAddr,
    model: String,
    cancel: CancellationToken,
    server: JoinHandle<()>,
    scheduler: Scheduler,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn start(workers: usize) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        write_fixtures(dir.path())?;

        let source = Arc::new(CsvSource::new(dir.path(), "csv"));
        let pipeline = Pipeline::new(source, SolverParams::default());
        let cfg = SchedulerConfig {
            workers,
            queue_capacity: 16,
            limits: Limits {
                cpu: 90.0,
                mem: 90.0,
            },
            max_defer: Duration::from_secs(1),
            max_requeues: None,
            sample_retry: Duration::from_millis(10),
        };
        let history: Vec<HistoryEntry> = Vec::new();
        let scheduler = Scheduler::start(cfg, Arc::new(IdleHost), Arc::new(history), pipeline);

        let server = Server::bind("127.0.0.1:0", scheduler.submitter(), 1 << 16).await?;
        let addr = server.local_addr()?;
        let cancel = CancellationToken::new();
        let server = tokio::spawn(server.run(cancel.clone()));

        Ok(Self {
            addr,
            model: dir.path().join("model-3x3.csv").display().to_string(),
            cancel,
            server,
            scheduler,
            _dir: dir,
        })
    }

    fn job(&self, username: &str, algorithm: &str, idx: i64) -> Vec<u8> {
        let payload = JobPayload {
            username: username.into(),
            algorithm: algorithm.into(),
            model: self.model.clone(),
            signal: "signals/signal-3x3-0".into(),
            idx,
        };
        encode_job_frame(username, &payload).unwrap()
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.server.await.unwrap();
        self.scheduler.shutdown().await;
    }
}

/// A 9x9 model close to the identity and a matching 9 sample signal.
fn write_fixtures(dir: &Path) -> io::Result<()> {
    let mut model = String::new();
    for i in 0..9 {
        let row: Vec<String> = (0..9)
            .map(|j| match j {
                j if j == i => "1".to_string(),
                j if j == i + 1 => "0.01".to_string(),
                _ => "0".to_string(),
            })
            .collect();
        model.push_str(&row.join(","));
        model.push('\n');
    }
    fs::write(dir.join("model-3x3.csv"), model)?;

    fs::create_dir(dir.join("signals"))?;
    let signal: Vec<String> = (0..9).map(|i| format!("{}", (i % 3) as f32 * 0.5)).collect();
    fs::write(dir.join("signals/signal-3x3-0.csv"), signal.join("\n"))
}

async fn next_response<R>(lines: &mut tokio::io::Lines<R>) -> Response
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let line = timeout(Duration::from_secs(10), lines.next_line())
        .await
        .expect("response in time")
        .unwrap()
        .expect("a response line");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_round_trip_over_tcp() -> io::Result<()> {
    let harness = Harness::start(2).await?;

    let stream = TcpStream::connect(harness.addr).await?;
    let (rx, mut tx) = stream.into_split();
    tx.write_all(&harness.job("ana", "cgnr", 0)).await?;

    let mut lines = BufReader::new(rx).lines();
    let response = next_response(&mut lines).await;

    assert_eq!(response.kind, "2_");
    let header = &response.payload.header;
    assert_eq!(header.username, "ana");
    assert_eq!(header.index, 0);
    assert_eq!(header.algorithm, "cgnr");
    assert_eq!(header.signal, "signals/signal-3x3-0");
    assert_eq!(header.iters, 5);
    assert_eq!(header.size, response.payload.image.len().to_string());

    let png = STANDARD.decode(&response.payload.image).unwrap();
    let img = image::load_from_memory(&png).unwrap().to_luma8();
    assert_eq!(img.dimensions(), (3, 3));

    tx.write_all(b"EXIT").await?;
    drop(tx);
    harness.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_frames_each_get_a_response() -> io::Result<()> {
    let harness = Harness::start(1).await?;

    let mut bytes = harness.job("bob", "CGNE", 1);
    bytes.extend_from_slice(b"not a frame\n");
    bytes.extend(harness.job("bob", "cgnr", 2));
    bytes.extend(harness.job("bob", "sirt", 3));
    bytes.extend(harness.job("bob", "cgne", 4));

    let stream = TcpStream::connect(harness.addr).await?;
    let (rx, mut tx) = stream.into_split();
    tx.write_all(&bytes).await?;

    let mut lines = BufReader::new(rx).lines();
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(next_response(&mut lines).await.payload.header.index);
    }

    // One worker serves the queue in arrival order; the unknown algorithm gets no answer.
    assert_eq!(seen, vec![1, 2, 4]);

    harness.stop().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clients_only_see_their_own_responses() -> io::Result<()> {
    let harness = Harness::start(2).await?;

    let mut clients = Vec::new();
    for (user, idx) in [("ana", 10), ("bob", 20)] {
        let stream = TcpStream::connect(harness.addr).await?;
        let (rx, mut tx) = stream.into_split();
        tx.write_all(&harness.job(user, "cgnr", idx)).await?;
        clients.push((user, idx, BufReader::new(rx).lines(), tx));
    }

    for (user, idx, mut lines, _tx) in clients {
        let response = next_response(&mut lines).await;
        assert_eq!(response.payload.header.username, user);
        assert_eq!(response.payload.header.index, idx);
    }

    harness.stop().await;
    Ok(())
}

#[tokio::test]
async fn exit_closes_the_connection() -> io::Result<()> {
    let harness = Harness::start(1).await?;

    let mut stream = TcpStream::connect(harness.addr).await?;
    stream.write_all(b"EXIT:ana left\n").await?;

    // Nothing was queued, so nothing holds the write half and the server closes it.
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("server should close the connection")?;
    assert_eq!(read, 0);

    harness.stop().await;
    Ok(())
}
