use std::{env, path::PathBuf, sync::Arc};

use anyhow::Context;
use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use tomograph::{
    resources::{JsonHistoryStore, ResourceMonitor, SysinfoMonitor},
    storage::CsvSource,
    telemetry::PerformanceLog,
    Pipeline, Scheduler, Server, ServerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = env::args_os().nth(1).map(PathBuf::from);
    let cfg = ServerConfig::load(path.as_deref()).context("loading configuration")?;

    let monitor: Arc<dyn ResourceMonitor> = Arc::new(SysinfoMonitor::new(cfg.sample_window()));
    let capacity = monitor.capacity();
    info!(
        "host has {} logical cores and {} bytes of memory",
        capacity.logical_cores, capacity.total_memory
    );

    let source = Arc::new(CsvSource::new(&cfg.signal_root, cfg.signal_extension.clone()));
    let history = Arc::new(JsonHistoryStore::new(&cfg.history_path));
    let pipeline = Pipeline::new(source, cfg.solver_params());
    let scheduler = Scheduler::start(cfg.scheduler_config(), Arc::clone(&monitor), history, pipeline);

    let cancel = CancellationToken::new();

    let telemetry = cfg.telemetry_path.clone().map(|path| {
        let log = PerformanceLog::new(path, cfg.telemetry_interval(), Arc::clone(&monitor));
        tokio::spawn(log.run(cancel.child_token()))
    });

    let server = Server::bind(cfg.addr(), scheduler.submitter(), cfg.max_frame_len)
        .await
        .with_context(|| format!("binding {}", cfg.addr()))?;

    let run = server.run(cancel.child_token());
    tokio::pin!(run);

    tokio::select! {
        _ = &mut run => {}
        res = signal::ctrl_c() => {
            match res {
                Ok(()) => info!("received SIGINT, shutting down"),
                Err(e) => error!("cannot listen for SIGINT: {e}"),
            }
            cancel.cancel();
            run.await;
        }
    }

    cancel.cancel();
    scheduler.shutdown().await;

    if let Some(task) = telemetry {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("performance report failed: {e}"),
            Err(e) => error!("performance task failed: {e}"),
        }
    }

    Ok(())
}
