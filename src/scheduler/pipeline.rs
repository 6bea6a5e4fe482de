use std::{sync::Arc, time::Instant};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Local;
use log::info;
use tokio::task;

use super::Job;
use crate::{
    error::JobError,
    protocol::{JobPayload, Response, ResponseHeader},
    solver::{apply_signal_gain, reconstruct, Algorithm, SolverParams},
    storage::{render_png, DataSource},
};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// What the blocking half of a job hands back.
struct Rendered {
    png: Vec<u8>,
    iterations: usize,
    error: f64,
}

/// Runs admitted jobs from data loading to the response write.
#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn DataSource>,
    params: SolverParams,
}

impl Pipeline {
    /// Creates a new `Pipeline`.
    ///
    /// # Arguments
    /// * `source` - Where models and signals are loaded from.
    /// * `params` - Iteration bounds handed to the solver.
    pub fn new(source: Arc<dyn DataSource>, params: SolverParams) -> Self {
        Self { source, params }
    }

    /// Reconstructs the job's image and writes the response to its connection.
    ///
    /// Loading, solving and encoding run on the blocking pool. The response is
    /// only written if every step succeeds; failures are returned and the client
    /// hears nothing.
    pub async fn process(&self, job: Job) -> Result<(), JobError> {
        let Job { payload, reply, .. } = job;

        let start_dt = Local::now();
        let started = Instant::now();

        let source = Arc::clone(&self.source);
        let params = self.params;
        let request = payload.clone();
        let rendered = task::spawn_blocking(move || run_job(source.as_ref(), &request, &params))
            .await
            .map_err(JobError::Join)??;

        let image = STANDARD.encode(&rendered.png);
        let time = started.elapsed().as_secs_f64();
        let end_dt = Local::now();

        let header = ResponseHeader {
            username: payload.username,
            index: payload.idx,
            algorithm: payload.algorithm,
            model: payload.model,
            signal: payload.signal,
            start_dt: start_dt.format(DATETIME_FORMAT).to_string(),
            end_dt: end_dt.format(DATETIME_FORMAT).to_string(),
            size: image.len().to_string(),
            iters: rendered.iterations,
            time,
        };

        info!(
            "job done: user={} idx={} algorithm={} iters={} error={:.3e} time={time:.3}s",
            header.username, header.index, header.algorithm, header.iters, rendered.error
        );

        reply.send(&Response::new(header, image)).await
    }
}

fn run_job(
    source: &dyn DataSource,
    payload: &JobPayload,
    params: &SolverParams,
) -> Result<Rendered, JobError> {
    let algorithm: Algorithm = payload.algorithm.parse()?;

    let h = source.load_matrix(&payload.model)?;
    let mut g = source.load_vector(&payload.signal)?;
    apply_signal_gain(&mut g);

    let reconstruction = reconstruct(algorithm, h.view(), g.view(), params)?;
    let png = render_png(reconstruction.image.view())?;

    Ok(Rendered {
        png,
        iterations: reconstruction.iterations,
        error: reconstruction.error,
    })
}
