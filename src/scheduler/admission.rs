use crate::resources::{ResourceEstimate, Usage};

/// Utilisation ceilings, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub cpu: f64,
    pub mem: f64,
}

/// The gate's verdict for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Defer { cpu: bool, mem: bool },
}

/// Decides whether a job fits in the current headroom.
///
/// CPU and memory are tested independently; exceeding either ceiling defers the job.
/// Landing exactly on a ceiling is still admitted.
pub fn admit(usage: Usage, estimate: &ResourceEstimate, limits: Limits) -> Admission {
    let cpu = usage.cpu + estimate.cpu > limits.cpu;
    let mem = usage.mem + estimate.mem > limits.mem;

    if cpu || mem {
        Admission::Defer { cpu, mem }
    } else {
        Admission::Admit
    }
}
