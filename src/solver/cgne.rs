use ndarray::{Array1, ArrayView1, ArrayView2};

use super::{final_error, norm, Reconstruction, SolverParams};

/// Conjugate gradient on the normal equations, error form.
///
/// Stops before the update when `‖Hp‖² + ε` is not above `ε` (an ill conditioned or
/// non-finite direction).
///
/// # Arguments
/// * `h` - The `m × n` sensing matrix.
/// * `g` - The length `m` signal.
/// * `params` - Iteration bounds.
///
/// # Panics
/// If `h` has a row count different from `g.len()`. Use `solver::reconstruct` for
/// checked input.
pub fn cgne(h: ArrayView2<f64>, g: ArrayView1<f64>, params: &SolverParams) -> Reconstruction {
    let eps = params.epsilon;

    // f0 = 0, so r0 = g.
    let mut f = Array1::<f64>::zeros(h.ncols());
    let mut r = g.to_owned();
    let mut p = h.t().dot(&r);
    let mut r_dot = r.dot(&r);

    let r0_norm = norm(&r);
    let mut relative_residual = 1.0;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        let hp = h.dot(&p);
        let denom = hp.dot(&hp) + eps;
        if denom.is_nan() || denom < eps {
            break;
        }

        let alpha = r_dot / denom;
        f.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &hp);

        let r_next_dot = r.dot(&r);
        let beta = r_next_dot / (r_dot + eps);

        p.mapv_inplace(|v| v * beta);
        p += &h.t().dot(&r);
        r_dot = r_next_dot;

        iterations += 1;
        relative_residual = norm(&r) / (r0_norm + eps);

        if params.converged(iterations, relative_residual) {
            break;
        }
    }

    let error = final_error(h, g, &f, eps);

    Reconstruction {
        image: f,
        iterations,
        relative_residual,
        error,
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array1;

    use super::*;
    use crate::solver::{
        apply_signal_gain,
        tests::{near_identity, phantom},
    };

    #[test]
    fn near_identity_converges() {
        let h = near_identity(900, 0.01);
        let mut g = phantom(900);
        apply_signal_gain(&mut g);

        let res = cgne(h.view(), g.view(), &SolverParams::default());

        assert_eq!(res.iterations, 5);
        assert!(res.error < 1e-4, "residual error {}", res.error);
    }

    #[test]
    fn non_finite_direction_stops_before_updating() {
        let h = near_identity(4, 0.0);
        let g = Array1::from(vec![1.0, f64::NAN, 0.0, 2.0]);

        let res = cgne(h.view(), g.view(), &SolverParams::default());

        assert_eq!(res.iterations, 0);
        assert!(res.image.iter().all(|&v| v == 0.0));
    }
}
