use ndarray::{Array1, ArrayView1, ArrayView2};

use super::{final_error, norm, Reconstruction, SolverParams};

/// Conjugate gradient on the normal equations, residual form.
///
/// # Arguments
/// * `h` - The `m × n` sensing matrix.
/// * `g` - The length `m` signal.
/// * `params` - Iteration bounds.
///
/// # Panics
/// If `h` has a row count different from `g.len()`. Use `solver::reconstruct` for
/// checked input.
pub fn cgnr(h: ArrayView2<f64>, g: ArrayView1<f64>, params: &SolverParams) -> Reconstruction {
    let eps = params.epsilon;

    // f0 = 0, so r0 = g.
    let mut f = Array1::<f64>::zeros(h.ncols());
    let mut r = g.to_owned();
    let z = h.t().dot(&r);
    let mut z_dot = z.dot(&z);
    let mut p = z;

    let r0_norm = norm(&r);
    let mut relative_residual = 1.0;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        let w = h.dot(&p);
        let alpha = z_dot / (w.dot(&w) + eps);

        f.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &w);

        let z_next = h.t().dot(&r);
        let z_next_dot = z_next.dot(&z_next);
        let beta = z_next_dot / (z_dot + eps);

        p.mapv_inplace(|v| v * beta);
        p += &z_next;
        z_dot = z_next_dot;

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
    use crate::solver::tests::{near_identity, tall_matrix};

    #[test]
    fn identity_is_solved_in_one_step() {
        let h = near_identity(16, 0.0);
        let g = Array1::from_shape_fn(16, |i| (i as f64).sqrt());

        let res = cgnr(h.view(), g.view(), &SolverParams::default());

        assert_eq!(res.iterations, 5);
        for (f, g) in res.image.iter().zip(&g) {
            assert!((f - g).abs() < 1e-9);
        }
    }

    #[test]
    fn residual_does_not_blow_up() {
        let h = tall_matrix();
        let g = Array1::from_shape_fn(12, |i| 1.0 + i as f64);

        let res = cgnr(h.view(), g.view(), &SolverParams::default());

        assert!(res.relative_residual.is_finite());
        assert!(res.relative_residual <= 1.0 + 1e-9);
        assert!(res.error <= 1.0 + 1e-9);
    }

    #[test]
    fn zero_signal_stays_at_zero() {
        let h = tall_matrix();
        let g = Array1::zeros(12);

        let res = cgnr(h.view(), g.view(), &SolverParams::default());

        assert_eq!(res.iterations, 5);
        assert!(res.image.iter().all(|&v| v == 0.0));
    }
}
