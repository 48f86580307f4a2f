// src/solvers/tableau.rs
//! RI5 coefficient tableau
//!
//! Rößler's RI5 scheme (weak order 2 for Itô SDEs, order 3 on the
//! deterministic part) in extended Butcher form:
//!
//! ```text
//!  c⁽⁰⁾  | A⁽⁰⁾            B⁽⁰⁾
//!   0    |
//!   1    | 1               1/3
//!  5/12  | 25/144 35/144   -5/6  0
//!
//!  c⁽¹⁾  | A⁽¹⁾            B⁽¹⁾           c⁽²⁾ | A⁽²⁾   B⁽²⁾
//!   0    |                                 0   |
//!  1/4   | 1/4             1/2             0   | 0      1
//!  1/4   | 1/4  0          -1/2  0         0   | 0  0   -1  0
//!
//!  α    = (1/10, 3/14, 24/35)
//!  β⁽¹⁾ = (1, -1, -1)        β⁽²⁾ = (0, 1, -1)
//!  β⁽³⁾ = (1/2, -1/4, -1/4)  β⁽⁴⁾ = (0, 1/2, -1/2)
//! ```
//!
//! All coefficient matrices are strictly lower triangular, so the three
//! stages are explicit and can be built one after the other.

pub const STAGES: usize = 3;

pub type Matrix = [[f64; STAGES]; STAGES];
pub type Vector = [f64; STAGES];

#[derive(Debug, Clone, PartialEq)]
pub struct Ri5Tableau {
    /// Drift-stage coefficients applied to drift evaluations
    pub a0: Matrix,
    /// Drift-stage coefficients applied to noise evaluations (× Î_l)
    pub b0: Matrix,
    /// Noise-stage `H⁽ᵏ⁾` coefficients applied to drift evaluations
    pub a1: Matrix,
    /// Noise-stage `H⁽ᵏ⁾` coefficients applied to noise evaluations (× √h)
    pub b1: Matrix,
    /// Noise-stage `Ĥ⁽ᵏ⁾` coefficients applied to drift evaluations
    pub a2: Matrix,
    /// Noise-stage `Ĥ⁽ᵏ⁾` coefficients applied to noise evaluations (× Î_(k,l)/√h)
    pub b2: Matrix,
    pub c0: Vector,
    pub c1: Vector,
    pub c2: Vector,
    pub alpha: Vector,
    pub beta1: Vector,
    pub beta2: Vector,
    pub beta3: Vector,
    pub beta4: Vector,
}

impl Ri5Tableau {
    pub fn new() -> Self {
        Ri5Tableau {
            a0: [
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [25.0 / 144.0, 35.0 / 144.0, 0.0],
            ],
            b0: [[0.0, 0.0, 0.0], [1.0 / 3.0, 0.0, 0.0], [-5.0 / 6.0, 0.0, 0.0]],
            a1: [[0.0, 0.0, 0.0], [0.25, 0.0, 0.0], [0.25, 0.0, 0.0]],
            b1: [[0.0, 0.0, 0.0], [0.5, 0.0, 0.0], [-0.5, 0.0, 0.0]],
            a2: [[0.0; STAGES]; STAGES],
            b2: [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]],
            c0: [0.0, 1.0, 5.0 / 12.0],
            c1: [0.0, 0.25, 0.25],
            c2: [0.0, 0.0, 0.0],
            alpha: [1.0 / 10.0, 3.0 / 14.0, 24.0 / 35.0],
            beta1: [1.0, -1.0, -1.0],
            beta2: [0.0, 1.0, -1.0],
            beta3: [0.5, -0.25, -0.25],
            beta4: [0.0, 0.5, -0.5],
        }
    }
}

impl Default for Ri5Tableau {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_sums_match_nodes() {
        let t = Ri5Tableau::new();
        for i in 0..STAGES {
            let row0: f64 = t.a0[i].iter().sum();
            let row1: f64 = t.a1[i].iter().sum();
            let row2: f64 = t.a2[i].iter().sum();
            assert!((row0 - t.c0[i]).abs() < 1e-15);
            assert!((row1 - t.c1[i]).abs() < 1e-15);
            assert!((row2 - t.c2[i]).abs() < 1e-15);
        }
    }

    fn dot(a: &Vector, b: &Vector) -> f64 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    fn row_sums(m: &Matrix) -> Vector {
        [m[0].iter().sum(), m[1].iter().sum(), m[2].iter().sum()]
    }

    fn squared(v: &Vector) -> Vector {
        [v[0] * v[0], v[1] * v[1], v[2] * v[2]]
    }

    #[test]
    fn test_deterministic_order_three() {
        let t = Ri5Tableau::new();
        let ones = [1.0; STAGES];
        let a0_c0 = [
            dot(&t.a0[0], &t.c0),
            dot(&t.a0[1], &t.c0),
            dot(&t.a0[2], &t.c0),
        ];

        assert!((dot(&t.alpha, &ones) - 1.0).abs() < 1e-15);
        assert!((dot(&t.alpha, &t.c0) - 0.5).abs() < 1e-15);
        assert!((dot(&t.alpha, &squared(&t.c0)) - 1.0 / 3.0).abs() < 1e-15);
        assert!((dot(&t.alpha, &a0_c0) - 1.0 / 6.0).abs() < 1e-15);
    }

    #[test]
    fn test_weak_order_two_conditions() {
        let t = Ri5Tableau::new();
        let ones = [1.0; STAGES];
        let b0e = row_sums(&t.b0);
        let b1e = row_sums(&t.b1);
        let b2e = row_sums(&t.b2);
        let a1e = row_sums(&t.a1);
        let a2e = row_sums(&t.a2);
        let beta1_sum = dot(&t.beta1, &ones);
        let close = |x: f64, y: f64| (x - y).abs() < 1e-14;

        assert!(close(beta1_sum * beta1_sum, 1.0));
        assert!(close(dot(&t.beta2, &ones), 0.0));
        assert!(close(dot(&t.beta3, &ones), 0.0));
        assert!(close(dot(&t.beta4, &ones), 0.0));

        assert!(close(dot(&t.alpha, &squared(&b0e)), 0.5));
        assert!(close(beta1_sum * dot(&t.alpha, &b0e), 0.5));
        assert!(close(beta1_sum * dot(&t.beta1, &a1e), 0.5));
        assert!(close(beta1_sum * dot(&t.beta1, &squared(&b1e)), 0.5));
        assert!(close(beta1_sum * dot(&t.beta3, &squared(&b2e)), 0.5));

        assert!(close(dot(&t.beta1, &b1e), 0.0));
        assert!(close(dot(&t.beta3, &b2e), 0.0));
        assert!(close(dot(&t.beta3, &a2e), 0.0));
        assert!(close(dot(&t.beta2, &b1e), 1.0));
        assert!(close(dot(&t.beta4, &b2e), 1.0));
        assert!(close(dot(&t.beta2, &a1e), 0.0));
        assert!(close(dot(&t.beta2, &squared(&b1e)), 0.0));
        assert!(close(dot(&t.beta4, &squared(&b2e)), 0.0));
    }

    #[test]
    fn test_strictly_lower_triangular() {
        let t = Ri5Tableau::new();
        for m in [&t.a0, &t.b0, &t.a1, &t.b1, &t.a2, &t.b2] {
            for i in 0..STAGES {
                for j in i..STAGES {
                    assert_eq!(m[i][j], 0.0);
                }
            }
        }
    }
}
