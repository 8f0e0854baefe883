use super::types::{QuadraticSolution, Root, RootClassification};
use crate::{error::Error, Result};

/// Solve `a·x² + b·x + c = 0`.
///
/// Real roots use the cancellation-free form `q = -(b + sign(b)·√D) / 2`,
/// `x₁ = q / a`, `x₂ = c / q`. With `a == 0` the equation is solved as linear.
pub(crate) fn solve(a: f64, b: f64, c: f64, max_magnitude: f64) -> Result<QuadraticSolution> {
    for (name, value) in [("a", a), ("b", b), ("c", c)] {
        if !value.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "coefficient {} must be finite",
                name
            )));
        }
        if value.abs() > max_magnitude {
            return Err(Error::NumericLimit(format!(
                "coefficient {} exceeds magnitude limit of {:e}",
                name, max_magnitude
            )));
        }
    }

    if a == 0.0 {
        if b == 0.0 {
            return Err(Error::InvalidArgument(
                "not an equation: a and b are both zero".into(),
            ));
        }
        let x = normalize(-c / b);
        return Ok(QuadraticSolution {
            a,
            b,
            c,
            discriminant: None,
            classification: RootClassification::Linear,
            roots: vec![root(a, b, c, x, 0.0)],
        });
    }

    let discriminant = b * b - 4.0 * a * c;
    if !discriminant.is_finite() || discriminant.abs() > max_magnitude {
        return Err(Error::NumericLimit(format!(
            "discriminant exceeds magnitude limit of {:e}",
            max_magnitude
        )));
    }

    let (classification, mut roots) = if discriminant > 0.0 {
        let q = -0.5 * (b + b.signum() * discriminant.sqrt());
        let x1 = normalize(q / a);
        let x2 = normalize(c / q);
        (
            RootClassification::TwoReal,
            vec![root(a, b, c, x1, 0.0), root(a, b, c, x2, 0.0)],
        )
    } else if discriminant == 0.0 {
        let x = normalize(-b / (2.0 * a));
        (RootClassification::RepeatedReal, vec![root(a, b, c, x, 0.0)])
    } else {
        let re = normalize(-b / (2.0 * a));
        let im = (-discriminant).sqrt() / (2.0 * a.abs());
        (
            RootClassification::ComplexConjugate,
            vec![root(a, b, c, re, im), root(a, b, c, re, -im)],
        )
    };
    roots.sort_by(|l, r| l.re.total_cmp(&r.re).then(r.im.total_cmp(&l.im)));

    Ok(QuadraticSolution {
        a,
        b,
        c,
        discriminant: Some(discriminant),
        classification,
        roots,
    })
}

/// Root with |a·z² + b·z + c| evaluated in complex arithmetic.
fn root(a: f64, b: f64, c: f64, re: f64, im: f64) -> Root {
    // z² = (re² − im²) + 2·re·im·i
    let sq_re = re * re - im * im;
    let sq_im = 2.0 * re * im;
    let value_re = a * sq_re + b * re + c;
    let value_im = a * sq_im + b * im;
    Root {
        re,
        im,
        residual: value_re.hypot(value_im),
    }
}

fn normalize(x: f64) -> f64 {
    if x == 0.0 {
        0.0
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve(a: f64, b: f64, c: f64) -> QuadraticSolution {
        super::solve(a, b, c, 1e100).unwrap()
    }

    fn real_roots(solution: &QuadraticSolution) -> Vec<f64> {
        solution.roots.iter().map(|r| r.re).collect()
    }

    #[test]
    fn test_two_real_roots() {
        let solution = solve(1.0, 5.0, 6.0);
        assert_eq!(solution.classification, RootClassification::TwoReal);
        assert!(solution.discriminant.unwrap() > 0.0);
        assert_eq!(real_roots(&solution), vec![-3.0, -2.0]);
        assert!(solution.roots.iter().all(|r| r.is_real() && r.residual == 0.0));
    }

    #[test]
    fn test_repeated_root() {
        let solution = solve(1.0, 2.0, 1.0);
        assert_eq!(solution.classification, RootClassification::RepeatedReal);
        assert_eq!(solution.discriminant, Some(0.0));
        assert_eq!(real_roots(&solution), vec![-1.0]);
    }

    #[test]
    fn test_complex_pair() {
        let solution = solve(1.0, 0.0, 1.0);
        assert_eq!(solution.classification, RootClassification::ComplexConjugate);
        assert!(solution.discriminant.unwrap() < 0.0);
        assert_eq!(solution.roots.len(), 2);
        assert_eq!(solution.roots[0].re, 0.0);
        assert!(solution.roots[0].re.is_sign_positive());
        assert_eq!(solution.roots[0].im, 1.0);
        assert_eq!(solution.roots[1].im, -1.0);
        assert!(solution.roots.iter().all(|r| r.residual < 1e-12));
        assert_eq!(solution.roots[0].to_string(), "0 + 1i");
    }

    #[test]
    fn test_no_cancellation_for_small_roots() {
        // Naive (-b + √D) / 2a loses every digit of the small root here.
        let solution = solve(1.0, 1e8, 1.0);
        let small = solution.roots[1].re;
        assert!((small + 1e-8).abs() < 1e-20, "{small}");
    }

    #[test]
    fn test_linear_fallback() {
        let solution = solve(0.0, 2.0, -4.0);
        assert_eq!(solution.classification, RootClassification::Linear);
        assert_eq!(solution.discriminant, None);
        assert_eq!(real_roots(&solution), vec![2.0]);
    }

    #[test]
    fn test_degenerate_and_invalid() {
        assert!(matches!(
            super::solve(0.0, 0.0, 1.0, 1e100),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            super::solve(f64::NAN, 1.0, 1.0, 1e100),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            super::solve(1.0, 1e60, 1.0, 1e100),
            Err(Error::NumericLimit(_))
        ));
    }
}
