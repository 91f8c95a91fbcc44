//! 整数矩阵零空间求解.
//!
//! 这是整个引擎中唯一引入浮点数的地方：
//!
//! 1. 对 `A ∈ ℤ^{m×n}` 做带部分主元的 Gauss-Jordan 消元 (f64)，主元绝对值不超过
//!    `tol = ZERO_EPSILON · max(1, max|A|) · max(m, n)` 的列视为自由列（秩揭示）；
//! 2. 每个自由列给出一个基向量（自由变量置 1，主元变量取 RREF 中的负系数）；
//! 3. [`integerize`] 把实数基向量缩放为整数：先除以最小非零分量的绝对值，
//!    再依次尝试乘子 `1..=MAX_DENOMINATOR`，直到所有分量与最近整数的距离都小于
//!    `ROUND_TOLERANCE`；取整后按多数符号翻转并除以 GCD；
//! 4. 调用方必须用 [`in_null_space`] 在整数域内精确复核；
//! 5. 任一基向量无法通过复核时，改用 [`exact_null_space_basis`]：在 `BigRational`
//!    上重做消元，按分母的 LCM 放大后除以 GCD，不受 `MAX_DENOMINATOR` 限制。
//!
//! 下游只会看到精确整数.
use num::integer::gcd;
use num::{BigInt, BigRational, Integer, One, ToPrimitive, Zero};

/// Relative threshold below which a pivot counts as zero.
pub const ZERO_EPSILON: f64 = 1e-9;
/// Largest denominator tried when turning a real basis vector into integers.
pub const MAX_DENOMINATOR: i64 = 64;
/// Maximum distance to the nearest integer accepted after scaling.
pub const ROUND_TOLERANCE: f64 = 1e-6;
/// Scaled entries beyond this magnitude are rejected rather than rounded.
const MAX_MAGNITUDE: f64 = 1e12;

/// Real-valued basis of `{x | A·x = 0}` for an `rows × cols` integer matrix.
pub fn null_space_basis(matrix: &[Vec<i64>], cols: usize) -> Vec<Vec<f64>> {
    if cols == 0 {
        return Vec::new();
    }
    let rows = matrix.len();
    if rows == 0 {
        return (0..cols).map(|free| unit_vector(cols, free)).collect();
    }

    let mut rref = matrix
        .iter()
        .map(|row| {
            (0..cols)
                .map(|idx| row.get(idx).copied().unwrap_or(0) as f64)
                .collect::<Vec<f64>>()
        })
        .collect::<Vec<_>>();

    let scale = matrix
        .iter()
        .flat_map(|row| row.iter())
        .map(|value| value.unsigned_abs() as f64)
        .fold(1.0f64, f64::max);
    let tolerance = ZERO_EPSILON * scale * rows.max(cols) as f64;

    let mut pivot_cols = Vec::new();
    let mut pivot_row = 0usize;

    for col in 0..cols {
        if pivot_row >= rows {
            break;
        }
        let (best_row, best_abs) = (pivot_row..rows)
            .map(|row| (row, rref[row][col].abs()))
            .fold((pivot_row, 0.0f64), |acc, cand| if cand.1 > acc.1 { cand } else { acc });
        if best_abs <= tolerance {
            for row in pivot_row..rows {
                rref[row][col] = 0.0;
            }
            continue;
        }

        rref.swap(best_row, pivot_row);
        let pivot_value = rref[pivot_row][col];
        for value in rref[pivot_row].iter_mut() {
            *value /= pivot_value;
        }

        for row in 0..rows {
            if row == pivot_row {
                continue;
            }
            let factor = rref[row][col];
            if factor == 0.0 {
                continue;
            }
            for inner in col..cols {
                let adjustment = rref[pivot_row][inner] * factor;
                rref[row][inner] -= adjustment;
            }
            rref[row][col] = 0.0;
        }

        pivot_cols.push(col);
        pivot_row += 1;
    }

    let mut is_pivot = vec![false; cols];
    for &col in &pivot_cols {
        is_pivot[col] = true;
    }

    let mut basis = Vec::new();
    for free in (0..cols).filter(|&col| !is_pivot[col]) {
        let mut vector = unit_vector(cols, free);
        for (row, &pivot_col) in pivot_cols.iter().enumerate() {
            let coeff = rref[row][free];
            if coeff.abs() > tolerance {
                vector[pivot_col] = -coeff;
            }
        }
        basis.push(vector);
    }
    log::debug!(
        "null space of {}x{} matrix: rank {}, dimension {}",
        rows,
        cols,
        pivot_cols.len(),
        basis.len()
    );
    basis
}

/// Converts a real null-space vector to the smallest integer vector on the
/// same ray, with the majority sign made positive. `None` if no multiplier up
/// to [`MAX_DENOMINATOR`] lands every entry on an integer.
pub fn integerize(vector: &[f64]) -> Option<Vec<i64>> {
    let smallest = vector
        .iter()
        .map(|value| value.abs())
        .filter(|value| *value > ROUND_TOLERANCE)
        .fold(f64::INFINITY, f64::min);
    if !smallest.is_finite() {
        return None;
    }

    let scaled = vector.iter().map(|value| value / smallest).collect::<Vec<_>>();
    for multiplier in 1..=MAX_DENOMINATOR {
        let factor = multiplier as f64;
        let candidate = scaled.iter().map(|value| value * factor).collect::<Vec<_>>();
        if candidate.iter().any(|value| value.abs() > MAX_MAGNITUDE) {
            return None;
        }
        if candidate
            .iter()
            .all(|value| (value - value.round()).abs() < ROUND_TOLERANCE * factor.max(1.0))
        {
            let rounded = candidate.iter().map(|value| value.round() as i64).collect();
            return Some(orient(normalize(rounded)));
        }
    }
    None
}

/// Null-space basis computed in exact rational arithmetic.
///
/// `None` when some normalized entry does not fit in `i64`.
pub fn exact_null_space_basis(matrix: &[Vec<i64>], cols: usize) -> Option<Vec<Vec<i64>>> {
    if cols == 0 {
        return Some(Vec::new());
    }
    let rows = matrix.len();
    let mut rref = matrix
        .iter()
        .map(|row| {
            (0..cols)
                .map(|idx| BigRational::from_integer(BigInt::from(row.get(idx).copied().unwrap_or(0))))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    let mut pivot_cols = Vec::new();
    let mut pivot_row = 0usize;
    for col in 0..cols {
        if pivot_row >= rows {
            break;
        }
        let Some(found) = (pivot_row..rows).find(|&row| !rref[row][col].is_zero()) else {
            continue;
        };
        rref.swap(found, pivot_row);
        let pivot_value = rref[pivot_row][col].clone();
        for value in rref[pivot_row].iter_mut() {
            *value /= pivot_value.clone();
        }
        for row in 0..rows {
            if row == pivot_row {
                continue;
            }
            let factor = rref[row][col].clone();
            if factor.is_zero() {
                continue;
            }
            for inner in col..cols {
                let adjustment = rref[pivot_row][inner].clone() * factor.clone();
                rref[row][inner] -= adjustment;
            }
        }
        pivot_cols.push(col);
        pivot_row += 1;
    }

    let mut is_pivot = vec![false; cols];
    for &col in &pivot_cols {
        is_pivot[col] = true;
    }

    let mut basis = Vec::new();
    for free in (0..cols).filter(|&col| !is_pivot[col]) {
        let mut vector = vec![BigRational::zero(); cols];
        vector[free] = BigRational::one();
        for (row, &pivot_col) in pivot_cols.iter().enumerate() {
            vector[pivot_col] = -rref[row][free].clone();
        }
        basis.push(orient(rational_to_integers(&vector)?));
    }
    log::debug!(
        "exact null space of {}x{} matrix: dimension {}",
        rows,
        cols,
        basis.len()
    );
    Some(basis)
}

/// Scales by the LCM of the denominators and divides by the GCD of the result.
fn rational_to_integers(vector: &[BigRational]) -> Option<Vec<i64>> {
    let lcm = vector
        .iter()
        .fold(BigInt::one(), |acc, value| acc.lcm(value.denom()));
    let scaled = vector
        .iter()
        .map(|value| (value.clone() * BigRational::from_integer(lcm.clone())).to_integer())
        .collect::<Vec<BigInt>>();
    let divisor = scaled
        .iter()
        .fold(BigInt::zero(), |acc, value| acc.gcd(value));
    scaled
        .into_iter()
        .map(|value| {
            if divisor.is_zero() {
                value.to_i64()
            } else {
                (value / &divisor).to_i64()
            }
        })
        .collect()
}

/// Divides by the GCD of the non-zero entries.
pub fn normalize(mut vector: Vec<i64>) -> Vec<i64> {
    let divisor = vector
        .iter()
        .filter(|value| **value != 0)
        .fold(0i64, |acc, value| gcd(acc, value.abs()));
    if divisor > 1 {
        for value in &mut vector {
            *value /= divisor;
        }
    }
    vector
}

/// Negates the vector when its entries are mostly negative.
pub fn orient(vector: Vec<i64>) -> Vec<i64> {
    let negatives = vector.iter().filter(|value| **value < 0).count();
    let positives = vector.iter().filter(|value| **value > 0).count();
    let sum: i128 = vector.iter().map(|value| *value as i128).sum();
    if negatives > positives || (negatives == positives && sum < 0) {
        vector.into_iter().map(|value| -value).collect()
    } else {
        vector
    }
}

/// Exact check of `A·x = 0` in 128-bit integer arithmetic.
pub fn in_null_space(matrix: &[Vec<i64>], vector: &[i64]) -> bool {
    matrix.iter().all(|row| {
        row.iter()
            .zip(vector.iter())
            .map(|(a, x)| *a as i128 * *x as i128)
            .sum::<i128>()
            == 0
    })
}

fn unit_vector(len: usize, at: usize) -> Vec<f64> {
    let mut vector = vec![0.0; len];
    vector[at] = 1.0;
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_has_one_dimensional_null_space() {
        // p0 -> t0 -> p1 -> t1 -> p0, rows = transitions (Cᵗ)
        let c_t = vec![vec![-1, 1], vec![1, -1]];
        let basis = null_space_basis(&c_t, 2);
        assert_eq!(basis.len(), 1);
        let vector = integerize(&basis[0]).unwrap();
        assert_eq!(vector, vec![1, 1]);
        assert!(in_null_space(&c_t, &vector));
    }

    #[test]
    fn zero_matrix_yields_identity_basis() {
        let basis = null_space_basis(&[vec![0, 0]], 2);
        assert_eq!(basis.len(), 2);
        assert_eq!(integerize(&basis[0]), Some(vec![1, 0]));
        assert_eq!(integerize(&basis[1]), Some(vec![0, 1]));
    }

    #[test]
    fn full_rank_has_trivial_null_space() {
        assert!(null_space_basis(&[vec![1, 0], vec![0, 2]], 2).is_empty());
    }

    #[test]
    fn weighted_conservation_is_recovered() {
        // t0 consumes 2 from p0 and produces 1 in p1: p0 + 2·p1 is conserved
        let c_t = vec![vec![-2, 1]];
        let basis = null_space_basis(&c_t, 2);
        let vector = integerize(&basis[0]).unwrap();
        assert_eq!(vector, vec![1, 2]);
        assert!(in_null_space(&c_t, &vector));
    }

    #[test]
    fn fractional_entries_use_common_denominator() {
        assert_eq!(integerize(&[1.0 / 3.0, 0.5, 0.0]), Some(vec![2, 3, 0]));
        assert_eq!(integerize(&[-1.0, -2.0]), Some(vec![1, 2]));
        assert_eq!(integerize(&[0.0, 0.0]), None);
    }

    #[test]
    fn exact_basis_handles_large_denominators() {
        // p0 --65--> t --67--> p1: 67·p0 + 65·p1 is conserved
        let c_t = vec![vec![-65, 67]];
        let basis = null_space_basis(&c_t, 2);
        assert_eq!(basis.len(), 1);
        assert_eq!(integerize(&basis[0]), None);

        let exact = exact_null_space_basis(&c_t, 2).unwrap();
        assert_eq!(exact, vec![vec![67, 65]]);
        assert!(in_null_space(&c_t, &exact[0]));
    }

    #[test]
    fn exact_basis_matches_float_basis_on_small_systems() {
        let c_t = vec![vec![-1, 1, 0], vec![0, -1, 1]];
        assert_eq!(exact_null_space_basis(&c_t, 3), Some(vec![vec![1, 1, 1]]));
        assert_eq!(
            exact_null_space_basis(&[vec![0, 0]], 2),
            Some(vec![vec![1, 0], vec![0, 1]])
        );
        assert_eq!(exact_null_space_basis(&[vec![1, 0], vec![0, 2]], 2), Some(vec![]));
    }

    #[test]
    fn exact_basis_refuses_entries_beyond_i64() {
        // 三级链，每级权重约 1e9：守恒律系数约 1e27
        let (a, b, c, d, e, f) = (
            1_000_000_007,
            998_244_353,
            1_000_000_009,
            999_999_937,
            1_000_000_021,
            1_000_000_033,
        );
        let c_t = vec![vec![-a, b, 0, 0], vec![0, -c, d, 0], vec![0, 0, -e, f]];
        assert_eq!(exact_null_space_basis(&c_t, 4), None);
    }

    #[test]
    fn normalize_divides_by_gcd() {
        assert_eq!(normalize(vec![4, 0, 6]), vec![2, 0, 3]);
        assert_eq!(normalize(vec![0, 0]), vec![0, 0]);
    }
}
