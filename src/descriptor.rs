//! Operation descriptors for the four packed kernel kinds.
//!
//! A descriptor fixes the shape of one kernel instance. Dispatchers forward
//! it by reference to the backend and never modify it. Every matrix element
//! is a vector of independent problems ("packed"), so dimensions and leading
//! dimensions count vectors, not scalars.

use serde::{Deserialize, Serialize};

use crate::error::{GenError, GenResult};

/// Operation kind handled by one dispatcher entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    Pgemm,
    Getrf,
    Trsm,
    Trmm,
}

impl KernelKind {
    pub const ALL: [KernelKind; 4] = [
        KernelKind::Pgemm,
        KernelKind::Getrf,
        KernelKind::Trsm,
        KernelKind::Trmm,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Pgemm => "PGEMM",
            Self::Getrf => "GETRF",
            Self::Trsm => "TRSM",
            Self::Trmm => "TRMM",
        }
    }
}

impl std::fmt::Display for KernelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Element precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Precision {
    F32,
    F64,
}

impl Precision {
    /// Element size in bytes.
    pub fn size_bytes(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Layout {
    #[default]
    ColMajor,
    RowMajor,
}

impl Layout {
    /// Linear element index of `(row, col)` with leading dimension `ld`.
    #[inline]
    pub fn index(self, row: usize, col: usize, ld: usize) -> usize {
        match self {
            Self::ColMajor => row + col * ld,
            Self::RowMajor => row * ld + col,
        }
    }

    /// Smallest valid leading dimension for a `rows x cols` matrix.
    #[inline]
    pub fn min_ld(self, rows: usize, cols: usize) -> usize {
        match self {
            Self::ColMajor => rows,
            Self::RowMajor => cols,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Uplo {
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diag {
    Unit,
    NonUnit,
}

/// GEMM scaling of the product term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Alpha {
    #[default]
    One,
    MinusOne,
}

/// GEMM scaling of the existing C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Beta {
    Zero,
    #[default]
    One,
}

fn check_ld(kind: KernelKind, what: &str, ld: usize, layout: Layout, rows: usize, cols: usize) -> GenResult<()> {
    let min = layout.min_ld(rows, cols);
    if ld < min {
        return Err(GenError::backend(
            kind,
            format!("{what}={ld} is smaller than the stored extent {min}"),
        ));
    }
    Ok(())
}

fn check_dims(kind: KernelKind, dims: &[(&str, usize)]) -> GenResult<()> {
    for (name, value) in dims {
        if *value == 0 {
            return Err(GenError::backend(kind, format!("{name} must be non-zero")));
        }
    }
    Ok(())
}

// ── PGEMM ─────────────────────────────────────────────────────────────

/// `C = alpha * op(A) * op(B) + beta * C` with `op(A)` m x k, `op(B)` k x n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgemmDescriptor {
    pub precision: Precision,
    pub layout: Layout,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub trans_a: bool,
    pub trans_b: bool,
    pub alpha: Alpha,
    pub beta: Beta,
}

impl PgemmDescriptor {
    /// Column-major, non-transposed, tightly packed, `C += A * B`.
    pub fn new(precision: Precision, m: usize, n: usize, k: usize) -> Self {
        Self {
            precision,
            layout: Layout::ColMajor,
            m,
            n,
            k,
            lda: m,
            ldb: k,
            ldc: m,
            trans_a: false,
            trans_b: false,
            alpha: Alpha::One,
            beta: Beta::One,
        }
    }

    /// Stored (rows, cols) of A, accounting for transposition.
    pub fn a_extent(&self) -> (usize, usize) {
        if self.trans_a { (self.k, self.m) } else { (self.m, self.k) }
    }

    /// Stored (rows, cols) of B, accounting for transposition.
    pub fn b_extent(&self) -> (usize, usize) {
        if self.trans_b { (self.n, self.k) } else { (self.k, self.n) }
    }

    pub fn validate(&self) -> GenResult<()> {
        let kind = KernelKind::Pgemm;
        check_dims(kind, &[("m", self.m), ("n", self.n), ("k", self.k)])?;
        let (ar, ac) = self.a_extent();
        let (br, bc) = self.b_extent();
        check_ld(kind, "lda", self.lda, self.layout, ar, ac)?;
        check_ld(kind, "ldb", self.ldb, self.layout, br, bc)?;
        check_ld(kind, "ldc", self.ldc, self.layout, self.m, self.n)
    }
}

/// Register-blocking hints for the PGEMM backend.
///
/// `i_unroll x j_unroll` accumulators are held in registers at once; the
/// loop counts give the number of blocks along m and n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PgemmTuning {
    pub i_unroll: usize,
    pub j_unroll: usize,
    pub i_loop: usize,
    pub j_loop: usize,
}

impl PgemmTuning {
    pub fn new(i_unroll: usize, j_unroll: usize, i_loop: usize, j_loop: usize) -> Self {
        Self { i_unroll, j_unroll, i_loop, j_loop }
    }
}

// ── GETRF ─────────────────────────────────────────────────────────────

/// In-place LU factorization without pivoting of an m x n matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GetrfDescriptor {
    pub precision: Precision,
    pub layout: Layout,
    pub m: usize,
    pub n: usize,
    pub lda: usize,
}

impl GetrfDescriptor {
    pub fn new(precision: Precision, m: usize, n: usize) -> Self {
        Self {
            precision,
            layout: Layout::ColMajor,
            m,
            n,
            lda: m,
        }
    }

    pub fn validate(&self) -> GenResult<()> {
        let kind = KernelKind::Getrf;
        check_dims(kind, &[("m", self.m), ("n", self.n)])?;
        check_ld(kind, "lda", self.lda, self.layout, self.m, self.n)
    }
}

// ── TRSM / TRMM ───────────────────────────────────────────────────────

/// Shape shared by the triangular solve and multiply kernels.
///
/// B is m x n and is overwritten. A is m x m for [`Side::Left`] and n x n
/// for [`Side::Right`]; only the `uplo` triangle of A is read.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriangularDescriptor {
    pub precision: Precision,
    pub layout: Layout,
    pub side: Side,
    pub uplo: Uplo,
    pub trans_a: bool,
    pub diag: Diag,
    pub m: usize,
    pub n: usize,
    pub lda: usize,
    pub ldb: usize,
    pub alpha: f64,
}

impl TriangularDescriptor {
    /// Left side, lower, non-transposed, non-unit, alpha 1, tight strides.
    pub fn new(precision: Precision, m: usize, n: usize) -> Self {
        Self {
            precision,
            layout: Layout::ColMajor,
            side: Side::Left,
            uplo: Uplo::Lower,
            trans_a: false,
            diag: Diag::NonUnit,
            m,
            n,
            lda: m,
            ldb: m,
            alpha: 1.0,
        }
    }

    /// Order of the triangular matrix A.
    pub fn a_order(&self) -> usize {
        match self.side {
            Side::Left => self.m,
            Side::Right => self.n,
        }
    }

    /// Whether `op(A)` is lower triangular.
    pub fn op_a_is_lower(&self) -> bool {
        (self.uplo == Uplo::Lower) != self.trans_a
    }

    pub fn validate(&self, kind: KernelKind) -> GenResult<()> {
        check_dims(kind, &[("m", self.m), ("n", self.n)])?;
        let order = self.a_order();
        check_ld(kind, "lda", self.lda, self.layout, order, order)?;
        check_ld(kind, "ldb", self.ldb, self.layout, self.m, self.n)?;
        if !self.alpha.is_finite() {
            return Err(GenError::backend(kind, format!("alpha {} is not finite", self.alpha)));
        }
        Ok(())
    }
}

/// Solve `op(A) X = alpha B` (left) or `X op(A) = alpha B` (right); X overwrites B.
pub type TrsmDescriptor = TriangularDescriptor;

/// `B = alpha op(A) B` (left) or `B = alpha B op(A)` (right).
pub type TrmmDescriptor = TriangularDescriptor;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_index() {
        assert_eq!(Layout::ColMajor.index(2, 3, 5), 17);
        assert_eq!(Layout::RowMajor.index(2, 3, 5), 13);
        assert_eq!(Layout::ColMajor.min_ld(4, 7), 4);
        assert_eq!(Layout::RowMajor.min_ld(4, 7), 7);
    }

    #[test]
    fn test_pgemm_validate_transposed_extent() {
        let mut desc = PgemmDescriptor::new(Precision::F32, 4, 3, 2);
        assert!(desc.validate().is_ok());

        // op(A) = A^T needs A stored k x m, so lda >= k in column-major.
        desc.trans_a = true;
        desc.lda = 2;
        assert!(desc.validate().is_ok());
        desc.lda = 1;
        let err = desc.validate().unwrap_err();
        assert!(matches!(err, GenError::BackendFailure { kind: KernelKind::Pgemm, .. }));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let desc = GetrfDescriptor::new(Precision::F64, 0, 3);
        let err = desc.validate().unwrap_err();
        assert!(err.to_string().contains("m must be non-zero"), "{err}");
    }

    #[test]
    fn test_triangular_order_follows_side() {
        let mut desc = TriangularDescriptor::new(Precision::F32, 3, 5);
        assert_eq!(desc.a_order(), 3);
        desc.side = Side::Right;
        assert_eq!(desc.a_order(), 5);
        // lda = 3 is too small for a 5 x 5 A.
        assert!(desc.validate(KernelKind::Trsm).is_err());
        desc.lda = 5;
        assert!(desc.validate(KernelKind::Trsm).is_ok());
    }

    #[test]
    fn test_op_a_lower() {
        let mut desc = TriangularDescriptor::new(Precision::F32, 2, 2);
        assert!(desc.op_a_is_lower());
        desc.trans_a = true;
        assert!(!desc.op_a_is_lower());
        desc.uplo = Uplo::Upper;
        assert!(desc.op_a_is_lower());
    }

    #[test]
    fn test_non_finite_alpha_rejected() {
        let mut desc = TriangularDescriptor::new(Precision::F64, 2, 2);
        desc.alpha = f64::NAN;
        assert!(desc.validate(KernelKind::Trmm).is_err());
    }
}
