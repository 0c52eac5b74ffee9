//! SIMD-accelerated kernels over contiguous `f32` buffers
//!
//! Every public function has three implementations (AVX-512, AVX-2 + FMA,
//! scalar). The widest path supported by the build's target features is
//! selected at compile time; callers never see the choice and the
//! signatures are identical across variants.
//!
//! Accumulation order differs between variants, so results agree only to
//! within a few ulps per element. The scalar path is the reference the
//! property tests compare against.

#[cfg(all(target_arch = "x86_64", target_feature = "avx512f"))]
use self::avx512 as kernels;

#[cfg(all(
    target_arch = "x86_64",
    target_feature = "avx2",
    target_feature = "fma",
    not(target_feature = "avx512f")
))]
use self::avx2 as kernels;

#[cfg(not(any(
    all(target_arch = "x86_64", target_feature = "avx512f"),
    all(
        target_arch = "x86_64",
        target_feature = "avx2",
        target_feature = "fma"
    )
)))]
use self::scalar as kernels;

/// Magnitudes below this are treated as zero to avoid dividing by
/// denormals (cosine similarity, normalization).
const MIN_NORM: f32 = 1e-9;

/// Which kernel path this build selected. For the startup log.
pub fn kernel_variant() -> &'static str {
    #[cfg(all(target_arch = "x86_64", target_feature = "avx512f"))]
    {
        "avx512"
    }
    #[cfg(all(
        target_arch = "x86_64",
        target_feature = "avx2",
        target_feature = "fma",
        not(target_feature = "avx512f")
    ))]
    {
        "avx2"
    }
    #[cfg(not(any(
        all(target_arch = "x86_64", target_feature = "avx512f"),
        all(
            target_arch = "x86_64",
            target_feature = "avx2",
            target_feature = "fma"
        )
    )))]
    {
        "scalar"
    }
}

/// `Σ aᵢ·bᵢ` in single precision.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    kernels::dot(a, b)
}

/// `Σ (aᵢ−bᵢ)²`. The HNSW interior uses this form to skip the square
/// root on hot paths.
#[inline]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    kernels::squared_l2(a, b)
}

/// `√Σ (aᵢ−bᵢ)²`.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

/// `dot/(‖a‖·‖b‖)`, or `0` when either magnitude is below `1e-9`.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let (dot, norm_a_sq, norm_b_sq) = kernels::cosine_components(a, b);
    let norm_a = norm_a_sq.sqrt();
    let norm_b = norm_b_sq.sqrt();
    if norm_a < MIN_NORM || norm_b < MIN_NORM {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `√Σ vᵢ²`.
#[inline]
pub fn magnitude(v: &[f32]) -> f32 {
    kernels::dot(v, v).sqrt()
}

/// Divides `v` in place by its magnitude. Vectors with magnitude below
/// `1e-9` are left unchanged (no NaN introduced).
#[inline]
pub fn normalize(v: &mut [f32]) {
    let mag = magnitude(v);
    if mag < MIN_NORM {
        return;
    }
    scale_in_place(v, 1.0 / mag);
}

/// Elementwise `aᵢ + bᵢ` into `result`.
#[inline]
pub fn add(a: &[f32], b: &[f32], result: &mut [f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), result.len());
    kernels::add(a, b, result);
}

/// Elementwise `aᵢ − bᵢ` into `result`.
#[inline]
pub fn subtract(a: &[f32], b: &[f32], result: &mut [f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), result.len());
    kernels::sub(a, b, result);
}

/// Elementwise `vᵢ · s` into `result`.
#[inline]
pub fn scale_vector(vec: &[f32], s: f32, result: &mut [f32]) {
    debug_assert_eq!(vec.len(), result.len());
    kernels::scale_into(vec.as_ptr(), s, result);
}

/// Elementwise `vᵢ · s` written back into `v`. The aliasing form of
/// [`scale_vector`]; `normalize` is built on it.
#[inline]
pub fn scale_in_place(v: &mut [f32], s: f32) {
    let src = v.as_ptr();
    kernels::scale_into(src, s, v);
}

// ============================================================================
// Scalar implementation (always compiled; reference for property tests)
// ============================================================================

// The scalar module stays compiled on every target: it is the selected
// kernel set on non-AVX builds and the reference the property tests
// compare the vector paths against.
#[cfg_attr(not(test), allow(dead_code))]
mod scalar {
    #[inline]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
    }

    #[inline]
    pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum()
    }

    #[inline]
    pub fn cosine_components(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let mut dot = 0.0f32;
        let mut na = 0.0f32;
        let mut nb = 0.0f32;
        for (x, y) in a.iter().zip(b.iter()) {
            dot += x * y;
            na += x * x;
            nb += y * y;
        }
        (dot, na, nb)
    }

    #[inline]
    pub fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
        for i in 0..a.len() {
            out[i] = a[i] + b[i];
        }
    }

    #[inline]
    pub fn sub(a: &[f32], b: &[f32], out: &mut [f32]) {
        for i in 0..a.len() {
            out[i] = a[i] - b[i];
        }
    }

    /// `src` may alias `out`; reading through the raw pointer keeps the
    /// aliasing case well-defined for the element-at-a-time loop.
    #[inline]
    pub fn scale_into(src: *const f32, s: f32, out: &mut [f32]) {
        for i in 0..out.len() {
            // SAFETY: src points to at least out.len() valid f32s; element
            // i is read before element i is written.
            out[i] = unsafe { *src.add(i) } * s;
        }
    }
}

// ============================================================================
// AVX-2 + FMA implementation (8 lanes)
// ============================================================================

#[cfg(all(target_arch = "x86_64", target_feature = "avx2", target_feature = "fma"))]
mod avx2 {
    use std::arch::x86_64::*;

    #[inline]
    unsafe fn hsum256(v: __m256) -> f32 {
        let lo = _mm256_castps256_ps128(v);
        let hi = _mm256_extractf128_ps(v, 1);
        let sum = _mm_add_ps(lo, hi);
        let shuf = _mm_movehdup_ps(sum);
        let sums = _mm_add_ps(sum, shuf);
        let shuf = _mm_movehl_ps(shuf, sums);
        let sums = _mm_add_ss(sums, shuf);
        _mm_cvtss_f32(sums)
    }

    #[inline]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 8;
        // SAFETY: all loads stay within chunks * 8 <= n elements.
        let mut result = unsafe {
            let mut acc = _mm256_setzero_ps();
            for i in 0..chunks {
                let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
                acc = _mm256_fmadd_ps(va, vb, acc);
            }
            hsum256(acc)
        };
        for i in (chunks * 8)..n {
            result += a[i] * b[i];
        }
        result
    }

    #[inline]
    pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 8;
        let mut result = unsafe {
            let mut acc = _mm256_setzero_ps();
            for i in 0..chunks {
                let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
                let d = _mm256_sub_ps(va, vb);
                acc = _mm256_fmadd_ps(d, d, acc);
            }
            hsum256(acc)
        };
        for i in (chunks * 8)..n {
            let d = a[i] - b[i];
            result += d * d;
        }
        result
    }

    #[inline]
    pub fn cosine_components(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let n = a.len();
        let chunks = n / 8;
        let (mut dot, mut na, mut nb) = unsafe {
            let mut acc_dot = _mm256_setzero_ps();
            let mut acc_na = _mm256_setzero_ps();
            let mut acc_nb = _mm256_setzero_ps();
            for i in 0..chunks {
                let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
                acc_dot = _mm256_fmadd_ps(va, vb, acc_dot);
                acc_na = _mm256_fmadd_ps(va, va, acc_na);
                acc_nb = _mm256_fmadd_ps(vb, vb, acc_nb);
            }
            (hsum256(acc_dot), hsum256(acc_na), hsum256(acc_nb))
        };
        for i in (chunks * 8)..n {
            dot += a[i] * b[i];
            na += a[i] * a[i];
            nb += b[i] * b[i];
        }
        (dot, na, nb)
    }

    #[inline]
    pub fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = a.len();
        let chunks = n / 8;
        unsafe {
            for i in 0..chunks {
                let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
                _mm256_storeu_ps(out.as_mut_ptr().add(i * 8), _mm256_add_ps(va, vb));
            }
        }
        for i in (chunks * 8)..n {
            out[i] = a[i] + b[i];
        }
    }

    #[inline]
    pub fn sub(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = a.len();
        let chunks = n / 8;
        unsafe {
            for i in 0..chunks {
                let va = _mm256_loadu_ps(a.as_ptr().add(i * 8));
                let vb = _mm256_loadu_ps(b.as_ptr().add(i * 8));
                _mm256_storeu_ps(out.as_mut_ptr().add(i * 8), _mm256_sub_ps(va, vb));
            }
        }
        for i in (chunks * 8)..n {
            out[i] = a[i] - b[i];
        }
    }

    /// `src` may alias `out`; every lane is read before it is written.
    #[inline]
    pub fn scale_into(src: *const f32, s: f32, out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 8;
        unsafe {
            let vs = _mm256_set1_ps(s);
            for i in 0..chunks {
                let v = _mm256_loadu_ps(src.add(i * 8));
                _mm256_storeu_ps(out.as_mut_ptr().add(i * 8), _mm256_mul_ps(v, vs));
            }
            for i in (chunks * 8)..n {
                out[i] = *src.add(i) * s;
            }
        }
    }
}

// ============================================================================
// AVX-512 implementation (16 lanes)
// ============================================================================

#[cfg(all(target_arch = "x86_64", target_feature = "avx512f"))]
mod avx512 {
    use std::arch::x86_64::*;

    #[inline]
    pub fn dot(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 16;
        // SAFETY: all loads stay within chunks * 16 <= n elements.
        let mut result = unsafe {
            let mut acc = _mm512_setzero_ps();
            for i in 0..chunks {
                let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
                let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
                acc = _mm512_fmadd_ps(va, vb, acc);
            }
            _mm512_reduce_add_ps(acc)
        };
        for i in (chunks * 16)..n {
            result += a[i] * b[i];
        }
        result
    }

    #[inline]
    pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        let n = a.len();
        let chunks = n / 16;
        let mut result = unsafe {
            let mut acc = _mm512_setzero_ps();
            for i in 0..chunks {
                let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
                let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
                let d = _mm512_sub_ps(va, vb);
                acc = _mm512_fmadd_ps(d, d, acc);
            }
            _mm512_reduce_add_ps(acc)
        };
        for i in (chunks * 16)..n {
            let d = a[i] - b[i];
            result += d * d;
        }
        result
    }

    #[inline]
    pub fn cosine_components(a: &[f32], b: &[f32]) -> (f32, f32, f32) {
        let n = a.len();
        let chunks = n / 16;
        let (mut dot, mut na, mut nb) = unsafe {
            let mut acc_dot = _mm512_setzero_ps();
            let mut acc_na = _mm512_setzero_ps();
            let mut acc_nb = _mm512_setzero_ps();
            for i in 0..chunks {
                let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
                let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
                acc_dot = _mm512_fmadd_ps(va, vb, acc_dot);
                acc_na = _mm512_fmadd_ps(va, va, acc_na);
                acc_nb = _mm512_fmadd_ps(vb, vb, acc_nb);
            }
            (
                _mm512_reduce_add_ps(acc_dot),
                _mm512_reduce_add_ps(acc_na),
                _mm512_reduce_add_ps(acc_nb),
            )
        };
        for i in (chunks * 16)..n {
            dot += a[i] * b[i];
            na += a[i] * a[i];
            nb += b[i] * b[i];
        }
        (dot, na, nb)
    }

    #[inline]
    pub fn add(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = a.len();
        let chunks = n / 16;
        unsafe {
            for i in 0..chunks {
                let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
                let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
                _mm512_storeu_ps(out.as_mut_ptr().add(i * 16), _mm512_add_ps(va, vb));
            }
        }
        for i in (chunks * 16)..n {
            out[i] = a[i] + b[i];
        }
    }

    #[inline]
    pub fn sub(a: &[f32], b: &[f32], out: &mut [f32]) {
        let n = a.len();
        let chunks = n / 16;
        unsafe {
            for i in 0..chunks {
                let va = _mm512_loadu_ps(a.as_ptr().add(i * 16));
                let vb = _mm512_loadu_ps(b.as_ptr().add(i * 16));
                _mm512_storeu_ps(out.as_mut_ptr().add(i * 16), _mm512_sub_ps(va, vb));
            }
        }
        for i in (chunks * 16)..n {
            out[i] = a[i] - b[i];
        }
    }

    /// `src` may alias `out`; every lane is read before it is written.
    #[inline]
    pub fn scale_into(src: *const f32, s: f32, out: &mut [f32]) {
        let n = out.len();
        let chunks = n / 16;
        unsafe {
            let vs = _mm512_set1_ps(s);
            for i in 0..chunks {
                let v = _mm512_loadu_ps(src.add(i * 16));
                _mm512_storeu_ps(out.as_mut_ptr().add(i * 16), _mm512_mul_ps(v, vs));
            }
            for i in (chunks * 16)..n {
                out[i] = *src.add(i) * s;
            }
        }
    }
}
