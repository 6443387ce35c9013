//! Dense `f32` vector helpers shared by the store, search and clustering.

/// Norm below which a vector is treated as zero and cannot be normalized.
pub const MIN_NORM: f32 = 1e-6;

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut lanes = [0.0f32; 4];
    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        lanes[0] += ca[0] * cb[0];
        lanes[1] += ca[1] * cb[1];
        lanes[2] += ca[2] * cb[2];
        lanes[3] += ca[3] * cb[3];
    }
    let mut out = (lanes[0] + lanes[1]) + (lanes[2] + lanes[3]);
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        out += x * y;
    }
    out
}

#[inline]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut lanes = [0.0f32; 4];
    let mut chunks_a = a.chunks_exact(4);
    let mut chunks_b = b.chunks_exact(4);
    for (ca, cb) in (&mut chunks_a).zip(&mut chunks_b) {
        for lane in 0..4 {
            let d = ca[lane] - cb[lane];
            lanes[lane] += d * d;
        }
    }
    let mut out = (lanes[0] + lanes[1]) + (lanes[2] + lanes[3]);
    for (x, y) in chunks_a.remainder().iter().zip(chunks_b.remainder()) {
        let d = x - y;
        out += d * d;
    }
    out
}

pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// True when every component is finite and the norm is usable.
pub fn is_usable(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite()) && norm(v) > MIN_NORM
}

/// Scales `v` to unit length. Returns `false` (leaving `v` untouched) for
/// zero or non-finite vectors.
pub fn normalize_inplace(v: &mut [f32]) -> bool {
    if !is_usable(v) {
        return false;
    }
    let inv = 1.0 / norm(v);
    scale_inplace(v, inv);
    true
}

pub fn l2_normalized(mut v: Vec<f32>) -> Option<Vec<f32>> {
    normalize_inplace(&mut v).then_some(v)
}

pub fn add_inplace(dst: &mut [f32], src: &[f32]) {
    debug_assert_eq!(dst.len(), src.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

pub fn scale_inplace(dst: &mut [f32], factor: f32) {
    for d in dst {
        *d *= factor;
    }
}

/// `wa * a + wb * b`, unnormalized.
pub fn weighted_sum(a: &[f32], wa: f32, b: &[f32], wb: f32) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| wa * x + wb * y).collect()
}

pub fn mean<'a, I>(rows: I, dim: usize) -> Vec<f32>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut out = vec![0.0; dim];
    let mut n = 0usize;
    for row in rows {
        add_inplace(&mut out, row);
        n += 1;
    }
    if n > 0 {
        scale_inplace(&mut out, 1.0 / n as f32);
    }
    out
}

/// Index of the closest centroid; ties go to the lowest index.
pub fn argmin_l2(query: &[f32], centroids: &[Vec<f32>]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_l2(query, c);
        match best {
            Some((_, bd)) if d >= bd => {}
            _ => best = Some((i, d)),
        }
    }
    best.map(|(i, _)| i)
}
