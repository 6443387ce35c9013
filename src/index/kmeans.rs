use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::linalg::{argmin_l2, mean, squared_l2};

#[derive(Clone, Debug)]
pub struct KMeansConfig {
    pub k: usize,
    pub max_iters: usize,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 5,
            max_iters: 300,
            seed: 42,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KMeansResult {
    pub centroids: Vec<Vec<f32>>,
    /// Cluster index per input point.
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

/// Seeded k-means: k-means++ initialisation followed by Lloyd iterations
/// until no assignment changes or `max_iters` is reached.
///
/// `k` is clamped to `[1, points.len()]`. A cluster that loses all of its
/// members keeps its previous centroid.
pub fn l2_kmeans(points: &[Vec<f32>], cfg: &KMeansConfig) -> KMeansResult {
    if points.is_empty() {
        return KMeansResult {
            centroids: Vec::new(),
            assignments: Vec::new(),
            iterations: 0,
        };
    }

    let dim = points[0].len();
    let k = cfg.k.clamp(1, points.len());
    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut centroids = kmeans_plus_plus(points, k, &mut rng);

    let mut assignments = vec![usize::MAX; points.len()];
    let mut iterations = 0usize;
    for _ in 0..cfg.max_iters.max(1) {
        iterations += 1;
        let mut changed = false;
        for (slot, p) in assignments.iter_mut().zip(points) {
            let cid = argmin_l2(p, &centroids).unwrap_or(0);
            if *slot != cid {
                *slot = cid;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (cid, centroid) in centroids.iter_mut().enumerate() {
            let mut members = points
                .iter()
                .zip(&assignments)
                .filter(|(_, a)| **a == cid)
                .map(|(p, _)| p.as_slice())
                .peekable();
            if members.peek().is_some() {
                *centroid = mean(members, dim);
            }
        }
    }

    KMeansResult {
        centroids,
        assignments,
        iterations,
    }
}

fn kmeans_plus_plus(points: &[Vec<f32>], k: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());

    let mut nearest: Vec<f32> = points
        .iter()
        .map(|p| squared_l2(p, &centroids[0]))
        .collect();
    while centroids.len() < k {
        let total: f32 = nearest.iter().sum();
        let pick = if total > 0.0 && total.is_finite() {
            let mut target = rng.gen::<f32>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in nearest.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= *d;
            }
            chosen
        } else {
            // Every point coincides with a centroid already.
            rng.gen_range(0..points.len())
        };
        let next = points[pick].clone();
        for (d, p) in nearest.iter_mut().zip(points) {
            *d = d.min(squared_l2(p, &next));
        }
        centroids.push(next);
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::{l2_kmeans, KMeansConfig};

    fn two_blobs() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![0.0, 0.1],
            vec![5.0, 5.0],
            vec![5.1, 5.0],
            vec![5.0, 5.1],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let got = l2_kmeans(
            &two_blobs(),
            &KMeansConfig {
                k: 2,
                ..Default::default()
            },
        );
        assert_eq!(got.centroids.len(), 2);
        let a = got.assignments[0];
        assert!(got.assignments[..3].iter().all(|x| *x == a));
        assert!(got.assignments[3..].iter().all(|x| *x != a));
    }

    #[test]
    fn same_seed_same_result() {
        let cfg = KMeansConfig {
            k: 3,
            max_iters: 50,
            seed: 7,
        };
        assert_eq!(l2_kmeans(&two_blobs(), &cfg), l2_kmeans(&two_blobs(), &cfg));
    }

    #[test]
    fn clamps_k_and_handles_empty() {
        let got = l2_kmeans(
            &[vec![1.0], vec![2.0]],
            &KMeansConfig {
                k: 10,
                ..Default::default()
            },
        );
        assert_eq!(got.centroids.len(), 2);
        assert!(l2_kmeans(&[], &KMeansConfig::default()).centroids.is_empty());
    }

    #[test]
    fn identical_points_do_not_panic() {
        let points = vec![vec![1.0, 1.0]; 4];
        let got = l2_kmeans(
            &points,
            &KMeansConfig {
                k: 2,
                ..Default::default()
            },
        );
        assert_eq!(got.assignments, vec![0; 4]);
    }
}
