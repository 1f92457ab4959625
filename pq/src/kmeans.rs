use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;

/// RMS centroid drift below this terminates Lloyd iteration early.
const CONVERGENCE_EPS: f32 = 1e-4;

pub(crate) fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Train `k` centroids over `points` (flat `n * dsub` layout) with k-means++ seeding
/// and at most `niter` Lloyd iterations. Returns a flat `k * dsub` centroid table.
///
/// Fewer than `k` points are topped up by duplicating random ones; clusters that go
/// empty mid-iteration are re-seeded from a random point.
pub(crate) fn train_centroids(points: &[f32], dsub: usize, k: usize, niter: usize, rng: &mut StdRng) -> Vec<f32> {
    debug_assert!(dsub > 0 && points.len() % dsub == 0);
    let n = points.len() / dsub;
    debug_assert!(n > 0);

    // Top up small training sets so every centroid has a seed candidate.
    let mut data: Vec<f32> = points.to_vec();
    while data.len() / dsub < k {
        let pick = rng.gen_range(0..n);
        data.extend_from_slice(&points[pick * dsub..(pick + 1) * dsub]);
    }
    let n = data.len() / dsub;
    let point = |i: usize| &data[i * dsub..(i + 1) * dsub];

    // k-means++ seeding: first centroid uniform, the rest weighted by min squared distance.
    let mut centroids: Vec<f32> = Vec::with_capacity(k * dsub);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(point(first));
    let mut min_dist: Vec<f32> = (0..n).map(|i| squared_l2(point(i), &centroids[0..dsub])).collect();

    for _ in 1..k {
        let next = match WeightedIndex::new(&min_dist) {
            Ok(weighted) => weighted.sample(rng),
            // All remaining distances are zero (duplicated points) - fall back to uniform.
            Err(_) => rng.gen_range(0..n),
        };
        let c = centroids.len();
        centroids.extend_from_slice(point(next));
        for i in 0..n {
            let d = squared_l2(point(i), &centroids[c..c + dsub]);
            if d < min_dist[i] {
                min_dist[i] = d;
            }
        }
    }

    // Lloyd iterations.
    let mut assignment = vec![0usize; n];
    for _ in 0..niter {
        for (i, slot) in assignment.iter_mut().enumerate() {
            *slot = nearest(&centroids, dsub, k, point(i)).0;
        }

        let mut sums = vec![0.0f32; k * dsub];
        let mut counts = vec![0usize; k];
        for (i, &c) in assignment.iter().enumerate() {
            counts[c] += 1;
            for (slot, v) in sums[c * dsub..(c + 1) * dsub].iter_mut().zip(point(i)) {
                *slot += v;
            }
        }

        let mut drift = 0.0f32;
        for c in 0..k {
            let target = &mut centroids[c * dsub..(c + 1) * dsub];
            if counts[c] == 0 {
                // Re-seed an empty cluster from a random training point.
                let pick = rng.gen_range(0..n);
                target.copy_from_slice(&data[pick * dsub..(pick + 1) * dsub]);
                continue;
            }
            for (j, slot) in target.iter_mut().enumerate() {
                let updated = sums[c * dsub + j] / counts[c] as f32;
                let delta = updated - *slot;
                drift += delta * delta;
                *slot = updated;
            }
        }

        if (drift / (k * dsub) as f32).sqrt() < CONVERGENCE_EPS {
            break;
        }
    }

    centroids
}

/// Index and squared distance of the nearest centroid to `v`.
pub(crate) fn nearest(centroids: &[f32], dsub: usize, k: usize, v: &[f32]) -> (usize, f32) {
    let mut best = (0usize, f32::INFINITY);
    for c in 0..k {
        let d = squared_l2(&centroids[c * dsub..(c + 1) * dsub], v);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}
