//! Global 256-color palette built by seeded mini-batch k-means over pixels
//! sampled from every frame.

use anyhow::{anyhow, Result};
use image::RgbImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of palette entries; a palette index always fits in one byte.
pub const PALETTE_SIZE: usize = 256;

/// Clustering parameters for palette construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteOptions {
    /// Keep every `sample_stride`-th pooled pixel.
    pub sample_stride: usize,
    pub seed: u64,
    pub batch_size: usize,
    /// Number of k-means++ initializations; the one with the lowest inertia wins.
    pub n_init: usize,
    /// Upper bound on training, in passes over the sampled pixels.
    pub max_iter: usize,
    /// Stop once the smoothed batch inertia has not improved for this many batches.
    pub max_no_improvement: usize,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            sample_stride: 8,
            seed: 42,
            batch_size: 2048,
            n_init: 3,
            max_iter: 100,
            max_no_improvement: 10,
        }
    }
}

impl PaletteOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_sample_stride(mut self, stride: usize) -> Self {
        self.sample_stride = stride;
        self
    }
}

/// Fixed 256-entry color table plus the fitted centroids used to classify
/// arbitrary colors.
#[derive(Debug, Clone)]
pub struct Palette {
    colors: Vec<[u8; 3]>,
    centroids: Vec<[f64; 3]>,
}

impl Palette {
    /// Build the palette from all frames.
    ///
    /// Pixels are pooled across frames in order into one sample buffer,
    /// subsampled, then clustered once. No frames (or no pixels) is an error.
    pub fn build<'a, I>(frames: I, options: &PaletteOptions) -> Result<Self>
    where
        I: IntoIterator<Item = &'a RgbImage>,
    {
        let samples = sample_pixels(frames, options.sample_stride);
        Self::from_samples(&samples, options)
    }

    /// Fit the palette to an already collected sample buffer.
    pub fn from_samples(samples: &[[u8; 3]], options: &PaletteOptions) -> Result<Self> {
        if samples.is_empty() {
            return Err(anyhow!("cannot build a palette from zero sampled pixels"));
        }
        tracing::info!(
            "clustering {} sampled pixels into {} colors (seed {})",
            samples.len(),
            PALETTE_SIZE,
            options.seed
        );
        let centroids = fit_minibatch_kmeans(samples, PALETTE_SIZE, options);
        let colors = centroids.iter().map(|c| truncate_rgb(*c)).collect();
        Ok(Self { colors, centroids })
    }

    /// Palette whose classifier uses the colors themselves as centroids.
    pub fn from_colors(colors: Vec<[u8; 3]>) -> Result<Self> {
        if colors.len() != PALETTE_SIZE {
            return Err(anyhow!(
                "palette must have exactly {} colors, got {}",
                PALETTE_SIZE,
                colors.len()
            ));
        }
        let centroids = colors
            .iter()
            .map(|c| [c[0] as f64, c[1] as f64, c[2] as f64])
            .collect();
        Ok(Self { colors, centroids })
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Index of the centroid nearest to `rgb`; ties keep the lowest index.
    pub fn classify(&self, rgb: [f64; 3]) -> u8 {
        nearest(&self.centroids, rgb).0 as u8
    }

    /// 768 bytes of R, G, B triples in palette order.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.colors.iter().flat_map(|c| c.iter().copied()).collect()
    }
}

/// Pool the pixels of all frames (in frame order) and keep every
/// `stride`-th one, counting across frame boundaries.
pub fn sample_pixels<'a, I>(frames: I, stride: usize) -> Vec<[u8; 3]>
where
    I: IntoIterator<Item = &'a RgbImage>,
{
    let stride = stride.max(1);
    let mut samples = Vec::new();
    let mut offset = 0usize;
    for frame in frames {
        let len = frame.pixels().len();
        // First index in this frame that lands on the global stride.
        let mut i = (stride - offset % stride) % stride;
        let raw = frame.as_raw();
        while i < len {
            samples.push([raw[i * 3], raw[i * 3 + 1], raw[i * 3 + 2]]);
            i += stride;
        }
        offset += len;
    }
    samples
}

fn to_f64(px: [u8; 3]) -> [f64; 3] {
    [px[0] as f64, px[1] as f64, px[2] as f64]
}

fn truncate_rgb(c: [f64; 3]) -> [u8; 3] {
    [
        c[0].clamp(0.0, 255.0) as u8,
        c[1].clamp(0.0, 255.0) as u8,
        c[2].clamp(0.0, 255.0) as u8,
    ]
}

#[inline]
fn dist_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

/// (index, squared distance) of the nearest center; first minimum wins.
fn nearest(centers: &[[f64; 3]], point: [f64; 3]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centers.iter().enumerate() {
        let d = dist_sq(*c, point);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

fn fit_minibatch_kmeans(samples: &[[u8; 3]], k: usize, options: &PaletteOptions) -> Vec<[f64; 3]> {
    let n = samples.len();
    let batch_size = options.batch_size.max(1).min(n);
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut init_size = 3 * options.batch_size.max(1);
    if init_size < k {
        init_size = 3 * k;
    }
    let init_size = init_size.min(n);

    let validation: Vec<[f64; 3]> = (0..init_size)
        .map(|_| to_f64(samples[rng.gen_range(0..n)]))
        .collect();

    let mut best: Option<(Vec<[f64; 3]>, f64)> = None;
    for run in 0..options.n_init.max(1) {
        let init_set: Vec<[f64; 3]> = (0..init_size)
            .map(|_| to_f64(samples[rng.gen_range(0..n)]))
            .collect();
        let centers = kmeans_plusplus(&init_set, k, &mut rng);
        // Collected before summing so the float reduction order is fixed.
        let distances: Vec<f64> = validation.par_iter().map(|p| nearest(&centers, *p).1).collect();
        let inertia: f64 = distances.iter().sum();
        tracing::debug!("palette init {}: inertia {:.1}", run, inertia);
        if best.as_ref().map_or(true, |(_, b)| inertia < *b) {
            best = Some((centers, inertia));
        }
    }
    let mut centers = match best {
        Some((centers, _)) => centers,
        None => return vec![[0.0; 3]; k],
    };

    let n_steps = (options.max_iter.max(1) * n).div_ceil(batch_size);
    let ewa_alpha = (batch_size as f64 * 2.0 / (n as f64 + 1.0)).min(1.0);
    let mut counts = vec![0.0f64; k];
    let mut ewa_inertia: Option<f64> = None;
    let mut ewa_min = f64::INFINITY;
    let mut no_improvement = 0usize;

    for step in 0..n_steps {
        let batch: Vec<[f64; 3]> = (0..batch_size)
            .map(|_| to_f64(samples[rng.gen_range(0..n)]))
            .collect();
        let labels: Vec<(usize, f64)> = batch.par_iter().map(|p| nearest(&centers, *p)).collect();

        let mut sums = vec![[0.0f64; 3]; k];
        let mut batch_counts = vec![0.0f64; k];
        let mut batch_inertia = 0.0;
        for (p, (label, d)) in batch.iter().zip(&labels) {
            sums[*label][0] += p[0];
            sums[*label][1] += p[1];
            sums[*label][2] += p[2];
            batch_counts[*label] += 1.0;
            batch_inertia += d;
        }
        batch_inertia /= batch_size as f64;

        for j in 0..k {
            if batch_counts[j] == 0.0 {
                continue;
            }
            let old = counts[j];
            let new = old + batch_counts[j];
            for c in 0..3 {
                centers[j][c] = (centers[j][c] * old + sums[j][c]) / new;
            }
            counts[j] = new;
        }

        let ewa = match ewa_inertia {
            None => batch_inertia,
            Some(prev) => prev * (1.0 - ewa_alpha) + batch_inertia * ewa_alpha,
        };
        ewa_inertia = Some(ewa);
        if ewa < ewa_min {
            ewa_min = ewa;
            no_improvement = 0;
        } else {
            no_improvement += 1;
            if no_improvement >= options.max_no_improvement {
                tracing::debug!("palette converged after {} of {} batches", step + 1, n_steps);
                break;
            }
        }
    }

    centers
}

/// k-means++ seeding: first center uniform, the rest drawn with probability
/// proportional to squared distance from the nearest chosen center.
fn kmeans_plusplus(points: &[[f64; 3]], k: usize, rng: &mut StdRng) -> Vec<[f64; 3]> {
    let n = points.len();
    let mut centers = Vec::with_capacity(k);
    centers.push(points[rng.gen_range(0..n)]);
    let mut closest: Vec<f64> = points.iter().map(|p| dist_sq(*p, centers[0])).collect();

    while centers.len() < k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut chosen = n - 1;
            for (i, d) in closest.iter().enumerate() {
                acc += d;
                if acc > target {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };
        let center = points[pick];
        centers.push(center);
        for (d, p) in closest.iter_mut().zip(points) {
            let nd = dist_sq(*p, center);
            if nd < *d {
                *d = nd;
            }
        }
    }
    centers
}
