//! Top-k / top-p / temperature sampling over a logits vector.
//!
//! Kept separate from any particular `Runner` so a real runner can reuse it
//! once it has actual logits, and the mock runner can exercise the same
//! sampling path with synthetic ones.

use rand::prelude::*;

/// `top_k == 0` means "no top-k truncation"; `top_p >= 1.0` means "no
/// nucleus truncation". Falls back to the highest-probability token if the
/// RNG draw somehow doesn't land inside the truncated distribution.
pub fn sample_top_k_top_p<R: Rng + ?Sized>(
    rng: &mut R,
    logits: &[f32],
    top_k: usize,
    top_p: f32,
    temperature: f32,
) -> usize {
    if logits.is_empty() {
        return 0;
    }

    let mut ranked: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .map(|(i, &l)| (i, l / temperature.max(1e-4)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

    let cutoff = if top_k > 0 {
        ranked.len().min(top_k)
    } else {
        ranked.len()
    };

    let mut probs: Vec<(usize, f32)> = Vec::with_capacity(cutoff);
    let mut sum = 0.0_f32;
    for &(i, l) in &ranked[..cutoff] {
        let p = l.exp();
        probs.push((i, p));
        sum += p;
    }
    for p in &mut probs {
        p.1 /= sum.max(1e-9);
    }

    if top_p < 1.0 {
        probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let mut acc = 0.0_f32;
        let mut keep = 0;
        for &(_, p) in &probs {
            acc += p;
            keep += 1;
            if acc >= top_p {
                break;
            }
        }
        probs.truncate(keep);
        let z: f32 = probs.iter().map(|p| p.1).sum();
        for p in &mut probs {
            p.1 /= z.max(1e-9);
        }
    }

    let draw: f32 = rng.gen();
    let mut acc = 0.0_f32;
    for &(i, p) in &probs {
        acc += p;
        if draw <= acc {
            return i;
        }
    }
    ranked[0].0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greedy_top_k_one_picks_the_max_logit() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let logits = [0.1, 5.0, 0.2, 0.3];
        let pick = sample_top_k_top_p(&mut rng, &logits, 1, 1.0, 1.0);
        assert_eq!(pick, 1);
    }

    #[test]
    fn empty_logits_returns_zero() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        assert_eq!(sample_top_k_top_p(&mut rng, &[], 0, 1.0, 1.0), 0);
    }
}
