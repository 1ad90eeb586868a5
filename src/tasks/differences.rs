use std::ops::Range;
use std::time::Instant;

use anyhow::{Result, ensure};
use rand::Rng;

use super::seeded_rng;
use crate::config::TaskConfig;
use crate::pipeline::Chain;

/// `length` reals drawn uniformly from `[range.start, range.end)`.
pub fn generate_sequence(length: usize, range: Range<i32>, rng: &mut impl Rng) -> Result<Vec<f64>> {
    ensure!(
        !range.is_empty(),
        "empty value range {}..{}",
        range.start,
        range.end
    );
    let (low, high) = (f64::from(range.start), f64::from(range.end));
    Ok((0..length).map(|_| rng.gen_range(low..high)).collect())
}

/// Product of `s[i] - s[i - 1]` over the sequence; 0.0 with fewer than two
/// elements.
pub fn product_of_differences(sequence: &[f64]) -> f64 {
    if sequence.len() < 2 {
        return 0.0;
    }
    sequence.windows(2).map(|pair| pair[1] - pair[0]).product()
}

pub fn product_chain(sequence: Vec<f64>) -> Chain<f64> {
    Chain::supply("supply", move || Ok(sequence)).then(
        "product-of-differences",
        |sequence: Vec<f64>| Ok(product_of_differences(&sequence)),
    )
}

pub fn chain(settings: &TaskConfig) -> Chain<()> {
    let length = settings.length;
    let seed = settings.seed;
    let range = settings.value_range();
    let initial_start = Instant::now();

    Chain::supply("generate-sequence", move || {
        let mut rng = seeded_rng(seed);
        generate_sequence(length, range, &mut rng)
    })
    .then("product-of-differences", |sequence: Vec<f64>| {
        Ok(product_of_differences(&sequence))
    })
    .then_accept("display", move |product: f64| {
        println!("   PRODUCT OF DIFFERENCES: {product:.4}");
        println!(
            "   Total time of all async stages: {} ms",
            initial_start.elapsed().as_millis()
        );
        Ok(())
    })
}
