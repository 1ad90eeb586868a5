use std::ops::Range;
use std::time::Instant;

use anyhow::{Result, anyhow, ensure};
use rand::Rng;

use super::seeded_rng;
use crate::config::TaskConfig;
use crate::pipeline::Chain;

/// `length` integers drawn uniformly from `range`.
pub fn generate(length: usize, range: Range<i32>, rng: &mut impl Rng) -> Result<Vec<i32>> {
    ensure!(
        !range.is_empty(),
        "empty value range {}..{}",
        range.start,
        range.end
    );
    Ok((0..length).map(|_| rng.gen_range(range.clone())).collect())
}

/// Adds 10 to every element of an owned copy.
pub fn add_ten(mut values: Vec<i32>) -> Result<Vec<i32>> {
    for value in values.iter_mut() {
        let current = *value;
        *value = current
            .checked_add(10)
            .ok_or_else(|| anyhow!("adding 10 to {current} overflows i32"))?;
    }
    Ok(values)
}

pub fn halve(values: &[i32]) -> Vec<f64> {
    values.iter().map(|&value| f64::from(value) / 2.0).collect()
}

/// `values` → add 10 → halve, without any presentation stages.
pub fn transform_chain(values: Vec<i32>) -> Chain<Vec<f64>> {
    Chain::supply("supply", move || Ok(values))
        .then("add-ten", add_ten)
        .then("halve", |values: Vec<i32>| Ok(halve(&values)))
}

pub fn chain(settings: &TaskConfig) -> Chain<()> {
    let length = settings.length;
    let seed = settings.seed;
    let range = settings.value_range();
    let initial_start = Instant::now();

    Chain::supply("generate", move || {
        let mut rng = seeded_rng(seed);
        generate(length, range, &mut rng)
    })
    .then("add-ten", add_ten)
    .then("halve", |values: Vec<i32>| Ok(halve(&values)))
    .then_accept("display", |result: Vec<f64>| {
        println!("   HALVED RESULT: {result:?}");
        Ok(())
    })
    .then_run("finish", move || {
        println!(
            "   Total time of all async stages: {} ms",
            initial_start.elapsed().as_millis()
        );
        Ok(())
    })
}
