#![forbid(unsafe_code)]

use rand::Rng;
use rand::prelude::IndexedRandom;

use crate::ATerm;
use crate::TermStore;
use crate::TermStoreError;

/// Creates a random term consisting of the given symbols and constants.
/// Performs `iterations` constructions, where every construction can use
/// the results of the previous ones as arguments so that subterms are shared.
pub fn random_term(
    store: &mut TermStore,
    rng: &mut impl Rng,
    symbols: &[(String, usize)],
    constants: &[String],
    iterations: usize,
) -> Result<ATerm, TermStoreError> {
    debug_assert!(!constants.is_empty(), "We need constants to be able to create a term");

    let mut subterms = Vec::with_capacity(constants.len() + iterations);
    for name in constants {
        let symbol = store.create_symbol(name, 0)?;
        subterms.push(store.make_constant(&symbol)?);
    }

    let mut result = subterms[rng.random_range(0..subterms.len())].clone();
    for _ in 0..iterations {
        let Some((name, arity)) = symbols.choose(rng) else {
            break;
        };

        let arguments: Vec<ATerm> = (0..*arity)
            .map(|_| subterms[rng.random_range(0..subterms.len())].clone())
            .collect();

        let symbol = store.create_symbol(name, *arity)?;
        let term = store.make_appl(&symbol, &arguments)?;

        // Make this term available as another subterm that can be used.
        subterms.push(term.clone());
        result = term;
    }

    Ok(result)
}
