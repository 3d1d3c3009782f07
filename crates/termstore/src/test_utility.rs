use rand::SeedableRng;
use rand::rngs::StdRng;

/// Constructs a logger for tests. This logger will not print anything to the console, but will instead write to a buffer.
pub fn test_logger() {
    if cfg!(not(feature = "merc_miri")) {
        // Ignore double initialisations in tests since tests are ran in parallel.
        let _ = env_logger::builder().is_test(true).try_init();
    }
}

/// Runs the test function with a random number generator whose seed is
/// printed, or taken from `MERC_SEED` when that is set.
pub fn random_test<F>(iterations: usize, test_function: F)
where
    F: FnMut(&mut StdRng),
{
    match std::env::var("MERC_SEED") {
        Ok(seed) => {
            let seed = seed.parse::<u64>().unwrap_or_else(|_| panic!("MERC_SEED={seed} is not a valid u64"));
            println!("seed: {seed} (fixed by MERC_SEED)");
            run_seeded(seed, iterations, test_function);
        }
        Err(_) => {
            let seed: u64 = rand::random();
            println!("random seed: {seed} (use MERC_SEED=<seed> to set fixed seed)");
            run_seeded(seed, iterations, test_function);
        }
    }
}

/// Can be used to rerun a random test with a specific seed.
pub fn random_test_seeded<F>(seed: u64, iterations: usize, test_function: F)
where
    F: FnMut(&mut StdRng),
{
    println!("seed: {seed}");
    run_seeded(seed, iterations, test_function);
}

fn run_seeded<F>(seed: u64, iterations: usize, mut test_function: F)
where
    F: FnMut(&mut StdRng),
{
    test_logger();

    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..iterations {
        test_function(&mut rng);
    }
}
