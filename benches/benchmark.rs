#[macro_use]
extern crate criterion;

extern crate rand;
extern crate recfair;

use criterion::Criterion;

use rand::{Rng, SeedableRng, XorShiftRng};

use recfair::data::{Interaction, Interactions};

fn synthetic_interactions(num_users: usize, num_items: usize, num_rows: usize) -> Interactions {
    let mut rng = XorShiftRng::from_seed([42; 16]);
    let mut interactions = Interactions::new(num_users, num_items);

    for _ in 0..num_rows {
        interactions.push(Interaction::new(
            rng.gen_range(0, num_users),
            rng.gen_range(0, num_items),
        ));
    }

    interactions
}

fn bench_layout_conversion(c: &mut Criterion) {
    c.bench_function("to_compressed", |b| {
        let data = synthetic_interactions(10_000, 5_000, 100_000);

        b.iter(|| data.to_positional().to_compressed().nnz())
    });
}

fn bench_user_slicing(c: &mut Criterion) {
    c.bench_function("user_rows", |b| {
        let compressed = synthetic_interactions(10_000, 5_000, 100_000).to_compressed();

        b.iter(|| {
            compressed
                .iter_users()
                .map(|user| user.len())
                .sum::<usize>()
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_layout_conversion, bench_user_slicing
}
criterion_main!(benches);
