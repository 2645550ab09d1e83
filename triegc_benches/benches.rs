use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{rngs::StdRng, SeedableRng};

use triegc::{stack_address, Heap, RefKind, Trie, ADDRESS_BYTES};
use triegc_benches::{random_keys, range_over, root_buffer};

const SEED: u64 = 0x7472_6965;

fn trie_benches(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(SEED);
    let keys = random_keys(&mut rng, 1000);
    let misses = random_keys(&mut rng, 1000);

    let mut trie: Trie<usize, ADDRESS_BYTES> = Trie::new();
    for (index, key) in keys.iter().enumerate() {
        trie.insert(key, index);
    }

    c.bench_function("trie_insert_1000", |b| {
        b.iter_batched(
            Trie::<usize, ADDRESS_BYTES>::new,
            |mut trie| {
                for (index, key) in keys.iter().enumerate() {
                    trie.insert(key, index);
                }
                trie
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("trie_get_hit_1000", |b| {
        b.iter(|| {
            for key in &keys {
                black_box(trie.get(key));
            }
        })
    });

    c.bench_function("trie_get_miss_1000", |b| {
        b.iter(|| {
            for key in &misses {
                black_box(trie.get(key));
            }
        })
    });
}

fn heap_benches(c: &mut Criterion) {
    c.bench_function("heap_alloc_1000", |b| {
        b.iter_batched(
            || Heap::new(stack_address()),
            |mut heap| {
                for _ in 0..1000 {
                    black_box(heap.alloc(32, RefKind::Standard).ok());
                }
                heap
            },
            BatchSize::SmallInput,
        )
    });

    // Mark and sweep from a root buffer holding every other object
    let mut group = c.benchmark_group("collect_range");
    for num_objects in [100usize, 1000, 10000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_objects),
            &num_objects,
            |b, &num_objects| {
                b.iter_batched(
                    || {
                        let mut heap = Heap::new(stack_address());
                        let addresses: Vec<usize> = (0..num_objects)
                            .filter_map(|_| heap.alloc(16, RefKind::List).ok())
                            .map(|ptr| ptr.as_ptr() as usize)
                            .collect();
                        let roots = root_buffer(&addresses[..num_objects / 2]);
                        (heap, roots)
                    },
                    |(mut heap, roots)| {
                        let stats = unsafe { heap.collect_range(range_over(&roots)) };
                        black_box(stats);
                        (heap, roots)
                    },
                    BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();

    // Scan cost grows with the root range, independent of heap size
    let mut group = c.benchmark_group("scan_bytes");
    for num_bytes in [1024usize, 16 * 1024, 256 * 1024] {
        let mut heap = Heap::new(stack_address());
        for _ in 0..1000 {
            let _ = heap.alloc(16, RefKind::Standard);
        }
        let mut rng = StdRng::seed_from_u64(SEED);
        let noise: Vec<u8> = random_keys(&mut rng, num_bytes / ADDRESS_BYTES)
            .into_iter()
            .flatten()
            .collect();
        let addresses: Vec<usize> = heap.refs().map(|gc_ref| gc_ref.address()).collect();
        let mut roots = root_buffer(&addresses);
        roots.extend_from_slice(&noise);

        group.bench_with_input(BenchmarkId::from_parameter(num_bytes), &roots, |b, roots| {
            b.iter(|| black_box(unsafe { heap.collect_range(range_over(roots)) }))
        });
    }
    group.finish();
}

criterion_group!(benches, trie_benches, heap_benches);
criterion_main!(benches);
