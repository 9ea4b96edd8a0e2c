// Criterion benchmarks for the result merge
//
// Run benchmarks with:
//   cargo bench -p secret-coordinator

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use secret_coordinator::{compare_lines, MergeFrontier};

fn fragments(nodes: usize, lines_per_node: usize) -> Vec<String> {
    (0..nodes)
        .map(|node| {
            (0..lines_per_node)
                .map(|i| {
                    let chrom = (i * 7 + node) % 23 + 1;
                    let chrom = if chrom == 23 { "X".to_string() } else { chrom.to_string() };
                    format!("{}:{}\tA/C\t0.{}\t{}", chrom, 1_000 + i * 13 + node, i % 97, i)
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

fn bench_compare(c: &mut Criterion) {
    c.bench_function("compare_lines", |b| {
        b.iter(|| compare_lines(black_box("12:104532\tA/C"), black_box("12:99871\tG/T")));
    });
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");
    let input = fragments(8, 5_000);

    group.bench_function("merge_8x5000", |b| {
        b.iter(|| {
            let mut frontier = MergeFrontier::new();
            for fragment in &input {
                frontier.push_fragment(black_box(fragment));
            }
            frontier.drain().count()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compare, bench_merge);
criterion_main!(benches);
