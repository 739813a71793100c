use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use barrelidx::barrel::writer::{BarrelWriter, InMemoryField};
use barrelidx::core::types::{CollectionId, DocId, FieldId, TermId};
use barrelidx::directory::memory::MemoryDirectory;
use barrelidx::directory::Directory;
use barrelidx::manifest::BarrelDescriptor;
use barrelidx::merge::executor::execute_merge;
use barrelidx::reader::DeleteBitVector;

const FIELD: FieldId = FieldId(0);

fn build_barrel(dir: &dyn Directory, stem: &str, base_doc: u32, num_docs: u32) -> BarrelDescriptor {
    let mut field = InMemoryField::new();
    for doc in base_doc..base_doc + num_docs {
        for term in 0..20u32 {
            field.add_occurrence(TermId(term), DocId(doc), 0);
        }
    }
    BarrelWriter::new(dir, stem, 16, 3)
        .write(vec![(FIELD, "body".into(), field)])
        .unwrap();
    BarrelDescriptor {
        name: stem.to_string(),
        base_doc_ids: vec![(CollectionId(0), DocId(base_doc))],
        num_docs,
        max_doc_id: DocId(base_doc + num_docs - 1),
        has_update_docs: false,
    }
}

/// The K-way term merge (§4.7) is the hot path the scheduler runs on every
/// flush; this tracks its cost as the number of same-size input barrels
/// grows, matching the "multiway" and "geometric" policies' fan-in.
fn bench_execute_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_execute");
    for num_barrels in [2usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("k_way_merge", num_barrels),
            &num_barrels,
            |b, &num_barrels| {
                b.iter_batched(
                    || {
                        let dir: Arc<dyn Directory> = Arc::new(MemoryDirectory::new());
                        let descriptors: Vec<BarrelDescriptor> = (0..num_barrels)
                            .map(|i| {
                                build_barrel(dir.as_ref(), &i.to_string(), (i as u32) * 1_000, 1_000)
                            })
                            .collect();
                        (dir, descriptors)
                    },
                    |(dir, descriptors)| {
                        let stats = execute_merge(
                            &dir,
                            &descriptors,
                            "merged",
                            &DeleteBitVector::new().snapshot(),
                            16,
                            3,
                        )
                        .unwrap();
                        black_box(stats);
                    },
                    criterion::BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_execute_merge);
criterion_main!(benches);
