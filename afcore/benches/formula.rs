use std::io::Cursor;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use afcore::{
    Formula, RefFormulasMap, Term,
    algebra::{formulas_equal, has_integer_ratio, has_integer_ratio_and_remainder},
    persist::{CacheReader, CacheWriter},
};
use afinstr::{RegisterClass, X86_64, arch::X86Reg};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

const REGS: [X86Reg; 6] = [
    X86Reg::Rax,
    X86Reg::Rbx,
    X86Reg::Rcx,
    X86Reg::Rdx,
    X86Reg::Rsi,
    X86Reg::Rdi,
];

fn random_terms(rng: &mut impl Rng, count: usize) -> Vec<Term> {
    (0..count)
        .map(|_| match rng.random_range(0..=3) {
            0 => Term::constant(rng.random_range(-512..512)),
            1 => Term::stack(rng.random_range(-4..4), 0x500, 0, rng.random_range(0..16) * 8),
            2 => Term::load(
                rng.random_range(-4..4),
                0x400 + rng.random_range(0..64) * 4,
                0,
                X86_64::register(REGS[rng.random_range(0..REGS.len())], RegisterClass::MemOp),
            ),
            _ => Term::register(
                rng.random_range(-8..8),
                0x400 + rng.random_range(0..64) * 4,
                rng.random_range(0..3),
                X86_64::register(REGS[rng.random_range(0..REGS.len())], RegisterClass::RegOp),
            ),
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut rng = ChaCha20Rng::seed_from_u64(0x42);
    let terms = random_terms(&mut rng, 64);
    let lhs: Formula = random_terms(&mut rng, 32).into_iter().collect();
    let rhs: Formula = random_terms(&mut rng, 32).into_iter().collect();

    // Term by term insertion, as done by slicing.
    c.bench_function("formula_add_terms", |b| {
        b.iter(|| {
            let mut f = Formula::zero();
            for t in &terms {
                f.add(*t);
            }
            black_box(f);
        })
    });

    // Pairwise merge of two formulas.
    c.bench_function("formula_pairwise_sum", |b| {
        b.iter(|| black_box(&lhs + &rhs))
    });
}

fn bench_algebra(c: &mut Criterion) {
    let mut rng = ChaCha20Rng::seed_from_u64(0x43);
    let symbolic: Formula = random_terms(&mut rng, 24)
        .into_iter()
        .filter(|t| !t.kind().is_constant())
        .collect();
    let scaled = &symbolic * 6;
    let shifted = &scaled + &Formula::from_term(Term::constant(40));

    c.bench_function("algebra_integer_ratio", |b| {
        b.iter(|| black_box(has_integer_ratio(black_box(&scaled), black_box(&symbolic))))
    });

    c.bench_function("algebra_ratio_and_remainder", |b| {
        b.iter(|| {
            black_box(has_integer_ratio_and_remainder(
                black_box(&shifted),
                black_box(&symbolic),
            ))
        })
    });

    c.bench_function("algebra_equal", |b| {
        b.iter(|| black_box(formulas_equal(black_box(&scaled), black_box(&scaled))))
    });
}

fn bench_cache(c: &mut Criterion) {
    let mut rng = ChaCha20Rng::seed_from_u64(0x44);
    let mut map = RefFormulasMap::new(0x400);
    for pc in (0x400..0x800).step_by(8) {
        let rf = map.entry(pc, 0);
        rf.base = random_terms(&mut rng, 6).into_iter().collect();
        rf.strides = (0..2)
            .map(|_| random_terms(&mut rng, 3).into_iter().collect())
            .collect();
    }

    c.bench_function("cache_save_routine", |b| {
        b.iter(|| {
            let mut writer = CacheWriter::create(Cursor::new(Vec::new()), 1).unwrap();
            writer.save_routine(0x400, &map).unwrap();
            black_box(writer.finish().unwrap());
        })
    });

    let mut writer = CacheWriter::create(Cursor::new(Vec::new()), 1).unwrap();
    writer.save_routine(0x400, &map).unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    let mut reader = CacheReader::open(Cursor::new(bytes), 1).unwrap();

    c.bench_function("cache_load_routine", |b| {
        b.iter(|| {
            let mut loaded = RefFormulasMap::new(0x400);
            black_box(reader.fetch_routine(0x400, &mut loaded));
            black_box(loaded);
        })
    });
}

criterion_group!(benches, bench_merge, bench_algebra, bench_cache);
criterion_main!(benches);
