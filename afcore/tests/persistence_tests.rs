use std::io::{Cursor, Seek, SeekFrom, Write};

use afcore::{
    AfError, Formula, RefFormulasMap, Term,
    algebra::has_integer_ratio,
    magic::{HEADER_SIZE, INDEX_OFFSET_POSITION},
    persist::{CacheReader, CacheSession, CacheWriter, cache_path_for},
    utils::conf::AnalysisConfig,
};
use afinstr::{RegisterClass, X86_64, arch::X86Reg};

const IMAGE_CHECKSUM: u32 = 0x1234_abcd;

fn rax(coeff: i64) -> Term {
    Term::register(coeff, 0x400, 0, X86_64::register(X86Reg::Rax, RegisterClass::RegOp))
}

/// `F1 = rax + 8` as base, `F2 = 2 rax + 16` as stride.
fn sample_map(routine_pc: u64) -> RefFormulasMap {
    let mut map = RefFormulasMap::new(routine_pc);
    let rf = map.entry(routine_pc + 0x10, 0);
    rf.base = [rax(1), Term::constant(8)].into_iter().collect();
    rf.strides.push([rax(2), Term::constant(16)].into_iter().collect());

    let rf = map.entry(routine_pc + 0x10, 1);
    let mut base: Formula = [
        Term::stack(1, routine_pc, 2, 0x20),
        Term::load(3, routine_pc + 4, 0, X86_64::register(X86Reg::R9, RegisterClass::MemOp)) / 2,
    ]
    .into_iter()
    .collect();
    base.mark_indirect();
    rf.base = base;
    rf.strides.push(Formula::zero());
    rf.strides.push(Formula::uninitialized());

    map.entry(routine_pc + 0x20, 3);

    let rf = map.entry(routine_pc + 0x30, 2);
    rf.base = [
        Term::unknown(-1, routine_pc + 0x2c, 0),
        Term::call(2, routine_pc + 0x28, 1, 0x7f00_1000),
        Term::reference(5, routine_pc + 0x24, 0, 0x60_1040) / 3,
        Term::constant(-0x40),
    ]
    .into_iter()
    .collect();
    rf.base.mark_irregular();
    map
}

fn write_cache(checksum: u32, routines: &[(u64, &RefFormulasMap)]) -> Vec<u8> {
    let mut writer = CacheWriter::create(Cursor::new(Vec::new()), checksum).unwrap();
    for (pc, map) in routines {
        writer.save_routine(*pc, map).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[test]
fn routines_round_trip() {
    let first = sample_map(0x1000);
    let second = sample_map(0x2000);
    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &first), (0x2000, &second)]);

    let mut reader = CacheReader::open(Cursor::new(bytes), IMAGE_CHECKSUM).unwrap();
    assert_eq!(
        reader.routines().map(|(pc, _)| pc).collect::<Vec<_>>(),
        vec![0x1000, 0x2000]
    );
    for (pc, expected) in [(0x1000, &first), (0x2000, &second)] {
        let mut map = RefFormulasMap::new(pc);
        assert!(reader.fetch_routine(pc, &mut map));
        assert_eq!(&map, expected);
    }

    let mut map = RefFormulasMap::new(0x3000);
    assert!(!reader.fetch_routine(0x3000, &mut map));
    assert!(matches!(
        reader.load_routine(0x3000, &mut map),
        Err(AfError::UnknownRoutine(0x3000))
    ));
}

#[test]
fn accumulated_unset_formulas_round_trip() {
    let mut map = RefFormulasMap::new(0x1000);
    map.entry(0x1010, 0).base.add(Term::constant(8));
    map.entry(0x1010, 1).base =
        &Formula::uninitialized() + &Formula::from_term(Term::constant(4));
    assert!(map.get(0x1010, 0).unwrap().base.is_uninitialized());
    assert!(map.get(0x1010, 1).unwrap().base.is_uninitialized());

    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &map)]);
    let mut reader = CacheReader::open(Cursor::new(bytes), IMAGE_CHECKSUM).unwrap();
    let mut loaded = RefFormulasMap::new(0x1000);
    reader.load_routine(0x1000, &mut loaded).unwrap();
    assert_eq!(loaded, map);
    assert!(loaded.get(0x1010, 1).unwrap().base.is_uninitialized());
}

#[test]
fn every_term_kind_round_trips() {
    let map = sample_map(0x1000);
    let kinds: std::collections::BTreeSet<_> = map
        .iter()
        .flat_map(|(_, rf)| rf.base.iter().chain(rf.strides.iter().flatten()))
        .map(|t| t.kind())
        .collect();
    assert_eq!(kinds.len(), 7, "fixture covers {kinds:?}");

    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &map)]);
    let mut reader = CacheReader::open(Cursor::new(bytes), IMAGE_CHECKSUM).unwrap();
    let mut loaded = RefFormulasMap::new(0x1000);
    reader.load_routine(0x1000, &mut loaded).unwrap();
    assert_eq!(loaded, map);
}

#[test]
fn header_is_patched_with_the_index_offset() {
    let map = sample_map(0x1000);
    let bytes = write_cache(7, &[(0x1000, &map)]);
    let pos = INDEX_OFFSET_POSITION as usize;
    let index_offset = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
    assert!(index_offset > HEADER_SIZE);
    // One routine: count then (pc, offset).
    assert_eq!(bytes.len() as u64, index_offset + 4 + 16);
}

#[test]
fn wrong_checksum_means_absent_then_recompute() {
    let map = sample_map(0x1000);
    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &map)]);

    let err = CacheReader::open(Cursor::new(bytes.clone()), IMAGE_CHECKSUM ^ 1)
        .err()
        .expect("checksum must not match");
    assert!(matches!(err, AfError::ChecksumMismatch { .. }));
    assert!(err.is_cache_format());
    assert!(CacheReader::open_or_absent(Cursor::new(bytes), IMAGE_CHECKSUM ^ 1).is_none());

    // Recompute from scratch.
    let f1: Formula = [rax(1), Term::constant(8)].into_iter().collect();
    let f2: Formula = [rax(2), Term::constant(16)].into_iter().collect();
    assert_eq!(has_integer_ratio(&f1, &f2), Some((1, 2)));
}

#[test]
fn bad_magic_and_versions_are_rejected() {
    let map = sample_map(0x1000);
    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &map)]);

    let mut bad_magic = bytes.clone();
    bad_magic[0] = b'X';
    assert!(matches!(
        CacheReader::open(Cursor::new(bad_magic), IMAGE_CHECKSUM),
        Err(AfError::BadMagic)
    ));

    let mut newer = bytes.clone();
    newer[8..12].copy_from_slice(&2i32.to_le_bytes());
    assert!(matches!(
        CacheReader::open(Cursor::new(newer), IMAGE_CHECKSUM),
        Err(AfError::UnsupportedVersion { found: 2, .. })
    ));

    assert!(matches!(
        CacheReader::open_with_min_version(Cursor::new(bytes), IMAGE_CHECKSUM, 2),
        Err(AfError::UnsupportedVersion { found: 1, .. })
    ));

    assert!(matches!(
        CacheReader::open(Cursor::new(b"AFST".to_vec()), IMAGE_CHECKSUM),
        Err(AfError::BadMagic)
    ));
}

#[test]
fn unfinished_caches_are_rejected() {
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = CacheWriter::create(&mut cursor, IMAGE_CHECKSUM).unwrap();
    writer.save_routine(0x1000, &sample_map(0x1000)).unwrap();
    // Dropped without finish: the index offset is still the placeholder.
    drop(writer);
    let bytes = cursor.into_inner();
    assert!(matches!(
        CacheReader::open(Cursor::new(bytes), IMAGE_CHECKSUM),
        Err(AfError::MalformedIndex { .. })
    ));
}

#[test]
fn truncated_routine_is_discarded_alone() {
    let first = sample_map(0x1000);
    let second = sample_map(0x2000);
    let bytes = write_cache(IMAGE_CHECKSUM, &[(0x1000, &first), (0x2000, &second)]);
    let mut reader = CacheReader::open(Cursor::new(bytes.clone()), IMAGE_CHECKSUM).unwrap();
    let first_offset = reader.offset_of(0x1000).unwrap();

    // Corrupt the kind of the first term of the first routine's first base.
    let mut corrupted = Cursor::new(bytes);
    // entries:i32 key:u64 count:u32 num:i64 den:u64 -> kind
    corrupted
        .seek(SeekFrom::Start(first_offset + 4 + 8 + 4 + 8 + 8))
        .unwrap();
    corrupted.write_all(&99u32.to_le_bytes()).unwrap();

    let mut reader_bad =
        CacheReader::open(Cursor::new(corrupted.into_inner()), IMAGE_CHECKSUM).unwrap();
    let mut map = sample_map(0x1000);
    assert!(matches!(
        reader_bad.load_routine_at(first_offset, &mut map),
        Err(AfError::MalformedRoutine { .. })
    ));
    assert!(map.is_empty());

    let mut map = RefFormulasMap::new(0x2000);
    assert!(reader_bad.fetch_routine(0x2000, &mut map));
    assert_eq!(map, second);

    let mut map = RefFormulasMap::new(0x1000);
    assert!(reader.fetch_routine(0x1000, &mut map));
    assert_eq!(map, first);
}

fn temp_cache_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("afcore-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

#[test]
fn sessions_carry_forward_unfetched_routines() {
    let dir = temp_cache_dir("session");
    let config = AnalysisConfig {
        persistent_cache: true,
        cache_dir: Some(dir.clone()),
        ..Default::default()
    };
    let first = sample_map(0x1000);
    let second = sample_map(0x2000);

    // First run computes both routines.
    let mut session = CacheSession::open(&config, "/usr/lib/libdemo.so", IMAGE_CHECKSUM).unwrap();
    assert!(!session.has_previous());
    session.store(0x1000, &first).unwrap();
    session.store(0x2000, &second).unwrap();
    let path = session.commit().unwrap();
    assert_eq!(path, cache_path_for(&dir, "libdemo.so", IMAGE_CHECKSUM));
    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some("libdemo.so-0x1234abcd.stAn")
    );

    // Second run only revisits the first routine and changes it.
    let mut session = CacheSession::open(&config, "/usr/lib/libdemo.so", IMAGE_CHECKSUM).unwrap();
    assert!(session.has_previous());
    let mut map = RefFormulasMap::new(0x1000);
    assert!(session.fetch(0x1000, &mut map));
    assert_eq!(map, first);
    map.entry(0x1040, 0).base = Formula::from_term(Term::constant(1));
    session.store(0x1000, &map).unwrap();
    session.commit().unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let mut reader = CacheReader::open(std::io::BufReader::new(file), IMAGE_CHECKSUM).unwrap();
    let mut loaded = RefFormulasMap::new(0x1000);
    assert!(reader.fetch_routine(0x1000, &mut loaded));
    assert_eq!(loaded, map);
    let mut loaded = RefFormulasMap::new(0x2000);
    assert!(reader.fetch_routine(0x2000, &mut loaded));
    assert_eq!(loaded, second);

    // An abandoned run leaves the cache untouched.
    let mut session = CacheSession::open(&config, "/usr/lib/libdemo.so", IMAGE_CHECKSUM).unwrap();
    session.store(0x3000, &RefFormulasMap::new(0x3000)).unwrap();
    session.abandon();
    let file = std::fs::File::open(&path).unwrap();
    let reader = CacheReader::open(file, IMAGE_CHECKSUM).unwrap();
    assert_eq!(reader.routine_count(), 2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn disabled_cache_does_not_open() {
    let config = AnalysisConfig::default();
    assert!(matches!(
        CacheSession::open(&config, "a.out", 0),
        Err(AfError::CacheDisabled)
    ));
}
