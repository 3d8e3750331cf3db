// ferrous-erate/tests/refine_integration_test.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ferrous_erate::erate_opt::{ReadRange, RefineOpt};
use ferrous_erate::estimate::{main_cache, main_estimate};
use ferrous_erate::overlap::{
    Overlap, OverlapSink, OverlapSource, OverlapStoreReader, OverlapStoreWriter,
};
use ferrous_erate::read_store::ReadLengths;

/// Eight reads of length 1000. Reads 1-7 form a consistent 1.5% family,
/// read 8 aligns to all of them at 25%.
fn build_dataset() -> (Vec<u32>, Vec<Overlap>) {
    let lengths = vec![1000u32; 8];
    let mut overlaps = Vec::new();
    let mut aux = 0u64;
    for a in 1..=8u32 {
        for b in 1..=8u32 {
            if a == b {
                continue;
            }
            let erate = if a == 8 || b == 8 { 0.25 } else { 0.015 };
            // Staggered dovetails so profiles are not flat.
            let shift = ((a + b) % 5) as i32 * 40;
            let mut ovl = if a < b {
                Overlap::new(a, b, shift, shift, erate, (a + b) % 2 == 0)
            } else {
                Overlap::new(a, b, -shift, -shift, erate, (a + b) % 2 == 0)
            };
            aux += 1;
            ovl.aux = aux;
            overlaps.push(ovl);
        }
    }
    (lengths, overlaps)
}

fn write_store(path: &Path, overlaps: &[Overlap]) {
    let mut writer = OverlapStoreWriter::create(path).unwrap();
    for ovl in overlaps {
        writer.append(ovl).unwrap();
    }
    assert_eq!(writer.finish().unwrap(), overlaps.len() as u64);
}

fn read_store(path: &Path) -> Vec<Overlap> {
    let mut reader = OverlapStoreReader::open(path).unwrap();
    let mut all = Vec::new();
    let mut buf = Vec::new();
    while reader.load_block_of_overlaps(&mut buf, 7).unwrap() > 0 {
        all.extend_from_slice(&buf);
    }
    all
}

fn write_lengths(path: &Path, lengths: &[u32]) {
    let text: String = lengths
        .iter()
        .enumerate()
        .map(|(i, l)| format!("{}\t{}\n", i + 1, l))
        .collect();
    fs::write(path, text).unwrap();
}

fn run(dir: &Path, cache: Option<PathBuf>) -> (Vec<Overlap>, u64) {
    let (lengths, overlaps) = build_dataset();
    let input = dir.join("input.ovs");
    let output = dir.join("output.ovs");
    if !input.exists() {
        write_store(&input, &overlaps);
    }

    let reads = ReadLengths::from_lengths(&lengths);
    let mut store = OverlapStoreReader::open(&input).unwrap();
    let mut writer = OverlapStoreWriter::create(&output).unwrap();
    let mut opt = RefineOpt::default();
    opt.cache = cache;
    opt.overlap_block = 5;
    opt.read_block = 2;

    let summary = main_estimate(&reads, &mut store, &mut writer, ReadRange::new(1, 8), &opt).unwrap();
    assert_eq!(summary.refine.iterations.len(), 4);
    (read_store(&output), summary.survivors.dropped)
}

#[test]
fn test_bad_read_overlaps_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let (survivors, dropped) = run(dir.path(), None);

    // Every overlap touching read 8 goes, everything else stays.
    assert_eq!(dropped, 14);
    assert_eq!(survivors.len(), 56 - 14);
    assert!(survivors.iter().all(|o| o.a_id != 8 && o.b_id != 8));

    // Survivors keep every field, including the ones the cache drops, and
    // keep the input order.
    let (_, input) = build_dataset();
    let expected: Vec<Overlap> = input
        .into_iter()
        .filter(|o| o.a_id != 8 && o.b_id != 8)
        .collect();
    assert_eq!(survivors, expected);
}

#[test]
fn test_cached_run_matches_uncached_run() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("overlaps.cache");

    let (plain, plain_dropped) = run(dir.path(), None);
    let (built, built_dropped) = run(dir.path(), Some(cache.clone()));
    assert!(cache.exists());
    let (mapped, mapped_dropped) = run(dir.path(), Some(cache.clone()));

    assert_eq!(plain, built);
    assert_eq!(plain, mapped);
    assert_eq!(plain_dropped, built_dropped);
    assert_eq!(plain_dropped, mapped_dropped);
}

#[test]
fn test_cache_from_other_store_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("overlaps.cache");
    let (lengths, overlaps) = build_dataset();

    let first = dir.path().join("first.ovs");
    write_store(&first, &overlaps);
    let mut opt = RefineOpt::default();
    opt.cache = Some(cache.clone());
    let mut store = OverlapStoreReader::open(&first).unwrap();
    assert_eq!(main_cache(&mut store, ReadRange::new(1, 8), &opt).unwrap(), 56);

    // Drop read 3's overlaps: same range, different store.
    let second = dir.path().join("second.ovs");
    let fewer: Vec<Overlap> = overlaps.into_iter().filter(|o| o.a_id != 3).collect();
    write_store(&second, &fewer);

    let reads = ReadLengths::from_lengths(&lengths);
    let mut store = OverlapStoreReader::open(&second).unwrap();
    let mut out: Vec<Overlap> = Vec::new();
    assert!(main_estimate(&reads, &mut store, &mut out, ReadRange::new(1, 8), &opt).is_err());
    assert!(out.is_empty());
}

#[test]
fn test_cache_from_rewritten_store_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("overlaps.cache");
    let (lengths, overlaps) = build_dataset();

    let first = dir.path().join("first.ovs");
    write_store(&first, &overlaps);
    let mut opt = RefineOpt::default();
    opt.cache = Some(cache.clone());
    let mut store = OverlapStoreReader::open(&first).unwrap();
    main_cache(&mut store, ReadRange::new(1, 8), &opt).unwrap();

    // Same ids and per-read counts, but 2 -> 1 was realigned.
    let mut rewritten = overlaps.clone();
    let pos = rewritten.iter().position(|o| o.a_id == 2 && o.b_id == 1).unwrap();
    let aux = rewritten[pos].aux;
    rewritten[pos] = Overlap::new(2, 1, 30, -30, 0.40, false);
    rewritten[pos].aux = aux;
    let second = dir.path().join("second.ovs");
    write_store(&second, &rewritten);

    let reads = ReadLengths::from_lengths(&lengths);
    let mut store = OverlapStoreReader::open(&second).unwrap();
    let mut out: Vec<Overlap> = Vec::new();
    assert!(main_estimate(&reads, &mut store, &mut out, ReadRange::new(1, 8), &opt).is_err());
    assert!(out.is_empty());
}

#[test]
fn test_partitioned_runs_cover_every_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let (lengths, overlaps) = build_dataset();
    let input = dir.path().join("input.ovs");
    write_store(&input, &overlaps);
    let reads = ReadLengths::from_lengths(&lengths);

    let mut total_retained = 0;
    let mut total_dropped = 0;
    for part in 1..=3 {
        let range = ReadRange::from_partition(part, 3, 8).unwrap();
        let mut store = OverlapStoreReader::open(&input).unwrap();
        let mut out: Vec<Overlap> = Vec::new();
        let summary =
            main_estimate(&reads, &mut store, &mut out, range, &RefineOpt::default()).unwrap();
        assert!(out.iter().all(|o| range.contains(o.a_id)));
        total_retained += summary.survivors.retained;
        total_dropped += summary.survivors.dropped;
    }
    assert_eq!(total_retained + total_dropped, 56);
}

#[test]
fn test_cli_refine() {
    let dir = tempfile::tempdir().unwrap();
    let (lengths, overlaps) = build_dataset();
    let reads = dir.path().join("reads.tsv");
    let input = dir.path().join("input.ovs");
    let output = dir.path().join("refined.ovs");
    let cache = dir.path().join("overlaps.cache");
    write_lengths(&reads, &lengths);
    write_store(&input, &overlaps);

    let status = Command::new(env!("CARGO_BIN_EXE_ferrous-erate"))
        .arg("refine")
        .arg("-S")
        .arg(&reads)
        .arg("-O")
        .arg(&input)
        .arg("-C")
        .arg(&cache)
        .arg("-o")
        .arg(&output)
        .arg("-t")
        .arg("2")
        .arg("-v")
        .arg("1")
        .status()
        .unwrap();
    assert!(status.success());
    assert!(cache.exists());

    let survivors = read_store(&output);
    assert_eq!(survivors.len(), 42);
}

#[test]
fn test_cli_empty_partition_writes_empty_store() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("reads.tsv");
    let input = dir.path().join("input.ovs");
    let output = dir.path().join("part1.ovs");
    write_lengths(&reads, &[1000, 1000]);
    write_store(
        &input,
        &[
            Overlap::new(1, 2, 0, 0, 0.01, false),
            Overlap::new(2, 1, 0, 0, 0.01, false),
        ],
    );

    let status = Command::new(env!("CARGO_BIN_EXE_ferrous-erate"))
        .arg("refine")
        .arg("-S")
        .arg(&reads)
        .arg("-O")
        .arg(&input)
        .arg("-p")
        .arg("1")
        .arg("3")
        .arg("-o")
        .arg(&output)
        .arg("-v")
        .arg("1")
        .status()
        .unwrap();
    assert!(status.success());

    let reader = OverlapStoreReader::open(&output).unwrap();
    assert_eq!(reader.num_overlaps_in_range(), 0);
}

#[test]
fn test_cli_failed_run_leaves_no_valid_output() {
    let dir = tempfile::tempdir().unwrap();
    let (lengths, overlaps) = build_dataset();
    let reads = dir.path().join("reads.tsv");
    let input = dir.path().join("input.ovs");
    let output = dir.path().join("refined.ovs");
    // Reads too short for the stored hangs: refinement hits an invalid span.
    write_lengths(&reads, &vec![100; lengths.len()]);
    write_store(&input, &overlaps);

    let status = Command::new(env!("CARGO_BIN_EXE_ferrous-erate"))
        .arg("refine")
        .arg("-S")
        .arg(&reads)
        .arg("-O")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("-v")
        .arg("1")
        .status()
        .unwrap();
    assert!(!status.success());
    assert!(output.exists());
    assert!(OverlapStoreReader::open(&output).is_err());
}

#[test]
fn test_cli_rejects_missing_store() {
    let dir = tempfile::tempdir().unwrap();
    let reads = dir.path().join("reads.tsv");
    write_lengths(&reads, &[100]);

    let status = Command::new(env!("CARGO_BIN_EXE_ferrous-erate"))
        .arg("refine")
        .arg("-S")
        .arg(&reads)
        .arg("-O")
        .arg(dir.path().join("missing.ovs"))
        .arg("-o")
        .arg(dir.path().join("out.ovs"))
        .arg("-v")
        .arg("1")
        .status()
        .unwrap();
    assert!(!status.success());
}
