//! whole-run behaviour of the library: reruns, nesting, ordering and failures

use std::ffi::OsString;
use std::fs::{self, File};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use auditcp::{
    peek_algorithms, Algorithm, AlgorithmMask, ContentIndex, CopyEngine, CopyOptions,
    ManifestReader, ManifestRecord, ManifestWriter, Outcome, RecordSink, RunHeader, RunSummary,
};
use tempfile::tempdir;
use walkdir::WalkDir;

fn mask(algorithms: &[Algorithm]) -> AlgorithmMask {
    algorithms.iter().copied().collect()
}

fn engine(algorithms: AlgorithmMask, index: Option<ContentIndex>) -> CopyEngine {
    let options = CopyOptions {
        algorithms,
        chunk_size: 1024,
        jobs: 4,
        ..CopyOptions::default()
    };
    CopyEngine::new(options, index).unwrap()
}

fn populate(root: &Path) {
    fs::create_dir_all(root.join("docs/drafts")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("readme"), "top level\n").unwrap();
    fs::write(root.join("docs/report.txt"), "quarterly numbers\n".repeat(300)).unwrap();
    fs::write(root.join("docs/drafts/v1.txt"), "first draft").unwrap();
    fs::write(root.join("docs/drafts/v2.txt"), "second draft").unwrap();
    let blob: Vec<u8> = (0..70_000u32).map(|i| (i * 31 % 256) as u8).collect();
    fs::write(root.join("blob.bin"), blob).unwrap();
    symlink("docs/report.txt", root.join("latest")).unwrap();
}

/// relative path and content of every entry; link targets stand in for content
fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let rel = entry.path().strip_prefix(root).unwrap().to_path_buf();
            let ft = entry.file_type();
            let content = if ft.is_symlink() {
                Some(fs::read_link(entry.path()).unwrap().into_os_string().into_vec())
            } else if ft.is_file() {
                Some(fs::read(entry.path()).unwrap())
            } else {
                None
            };
            (rel, content)
        })
        .collect()
}

/// run the engine the way the binary does, writing a manifest file
fn run_with_manifest(
    engine: &CopyEngine,
    sources: &[PathBuf],
    destination: &Path,
    manifest: &Path,
) -> RunSummary {
    let header = RunHeader::capture(
        vec!["auditcp".into()],
        engine.options().algorithms,
        sources.to_vec(),
        destination.to_path_buf(),
        manifest.to_path_buf(),
    );
    let mut writer = ManifestWriter::new(File::create(manifest).unwrap(), manifest);
    writer.write_header(&header).unwrap();
    engine.run(sources, destination, &mut writer).unwrap()
}

fn read_records(manifest: &Path) -> Vec<ManifestRecord> {
    ManifestReader::open(manifest)
        .unwrap()
        .collect::<auditcp::Result<Vec<_>>>()
        .unwrap()
}

#[test]
fn test_rerun_with_own_manifest_copies_nothing() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    populate(&src);
    fs::create_dir(&dst).unwrap();
    let algs = mask(&[Algorithm::Md5, Algorithm::Sha256]);

    let first_manifest = dir.path().join("first.out");
    let first = run_with_manifest(&engine(algs, None), &[src.clone()], &dst, &first_manifest);
    assert!(first.is_success());
    assert_eq!(first.skipped, 0);
    let after_first = snapshot(&dst);

    let index = ContentIndex::build(Algorithm::Md5, &[first_manifest.clone()]).unwrap();
    let second_manifest = dir.path().join("second.out");
    let second = run_with_manifest(&engine(algs, Some(index)), &[src], &dst, &second_manifest);

    assert_eq!(second.copied, 0);
    assert_eq!(second.failed, 0);
    assert_eq!(second.bytes_copied, 0);
    assert_eq!(snapshot(&dst), after_first);

    let before = read_records(&first_manifest);
    let after = read_records(&second_manifest);
    assert_eq!(before.len(), after.len());
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(a.outcome, Outcome::Skipped);
        assert_eq!((&b.source, &b.destination, &b.digests), (&a.source, &a.destination, &a.digests));
    }
}

#[test]
fn test_rerun_skips_non_utf8_names() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir(&dst).unwrap();
    let name = OsString::from_vec(b"caf\xe9.txt".to_vec());
    fs::write(src.join(&name), "latin-1 name").unwrap();
    symlink(&name, src.join("link")).unwrap();
    let algs = mask(&[Algorithm::Sha1]);

    let first_manifest = dir.path().join("first.out");
    let first = run_with_manifest(&engine(algs, None), &[src.clone()], &dst, &first_manifest);
    assert!(first.is_success());
    let recorded = read_records(&first_manifest);
    assert!(recorded.iter().any(|r| r.destination == dst.join("src").join(&name)));
    let header = ManifestReader::open(&first_manifest).unwrap().header().clone();
    assert_eq!(header.sources, vec![src.clone()]);

    let index = ContentIndex::build(Algorithm::Sha1, &[first_manifest]).unwrap();
    let second_manifest = dir.path().join("second.out");
    let second = run_with_manifest(&engine(algs, Some(index)), &[src], &dst, &second_manifest);

    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped, 3);
    assert!(read_records(&second_manifest)
        .iter()
        .all(|r| r.outcome == Outcome::Skipped));
}

#[test]
fn test_copy_into_existing_directory_matches_explicit_target() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("photos");
    populate(&src);

    let nested_root = dir.path().join("nested");
    fs::create_dir(&nested_root).unwrap();
    let mut records: Vec<ManifestRecord> = Vec::new();
    engine(AlgorithmMask::ALL, None)
        .run(&[src.clone()], &nested_root, &mut records)
        .unwrap();

    let explicit = dir.path().join("explicit/photos");
    fs::create_dir(dir.path().join("explicit")).unwrap();
    let mut explicit_records: Vec<ManifestRecord> = Vec::new();
    engine(AlgorithmMask::ALL, None)
        .run(&[src.clone()], &explicit, &mut explicit_records)
        .unwrap();

    assert_eq!(snapshot(&nested_root.join("photos")), snapshot(&explicit));
    assert_eq!(snapshot(&explicit), snapshot(&src));
    assert_eq!(records.len(), explicit_records.len());
}

#[test]
fn test_manifest_reads_back_what_was_emitted() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    populate(&src);
    let manifest = dir.path().join("run.out");

    struct Tee<'a> {
        seen: Vec<ManifestRecord>,
        writer: ManifestWriter<&'a File>,
    }
    impl RecordSink for Tee<'_> {
        fn accept(&mut self, record: &ManifestRecord) -> auditcp::Result<()> {
            self.seen.push(record.clone());
            self.writer.accept(record)
        }
    }

    let file = File::create(&manifest).unwrap();
    let engine = engine(mask(&[Algorithm::Sha1, Algorithm::Sha512]), None);
    let header = RunHeader::capture(
        vec!["auditcp".into(), "--sha1".into(), "--sha512".into()],
        engine.options().algorithms,
        vec![src.clone()],
        dir.path().join("dst"),
        manifest.clone(),
    );
    let mut tee = Tee {
        seen: Vec::new(),
        writer: ManifestWriter::new(&file, &manifest),
    };
    tee.writer.write_header(&header).unwrap();
    engine.run(&[src], &dir.path().join("dst"), &mut tee).unwrap();

    let reader = ManifestReader::open(&manifest).unwrap();
    assert_eq!(reader.header().algorithms, engine.options().algorithms);
    assert_eq!(reader.header().command, header.command);
    let parsed: Vec<_> = reader.collect::<auditcp::Result<Vec<_>>>().unwrap();
    assert_eq!(parsed, tee.seen);
}

#[test]
fn test_record_order_is_independent_of_worker_count() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    populate(&src);
    for i in 0..40 {
        fs::write(src.join(format!("many-{:02}", i)), format!("file {}", i)).unwrap();
    }

    let mut runs = Vec::new();
    for (jobs, name) in [(1, "serial"), (8, "parallel")] {
        let options = CopyOptions {
            algorithms: mask(&[Algorithm::Sha256]),
            jobs,
            ..CopyOptions::default()
        };
        let mut records: Vec<ManifestRecord> = Vec::new();
        let target = dir.path().join(name);
        CopyEngine::new(options, None)
            .unwrap()
            .run(&[src.clone()], &target, &mut records)
            .unwrap();
        let view: Vec<_> = records
            .into_iter()
            .map(|r| {
                (
                    r.outcome,
                    r.kind,
                    r.source,
                    r.destination.strip_prefix(&target).unwrap().to_path_buf(),
                    r.digests,
                )
            })
            .collect();
        runs.push(view);
    }
    assert_eq!(runs[0], runs[1]);
}

#[test]
fn test_failures_do_not_disturb_siblings() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    populate(&src);
    nix::unistd::mkfifo(&src.join("docs/pipe"), nix::sys::stat::Mode::from_bits_truncate(0o600))
        .unwrap();
    let lone = dir.path().join("lone.txt");
    fs::write(&lone, "alone").unwrap();
    let dst = dir.path().join("dst");

    let mut records: Vec<ManifestRecord> = Vec::new();
    let summary = engine(mask(&[Algorithm::Md5]), None)
        .run(
            &[src.clone(), dir.path().join("vanished"), lone],
            &dst,
            &mut records,
        )
        .unwrap();

    assert_eq!(summary.failed, 2);
    assert!(!summary.is_success());
    let failed: Vec<_> = records
        .iter()
        .filter(|r| r.outcome == Outcome::Failed)
        .map(|r| r.source.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(failed, vec!["pipe", "vanished"]);

    // everything else arrived intact
    let mut expected = snapshot(&src);
    expected.retain(|(rel, _)| rel != Path::new("docs/pipe"));
    assert_eq!(snapshot(&dst.join("src")), expected);
    assert_eq!(fs::read(dst.join("lone.txt")).unwrap(), b"alone");
}

#[test]
fn test_algorithms_detected_from_inputs_drive_the_index() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    populate(&src);
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let a = dir.path().join("a.out");
    run_with_manifest(
        &engine(mask(&[Algorithm::Sha1, Algorithm::Sha256]), None),
        &[src.clone()],
        &dst,
        &a,
    );
    // a second manifest from a run with a different algorithm set
    let b = dir.path().join("b.out");
    let other_dst = dir.path().join("other");
    run_with_manifest(
        &engine(mask(&[Algorithm::Sha256, Algorithm::Sha512]), None),
        &[src.join("readme")],
        &other_dst,
        &b,
    );

    let inputs = vec![a, b];
    let common = peek_algorithms(&inputs).unwrap();
    assert_eq!(common, mask(&[Algorithm::Sha256]));

    let key = common.index_key().unwrap();
    let index = ContentIndex::build(key, &inputs).unwrap();
    let mut records: Vec<ManifestRecord> = Vec::new();
    let summary = engine(common, Some(index))
        .run(&[src], &dst, &mut records)
        .unwrap();

    assert_eq!(summary.copied, 0);
    assert_eq!(summary.failed, 0);
    // the later manifest wins for content both runs saw
    let readme = records.iter().find(|r| r.source.ends_with("readme")).unwrap();
    assert_eq!(readme.destination, other_dst);
}

#[test]
fn test_truncated_manifest_still_indexes_complete_lines() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    populate(&src);
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();
    let manifest = dir.path().join("run.out");
    run_with_manifest(&engine(mask(&[Algorithm::Md5]), None), &[src.clone()], &dst, &manifest);

    // chop the last record in half, as an interrupted writer would leave it
    let text = fs::read_to_string(&manifest).unwrap();
    let last_start = text.trim_end_matches('\n').rfind('\n').unwrap() + 1;
    let cut = last_start + (text.len() - last_start) / 2;
    fs::write(&manifest, &text[..cut]).unwrap();

    let complete = read_records(&manifest);
    assert_eq!(complete.len(), text.lines().filter(|l| l.starts_with("copied")).count() - 1);

    let index = ContentIndex::build(Algorithm::Md5, &[manifest]).unwrap();
    let mut records: Vec<ManifestRecord> = Vec::new();
    let summary = engine(mask(&[Algorithm::Md5]), Some(index))
        .run(&[src], &dst, &mut records)
        .unwrap();

    // only the entry whose line was lost gets copied again
    assert_eq!(summary.copied, 1);
    assert_eq!(summary.failed, 0);
}
