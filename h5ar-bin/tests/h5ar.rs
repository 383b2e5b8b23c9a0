use std::path::Path;
use std::process::{Command, Output};

const EXEC_PATH: &str = env!("CARGO_BIN_EXE_h5ar");

fn h5ar(args: &[&str]) -> Output {
    println!("run '{} {}'", EXEC_PATH, args.join(" "));
    Command::new(EXEC_PATH)
        .args(args)
        .env("H5AR_LOG", "warn")
        .output()
        .unwrap_or_else(|err| panic!("Failed to invoke '{}': {}", EXEC_PATH, err))
}

fn populate(dir: &Path) {
    std::fs::create_dir(dir.join("docs")).unwrap();
    std::fs::write(dir.join("docs/readme.txt"), b"read me\n").unwrap();
    std::fs::write(dir.join("data.bin"), [0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();
    std::os::unix::fs::symlink("docs/readme.txt", dir.join("link")).unwrap();
}

#[test]
fn h5ar_create_list_verify_extract() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    std::fs::create_dir(&src).unwrap();
    populate(&src);

    let archive = work.path().join("test.h5ar");
    let archive = archive.to_str().unwrap();
    let src_str = src.to_str().unwrap();

    assert!(h5ar(&["create", archive, src_str]).status.success());

    let out = h5ar(&["list", archive]);
    assert!(out.status.success());
    let listing = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = listing.lines().collect();
    assert_eq!(lines, vec!["/data.bin", "/docs", "/docs/readme.txt", "/link"]);

    assert!(h5ar(&["verify", archive, src_str]).status.success());
    assert!(h5ar(&["test", archive]).status.success());

    let out = h5ar(&["cat", archive, "/docs/readme.txt"]);
    assert!(out.status.success());
    assert_eq!(out.stdout, b"read me\n");

    let dest = work.path().join("dest");
    let dest_str = dest.to_str().unwrap();
    assert!(h5ar(&["extract", archive, dest_str]).status.success());
    assert_eq!(
        std::fs::read(dest.join("docs/readme.txt")).unwrap(),
        b"read me\n"
    );
    assert_eq!(
        std::fs::read_link(dest.join("link")).unwrap(),
        Path::new("docs/readme.txt")
    );

    // the extracted tree verifies against the archive
    assert!(h5ar(&["verify", archive, dest_str]).status.success());
}

#[test]
fn h5ar_verify_reports_discrepancy() {
    let work = tempfile::tempdir().unwrap();
    let src = work.path().join("src");
    std::fs::create_dir(&src).unwrap();
    populate(&src);

    let archive = work.path().join("test.h5ar");
    let archive = archive.to_str().unwrap();
    let src_str = src.to_str().unwrap();

    assert!(h5ar(&["create", archive, src_str]).status.success());

    std::fs::write(src.join("data.bin"), b"shorter").unwrap();

    let out = h5ar(&["verify", archive, src_str]);
    assert!(!out.status.success());
    let report = String::from_utf8(out.stdout).unwrap();
    assert_eq!(
        report.trim_end(),
        "/data.bin: SIZE_MISMATCH (archive: 8, actual: 7)"
    );
}

#[test]
fn h5ar_missing_archive_fails() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join("missing.h5ar");
    assert!(!h5ar(&["list", archive.to_str().unwrap()]).status.success());
}
