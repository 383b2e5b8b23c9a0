use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Error};

use h5ar::archive::{
    archive_directory, ArchiveReader, ArchivingStrategy, CreateOptions, ErrorHandler,
    ListParameters, RestoreFlags, VerifyParameters,
};
use h5ar_container::ContainerFile;

use proxmox_router::cli::*;
use proxmox_schema::api;

/// Error handler for the `strict` switch.
///
/// Without `strict` errors are logged and the command continues, `was_ok` records that
/// something failed.
fn error_handler(strict: bool, was_ok: &Arc<AtomicBool>) -> ErrorHandler {
    if strict {
        // by default errors are propagated up
        Box::new(Err)
    } else {
        let was_ok = Arc::clone(was_ok);
        // otherwise we want to log them but not act on them
        Box::new(move |err: Error| {
            was_ok.store(false, Ordering::Release);
            log::error!("error: {:#}", err);
            Ok(())
        })
    }
}

fn open_archive(
    archive: &str,
    strict: bool,
    was_ok: &Arc<AtomicBool>,
) -> Result<ArchiveReader<ContainerFile>, Error> {
    log::debug!("opening archive {archive}");
    let mut reader = ArchiveReader::new(ContainerFile::open(archive)?);
    reader.on_error(error_handler(strict, was_ok));
    Ok(reader)
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            source: {
                description: "Source file or directory.",
            },
            path: {
                description: "Archive path the source is stored at.",
                optional: true,
                default: "/",
            },
            include: {
                description: "Regular expressions, only matching files are archived.",
                optional: true,
                type: Array,
                items: {
                    description: "Regular expression matching the complete archive path.",
                    type: String,
                },
            },
            exclude: {
                description: "Regular expressions matching files to exclude.",
                optional: true,
                type: Array,
                items: {
                    description: "Regular expression matching the complete archive path.",
                    type: String,
                },
            },
            "exclude-dirs": {
                description: "Regular expressions matching directories to exclude.",
                optional: true,
                type: Array,
                items: {
                    description: "Regular expression matching the complete archive path.",
                    type: String,
                },
            },
            compress: {
                description: "Request compressed storage for files.",
                optional: true,
                default: false,
            },
            "no-checksums": {
                description: "Do not store CRC32 checksums of files.",
                optional: true,
                default: false,
            },
            "entries-max": {
                description: "Max number of entries to archive",
                optional: true,
                default: 1024 * 1024,
                minimum: 0,
                maximum: isize::MAX,
            },
        },
    },
)]
/// Add a file or directory tree to an archive, creating the archive if needed.
#[allow(clippy::too_many_arguments)]
fn create_archive(
    archive: String,
    source: String,
    path: String,
    include: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    exclude_dirs: Option<Vec<String>>,
    compress: bool,
    no_checksums: bool,
    entries_max: isize,
) -> Result<(), Error> {
    let mut strategy = ArchivingStrategy::new().compress(compress);
    for pattern in include.unwrap_or_default() {
        strategy = strategy.include_files(&pattern)?;
    }
    for pattern in exclude.unwrap_or_default() {
        strategy = strategy.exclude_files(&pattern)?;
    }
    for pattern in exclude_dirs.unwrap_or_default() {
        strategy = strategy.exclude_dirs(&pattern)?;
    }

    let options = CreateOptions {
        compute_checksums: !no_checksums,
        entries_max: entries_max as usize,
        ..Default::default()
    };

    let mut container = if Path::new(&archive).exists() {
        ContainerFile::open(&archive)?
    } else {
        ContainerFile::new()
    };

    let count = archive_directory(
        &mut container,
        Path::new(&source),
        &path,
        &strategy,
        &options,
        |entry| log::debug!("{}", entry.path()),
    )?;

    container.save(&archive)?;
    log::info!("archived {count} entries");

    Ok(())
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            path: {
                description: "Archive path to list.",
                optional: true,
                default: "/",
            },
            verbose: {
                description: "Show permissions, owner, size, time and checksum.",
                optional: true,
                default: false,
            },
            numeric: {
                description: "Show numeric user and group ids.",
                optional: true,
                default: false,
            },
            "test-checksums": {
                description: "Recompute checksums and report mismatches.",
                optional: true,
                default: false,
            },
            "no-recursion": {
                description: "Do not descend into sub-directories.",
                optional: true,
                default: false,
            },
            json: {
                description: "Print one JSON object per entry.",
                optional: true,
                default: false,
            },
            strict: {
                description: "Stop on errors. Otherwise most errors will simply warn.",
                optional: true,
                default: false,
            },
        },
    },
)]
/// List the contents of an archive.
#[allow(clippy::too_many_arguments)]
fn list_archive(
    archive: String,
    path: String,
    verbose: bool,
    numeric: bool,
    test_checksums: bool,
    no_recursion: bool,
    json: bool,
    strict: bool,
) -> Result<(), Error> {
    let was_ok = Arc::new(AtomicBool::new(true));
    let reader = open_archive(&archive, strict, &was_ok)?;

    let params = ListParameters {
        recursive: !no_recursion,
        test_checksums,
        numeric,
        ..Default::default()
    };

    let mut failed = 0usize;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut write_result: Result<(), Error> = Ok(());

    reader.list_with(&path, &params, |entry| {
        if !entry.is_ok() {
            failed += 1;
        }
        write_result = if json {
            serde_json::to_writer(&mut out, entry)
                .map_err(Error::from)
                .and_then(|()| Ok(writeln!(out)?))
        } else if test_checksums {
            writeln!(out, "{}\t{}", entry.describe(verbose, numeric), entry.status())
                .map_err(Error::from)
        } else {
            writeln!(out, "{}", entry.describe(verbose, numeric)).map_err(Error::from)
        };
        if write_result.is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    })?;
    write_result?;

    if failed > 0 {
        bail!("{failed} entries failed the checksum test");
    }
    if !was_ok.load(Ordering::Acquire) {
        bail!("there were errors");
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            root: {
                description: "Filesystem directory to compare with.",
            },
            path: {
                description: "Archive path to verify.",
                optional: true,
                default: "/",
            },
            "check-missing-files": {
                description: "Report files on disk which are missing in the archive.",
                optional: true,
                default: false,
            },
            "verify-attributes": {
                description: "Compare permissions as well.",
                optional: true,
                default: false,
            },
            numeric: {
                description: "Show numeric user and group ids.",
                optional: true,
                default: false,
            },
            verbose: {
                description: "Report every checked entry, not only failures.",
                optional: true,
                default: false,
            },
            strict: {
                description: "Stop on errors. Otherwise most errors will simply warn.",
                optional: true,
                default: false,
            },
        },
    },
)]
/// Verify an archive against a directory tree.
#[allow(clippy::too_many_arguments)]
fn verify_archive(
    archive: String,
    root: String,
    path: String,
    check_missing_files: bool,
    verify_attributes: bool,
    numeric: bool,
    verbose: bool,
    strict: bool,
) -> Result<(), Error> {
    let was_ok = Arc::new(AtomicBool::new(true));
    let reader = open_archive(&archive, strict, &was_ok)?;

    let params = VerifyParameters {
        check_missing_files,
        verify_attributes,
        numeric,
        ..Default::default()
    };

    let mut failed = 0usize;
    reader.verify_against_filesystem_with(&path, Path::new(&root), &params, |entry| {
        if !entry.is_ok() {
            failed += 1;
            println!("{}", entry.status());
        } else if verbose {
            println!("{}\t{}", entry.path(), entry.status());
        }
        ControlFlow::Continue(())
    })?;

    if failed > 0 {
        bail!("found {failed} discrepancies");
    }
    if !was_ok.load(Ordering::Acquire) {
        bail!("there were errors");
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            target: {
                description: "Target directory",
                optional: true,
            },
            path: {
                description: "Archive path to extract.",
                optional: true,
                default: "/",
            },
            pattern: {
                description: "Regular expressions, only matching files are extracted.",
                optional: true,
                type: Array,
                items: {
                    description: "Regular expression matching the complete archive path.",
                    type: String,
                },
            },
            "no-permissions": {
                description: "Do not restore permissions.",
                optional: true,
                default: false,
            },
            "no-owner": {
                description: "Do not restore owner and group.",
                optional: true,
                default: false,
            },
            "no-mtime": {
                description: "Do not restore modification times.",
                optional: true,
                default: false,
            },
            strict: {
                description: "Stop on errors. Otherwise most errors will simply warn.",
                optional: true,
                default: false,
            },
        },
    },
)]
/// Extract an archive.
#[allow(clippy::too_many_arguments)]
fn extract_archive(
    archive: String,
    target: Option<String>,
    path: String,
    pattern: Option<Vec<String>>,
    no_permissions: bool,
    no_owner: bool,
    no_mtime: bool,
    strict: bool,
) -> Result<(), Error> {
    let mut flags = RestoreFlags::DEFAULT;
    if no_permissions {
        flags.remove(RestoreFlags::WITH_PERMISSIONS);
    }
    if no_owner {
        flags.remove(RestoreFlags::WITH_OWNER);
    }
    if no_mtime {
        flags.remove(RestoreFlags::WITH_MTIME);
    }

    let mut strategy = ArchivingStrategy::new();
    for pattern in pattern.unwrap_or_default() {
        strategy = strategy.include_files(&pattern)?;
    }

    let target = target.as_ref().map_or_else(|| ".", String::as_str);

    let was_ok = Arc::new(AtomicBool::new(true));
    let reader = open_archive(&archive, strict, &was_ok)?;

    reader.extract_to_filesystem(Path::new(target), &path, &strategy, flags, |entry| {
        log::debug!("{}", entry.path());
        for warning in entry.warnings() {
            log::warn!("{}: {}", entry.path(), warning);
        }
        ControlFlow::Continue(())
    })?;

    if !was_ok.load(Ordering::Acquire) {
        bail!("there were errors");
    }

    Ok(())
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            path: {
                description: "Archive path of the file.",
            },
        },
    },
)]
/// Write the contents of an archived file to stdout.
fn cat_file(archive: String, path: String) -> Result<(), Error> {
    let reader = ArchiveReader::new(ContainerFile::open(&archive)?);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    reader.extract_file(&path, &mut out)?;
    out.flush()?;

    Ok(())
}

#[api(
    input: {
        properties: {
            archive: {
                description: "Archive name.",
            },
            strict: {
                description: "Stop on errors. Otherwise most errors will simply warn.",
                optional: true,
                default: false,
            },
        },
    },
)]
/// Check the integrity of an archive by reading back all files.
fn test_archive(archive: String, strict: bool) -> Result<(), Error> {
    let was_ok = Arc::new(AtomicBool::new(true));
    let reader = open_archive(&archive, strict, &was_ok)?;

    let failed = reader.test()?;
    for entry in &failed {
        println!("{}", entry.status());
    }

    if !failed.is_empty() {
        bail!("{} entries failed the integrity test", failed.len());
    }
    if !was_ok.load(Ordering::Acquire) {
        bail!("there were errors");
    }

    log::info!("archive {archive} is OK");
    Ok(())
}

fn main() {
    init_cli_logger("H5AR_LOG", "info");

    let cmd_def = CliCommandMap::new()
        .insert(
            "create",
            CliCommand::new(&API_METHOD_CREATE_ARCHIVE)
                .arg_param(&["archive", "source"])
                .completion_cb("archive", complete_file_name)
                .completion_cb("source", complete_file_name),
        )
        .insert(
            "list",
            CliCommand::new(&API_METHOD_LIST_ARCHIVE)
                .arg_param(&["archive", "path"])
                .completion_cb("archive", complete_file_name),
        )
        .insert(
            "verify",
            CliCommand::new(&API_METHOD_VERIFY_ARCHIVE)
                .arg_param(&["archive", "root"])
                .completion_cb("archive", complete_file_name)
                .completion_cb("root", complete_file_name),
        )
        .insert(
            "extract",
            CliCommand::new(&API_METHOD_EXTRACT_ARCHIVE)
                .arg_param(&["archive", "target"])
                .completion_cb("archive", complete_file_name)
                .completion_cb("target", complete_file_name),
        )
        .insert(
            "cat",
            CliCommand::new(&API_METHOD_CAT_FILE)
                .arg_param(&["archive", "path"])
                .completion_cb("archive", complete_file_name),
        )
        .insert(
            "test",
            CliCommand::new(&API_METHOD_TEST_ARCHIVE)
                .arg_param(&["archive"])
                .completion_cb("archive", complete_file_name),
        );

    let rpcenv = CliEnvironment::new();
    run_cli_command(cmd_def, rpcenv, None);
}
