//
// batch.rs
// Dicom-Conv-rs
//
// Walks the input paths, maps each file to its output path, and transcodes them in parallel.
//
// Thales Matheus Mendonça Santos - November 2025

use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::{BatchSummary, FileOutcome};
use crate::params::TranscodeParams;
use crate::transcode::transcode_file;

/// One file to convert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Expand `inputs` into jobs.
///
/// Paths that cannot be walked come back as failed outcomes instead of aborting the run.
pub fn plan(inputs: &[PathBuf], output: &Path) -> (Vec<Job>, Vec<FileOutcome>) {
    let mut jobs = Vec::new();
    let mut failures = Vec::new();
    let into_directory = inputs.len() > 1 || output.is_dir() || ends_with_separator(output);

    for input in inputs {
        if input.is_dir() {
            for entry in WalkDir::new(input).sort_by_file_name() {
                match entry {
                    Ok(entry) if entry.file_type().is_file() => {
                        let relative = entry.path().strip_prefix(input).unwrap_or(entry.path());
                        jobs.push(Job {
                            input: entry.path().to_path_buf(),
                            output: output.join(relative),
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let path = e.path().unwrap_or(input.as_path()).to_path_buf();
                        failures.push(FileOutcome::failed(path, None, e));
                    }
                }
            }
        } else if input.is_file() {
            let target = match input.file_name() {
                Some(name) if into_directory => output.join(name),
                _ => output.to_path_buf(),
            };
            jobs.push(Job {
                input: input.clone(),
                output: target,
            });
        } else {
            failures.push(FileOutcome::failed(input.clone(), None, "no such file or directory"));
        }
    }
    (jobs, failures)
}

fn ends_with_separator(path: &Path) -> bool {
    let text = path.as_os_str().to_string_lossy();
    text.ends_with(MAIN_SEPARATOR) || text.ends_with('/')
}

/// Transcode every file under `inputs` into `output`.
///
/// `jobs` bounds the worker threads; `None` uses the global rayon pool.
pub fn run(
    inputs: &[PathBuf],
    output: &Path,
    params: &TranscodeParams,
    jobs: Option<usize>,
) -> Result<BatchSummary> {
    params
        .validate()
        .context("Invalid transcode parameters")?;
    let target = params.target;

    let start = Instant::now();
    let (planned, mut outcomes) = plan(inputs, output);
    for failure in &outcomes {
        warn!(
            "Cannot convert {:?}: {}",
            failure.input,
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }

    let convert = || -> Vec<FileOutcome> { planned.par_iter().map(|job| convert_one(job, params)).collect() };
    let converted = match jobs {
        Some(threads) => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .context("Failed to build the worker pool")?
            .install(convert),
        None => convert(),
    };
    outcomes.extend(converted);
    outcomes.sort_by(|a, b| a.input.cmp(&b.input));

    let elapsed = start.elapsed();
    let converted = outcomes.iter().filter(|o| o.is_converted()).count();
    let failed = outcomes.len() - converted;
    info!("{}", elapsed_message(converted, failed, elapsed));

    Ok(BatchSummary {
        target_syntax: target.name().to_string(),
        target_uid: target.uid().to_string(),
        converted,
        failed,
        elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        files: outcomes,
    })
}

fn convert_one(job: &Job, params: &TranscodeParams) -> FileOutcome {
    match transcode_file(&job.input, &job.output, params) {
        Ok(report) => {
            info!("Transcode {:?} in {:?}.", job.input, job.output);
            FileOutcome::converted(job.input.clone(), job.output.clone(), &report)
        }
        Err(e) => {
            warn!("Cannot convert {:?}: {}", job.input, e);
            FileOutcome::failed(job.input.clone(), Some(job.output.clone()), e)
        }
    }
}

/// Final progress line: milliseconds below ten seconds, seconds above.
pub fn elapsed_message(converted: usize, failed: usize, elapsed: Duration) -> String {
    let time = if elapsed < Duration::from_secs(10) {
        format!("{} milliseconds", elapsed.as_millis())
    } else {
        format!("{} seconds", elapsed.as_secs())
    };
    format!("Converted {converted} file(s) in {time}, {failed} failed.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn directory_inputs_mirror_relative_paths() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("in");
        std::fs::create_dir_all(input.join("series/1")).expect("mkdir");
        std::fs::write(input.join("a.dcm"), b"x").expect("write");
        std::fs::write(input.join("series/1/b"), b"x").expect("write");
        let out = dir.path().join("out");

        let (jobs, failures) = plan(&[input.clone()], &out);
        assert!(failures.is_empty());
        let outputs: Vec<_> = jobs.iter().map(|j| j.output.clone()).collect();
        assert_eq!(outputs, vec![out.join("a.dcm"), out.join("series/1/b")]);
    }

    #[test]
    fn single_file_targets_output_unless_it_is_a_directory() {
        let dir = tempdir().expect("tempdir");
        let input = dir.path().join("a.dcm");
        std::fs::write(&input, b"x").expect("write");

        let (jobs, _) = plan(&[input.clone()], &dir.path().join("b.dcm"));
        assert_eq!(jobs[0].output, dir.path().join("b.dcm"));

        let (jobs, _) = plan(&[input.clone()], dir.path());
        assert_eq!(jobs[0].output, dir.path().join("a.dcm"));

        let slash = PathBuf::from(format!("{}/new/", dir.path().display()));
        let (jobs, _) = plan(&[input], &slash);
        assert_eq!(jobs[0].output, slash.join("a.dcm"));
    }

    #[test]
    fn missing_input_is_a_failure() {
        let dir = tempdir().expect("tempdir");
        let (jobs, failures) = plan(&[dir.path().join("nope")], dir.path());
        assert!(jobs.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(!failures[0].is_converted());
    }

    #[test]
    fn elapsed_switches_to_seconds() {
        assert_eq!(
            elapsed_message(3, 0, Duration::from_millis(250)),
            "Converted 3 file(s) in 250 milliseconds, 0 failed."
        );
        assert_eq!(
            elapsed_message(1, 2, Duration::from_millis(12_400)),
            "Converted 1 file(s) in 12 seconds, 2 failed."
        );
    }
}
