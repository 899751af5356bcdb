//
// main.rs
// Dicom-Conv-rs
//
// Binary entry point that hands off to the CLI layer and turns its outcome into an exit status.
//
// Thales Matheus Mendonça Santos - November 2025

use std::process::ExitCode;

use dicom_conv::cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}
