//! stowage-testreport - print a runtime-spec snapshot of this process
//!
//! Run inside a container to compare what the runtime configured against
//! what a test expects. Output is a single JSON document on stdout.

use std::process::ExitCode;
use tracing::error;

#[cfg(target_os = "linux")]
fn main() -> ExitCode {
    use std::io::Write;
    use stowage::report::TestReport;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let report = match TestReport::collect() {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut stdout = std::io::stdout().lock();
    let written = serde_json::to_writer(&mut stdout, &report)
        .map_err(|e| e.to_string())
        .and_then(|()| writeln!(stdout).map_err(|e| e.to_string()));
    match written {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("writing report: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    error!("runtime snapshots are only supported on Linux");
    ExitCode::FAILURE
}
