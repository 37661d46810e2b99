use std::process::ExitCode;

fn main() -> ExitCode {
    match stress_dashboard_lib::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}
