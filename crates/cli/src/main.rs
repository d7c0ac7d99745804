use std::process::ExitCode;

fn main() -> ExitCode {
    openrag_cli::run()
}
