use std::process::ExitCode;

fn main() -> ExitCode {
    sizer_cli::run()
}
