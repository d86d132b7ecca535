use std::process::ExitCode;

fn main() -> ExitCode {
    ExitCode::from(semantic_embed::cli::run())
}
