#![forbid(unsafe_code)]

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    codeforge::logging::init();
    codeforge::cli::main().await
}
