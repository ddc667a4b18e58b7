use std::process::ExitCode;

mod app;

fn main() -> ExitCode {
    let Some(wiring) = app::bootstrap::build_app(std::env::args_os().skip(1)) else {
        return ExitCode::FAILURE;
    };
    app::loop_runner::run(wiring)
}
