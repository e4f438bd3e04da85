use std::process::ExitCode;

fn main() -> ExitCode {
    halfduplex_bot_lib::run()
}
