use std::{env, io, process::ExitCode};

fn main() -> ExitCode {
    let mut stderr = io::stderr().lock();
    let status = vtest_daemon::run(env::args_os(), &mut stderr);
    vtest_daemon::exit_code_from(status)
}
