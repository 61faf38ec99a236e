use clap::Parser;

use axsel::cli::{self, exit_codes, Cli};

fn main() {
    // die quietly on a closed pipe (`axsel ... | head`)
    reset_sigpipe();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::INVALID_ARGS
            } else {
                exit_codes::SUCCESS
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    if let Err(err) = cli::run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_codes::ERROR);
    }
}

fn reset_sigpipe() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}
