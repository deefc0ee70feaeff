use ble_mqtt::app::{self, Options};
use clap::Parser;
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that restart the bridge on failure
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(why) = app::init_tracing(&options) {
        eprintln!("error: {}", why);
        std::process::exit(EXIT_ERROR);
    }

    match app::run(options).await {
        Ok(outcome) if outcome.is_fatal() => std::process::exit(EXIT_ERROR),
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            tracing::error!(error = %why, "Bridge failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
