use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C handler. The first signal sets the shutdown flag so
/// the instance-ready wait stops at its next poll; a second one exits.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if shutdown_requested() {
            std::process::exit(130);
        }
        request_shutdown();
        eprintln!("\ncancellation requested, recording what exists so far...");
    });
}

/// Set the shutdown flag, as the first Ctrl-C does.
pub fn request_shutdown() {
    SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
}

/// Clear the shutdown flag so later waits run to their deadline again.
pub fn clear_shutdown() {
    SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
