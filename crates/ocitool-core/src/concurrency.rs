use ocitool_store::CancelToken;
use tracing::warn;

/// Route Ctrl-C into `cancel`. Walks and layer extraction notice the token at
/// their next checkpoint; a second Ctrl-C exits without waiting.
pub fn install_signal_handler(cancel: CancelToken) {
    let result = ctrlc::set_handler(move || {
        if interrupt(&cancel) {
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received, stopping after the current entry...");
    });
    if let Err(e) = result {
        warn!("unable to install signal handler: {e}");
    }
}

/// Cancel the token; returns true if it had already been cancelled.
fn interrupt(cancel: &CancelToken) -> bool {
    let repeated = cancel.is_cancelled();
    cancel.cancel();
    repeated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_interrupt_cancels_second_exits() {
        let token = CancelToken::new();
        let seen_by_walker = token.clone();
        assert!(!interrupt(&token));
        assert!(seen_by_walker.is_cancelled());
        assert!(interrupt(&token));
    }
}
