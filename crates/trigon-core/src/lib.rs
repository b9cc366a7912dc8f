// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{info, warn};

/// Exit status used when a second interrupt kills the process.
pub const INTERRUPT_EXIT_CODE: i32 = 130;

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterruptAction {
    /// Flag cleared, the loop was woken and winds down on its own.
    Stop,
    /// A stop was already pending; the process should exit now.
    Exit,
}

/// Handles one interrupt: the first clears `running` and calls `wake`,
/// any later one asks for an immediate exit.
pub fn on_interrupt(running: &AtomicBool, wake: &dyn Fn()) -> InterruptAction {
    if running.swap(false, Ordering::Relaxed) {
        wake();
        InterruptAction::Stop
    } else {
        InterruptAction::Exit
    }
}

/// Process-wide run flag, cleared by the first Ctrl-C.
///
/// Loops check it at the top of each iteration, so whatever frame or
/// recreation pass is in flight finishes before the flag is observed.
/// `wake` must unblock a loop that is waiting for window events. A second
/// Ctrl-C exits the process.
pub fn install_interrupt_flag<F>(wake: F) -> Result<Arc<AtomicBool>>
where
    F: Fn() + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || match on_interrupt(&r, &wake) {
        InterruptAction::Stop => info!("interrupt received, stopping after current iteration"),
        InterruptAction::Exit => {
            warn!("second interrupt, exiting");
            std::process::exit(INTERRUPT_EXIT_CODE);
        }
    })
    .context("setting Ctrl-C handler")?;
    Ok(running)
}
