//! Defines the [`Termination`] trait.

use std::{convert::Infallible, fmt::Debug, process};

/// Extends [`std::process::Termination`] with a way to inspect the outcome.
///
/// [`gui::run`][crate::gui::run] can not simply return from `main`, because the window event loop
/// never returns control on some platforms. It exits the process itself, with an exit code that
/// depends on the [`Termination`] value returned by the application.
pub trait Termination: process::Termination {
    fn is_success(&self) -> bool;

    /// Logs the outcome if it is a failure.
    fn report_failure(&self) {}
}

impl Termination for Infallible {
    fn is_success(&self) -> bool {
        match *self {}
    }
}

impl Termination for () {
    fn is_success(&self) -> bool {
        true
    }
}

impl<T: Termination, E: Debug> Termination for Result<T, E> {
    fn is_success(&self) -> bool {
        match self {
            Ok(term) => term.is_success(),
            Err(_) => false,
        }
    }

    fn report_failure(&self) {
        match self {
            Ok(term) => term.report_failure(),
            Err(e) => log::error!("{:?}", e),
        }
    }
}

/// Returns the process exit code for an application outcome.
pub(crate) fn exit_code<T: Termination>(outcome: &T) -> i32 {
    if outcome.is_success() {
        0
    } else {
        outcome.report_failure();
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code(&()), 0);
        assert_eq!(exit_code(&anyhow::Ok(())), 0);
        assert_eq!(exit_code(&Err::<(), _>(anyhow::anyhow!("camera unplugged"))), 1);
        assert_eq!(exit_code(&Ok::<_, String>(Err::<(), _>("inner"))), 1);
    }
}
