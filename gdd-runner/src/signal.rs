// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Support for handling signals in gdd.

use crate::errors::SignalHandlerSetupError;

/// The kind of signal handling to set up for a test run.
///
/// A `SignalHandlerKind` can be passed into
/// [`TestRunnerBuilder::build`](crate::runner::TestRunnerBuilder::build).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum SignalHandlerKind {
    /// The standard signal handler. Capture interrupt and termination signals depending on the
    /// platform.
    Standard,

    /// A no-op signal handler. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        match self {
            Self::Standard => SignalHandler::new(),
            Self::Noop => Ok(SignalHandler::noop()),
        }
    }
}

/// Listens for the signals that stop a run.
///
/// The dispatcher treats the first signal as a request to cancel gracefully, and any later one as a
/// request to kill `go test` outright.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    signals: Option<imp::Signals>,
}

impl SignalHandler {
    /// Creates a new `SignalHandler` that handles Ctrl-C and other signals.
    #[cfg(any(unix, windows))]
    pub(crate) fn new() -> Result<Self, SignalHandlerSetupError> {
        let signals = imp::Signals::new()?;
        Ok(Self {
            signals: Some(signals),
        })
    }

    /// Creates a new `SignalHandler` that does nothing.
    pub(crate) fn noop() -> Self {
        Self { signals: None }
    }

    /// Waits for the next signal. Returns `None` once no more signals can arrive, or immediately
    /// for a no-op handler.
    pub(crate) async fn recv(&mut self) -> Option<ShutdownEvent> {
        match &mut self.signals {
            Some(signals) => signals.recv().await,
            None => None,
        }
    }
}

#[cfg(unix)]
mod imp {
    use super::ShutdownEvent;
    use std::{future::poll_fn, io, task::Poll};
    use tokio::signal::unix::{Signal, SignalKind, signal};

    /// Listened to in this order, so that an interrupt wins if several arrive at once.
    const SHUTDOWN_SIGNALS: [(fn() -> SignalKind, ShutdownEvent); 3] = [
        (SignalKind::interrupt, ShutdownEvent::Interrupt),
        (SignalKind::terminate, ShutdownEvent::Term),
        (SignalKind::hangup, ShutdownEvent::Hangup),
    ];

    #[derive(Debug)]
    pub(super) struct Signals {
        // Streams that can no longer produce signals are removed.
        listeners: Vec<(Signal, ShutdownEvent)>,
    }

    impl Signals {
        pub(super) fn new() -> io::Result<Self> {
            let listeners = SHUTDOWN_SIGNALS
                .iter()
                .map(|&(kind, event)| Ok((signal(kind())?, event)))
                .collect::<io::Result<_>>()?;
            Ok(Self { listeners })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            poll_fn(|cx| {
                let mut index = 0;
                while let Some((signal, event)) = self.listeners.get_mut(index) {
                    match signal.poll_recv(cx) {
                        Poll::Ready(Some(())) => return Poll::Ready(Some(*event)),
                        Poll::Ready(None) => {
                            self.listeners.remove(index);
                        }
                        Poll::Pending => index += 1,
                    }
                }

                if self.listeners.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Pending
                }
            })
            .await
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::ShutdownEvent;
    use std::io;
    use tokio::signal::windows::{CtrlC, ctrl_c};

    #[derive(Debug)]
    pub(super) struct Signals {
        // None once the stream has closed.
        ctrl_c: Option<CtrlC>,
    }

    impl Signals {
        pub(super) fn new() -> io::Result<Self> {
            Ok(Self {
                ctrl_c: Some(ctrl_c()?),
            })
        }

        pub(super) async fn recv(&mut self) -> Option<ShutdownEvent> {
            let ctrl_c = self.ctrl_c.as_mut()?;
            match ctrl_c.recv().await {
                Some(()) => Some(ShutdownEvent::Interrupt),
                None => {
                    self.ctrl_c = None;
                    None
                }
            }
        }
    }
}

/// A signal that requests the run to stop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ShutdownEvent {
    /// SIGHUP (Unix only).
    #[cfg(unix)]
    Hangup,

    /// SIGTERM (Unix only).
    #[cfg(unix)]
    Term,

    /// SIGINT on Unix, Ctrl-C on Windows.
    Interrupt,
}

impl ShutdownEvent {
    /// A short description of the signal, for display.
    pub fn description(self) -> &'static str {
        match self {
            #[cfg(unix)]
            Self::Hangup => "hangup",
            #[cfg(unix)]
            Self::Term => "termination",
            Self::Interrupt => "interrupt",
        }
    }
}
