//! One-at-a-time scan bookkeeping shared by the timeline scanners

use std::sync::Mutex;

use crate::api::CancelToken;

/// Where a scanner is in its life cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    /// Nothing started yet
    #[default]
    Idle,
    /// A scan is fetching pages
    Running,
    /// The last scan finished normally
    Completed,
    /// The last scan was stopped or superseded
    Cancelled,
}

/// Identifies one started scan
#[derive(Debug, Clone)]
pub struct ScanTicket {
    generation: u64,
    token: CancelToken,
}

impl ScanTicket {
    /// Token to pass into the paginated fetches of this scan
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// True once this scan was stopped or replaced
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug, Default)]
struct Inner {
    generation: u64,
    state: ScanState,
    token: CancelToken,
}

/// Generation counter plus the cancel token of the running scan
#[derive(Debug, Default)]
pub struct Scanner {
    inner: Mutex<Inner>,
}

impl Scanner {
    /// An idle scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ScanState {
        self.inner.lock().map(|i| i.state).unwrap_or_default()
    }

    /// Start a new scan, cancelling the one in progress
    pub fn start(&self) -> ScanTicket {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if inner.state == ScanState::Running {
            tracing::info!("Cancelling scan #{} for a new one", inner.generation);
            inner.token.cancel();
        }

        inner.generation += 1;
        inner.token = CancelToken::new();
        inner.state = ScanState::Running;
        tracing::info!("Scan #{} started", inner.generation);

        ScanTicket {
            generation: inner.generation,
            token: inner.token.clone(),
        }
    }

    /// True if `ticket` is still the latest scan and wasn't cancelled
    pub fn is_current(&self, ticket: &ScanTicket) -> bool {
        !ticket.is_cancelled()
            && self
                .inner
                .lock()
                .is_ok_and(|inner| inner.generation == ticket.generation)
    }

    /// Record the end of a scan; stale tickets change nothing
    ///
    /// Returns the state the ticket's scan ended in.
    pub fn finish(&self, ticket: &ScanTicket) -> ScanState {
        let outcome = if ticket.is_cancelled() {
            ScanState::Cancelled
        } else {
            ScanState::Completed
        };

        if let Ok(mut inner) = self.inner.lock() {
            if inner.generation == ticket.generation && inner.state == ScanState::Running {
                inner.state = outcome;
                tracing::info!("Scan #{} {:?}", inner.generation, outcome);
            }
        }

        outcome
    }

    /// Stop the running scan at its next page boundary
    pub fn cancel(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state == ScanState::Running {
                inner.token.cancel();
                inner.state = ScanState::Cancelled;
                tracing::info!("Scan #{} cancelled", inner.generation);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let scanner = Scanner::new();
        assert_eq!(scanner.state(), ScanState::Idle);

        let ticket = scanner.start();
        assert_eq!(scanner.state(), ScanState::Running);
        assert!(scanner.is_current(&ticket));

        assert_eq!(scanner.finish(&ticket), ScanState::Completed);
        assert_eq!(scanner.state(), ScanState::Completed);
    }

    #[test]
    fn test_new_scan_cancels_previous() {
        let scanner = Scanner::new();
        let first = scanner.start();
        let second = scanner.start();

        assert!(first.is_cancelled());
        assert!(!scanner.is_current(&first));
        assert!(scanner.is_current(&second));

        // the old scan finishing late doesn't touch the new one
        assert_eq!(scanner.finish(&first), ScanState::Cancelled);
        assert_eq!(scanner.state(), ScanState::Running);
    }

    #[test]
    fn test_cancel() {
        let scanner = Scanner::new();
        let ticket = scanner.start();
        scanner.cancel();

        assert!(ticket.token().is_cancelled());
        assert_eq!(scanner.state(), ScanState::Cancelled);
        assert_eq!(scanner.finish(&ticket), ScanState::Cancelled);
    }
}
