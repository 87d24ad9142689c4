use std::fmt;
use std::time::Duration;

use crate::rate_limit::RequestKind;

/// Events emitted by the limiter.
///
/// The middleware reports one admission event per request; the token bucket reports
/// each cleanup sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A governed request passed the admission check and was forwarded.
    Admitted {
        /// Kind of the request.
        kind: RequestKind,
    },
    /// A governed request was denied and answered with the rejection response.
    Rejected {
        /// Kind of the request.
        kind: RequestKind,
    },
    /// A request of an ungoverned kind skipped the admission check.
    Bypassed {
        /// Kind of the request.
        kind: RequestKind,
    },
    /// The retention sweep ran over the bucket map.
    Swept {
        /// Buckets dropped because they were idle for the whole retention window.
        evicted: usize,
        /// Buckets kept.
        retained: usize,
        /// Wall time spent sweeping.
        duration: Duration,
    },
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { kind } => write!(f, "Admitted(kind={})", kind),
            LimiterEvent::Rejected { kind } => write!(f, "Rejected(kind={})", kind),
            LimiterEvent::Bypassed { kind } => write!(f, "Bypassed(kind={})", kind),
            LimiterEvent::Swept { evicted, retained, duration } => write!(
                f,
                "Swept(evicted={}, retained={}, duration={:?})",
                evicted, retained, duration
            ),
        }
    }
}

impl LimiterEvent {
    /// Helper to check if this event records a denial.
    pub fn is_rejected(&self) -> bool {
        matches!(self, LimiterEvent::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(
            LimiterEvent::Rejected { kind: RequestKind::Http }.to_string(),
            "Rejected(kind=http)"
        );
        let swept = LimiterEvent::Swept {
            evicted: 3,
            retained: 1,
            duration: Duration::from_millis(2),
        };
        assert_eq!(swept.to_string(), "Swept(evicted=3, retained=1, duration=2ms)");
    }
}
