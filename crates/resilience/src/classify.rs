//! Error classification shared by retry and callers.

/// Coarse error category used to decide whether a failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused/reset, DNS, broken pipe.
    Network,
    Timeout,
    /// 429 or equivalent back-pressure signal.
    RateLimited,
    /// 5xx or a dependency reporting itself unavailable.
    Unavailable,
    /// Bad input or illegal state; never retried.
    Validation,
    /// Business rejection such as insufficient stock; never retried.
    Business,
    Other,
}

impl ErrorKind {
    /// The default retry heuristic: network and timeout class failures.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::Unavailable
        )
    }

    /// Whether the failure says something about the dependency's health.
    /// Rejected input and business refusals are answers, not outages.
    pub fn trips_breaker(self) -> bool {
        !matches!(self, ErrorKind::Validation | ErrorKind::Business)
    }

    /// Guesses a kind from an error message.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();
        if msg.contains("timeout") || msg.contains("timed out") {
            ErrorKind::Timeout
        } else if msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests") {
            ErrorKind::RateLimited
        } else if ["econnreset", "econnrefused", "connection", "network", "broken pipe", "dns"]
            .iter()
            .any(|needle| msg.contains(needle))
        {
            ErrorKind::Network
        } else if ["502", "503", "504", "unavailable", "bad gateway"]
            .iter()
            .any(|needle| msg.contains(needle))
        {
            ErrorKind::Unavailable
        } else {
            ErrorKind::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Validation => "validation",
            ErrorKind::Business => "business",
            ErrorKind::Other => "other",
        }
    }
}

/// Errors that can report their [`ErrorKind`].
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for String {
    fn kind(&self) -> ErrorKind {
        ErrorKind::from_message(self)
    }
}

impl Classify for std::io::Error {
    fn kind(&self) -> ErrorKind {
        use std::io::ErrorKind as Io;
        match std::io::Error::kind(self) {
            Io::TimedOut => ErrorKind::Timeout,
            Io::ConnectionRefused
            | Io::ConnectionReset
            | Io::ConnectionAborted
            | Io::NotConnected
            | Io::BrokenPipe => ErrorKind::Network,
            Io::InvalidInput | Io::InvalidData => ErrorKind::Validation,
            _ => ErrorKind::from_message(&self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_heuristic() {
        assert_eq!(ErrorKind::from_message("request timed out"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::from_message("ECONNRESET"), ErrorKind::Network);
        assert_eq!(ErrorKind::from_message("HTTP 503 Service Unavailable"), ErrorKind::Unavailable);
        assert_eq!(ErrorKind::from_message("429 Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(ErrorKind::from_message("card declined"), ErrorKind::Other);
    }

    #[test]
    fn only_network_class_is_transient() {
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(!ErrorKind::Validation.is_transient());
        assert!(!ErrorKind::Business.is_transient());
        assert!(!ErrorKind::Other.is_transient());
    }

    #[test]
    fn client_side_kinds_do_not_trip_the_breaker() {
        assert!(ErrorKind::Unavailable.trips_breaker());
        assert!(ErrorKind::Other.trips_breaker());
        assert!(!ErrorKind::Validation.trips_breaker());
        assert!(!ErrorKind::Business.trips_breaker());
    }

    #[test]
    fn io_errors_map_by_kind() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(Classify::kind(&err), ErrorKind::Network);
    }
}
