//! The two probes the engine runs against a resolver: a lookup that asks a
//! question and classifies the reply, and a health check that fires a small
//! battery of lookups for domains every working resolver can answer.

use crate::RecordType;
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

/// Domains used by [`health_check`]. Any working recursive resolver is
/// expected to answer for these.
pub const HEALTH_CHECK_DOMAINS: [&str; 3] = ["google.com", "facebook.com", "amazon.com"];

/// Classified failure of a single probe
///
/// The `Display` form is what summaries group on, so two resolvers that fail
/// the same way always land under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKind {
    /// No reply arrived before the per-probe timeout.
    Timeout,
    /// The resolver actively refused the connection.
    ConnectionRefused,
    /// The reply was successful but carried zero records.
    NoAnswer,
    /// The reply carried a non-success response code, e.g. `NXDOMAIN`.
    ProtocolError(String),
    /// Anything else, with a short description.
    Other(String),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Timeout => write!(f, "TIMEOUT"),
            ErrorKind::ConnectionRefused => write!(f, "CONNECTION REFUSED"),
            ErrorKind::NoAnswer => write!(f, "NOANSWER"),
            ErrorKind::ProtocolError(code) => f.write_str(code),
            ErrorKind::Other(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for ErrorKind {}

/// A question sent to a resolver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub record_type: RecordType,
}

impl Question {
    pub fn new(name: impl Into<String>, record_type: RecordType) -> Self {
        Self {
            name: name.into(),
            record_type,
        }
    }
}

/// A decoded reply: the response code and the answer section rendered as
/// RDATA text, in the order the resolver sent them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    pub rcode: u16,
    pub answers: Vec<String>,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        self.rcode == 0
    }
}

/// One question/answer exchange with a resolver
///
/// Implementations bound every call by their own timeout and report it as
/// [`ErrorKind::Timeout`]. Only transport level failures are errors here; a
/// reply with a failing response code is still `Ok`.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(&self, address: &str, question: &Question) -> Result<Reply, ErrorKind>;
}

/// Ask `address` a question and classify what comes back.
pub async fn lookup<E>(
    exchanger: &E,
    address: &str,
    question: &Question,
) -> Result<Vec<String>, ErrorKind>
where
    E: Exchange + ?Sized,
{
    let reply = exchanger.exchange(address, question).await?;

    if !reply.is_success() {
        return Err(ErrorKind::ProtocolError(rcode_name(reply.rcode)));
    }

    if reply.answers.is_empty() {
        return Err(ErrorKind::NoAnswer);
    }

    Ok(reply.answers)
}

/// Check that a resolver is reachable.
///
/// Sends an A query for each of [`HEALTH_CHECK_DOMAINS`]. A timeout on any
/// of them fails the check at once without sending the rest. Otherwise the
/// resolver passes if at least one query got a decodable reply, whatever its
/// response code. Whether the answers are truthful is not checked.
pub async fn health_check<E>(exchanger: &E, address: &str) -> Result<(), ErrorKind>
where
    E: Exchange + ?Sized,
{
    let mut responded = false;
    let mut last_error = None;

    for domain in HEALTH_CHECK_DOMAINS {
        let question = Question::new(domain, RecordType::A);
        match exchanger.exchange(address, &question).await {
            Ok(_) => responded = true,
            Err(ErrorKind::Timeout) => {
                debug!(server = address, domain, "health check timed out");
                return Err(ErrorKind::Timeout);
            }
            Err(e) => {
                debug!(server = address, domain, error = %e, "health check probe failed");
                last_error = Some(e);
            }
        }
    }

    if responded {
        Ok(())
    } else {
        Err(last_error.unwrap_or_else(|| ErrorKind::Other("server did not return a result".into())))
    }
}

/// Mnemonic for a DNS response code, as printed by dig.
pub fn rcode_name(rcode: u16) -> String {
    let name = match rcode {
        0 => "NOERROR",
        1 => "FORMERR",
        2 => "SERVFAIL",
        3 => "NXDOMAIN",
        4 => "NOTIMP",
        5 => "REFUSED",
        6 => "YXDOMAIN",
        7 => "YXRRSET",
        8 => "NXRRSET",
        9 => "NOTAUTH",
        10 => "NOTZONE",
        16 => "BADSIG",
        17 => "BADKEY",
        18 => "BADTIME",
        19 => "BADMODE",
        20 => "BADNAME",
        21 => "BADALG",
        22 => "BADTRUNC",
        23 => "BADCOOKIE",
        other => return format!("RCODE{}", other),
    };
    name.to_string()
}


#[cfg(test)]
mod tests {
    use super::mock::{Behaviour, MockExchanger};
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn question() -> Question {
        Question::new("example.com", RecordType::A)
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::Timeout.to_string(), "TIMEOUT");
        assert_eq!(ErrorKind::ConnectionRefused.to_string(), "CONNECTION REFUSED");
        assert_eq!(ErrorKind::NoAnswer.to_string(), "NOANSWER");
        assert_eq!(ErrorKind::ProtocolError("NXDOMAIN".into()).to_string(), "NXDOMAIN");
        assert_eq!(ErrorKind::Other("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_rcode_names() {
        assert_eq!(rcode_name(2), "SERVFAIL");
        assert_eq!(rcode_name(3), "NXDOMAIN");
        assert_eq!(rcode_name(5), "REFUSED");
        assert_eq!(rcode_name(12), "RCODE12");
    }

    #[tokio::test]
    async fn test_lookup_returns_answers_in_order() {
        let exchanger = MockExchanger::new().with(
            "8.8.8.8",
            Behaviour::Answer(vec!["ns1.google.com.".into(), "ns2.google.com.".into()]),
        );
        let answers = assert_ok!(lookup(&exchanger, "8.8.8.8", &question()).await);
        assert_eq!(answers, vec!["ns1.google.com.", "ns2.google.com."]);
    }

    #[tokio::test]
    async fn test_lookup_classifies_failures() {
        let exchanger = MockExchanger::new()
            .with("1.1.1.1", Behaviour::Rcode(3))
            .with("1.0.0.1", Behaviour::Answer(Vec::new()))
            .with("127.0.0.1", Behaviour::Fail(ErrorKind::ConnectionRefused));

        let nx = assert_err!(lookup(&exchanger, "1.1.1.1", &question()).await);
        assert_eq!(nx, ErrorKind::ProtocolError("NXDOMAIN".into()));

        let empty = assert_err!(lookup(&exchanger, "1.0.0.1", &question()).await);
        assert_eq!(empty, ErrorKind::NoAnswer);

        let refused = assert_err!(lookup(&exchanger, "127.0.0.1", &question()).await);
        assert_eq!(refused, ErrorKind::ConnectionRefused);

        let silent = assert_err!(lookup(&exchanger, "128.243.103.175", &question()).await);
        assert_eq!(silent, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_health_check_passes_on_any_reply() {
        let exchanger = MockExchanger::new()
            .with("8.8.8.8", Behaviour::Answer(vec!["142.250.0.1".into()]))
            .with("9.9.9.9", Behaviour::Rcode(5));

        assert_ok!(health_check(&exchanger, "8.8.8.8").await);
        // A REFUSED reply is still a reply.
        assert_ok!(health_check(&exchanger, "9.9.9.9").await);
        assert_eq!(exchanger.calls_to("8.8.8.8"), 3);
    }

    #[tokio::test]
    async fn test_health_check_timeout_short_circuits() {
        let exchanger = MockExchanger::new();
        let err = assert_err!(health_check(&exchanger, "128.243.103.175").await);
        assert_eq!(err, ErrorKind::Timeout);
        assert_eq!(exchanger.calls_to("128.243.103.175"), 1);
    }

    #[tokio::test]
    async fn test_health_check_timeout_after_reply_still_fails() {
        // Replies once, then goes silent.
        struct Flaky(std::sync::atomic::AtomicUsize);

        #[async_trait]
        impl Exchange for Flaky {
            async fn exchange(&self, _: &str, _: &Question) -> Result<Reply, ErrorKind> {
                match self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) {
                    0 => Ok(Reply::default()),
                    _ => Err(ErrorKind::Timeout),
                }
            }
        }

        let flaky = Flaky(Default::default());
        let err = assert_err!(health_check(&flaky, "203.0.113.9").await);
        assert_eq!(err, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_health_check_recovers_from_non_timeout_errors() {
        let exchanger = MockExchanger::new().with(
            "203.0.113.7",
            Behaviour::FailFirst(2, ErrorKind::Other("reset".into())),
        );
        assert_ok!(health_check(&exchanger, "203.0.113.7").await);
    }

    #[tokio::test]
    async fn test_health_check_fails_with_last_error_when_nothing_replies() {
        let exchanger = MockExchanger::new()
            .with("127.0.0.1", Behaviour::Fail(ErrorKind::ConnectionRefused));
        let err = assert_err!(health_check(&exchanger, "127.0.0.1").await);
        assert_eq!(err, ErrorKind::ConnectionRefused);
        assert_eq!(exchanger.calls_to("127.0.0.1"), 3);
    }
}
