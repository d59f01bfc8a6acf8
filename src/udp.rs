use crate::probe::{ErrorKind, Exchange, Question, Reply};
use async_trait::async_trait;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::debug;
use trust_dns_proto::op::{Message, MessageType, OpCode, Query};
use trust_dns_proto::rr::{Name, RecordType as DnsRecordType};
use trust_dns_proto::serialize::binary::BinEncodable;

/// Plain DNS over UDP, one ephemeral socket per exchange
#[derive(Debug, Clone)]
pub struct UdpExchanger {
    timeout: Duration,
    port: u16,
}

impl UdpExchanger {
    pub const DEFAULT_PORT: u16 = 53;

    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            port: Self::DEFAULT_PORT,
        }
    }

    /// Send queries to `port` instead of 53.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send_and_receive(&self, address: &str, question: &Question) -> Result<Reply, ErrorKind> {
        let addr = format!("{}:{}", address, self.port);
        let (id, query) = self.build_dns_query(question)?;

        let start = Instant::now();

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(classify_io)?;
        socket.connect(&addr).await.map_err(classify_io)?;
        socket.send(&query).await.map_err(classify_io)?;

        let mut buf = vec![0u8; 4096];
        loop {
            let len = socket.recv(&mut buf).await.map_err(classify_io)?;
            let message = match Message::from_vec(&buf[..len]) {
                Ok(message) => message,
                Err(e) => return Err(ErrorKind::Other(format!("malformed response: {}", e))),
            };

            // Stray datagrams from an earlier exchange on a reused port.
            if message.id() != id || message.message_type() != MessageType::Response {
                continue;
            }

            let reply = self.parse_dns_response(&message);
            debug!(
                server = %addr,
                name = %question.name,
                rcode = reply.rcode,
                answers = reply.answers.len(),
                elapsed = ?start.elapsed(),
                "received reply"
            );
            return Ok(reply);
        }
    }

    fn build_dns_query(&self, question: &Question) -> Result<(u16, Vec<u8>), ErrorKind> {
        let name = Name::from_ascii(&question.name)
            .map_err(|e| ErrorKind::Other(format!("invalid hostname: {}", e)))?;
        let record_type = DnsRecordType::from(question.record_type.to_type_code());

        let id: u16 = rand::random();
        let mut message = Message::new();
        message.set_id(id);
        message.set_message_type(MessageType::Query);
        message.set_op_code(OpCode::Query);
        message.set_recursion_desired(true);

        let query = Query::query(name, record_type);
        message.add_query(query);

        let bytes = message
            .to_bytes()
            .map_err(|e| ErrorKind::Other(format!("failed to encode DNS query: {}", e)))?;
        Ok((id, bytes))
    }

    fn parse_dns_response(&self, message: &Message) -> Reply {
        let answers = message
            .answers()
            .iter()
            .filter_map(|answer| answer.data().map(|d| format!("{}", d)))
            .collect();

        Reply {
            rcode: u16::from(message.response_code()),
            answers,
        }
    }
}

#[async_trait]
impl Exchange for UdpExchanger {
    async fn exchange(&self, address: &str, question: &Question) -> Result<Reply, ErrorKind> {
        match tokio::time::timeout(self.timeout, self.send_and_receive(address, question)).await {
            Ok(result) => result,
            Err(_) => Err(ErrorKind::Timeout),
        }
    }
}

fn classify_io(e: io::Error) -> ErrorKind {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ErrorKind::ConnectionRefused,
        io::ErrorKind::TimedOut => ErrorKind::Timeout,
        _ => ErrorKind::Other(e.to_string()),
    }
}
