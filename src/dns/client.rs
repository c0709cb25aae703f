//! client for sending DNS queries to an upstream server

use std::io::{self, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use derive_more::{Display, Error, From};
use rand::random;
use serde_derive::Serialize;

use crate::dns::buffer::{BytePacketBuffer, PacketBuffer, VectorPacketBuffer};
use crate::dns::netutil::{read_packet, write_packet_length};
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ClientError {
    Protocol(crate::dns::protocol::ProtocolError),
    Io(std::io::Error),
    TimeOut,
}

type Result<T> = std::result::Result<T, ClientError>;

pub trait DnsClient {
    fn get_sent_count(&self) -> usize;
    fn get_failed_count(&self) -> usize;

    /// Perform a single query/response exchange with `server`
    ///
    /// Implementations make exactly one attempt. Any failure to obtain a
    /// response is reported as an error and never retried.
    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket>;
}

/// Transport used to reach the upstream server
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Transport {
    Udp,
    Tcp,
}

/// The network client
///
/// Every exchange uses its own socket, so any number of threads can query
/// through a shared client without coordinating. The timeout bounds the wait
/// for the response; for TCP it bounds the connect and each read and write.
pub struct DnsNetworkClient {
    total_sent: AtomicUsize,
    total_failed: AtomicUsize,

    /// Counter for assigning packet ids
    seq: AtomicUsize,

    timeout: Duration,
    transport: Transport,
}

fn timeout_or_io(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => ClientError::TimeOut,
        _ => ClientError::Io(err),
    }
}

impl DnsNetworkClient {
    pub fn new(timeout: Duration, transport: Transport) -> DnsNetworkClient {
        DnsNetworkClient {
            total_sent: AtomicUsize::new(0),
            total_failed: AtomicUsize::new(0),
            seq: AtomicUsize::new(random::<u16>() as usize),
            timeout,
            transport,
        }
    }

    fn build_query(
        &self,
        qname: &str,
        qtype: QueryType,
        recursive: bool,
    ) -> Result<(u16, VectorPacketBuffer)> {
        let mut packet = DnsPacket::new();

        packet.header.id = (self.seq.fetch_add(1, Ordering::SeqCst) & 0xFFFF) as u16;
        packet.header.questions = 1;
        packet.header.recursion_desired = recursive;

        packet
            .questions
            .push(DnsQuestion::new(qname.to_string(), qtype));

        let mut req_buffer = VectorPacketBuffer::new();
        packet.write(&mut req_buffer, 512)?;

        Ok((packet.header.id, req_buffer))
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        let _ = self.total_sent.fetch_add(1, Ordering::Release);
        if result.is_err() {
            let _ = self.total_failed.fetch_add(1, Ordering::Release);
        }
        result
    }

    /// Send a DNS query using UDP transport
    ///
    /// The socket is connected to `server`, so datagrams from other sources are
    /// dropped by the kernel. Responses carrying a different id are discarded
    /// and the wait continues until the deadline.
    pub fn send_udp_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket> {
        self.track(self.exchange_udp(qname, qtype, server, recursive))
    }

    fn exchange_udp(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket> {
        let (id, req_buffer) = self.build_query(qname, qtype, recursive)?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(server)?;

        let deadline = Instant::now() + self.timeout;
        socket.send(req_buffer.as_slice())?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining == Duration::from_secs(0) {
                return Err(ClientError::TimeOut);
            }
            socket.set_read_timeout(Some(remaining))?;

            let mut res_buffer = BytePacketBuffer::new();
            socket.recv(&mut res_buffer.buf).map_err(timeout_or_io)?;

            let packet = DnsPacket::from_buffer(&mut res_buffer)?;
            if packet.header.id != id {
                log::debug!(
                    "Discarding response with id {} while waiting for {} ({})",
                    packet.header.id,
                    id,
                    qname
                );
                continue;
            }

            return Ok(packet);
        }
    }

    /// Send a DNS query using TCP transport
    pub fn send_tcp_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket> {
        self.track(self.exchange_tcp(qname, qtype, server, recursive))
    }

    fn exchange_tcp(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket> {
        let (_, req_buffer) = self.build_query(qname, qtype, recursive)?;

        let mut socket = TcpStream::connect_timeout(&server, self.timeout).map_err(timeout_or_io)?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.set_write_timeout(Some(self.timeout))?;

        write_packet_length(&mut socket, req_buffer.pos()).map_err(timeout_or_io)?;
        socket
            .write_all(req_buffer.as_slice())
            .map_err(timeout_or_io)?;
        socket.flush()?;

        let data = read_packet(&mut socket).map_err(timeout_or_io)?;
        let mut res_buffer = VectorPacketBuffer::from_bytes(data);

        Ok(DnsPacket::from_buffer(&mut res_buffer)?)
    }
}

impl DnsClient for DnsNetworkClient {
    fn get_sent_count(&self) -> usize {
        self.total_sent.load(Ordering::Acquire)
    }

    fn get_failed_count(&self) -> usize {
        self.total_failed.load(Ordering::Acquire)
    }

    fn send_query(
        &self,
        qname: &str,
        qtype: QueryType,
        server: SocketAddr,
        recursive: bool,
    ) -> Result<DnsPacket> {
        match self.transport {
            Transport::Udp => self.send_udp_query(qname, qtype, server, recursive),
            Transport::Tcp => self.send_tcp_query(qname, qtype, server, recursive),
        }
    }
}

#[cfg(test)]
pub mod tests {

    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::dns::netutil::read_packet_length;
    use crate::dns::protocol::{DnsRecord, ResultCode};

    pub type StubCallback =
        dyn Fn(&str, QueryType, SocketAddr, bool) -> Result<DnsPacket> + Send + Sync;

    /// In-process stand-in for an upstream server
    pub struct DnsStubClient {
        callback: Box<StubCallback>,
        sent: AtomicUsize,
    }

    impl DnsStubClient {
        pub fn new(callback: Box<StubCallback>) -> DnsStubClient {
            DnsStubClient {
                callback,
                sent: AtomicUsize::new(0),
            }
        }
    }

    impl DnsClient for DnsStubClient {
        fn get_sent_count(&self) -> usize {
            self.sent.load(Ordering::Acquire)
        }

        fn get_failed_count(&self) -> usize {
            0
        }

        fn send_query(
            &self,
            qname: &str,
            qtype: QueryType,
            server: SocketAddr,
            recursive: bool,
        ) -> Result<DnsPacket> {
            let _ = self.sent.fetch_add(1, Ordering::Release);
            (self.callback)(qname, qtype, server, recursive)
        }
    }

    fn answer_for(request: &DnsPacket) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = request.header.id;
        packet.header.response = true;
        packet.questions = request.questions.clone();

        let question = &request.questions[0];
        if question.name == "www.example.com" {
            packet.answers.push(DnsRecord::A {
                domain: question.name.clone(),
                addr: "192.0.2.1".parse().unwrap(),
                ttl: 60,
            });
        } else {
            packet.header.rescode = ResultCode::NXDOMAIN;
        }

        packet
    }

    fn encode(packet: &mut DnsPacket) -> Vec<u8> {
        let mut buffer = VectorPacketBuffer::new();
        packet.write(&mut buffer, 512).unwrap();
        buffer.buffer
    }

    /// Answers every datagram, optionally sending a response with a bogus id first
    fn spawn_udp_responder(send_decoy: bool) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = socket.local_addr().unwrap();

        thread::spawn(move || loop {
            let mut req_buffer = BytePacketBuffer::new();
            let (_, src) = match socket.recv_from(&mut req_buffer.buf) {
                Ok(x) => x,
                Err(_) => return,
            };
            let request = DnsPacket::from_buffer(&mut req_buffer).unwrap();

            let mut response = answer_for(&request);
            if send_decoy {
                let mut decoy = response.clone();
                decoy.header.id = request.header.id.wrapping_add(1);
                decoy.answers.clear();
                let _ = socket.send_to(&encode(&mut decoy), src);
            }
            let _ = socket.send_to(&encode(&mut response), src);
        });

        addr
    }

    fn spawn_tcp_responder() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let len = read_packet_length(&mut stream).unwrap();
                let mut data = vec![0; len as usize];
                std::io::Read::read_exact(&mut stream, &mut data).unwrap();
                let request =
                    DnsPacket::from_buffer(&mut VectorPacketBuffer::from_bytes(data)).unwrap();

                let bytes = encode(&mut answer_for(&request));
                write_packet_length(&mut stream, bytes.len()).unwrap();
                stream.write_all(&bytes).unwrap();
            }
        });

        addr
    }

    #[test]
    fn test_udp_client() {
        let server = spawn_udp_responder(false);
        let client = DnsNetworkClient::new(Duration::from_secs(2), Transport::Udp);

        let res = client
            .send_query("www.example.com", QueryType::A, server, true)
            .unwrap();

        assert_eq!(res.questions[0].name, "www.example.com");
        match res.answers[0] {
            DnsRecord::A { ref domain, addr, .. } => {
                assert_eq!("www.example.com", domain);
                assert_eq!(Ipv4Addr::new(192, 0, 2, 1), addr);
            }
            _ => panic!(),
        }

        assert_eq!(1, client.get_sent_count());
        assert_eq!(0, client.get_failed_count());
    }

    #[test]
    fn test_udp_client_skips_mismatched_id() {
        let server = spawn_udp_responder(true);
        let client = DnsNetworkClient::new(Duration::from_secs(2), Transport::Udp);

        let res = client
            .send_udp_query("www.example.com", QueryType::A, server, true)
            .unwrap();

        assert_eq!(1, res.answers.len());
    }

    #[test]
    fn test_udp_client_times_out() {
        // Bound but never read from
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let server = silent.local_addr().unwrap();

        let timeout = Duration::from_millis(150);
        let client = DnsNetworkClient::new(timeout, Transport::Udp);

        let started = Instant::now();
        match client.send_query("www.example.com", QueryType::A, server, true) {
            Err(ClientError::TimeOut) => {}
            other => panic!("expected timeout, got {:?}", other),
        }

        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(1, client.get_failed_count());
    }

    #[test]
    fn test_tcp_client() {
        let server = spawn_tcp_responder();
        let client = DnsNetworkClient::new(Duration::from_secs(2), Transport::Tcp);

        let res = client
            .send_query("www.example.com", QueryType::A, server, true)
            .unwrap();
        assert_eq!(1, res.answers.len());

        let res = client
            .send_query("missing.example.com", QueryType::A, server, true)
            .unwrap();
        assert_eq!(ResultCode::NXDOMAIN, res.header.rescode);
        assert!(res.answers.is_empty());
    }

    #[test]
    fn test_query_ids_advance() {
        let client = DnsNetworkClient::new(Duration::from_secs(1), Transport::Udp);

        let (first, _) = client.build_query("a.example.com", QueryType::A, true).unwrap();
        let (second, _) = client.build_query("a.example.com", QueryType::A, true).unwrap();

        assert_eq!(first.wrapping_add(1), second);
    }
}
