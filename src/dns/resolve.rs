//! turns a single upstream query into the list of answers a candidate resolves to

use std::net::SocketAddr;
use std::sync::Arc;

use derive_more::{Display, Error, From};
use serde_derive::Serialize;

use crate::dns::client::DnsClient;
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType};

#[derive(Debug, Display, From, Error)]
pub enum ResolveError {
    Client(crate::dns::client::ClientError),
}

type Result<T> = std::result::Result<T, ResolveError>;

/// What to do when an answer section contains a canonical name record
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CnamePolicy {
    /// Report the canonical name target alongside any addresses
    Include,
    /// Treat the whole response as unresolved as soon as a CNAME shows up
    Skip,
}

/// Extract the answer set from a response
///
/// Addresses are rendered as dotted quads and canonical name targets as fully
/// qualified names with a trailing dot. Under `CnamePolicy::Skip` a single
/// CNAME record empties the whole set, addresses seen before it included.
/// The chain is never followed.
pub fn collect_answers(packet: &DnsPacket, policy: CnamePolicy) -> Vec<String> {
    let mut answers = Vec::new();

    for record in &packet.answers {
        match *record {
            DnsRecord::A { ref addr, .. } => answers.push(addr.to_string()),
            DnsRecord::Cname { ref host, .. } => {
                if policy == CnamePolicy::Skip {
                    return Vec::new();
                }
                answers.push(format!("{}.", host));
            }
            _ => {}
        }
    }

    answers
}

/// The upstream facing half of the prober
///
/// Every call performs a live query, nothing is cached here.
pub struct Resolver {
    client: Arc<dyn DnsClient + Send + Sync>,
    server: SocketAddr,
    cname_policy: CnamePolicy,
}

impl Resolver {
    pub fn new(
        client: Arc<dyn DnsClient + Send + Sync>,
        server: SocketAddr,
        cname_policy: CnamePolicy,
    ) -> Resolver {
        Resolver {
            client,
            server,
            cname_policy,
        }
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    pub fn cname_policy(&self) -> CnamePolicy {
        self.cname_policy
    }

    /// Query the upstream for the A records of `name`
    ///
    /// A transport failure is returned as an error; the caller can't tell a
    /// timeout apart from a name that doesn't exist once it maps the error to
    /// "no answers", which every caller in this crate does.
    pub fn answers(&self, name: &str) -> Result<Vec<String>> {
        let packet = self
            .client
            .send_query(name, QueryType::A, self.server, true)?;

        log::debug!(
            "{} -> {:?} with {} answer records",
            name,
            packet.header.rescode,
            packet.answers.len()
        );

        Ok(collect_answers(&packet, self.cname_policy))
    }
}
