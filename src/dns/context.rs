//! The `ProbeContext` holds the run configuration and wires the components
//! together

use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error};

use crate::dns::client::{DnsNetworkClient, Transport};
use crate::dns::dispatch::Dispatcher;
use crate::dns::probe::{DnsProbe, EmitMode};
use crate::dns::resolve::{CnamePolicy, Resolver};
use crate::dns::wildcard::{ProbeToken, WildcardClassifier};

pub const DEFAULT_CONCURRENCY: usize = 20;
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
pub const DEFAULT_SERVER: &str = "8.8.8.8:53";
pub const DEFAULT_DNS_PORT: u16 = 53;

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[display(fmt = "concurrency must be at least 1")]
    InvalidConcurrency,
    #[display(fmt = "timeout must be greater than zero")]
    InvalidTimeout,
    #[display(fmt = "no upstream server given")]
    EmptyServer,
    #[display(fmt = "cannot use {} as upstream server", server)]
    InvalidServer { server: String },
}

type Result<T> = std::result::Result<T, ConfigError>;

/// Run configuration
///
/// Built from the command line, or by hand in tests. Nothing is validated
/// until `validate` or one of the `create_*` methods is called.
#[derive(Clone, Debug)]
pub struct ProbeContext {
    pub concurrency: usize,
    pub timeout: Duration,
    /// `HOST` or `HOST:PORT`
    pub server: String,
    pub transport: Transport,
    pub skip_cname: bool,
    pub check_wildcard: bool,
    pub show_unresolved: bool,
    pub verbose: bool,
}

impl Default for ProbeContext {
    fn default() -> Self {
        ProbeContext {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            server: DEFAULT_SERVER.to_string(),
            transport: Transport::Udp,
            skip_cname: false,
            check_wildcard: false,
            show_unresolved: false,
            verbose: false,
        }
    }
}

impl ProbeContext {
    pub fn new() -> ProbeContext {
        ProbeContext::default()
    }

    /// Resolve the configured upstream to a socket address
    ///
    /// A missing port defaults to 53. Bare IPv6 addresses are accepted without
    /// brackets, in which case they can't carry a port.
    pub fn server_addr(&self) -> Result<SocketAddr> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(ConfigError::EmptyServer);
        }

        if let Ok(addr) = server.parse::<SocketAddr>() {
            return Ok(addr);
        }

        if let Ok(ip) = server.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, DEFAULT_DNS_PORT));
        }

        let with_port = if server.contains(':') {
            server.to_string()
        } else {
            format!("{}:{}", server, DEFAULT_DNS_PORT)
        };

        let invalid = || ConfigError::InvalidServer {
            server: server.to_string(),
        };

        with_port
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }

        if self.timeout == Duration::from_millis(0) {
            return Err(ConfigError::InvalidTimeout);
        }

        let _ = self.server_addr()?;

        Ok(())
    }

    pub fn cname_policy(&self) -> CnamePolicy {
        if self.skip_cname {
            CnamePolicy::Skip
        } else {
            CnamePolicy::Include
        }
    }

    pub fn emit_mode(&self) -> EmitMode {
        if self.show_unresolved {
            EmitMode::Unresolved
        } else {
            EmitMode::Resolved
        }
    }

    pub fn create_client(&self) -> Arc<DnsNetworkClient> {
        Arc::new(DnsNetworkClient::new(self.timeout, self.transport))
    }

    pub fn create_resolver(&self) -> Result<Arc<Resolver>> {
        self.validate()?;

        let server = self.server_addr()?;
        Ok(Arc::new(Resolver::new(
            self.create_client(),
            server,
            self.cname_policy(),
        )))
    }

    /// Build the prober, using `token` for wildcard probes when they're enabled
    pub fn create_probe(&self, resolver: Arc<Resolver>, token: ProbeToken) -> DnsProbe {
        if self.check_wildcard {
            let classifier = WildcardClassifier::new(resolver.clone(), token);
            DnsProbe::with_wildcard_check(resolver, classifier)
        } else {
            DnsProbe::new(resolver)
        }
    }

    /// Wire up a dispatcher that talks to the network, with a fresh probe token
    pub fn build_dispatcher(&self) -> Result<Dispatcher> {
        let resolver = self.create_resolver()?;
        let token = ProbeToken::generate();

        log::debug!(
            "querying {} over {:?} with {} workers, probe token {}",
            resolver.server(),
            self.transport,
            self.concurrency,
            token
        );

        let probe = self.create_probe(resolver, token);
        Ok(Dispatcher::new(
            Arc::new(probe),
            self.concurrency,
            self.emit_mode(),
        ))
    }
}

#[cfg(test)]
pub mod tests {

    use std::net::Ipv4Addr;

    use super::*;
    use crate::dns::client::tests::{DnsStubClient, StubCallback};
    use crate::dns::wildcard::PROBE_TOKEN_LEN;

    /// A resolver answering from `callback`, for tests outside this module
    pub fn create_test_resolver(callback: Box<StubCallback>, policy: CnamePolicy) -> Arc<Resolver> {
        let client = Arc::new(DnsStubClient::new(callback));
        Arc::new(Resolver::new(
            client,
            (Ipv4Addr::LOCALHOST, DEFAULT_DNS_PORT).into(),
            policy,
        ))
    }

    fn context(server: &str) -> ProbeContext {
        ProbeContext {
            server: server.to_string(),
            ..ProbeContext::default()
        }
    }

    #[test]
    fn test_defaults() {
        let ctx = ProbeContext::new();

        assert_eq!(20, ctx.concurrency);
        assert_eq!(Duration::from_secs(1), ctx.timeout);
        assert_eq!(Transport::Udp, ctx.transport);
        assert_eq!(CnamePolicy::Include, ctx.cname_policy());
        assert_eq!(EmitMode::Resolved, ctx.emit_mode());
        assert_eq!(
            "8.8.8.8:53".parse::<SocketAddr>().unwrap(),
            ctx.server_addr().unwrap()
        );
    }

    #[test]
    fn test_server_port_defaults_to_53() {
        assert_eq!(
            "1.1.1.1:53".parse::<SocketAddr>().unwrap(),
            context("1.1.1.1").server_addr().unwrap()
        );
        assert_eq!(
            "[2001:db8::53]:53".parse::<SocketAddr>().unwrap(),
            context("2001:db8::53").server_addr().unwrap()
        );
        assert_eq!(
            "127.0.0.1:5353".parse::<SocketAddr>().unwrap(),
            context("127.0.0.1:5353").server_addr().unwrap()
        );
        assert_eq!(
            "[::1]:5353".parse::<SocketAddr>().unwrap(),
            context("[::1]:5353").server_addr().unwrap()
        );
    }

    #[test]
    fn test_server_by_name() {
        let addr = context("localhost").server_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(53, addr.port());
    }

    #[test]
    fn test_invalid_server() {
        assert_eq!(Err(ConfigError::EmptyServer), context("").server_addr());
        assert_eq!(Err(ConfigError::EmptyServer), context("  ").server_addr());

        match context("127.0.0.1:notaport").server_addr() {
            Err(ConfigError::InvalidServer { server }) => assert_eq!("127.0.0.1:notaport", server),
            other => panic!("expected invalid server, got {:?}", other),
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(Ok(()), ProbeContext::default().validate());

        let ctx = ProbeContext {
            concurrency: 0,
            ..ProbeContext::default()
        };
        assert_eq!(Err(ConfigError::InvalidConcurrency), ctx.validate());

        let ctx = ProbeContext {
            timeout: Duration::from_millis(0),
            ..ProbeContext::default()
        };
        assert_eq!(Err(ConfigError::InvalidTimeout), ctx.validate());

        assert_eq!(Err(ConfigError::EmptyServer), context("").validate());
    }

    #[test]
    fn test_flags_map_to_policies() {
        let ctx = ProbeContext {
            skip_cname: true,
            show_unresolved: true,
            ..ProbeContext::default()
        };

        assert_eq!(CnamePolicy::Skip, ctx.cname_policy());
        assert_eq!(EmitMode::Unresolved, ctx.emit_mode());
    }

    #[test]
    fn test_create_probe() {
        let resolver = create_test_resolver(
            Box::new(|_, _, _, _| Ok(crate::dns::protocol::DnsPacket::new())),
            CnamePolicy::Include,
        );

        let plain = ProbeContext::default().create_probe(resolver.clone(), ProbeToken::new("t0ken"));
        assert!(!plain.checks_wildcards());

        let ctx = ProbeContext {
            check_wildcard: true,
            ..ProbeContext::default()
        };
        let checked = ctx.create_probe(resolver, ProbeToken::new("t0ken"));
        assert!(checked.checks_wildcards());
        assert_eq!("t0ken", checked.classifier().unwrap().token().as_str());
    }

    #[test]
    fn test_build_dispatcher() {
        let ctx = ProbeContext {
            concurrency: 3,
            server: "127.0.0.1:5300".to_string(),
            transport: Transport::Tcp,
            check_wildcard: true,
            show_unresolved: true,
            ..ProbeContext::default()
        };

        let dispatcher = ctx.build_dispatcher().unwrap();
        assert_eq!(3, dispatcher.concurrency());
        assert_eq!(EmitMode::Unresolved, dispatcher.mode());

        let classifier = dispatcher.probe().classifier().unwrap();
        assert_eq!(PROBE_TOKEN_LEN, classifier.token().as_str().len());
    }

    #[test]
    fn test_build_dispatcher_rejects_bad_config() {
        let ctx = ProbeContext {
            concurrency: 0,
            ..ProbeContext::default()
        };

        assert!(ctx.build_dispatcher().is_err());
    }
}
