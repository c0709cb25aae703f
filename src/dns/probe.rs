//! per candidate work: normalize, resolve, classify

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_derive::Serialize;

use crate::dns::candidate::normalize;
use crate::dns::resolve::Resolver;
use crate::dns::wildcard::{format_answers, WildcardClassifier};

/// Outcome for a single candidate
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Classification {
    Resolved,
    Unresolved,
    /// Only produced when wildcard checking is enabled
    WildcardMasked,
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        *self == Classification::Resolved
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Classification::Resolved => write!(f, "resolved"),
            Classification::Unresolved => write!(f, "unresolved"),
            Classification::WildcardMasked => write!(f, "wildcard-masked"),
        }
    }
}

/// Which side of the classification gets written to the result stream
///
/// A run only ever shows one side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum EmitMode {
    Resolved,
    /// Unresolved and wildcard-masked names alike
    Unresolved,
}

impl EmitMode {
    pub fn should_emit(&self, classification: Classification) -> bool {
        match *self {
            EmitMode::Resolved => classification.is_valid(),
            EmitMode::Unresolved => !classification.is_valid(),
        }
    }
}

#[derive(Default)]
pub struct ProbeStatistics {
    pub processed: AtomicUsize,
    pub resolved: AtomicUsize,
    pub unresolved: AtomicUsize,
    pub masked: AtomicUsize,
    pub failed_queries: AtomicUsize,
}

impl ProbeStatistics {
    fn record(&self, classification: Classification) {
        let _ = self.processed.fetch_add(1, Ordering::Release);
        let counter = match classification {
            Classification::Resolved => &self.resolved,
            Classification::Unresolved => &self.unresolved,
            Classification::WildcardMasked => &self.masked,
        };
        let _ = counter.fetch_add(1, Ordering::Release);
    }

    pub fn summary(&self) -> ProbeSummary {
        ProbeSummary {
            processed: self.processed.load(Ordering::Acquire),
            resolved: self.resolved.load(Ordering::Acquire),
            unresolved: self.unresolved.load(Ordering::Acquire),
            masked: self.masked.load(Ordering::Acquire),
            failed_queries: self.failed_queries.load(Ordering::Acquire),
            wildcard_zones: 0,
        }
    }
}

/// Point in time copy of the run counters
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub processed: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub masked: usize,
    pub failed_queries: usize,
    pub wildcard_zones: usize,
}

pub struct DnsProbe {
    resolver: Arc<Resolver>,
    classifier: Option<WildcardClassifier>,
    statistics: ProbeStatistics,
}

impl DnsProbe {
    /// A prober that trusts any nonempty answer
    pub fn new(resolver: Arc<Resolver>) -> DnsProbe {
        DnsProbe {
            resolver,
            classifier: None,
            statistics: ProbeStatistics::default(),
        }
    }

    /// A prober that also checks answers against zone wildcards
    pub fn with_wildcard_check(resolver: Arc<Resolver>, classifier: WildcardClassifier) -> DnsProbe {
        DnsProbe {
            resolver,
            classifier: Some(classifier),
            statistics: ProbeStatistics::default(),
        }
    }

    pub fn checks_wildcards(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn classifier(&self) -> Option<&WildcardClassifier> {
        self.classifier.as_ref()
    }

    pub fn summary(&self) -> ProbeSummary {
        let mut summary = self.statistics.summary();
        summary.wildcard_zones = self
            .classifier
            .as_ref()
            .map(|c| c.cached_zones())
            .unwrap_or(0);
        summary
    }

    /// Classify one raw input line
    pub fn classify(&self, line: &str) -> Classification {
        let domain = normalize(line);
        let classification = self.classify_domain(&domain);
        self.statistics.record(classification);
        classification
    }

    fn classify_domain(&self, domain: &str) -> Classification {
        let answers = match self.resolver.answers(domain) {
            Ok(answers) => answers,
            Err(err) => {
                log::debug!("lookup of {} failed: {}", domain, err);
                let _ = self
                    .statistics
                    .failed_queries
                    .fetch_add(1, Ordering::Release);
                Vec::new()
            }
        };

        if answers.is_empty() {
            return Classification::Unresolved;
        }

        match self.classifier {
            Some(ref classifier) => {
                if classifier.is_genuine(domain, &answers) {
                    Classification::Resolved
                } else {
                    Classification::WildcardMasked
                }
            }
            None => {
                log::info!("{}: {}", domain, format_answers(&answers));
                Classification::Resolved
            }
        }
    }
}
