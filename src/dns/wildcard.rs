//! Wildcard detection
//!
//! A zone with a wildcard record answers for every name below it, which makes
//! any candidate under that zone look registered. To tell the two apart the
//! classifier asks the upstream once per zone for a name that almost certainly
//! doesn't exist (`{token}.{zone}`) and remembers the answer as the zone's
//! wildcard signature. A candidate whose answers are all part of that
//! signature is masked: its resolution says nothing about whether it exists.
//!
//! # Cache discipline
//!
//! Signatures live for the whole run and are never recomputed. One mutex guards
//! the zone map and is held just long enough to fetch or create the zone's
//! slot. The probe itself runs inside the slot's `OnceLock`, so concurrent
//! workers asking for the same zone wait for a single probe while workers on
//! other zones carry on.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::dns::candidate::parent_zone;
use crate::dns::resolve::Resolver;

/// Length of generated probe labels
pub const PROBE_TOKEN_LEN: usize = 10;

/// Random leftmost label used to build wildcard probe names
///
/// Generated once per run so a hostile zone operator can't special case it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeToken(String);

impl ProbeToken {
    pub fn generate() -> ProbeToken {
        ProbeToken::generate_with_len(PROBE_TOKEN_LEN)
    }

    pub fn generate_with_len(len: usize) -> ProbeToken {
        let token: String = thread_rng().sample_iter(&Alphanumeric).take(len).collect();
        ProbeToken(token)
    }

    /// Use a fixed label, mostly useful for deterministic tests
    pub fn new<S: Into<String>>(label: S) -> ProbeToken {
        ProbeToken(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn probe_name(&self, zone: &str) -> String {
        format!("{}.{}", self.0, zone)
    }
}

impl fmt::Display for ProbeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// True when every answer also shows up in the wildcard signature
///
/// Extra signature entries don't matter, so this is a subset test and not an
/// equality test.
pub fn is_subset(answers: &[String], signature: &[String]) -> bool {
    answers.iter().all(|answer| signature.contains(answer))
}

/// Render an answer set the way diagnostics print it: `[a b c]`
pub fn format_answers(answers: &[String]) -> String {
    format!("[{}]", answers.join(" "))
}

type Signature = Arc<OnceLock<Vec<String>>>;

pub struct WildcardClassifier {
    resolver: Arc<Resolver>,
    token: ProbeToken,
    signatures: Mutex<HashMap<String, Signature>>,
}

impl WildcardClassifier {
    pub fn new(resolver: Arc<Resolver>, token: ProbeToken) -> WildcardClassifier {
        WildcardClassifier {
            resolver,
            token,
            signatures: Mutex::new(HashMap::new()),
        }
    }

    pub fn token(&self) -> &ProbeToken {
        &self.token
    }

    /// Number of zones probed so far
    pub fn cached_zones(&self) -> usize {
        self.signatures
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    /// The wildcard signature of `zone`, probing the upstream on first use
    ///
    /// A failed probe counts as "no wildcard" and is cached like any other
    /// result.
    pub fn signature(&self, zone: &str) -> Vec<String> {
        let slot = {
            let mut signatures = self.signatures.lock();
            signatures
                .entry(zone.to_string())
                .or_insert_with(|| Arc::new(OnceLock::new()))
                .clone()
        };

        slot.get_or_init(|| {
            let probe_name = self.token.probe_name(zone);
            match self.resolver.answers(&probe_name) {
                Ok(answers) => {
                    log::debug!("wildcard signature for {}: {}", zone, format_answers(&answers));
                    answers
                }
                Err(err) => {
                    log::debug!("wildcard probe {} failed: {}", probe_name, err);
                    Vec::new()
                }
            }
        })
        .clone()
    }

    /// Decide whether `candidate` resolves for real
    ///
    /// Returns false for an empty answer set and for answers fully explained by
    /// the zone's wildcard signature. Names with fewer than three labels are
    /// never probed and always count as genuine once they have answers.
    pub fn is_genuine(&self, candidate: &str, answers: &[String]) -> bool {
        if answers.is_empty() {
            return false;
        }

        let zone = match parent_zone(candidate) {
            Some(zone) => zone,
            None => return true,
        };

        let signature = self.signature(zone);
        let genuine = !is_subset(answers, &signature);
        if genuine {
            log::info!("{}: {}", candidate, format_answers(answers));
        }

        genuine
    }

    /// True only for a nonempty answer set explained by the zone's wildcard
    pub fn is_wildcard_masked(&self, candidate: &str, answers: &[String]) -> bool {
        !answers.is_empty() && !self.is_genuine(candidate, answers)
    }
}
