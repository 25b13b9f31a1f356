//! Change detection over translated resource sets.

use std::hash::Hasher;

use parking_lot::Mutex;
use rustc_hash::FxHasher;

use crate::xds::Resource;

/// Written after every encoded resource so adjacent encodings cannot merge.
const RESOURCE_SEPARATOR: u8 = 0xff;

/// Seeds the hasher so an empty collection does not finish at zero.
const DIGEST_DOMAIN: u8 = 0x6b;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("encoding resource {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Digest of a resource collection.
///
/// Resources are stable-sorted by name in place first, then each canonical encoding
/// plus a separator byte is streamed into one 64-bit hasher. Never returns
/// [`ChangeDetector::NEVER_PUBLISHED`].
pub fn resource_hash(resources: &mut [Resource]) -> Result<u64, HashError> {
    resources.sort_by(|a, b| a.name().cmp(b.name()));
    let mut hasher = FxHasher::default();
    hasher.write_u8(DIGEST_DOMAIN);
    let mut buf = Vec::with_capacity(256);
    for resource in resources.iter() {
        buf.clear();
        serde_json::to_writer(&mut buf, resource)
            .map_err(|source| HashError::Encode { name: resource.name().to_string(), source })?;
        hasher.write(&buf);
        hasher.write_u8(RESOURCE_SEPARATOR);
    }
    match hasher.finish() {
        ChangeDetector::NEVER_PUBLISHED => Ok(1),
        digest => Ok(digest),
    }
}

/// Outcome of comparing a batch against the last published one.
#[derive(Debug)]
pub enum Decision {
    Publish(u64),
    Skip(u64),
    /// Hashing failed; publish anyway rather than sit on stale state.
    PublishUnhashed(HashError),
}

impl Decision {
    pub fn should_publish(&self) -> bool {
        !matches!(self, Decision::Skip(_))
    }
}

/// Per-source last published digest.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_hash: Mutex<u64>,
}

impl ChangeDetector {
    /// Sentinel held until the first publish.
    pub const NEVER_PUBLISHED: u64 = 0;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_hash(&self) -> u64 {
        *self.last_hash.lock()
    }

    pub fn decide(&self, resources: &mut [Resource]) -> Decision {
        self.record(resource_hash(resources))
    }

    /// Compare-and-store a digest. Errors leave the stored digest untouched.
    pub fn record(&self, digest: Result<u64, HashError>) -> Decision {
        let digest = match digest {
            Ok(d) => d,
            Err(e) => return Decision::PublishUnhashed(e),
        };
        let mut last = self.last_hash.lock();
        if *last != Self::NEVER_PUBLISHED && *last == digest {
            return Decision::Skip(digest);
        }
        *last = digest;
        Decision::Publish(digest)
    }

    /// Forget the last digest so the next batch publishes again.
    pub fn invalidate(&self) {
        *self.last_hash.lock() = Self::NEVER_PUBLISHED;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::*;

    fn cla(name: &str, ips: &[&str]) -> Resource {
        ClusterLoadAssignment {
            cluster_name: name.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                locality: Locality::default(),
                load_balancing_weight: Some(1),
                lb_endpoints: ips
                    .iter()
                    .map(|ip| LbEndpoint { endpoint: Endpoint { address: Address::tcp(*ip, 80), hostname: String::new() } })
                    .collect(),
            }],
        }
        .into()
    }

    fn sample() -> Vec<Resource> {
        vec![
            cla("a.default:80", &["10.0.0.1"]),
            cla("b.default:80", &["10.0.0.2", "10.0.0.3"]),
            Cluster { name: "c.default:http".into(), discovery_type: DiscoveryType::Eds, ..Default::default() }.into(),
            Listener { name: "d.default:8080".into(), api_listener: None }.into(),
        ]
    }

    #[test]
    fn permutation_does_not_change_digest() {
        let mut base = sample();
        let expected = resource_hash(&mut base).unwrap();
        let mut reversed = sample();
        reversed.reverse();
        assert_eq!(resource_hash(&mut reversed).unwrap(), expected);
        let mut rotated = sample();
        rotated.rotate_left(1);
        assert_eq!(resource_hash(&mut rotated).unwrap(), expected);
    }

    #[test]
    fn single_field_change_changes_digest() {
        let mut base = sample();
        let expected = resource_hash(&mut base).unwrap();

        let mut port = sample();
        if let Resource::ClusterLoadAssignment(c) = &mut port[1] {
            c.endpoints[0].lb_endpoints[1].endpoint.address.socket_address.port_value = 81;
        }
        assert_ne!(resource_hash(&mut port).unwrap(), expected);

        let mut policy = sample();
        if let Resource::Cluster(c) = &mut policy[2] {
            c.lb_policy = LbPolicy::LeastRequest;
        }
        assert_ne!(resource_hash(&mut policy).unwrap(), expected);
    }

    #[test]
    fn separator_keeps_boundaries_apart() {
        let mut one = vec![cla("x", &["10.0.0.1", "10.0.0.2"])];
        let mut two = vec![cla("x", &["10.0.0.1"]), cla("x", &["10.0.0.2"])];
        assert_ne!(resource_hash(&mut one).unwrap(), resource_hash(&mut two).unwrap());
    }

    #[test]
    fn detector_skips_repeat_and_publishes_change() {
        let det = ChangeDetector::new();
        assert_eq!(det.last_hash(), ChangeDetector::NEVER_PUBLISHED);

        assert!(matches!(det.decide(&mut sample()), Decision::Publish(_)));
        let published = det.last_hash();
        assert_ne!(published, ChangeDetector::NEVER_PUBLISHED);

        let mut shuffled = sample();
        shuffled.swap(0, 3);
        assert!(matches!(det.decide(&mut shuffled), Decision::Skip(d) if d == published));

        let mut changed = sample();
        changed.pop();
        assert!(det.decide(&mut changed).should_publish());
        assert_ne!(det.last_hash(), published);
    }

    #[test]
    fn hash_error_fails_open_without_touching_state() {
        let det = ChangeDetector::new();
        det.decide(&mut sample());
        let before = det.last_hash();
        let err = HashError::Encode { name: "broken".into(), source: serde_json::Error::io(std::io::Error::other("boom")) };
        let decision = det.record(Err(err));
        assert!(decision.should_publish());
        assert!(matches!(decision, Decision::PublishUnhashed(_)));
        assert_eq!(det.last_hash(), before);
    }

    #[test]
    fn invalidate_forces_next_publish() {
        let det = ChangeDetector::new();
        det.decide(&mut sample());
        assert!(!det.decide(&mut sample()).should_publish());
        det.invalidate();
        assert!(det.decide(&mut sample()).should_publish());
    }

    #[test]
    fn empty_collection_is_skipped_the_second_time() {
        let mut none: Vec<Resource> = Vec::new();
        assert_ne!(resource_hash(&mut none).unwrap(), ChangeDetector::NEVER_PUBLISHED);

        let det = ChangeDetector::new();
        assert!(matches!(det.decide(&mut Vec::new()), Decision::Publish(_)));
        assert!(matches!(det.decide(&mut Vec::new()), Decision::Skip(_)));
        assert!(det.decide(&mut sample()).should_publish());
        assert!(det.decide(&mut Vec::new()).should_publish());
    }

    #[test]
    fn zero_digest_never_counts_as_published() {
        let det = ChangeDetector::new();
        assert!(det.record(Ok(0)).should_publish());
        assert!(det.record(Ok(0)).should_publish());
    }
}
