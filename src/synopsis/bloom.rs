use serde::{Deserialize, Serialize};

use crate::data::value::Value;
use crate::expr::ast::RelOp;

/// A bloom filter over equality hashes, sized at seal time for a target
/// false-positive rate. Answers `==` and `in`; every other operation is out
/// of its vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomSynopsis {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
}

impl BloomSynopsis {
    fn contains_hash(&self, hash: u64) -> bool {
        if self.num_bits == 0 {
            return false;
        }
        let h2 = splitmix64(hash);
        for i in 0..self.num_hashes as u64 {
            let bit = hash.wrapping_add(i.wrapping_mul(h2)) % self.num_bits;
            if self.bits[(bit / 64) as usize] & (1 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.contains_hash(hash_value(value))
    }

    pub fn lookup(&self, op: RelOp, value: &Value) -> Option<bool> {
        match op {
            RelOp::Equal => Some(self.contains(value)),
            RelOp::In => match value {
                Value::List(elements) => {
                    Some(elements.iter().any(|e| self.contains(e)))
                }
                // Subnets and substrings cannot be enumerated against a
                // hash-based summary.
                _ => None,
            },
            _ => None,
        }
    }
}

/// Accumulates value hashes; the filter is dimensioned when sealed.
#[derive(Debug, Clone)]
pub struct BloomBuilder {
    fp_rate: f64,
    hashes: Vec<u64>,
}

impl BloomBuilder {
    pub fn new(fp_rate: f64) -> Self {
        BloomBuilder {
            fp_rate,
            hashes: Vec::new(),
        }
    }

    pub fn add(&mut self, value: &Value) {
        self.hashes.push(hash_value(value));
    }

    pub fn seal(mut self) -> BloomSynopsis {
        self.hashes.sort_unstable();
        self.hashes.dedup();
        let n = self.hashes.len().max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let num_bits = ((-n * self.fp_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().max(1.0) as u32;
        let mut synopsis = BloomSynopsis {
            bits: vec![0; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
        };
        for hash in self.hashes {
            let h2 = splitmix64(hash);
            for i in 0..synopsis.num_hashes as u64 {
                let bit = hash.wrapping_add(i.wrapping_mul(h2)) % synopsis.num_bits;
                synopsis.bits[(bit / 64) as usize] |= 1 << (bit % 64);
            }
        }
        synopsis
    }
}

/// A stable 64-bit hash over the value's canonical encoding. Stability
/// matters: filters are persisted and must answer lookups after a restart.
/// Enumeration values hash as their string form so that string literals in
/// queries find them.
fn hash_value(value: &Value) -> u64 {
    let canonical;
    let value = match value {
        Value::Enum(s) => {
            canonical = Value::String(s.clone());
            &canonical
        }
        other => other,
    };
    let bytes = bincode::serialize(value).unwrap_or_default();
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    splitmix64(hash)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::net::{IpAddr, Ipv4Addr};

    fn address(rng: &mut StdRng) -> Value {
        Value::Address(IpAddr::V4(Ipv4Addr::from(rng.gen::<u32>())))
    }

    #[test]
    fn no_false_negatives_and_bounded_false_positives() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut builder = BloomBuilder::new(0.01);
        let mut inserted = Vec::new();
        for _ in 0..10_000 {
            let addr = address(&mut rng);
            builder.add(&addr);
            inserted.push(addr);
        }
        let synopsis = builder.seal();
        for addr in &inserted {
            assert_eq!(synopsis.lookup(RelOp::Equal, addr), Some(true));
        }
        // A disjoint sample stays within twice the configured rate.
        let mut false_positives = 0;
        let mut sampled = 0;
        while sampled < 10_000 {
            let addr = address(&mut rng);
            if inserted.contains(&addr) {
                continue;
            }
            sampled += 1;
            if synopsis.lookup(RelOp::Equal, &addr) == Some(true) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / sampled as f64;
        assert!(rate <= 0.02, "false-positive rate {} exceeds bound", rate);
    }

    #[test]
    fn membership_checks_every_list_element() {
        let mut builder = BloomBuilder::new(0.01);
        builder.add(&Value::String("tcp".into()));
        let synopsis = builder.seal();
        let hit = Value::List(vec![
            Value::String("udp".into()),
            Value::String("tcp".into()),
        ]);
        assert_eq!(synopsis.lookup(RelOp::In, &hit), Some(true));
        let miss = Value::List(vec![Value::String("icmp".into())]);
        assert_eq!(synopsis.lookup(RelOp::In, &miss), Some(false));
    }

    #[test]
    fn unsupported_operations_abstain() {
        let mut builder = BloomBuilder::new(0.01);
        builder.add(&Value::Count(42));
        let synopsis = builder.seal();
        assert_eq!(synopsis.lookup(RelOp::Less, &Value::Count(42)), None);
        assert_eq!(synopsis.lookup(RelOp::NotEqual, &Value::Count(42)), None);
    }

    #[test]
    fn survives_serialization() {
        let mut builder = BloomBuilder::new(0.01);
        let value = Value::String("persistent".into());
        builder.add(&value);
        let synopsis = builder.seal();
        let bytes = bincode::serialize(&synopsis).unwrap();
        let restored: BloomSynopsis = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.lookup(RelOp::Equal, &value), Some(true));
    }
}
