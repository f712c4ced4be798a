// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Shard key derivation for sharded entity routing.

use crate::config::ShardingConfig;
use crate::error::{Error, Result};

/// Default shard count. Distributes up to roughly 10,000 entities evenly.
///
/// The shard count must stay fixed for the lifetime of a deployment: changing
/// it maps most entity ids to a different shard, which requires a full
/// redistribution of entity state.
pub const DEFAULT_NUMBER_OF_SHARDS: u32 = 100;

/// Maps entity ids to shard ids.
///
/// The shard id is the CRC-32 (IEEE) checksum of the entity id's UTF-8 bytes
/// modulo the shard count, rendered as a decimal string.
///
/// ```rust
/// use actor_probe::ShardKeyExtractor;
///
/// let extractor = ShardKeyExtractor::new(100).unwrap();
/// let shard = extractor.shard_id("user-42");
/// assert_eq!(shard, extractor.shard_id("user-42"));
/// assert!(shard.parse::<u32>().unwrap() < 100);
///
/// assert!(ShardKeyExtractor::new(0).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardKeyExtractor {
    number_of_shards: u32,
}

impl ShardKeyExtractor {
    pub fn new(number_of_shards: u32) -> Result<Self> {
        if number_of_shards == 0 {
            return Err(Error::configuration(
                "number_of_shards must be greater than 0",
            ));
        }
        Ok(Self { number_of_shards })
    }

    pub fn with_config(config: &ShardingConfig) -> Result<Self> {
        Self::new(config.number_of_shards)
    }

    pub fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }

    #[inline]
    pub fn shard_index(&self, entity_id: &str) -> u32 {
        crc32fast::hash(entity_id.as_bytes()) % self.number_of_shards
    }

    pub fn shard_id(&self, entity_id: &str) -> String {
        self.shard_index(entity_id).to_string()
    }

    pub fn entity_id<'a, M>(&self, envelope: &'a ShardingEnvelope<M>) -> &'a str {
        envelope.entity_id()
    }

    pub fn shard_id_for<M>(&self, envelope: &ShardingEnvelope<M>) -> String {
        self.shard_id(envelope.entity_id())
    }

    pub fn unwrap_message<M>(&self, envelope: ShardingEnvelope<M>) -> M {
        envelope.into_message()
    }
}

impl Default for ShardKeyExtractor {
    fn default() -> Self {
        Self {
            number_of_shards: DEFAULT_NUMBER_OF_SHARDS,
        }
    }
}

/// A message addressed to one sharded entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardingEnvelope<M> {
    entity_id: String,
    message: M,
}

impl<M> ShardingEnvelope<M> {
    pub fn new(entity_id: impl Into<String>, message: M) -> Self {
        Self {
            entity_id: entity_id.into(),
            message,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_message(self) -> M {
        self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::distr::Alphanumeric;
    use rand::Rng;

    #[test]
    fn test_zero_shards_is_rejected() {
        let err = ShardKeyExtractor::new(0).unwrap_err();
        assert!(err.is_configuration());

        let err = ShardKeyExtractor::with_config(&ShardingConfig {
            number_of_shards: 0,
        })
        .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_known_checksum() {
        // crc32("123456789") == 0xCBF43926
        let extractor = ShardKeyExtractor::new(u32::MAX).unwrap();
        assert_eq!(extractor.shard_index("123456789"), 0xCBF4_3926 % u32::MAX);

        let extractor = ShardKeyExtractor::new(100).unwrap();
        assert_eq!(extractor.shard_id("123456789"), (0xCBF4_3926u32 % 100).to_string());
    }

    #[test]
    fn test_single_shard() {
        let extractor = ShardKeyExtractor::new(1).unwrap();
        assert_eq!(extractor.shard_id("anything"), "0");
        assert_eq!(extractor.shard_id(""), "0");
    }

    #[test]
    fn test_default_shard_count() {
        assert_eq!(ShardKeyExtractor::default().number_of_shards(), 100);
        assert_eq!(
            ShardKeyExtractor::with_config(&ShardingConfig::default()).unwrap(),
            ShardKeyExtractor::default()
        );
    }

    #[test]
    fn test_distribution_over_random_ids() {
        const IDS: usize = 100_000;
        let extractor = ShardKeyExtractor::default();
        let shards = extractor.number_of_shards() as usize;
        let mut occupancy = vec![0usize; shards];
        let mut rng = rand::rng();

        for _ in 0..IDS {
            let len = rng.random_range(4..24);
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            let first = extractor.shard_id(&id);
            assert_eq!(first, extractor.shard_id(&id));
            occupancy[first.parse::<usize>().unwrap()] += 1;
        }

        let expected = IDS / shards;
        let max = occupancy.iter().copied().max().unwrap();
        let min = occupancy.iter().copied().min().unwrap();
        assert!(max < expected * 2, "max shard holds {max}, expected ~{expected}");
        assert!(min > expected / 2, "min shard holds {min}, expected ~{expected}");
    }

    #[test]
    fn test_sharding_envelope() {
        let extractor = ShardKeyExtractor::new(16).unwrap();
        let envelope = ShardingEnvelope::new("cart-7", 42u64);

        assert_eq!(extractor.entity_id(&envelope), "cart-7");
        assert_eq!(extractor.shard_id_for(&envelope), extractor.shard_id("cart-7"));
        assert_eq!(*envelope.message(), 42);
        assert_eq!(extractor.unwrap_message(envelope), 42);
    }
}
