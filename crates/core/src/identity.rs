use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Identifier minting, isolated so tests can substitute a deterministic
/// source.
pub trait IdMinter: Send + Sync {
    fn mint(&self) -> String;
}

/// Production minter: random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidMinter;

impl IdMinter for UuidMinter {
    fn mint(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Test minter: `prefix-0`, `prefix-1`, ...
pub struct SequentialMinter {
    prefix: String,
    counter: AtomicU64,
}

impl SequentialMinter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdMinter for SequentialMinter {
    fn mint(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", self.prefix, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_minter_is_unique() {
        let minter = UuidMinter;
        assert_ne!(minter.mint(), minter.mint());
    }

    #[test]
    fn sequential_minter_is_deterministic() {
        let minter = SequentialMinter::new("evt");
        assert_eq!(minter.mint(), "evt-0");
        assert_eq!(minter.mint(), "evt-1");
    }
}
