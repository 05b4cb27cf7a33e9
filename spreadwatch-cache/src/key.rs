//! Composite key for the user-specific tier.
//!
//! Position data is personal, so a key for it cannot be built without both
//! the wallet address and the market. The inner struct is private; the only
//! way in is [`UserMarketKey::new`].

use spreadwatch_core::{MarketId, UserAddress};
use std::fmt;

/// Key of a user-specific cache entry: one user's view of one market.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserMarketKey {
    inner: KeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyInner {
    user: UserAddress,
    market_id: MarketId,
}

impl UserMarketKey {
    pub fn new(user: UserAddress, market_id: MarketId) -> Self {
        Self {
            inner: KeyInner { user, market_id },
        }
    }

    pub fn user(&self) -> &UserAddress {
        &self.inner.user
    }

    pub fn market_id(&self) -> &MarketId {
        &self.inner.market_id
    }

    /// True if this key belongs to the given market, for any user.
    pub fn is_for_market(&self, market_id: &MarketId) -> bool {
        &self.inner.market_id == market_id
    }
}

impl fmt::Display for UserMarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.inner.user, self.inner.market_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn market(id: &str) -> MarketId {
        MarketId::new(id).unwrap()
    }

    fn user(addr: &str) -> UserAddress {
        UserAddress::new(addr).unwrap()
    }

    #[test]
    fn test_key_accessors() {
        let key = UserMarketKey::new(user("0xalice"), market("0xm1"));
        assert_eq!(key.user().as_str(), "0xalice");
        assert_eq!(key.market_id().as_str(), "0xm1");
        assert_eq!(key.to_string(), "0xalice@0xm1");
    }

    #[test]
    fn test_same_user_different_market_are_distinct() {
        let a = UserMarketKey::new(user("0xalice"), market("0xm1"));
        let b = UserMarketKey::new(user("0xalice"), market("0xm2"));
        let c = UserMarketKey::new(user("0xbob"), market("0xm1"));

        let set: HashSet<_> = [a.clone(), b, c, a].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_is_for_market() {
        let key = UserMarketKey::new(user("0xalice"), market("0xm1"));
        assert!(key.is_for_market(&market("0xm1")));
        assert!(!key.is_for_market(&market("0xm2")));
    }
}
