use std::collections::{BTreeSet, HashMap};

/// KB numbers selected by one session. Ordered so serialization is stable.
pub type Basket = BTreeSet<u64>;

/// In-memory baskets keyed by session id.
pub type BasketMap = HashMap<String, Basket>;
