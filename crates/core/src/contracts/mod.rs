//! ABI bindings for the market contracts whose logs are synced.
//!
//! Events are grouped by the contract that emits them: `Augur` (market lifecycle and
//! token supply), `AugurTrading` (orders, profit/loss, volume) and `ShareToken` (ERC-1155
//! transfers).
pub mod augur;
