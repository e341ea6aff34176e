//! Client-side synchronization for the dice prediction game.
//!
//! Reconciles the wallet session, polled contract state, the lifecycle of the
//! single in-flight write and the shared `PlayerWon`/`PlayerLost` streams into
//! one consistent view owned by [`controller::GameController`].

pub mod amount;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod events;
pub mod identity;
pub mod leaderboard;
pub mod network;
pub mod read_cache;
pub mod rpc;
pub mod score_client;
pub mod tracker;

pub use alloy::primitives::{
    Address,
    TxHash,
    U256,
};
