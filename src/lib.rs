//! Real-time detector of anomalous trading activity on decentralized spot
//! markets across BSC and Ethereum.
//!
//! The pipeline: ingress discovers candidate markets (factory events plus a
//! trending poll), the gate pipeline screens them, admitted markets get a
//! per-market subscription whose trades flow through sliding-window
//! statistics into the alert evaluator.

pub mod aggregator;
pub mod amm_price;
pub mod blockchain;
pub mod chains;
pub mod config;
pub mod decimals;
pub mod errors;
pub mod evaluator;
pub mod fdv;
pub mod gate;
pub mod ingress;
pub mod notifier;
pub mod price_oracle;
pub mod probes;
pub mod subscriber;
pub mod tax;
pub mod types;
pub mod watchlist;
pub mod windows;
