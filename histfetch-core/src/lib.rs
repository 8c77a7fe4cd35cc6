//! HistFetch Core — chunked historical candle downloads with adaptive retry.
//!
//! This crate contains the heart of the downloader:
//! - Domain types (candles, intervals, instrument tokens)
//! - Half-open time windows and the span planner
//! - The chunk fetcher: bounded retry, backoff, recursive bisection
//! - Batch orchestration with per-instrument isolation and cooperative
//!   cancellation
//! - Broker REST client, auth-service client, instrument catalog
//! - CSV and Parquet persistence sinks
//! - TOML configuration with environment overrides

pub mod auth;
pub mod broker;
pub mod cancel;
pub mod config;
pub mod domain;
pub mod fetch;
pub mod instruments;
pub mod store;
