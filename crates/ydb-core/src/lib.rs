// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

#![warn(
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    rust_2021_compatibility
)]

pub mod callback;
pub mod extent_store;
pub mod kv_store;
pub mod lock_client;
pub mod lock_service;
pub mod lock_service_client;
pub mod optimistic;
pub mod server;
pub mod test_lock_service_clients;
pub mod transaction;
pub mod two_phase;
pub mod wait_for_graph;
pub mod ydb_client;
