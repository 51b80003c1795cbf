//! # orbsim-radio
//!
//! Radio substrate and the geometry-gated link fabric.
//!
//! This crate provides:
//! - Link-budget math and per-class success predicates ([`budget`])
//! - The shared radio substrate every radio model composes ([`RadioCore`])
//! - The concrete radio models ([`ModelLoraRadio`], [`ModelImagingRadio`],
//!   [`ModelIslRadio`])
//! - The epoch-scoped link fabric that turns staged transmissions into
//!   receive-queue deliveries or logged drops ([`fabric`])
//!
//! Radios never touch other nodes directly. During its advance a radio
//! queries its sibling field-of-view model for candidates and stages a
//! [`Transmission`](orbsim_common::Transmission); the manager hands the
//! epoch's transmissions to [`fabric::resolve_epoch`] at the epoch
//! boundary, which computes link budgets from both endpoints' phy setups
//! and the geometry catalog, resolves same-frequency collisions, and
//! pushes surviving frames into receiver queues.

pub mod budget;
pub mod core;
pub mod fabric;
pub mod models;

pub use budget::{
    evaluate_link, free_space_path_loss_db, lora_sensitivity_dbm, lora_snr_threshold_db,
    lora_time_on_air, LinkOutcome,
};
pub use core::{RadioConfig, RadioCore};
pub use fabric::{resolve_epoch, FabricReport};
pub use models::{
    ModelAggregatorRadio, ModelDownlinkRadio, ModelImagingRadio, ModelIslRadio, ModelLoraRadio,
};
