//! Domain logic for Tapvault cloud saves.
//!
//! Everything in this crate is free of I/O: the snapshot wire model, the save
//! state machine that backs the sync scheduler, and offline earnings
//! reconciliation. The networked pieces live in `tapvault-cloud-sync`.

pub mod sync;
