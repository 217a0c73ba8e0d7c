//! # aps-io: model input and plan output contracts
//!
//! The planning core consumes a stream of records (entity category,
//! key attributes, data attributes, action) produced by an external
//! loader, and exposes plan snapshots an external serializer renders.
//! This crate implements both contracts on top of serde: records load
//! from YAML or JSON, snapshots serialize to either, at three depths
//! (structure only, with operation plans, or with pegging detail).

pub mod export;
pub mod records;

pub use export::{snapshot, ExportDepth, PlanSnapshot};
pub use records::{apply_record, apply_records, load_records_from_path, Action, ModelRecord};
