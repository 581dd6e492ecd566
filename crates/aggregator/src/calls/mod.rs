//! Declarative contract call templates: named method groups that are encoded
//! into multicall batches and decoded back into per-contract records.

pub mod codec;
pub mod groups;
pub mod handlers;
pub mod index;
pub mod template;

pub use {
    codec::{DecodedRecord, decode_call_group},
    groups::build_call_groups,
    index::{create_indexes, rebuild_from_index},
    template::{CallTemplate, MethodCall, TemplateField},
};
