//! Relational store: all reads and writes go through these modules, with
//! SQLite as the single source of truth. Cascading deletes (game → house
//! rules / embeddings / chat sessions → messages) are enforced by foreign
//! keys; multi-row writes run inside transactions.

pub mod chat;
pub mod chunks;
pub mod games;
pub mod house_rules;
