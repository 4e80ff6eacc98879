//! Identity of stored domain records.
//!
//! Grids, operations and stock rows keep their identity while every other
//! field is overwritten; a stock row stays `(material, grid)` no matter how
//! often reconciliation rewrites its quantity. Stores key their maps by
//! [`Entity::id`].

pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
