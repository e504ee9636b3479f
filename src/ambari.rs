//! Typed shapes of the few payloads that are read field by field rather than
//! through a mapper table.

pub mod model;
