//! Identity types for the pipeline system.
//!
//! All IDs are newtypes over `u32` that serve as direct array indices
//! into their respective storage vectors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into `PipelineGraph::nodes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Index into `PipelineGraph::hops`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HopId(pub u32);

impl HopId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index into a prepared pipeline's runtime table (one entry per step copy).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RuntimeId(pub u32);

impl RuntimeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
