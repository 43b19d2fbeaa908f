//! Static sizing and fill-ratio policy for the tree.

use serde::{Deserialize, Serialize};

use crate::error::{BtreeError, Result};
use crate::node::NODE_HEADER_LEN;

/// Default portion of a node considered "full enough", in percent.
pub const DEFAULT_IDEAL_FILL_PCT: u8 = 90;
/// Default portion of a full node moved out on split, in percent.
pub const DEFAULT_SPLIT_PCT: u8 = 50;
/// Default bound on how many right siblings a merge may lock at once.
pub const DEFAULT_MAX_NODES_TO_REBALANCE: usize = 3;

/// Sizing policy derived from the node size and the maximum key/value sizes.
///
/// All derived quantities are computed once at construction; the engine
/// treats a config as immutable for the lifetime of a tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BtreeConfig {
    /// Total size of a node buffer in bytes, header included.
    pub node_size: usize,
    /// Upper bound on a serialized key, used for split-room estimates.
    pub max_key_size: usize,
    /// Upper bound on a serialized value.
    pub max_value_size: usize,
    /// Occupancy percentage below which a node is merge-eligible and at
    /// which a merge stops pulling entries in.
    pub ideal_fill_pct: u8,
    /// Percentage of a node's filled bytes moved to the new sibling on
    /// split.
    pub split_pct: u8,
    /// Maximum number of right siblings locked during one merge pass.
    pub max_nodes_to_rebalance: usize,
}

impl Default for BtreeConfig {
    fn default() -> Self {
        Self {
            node_size: 4096,
            max_key_size: 64,
            max_value_size: 256,
            ideal_fill_pct: DEFAULT_IDEAL_FILL_PCT,
            split_pct: DEFAULT_SPLIT_PCT,
            max_nodes_to_rebalance: DEFAULT_MAX_NODES_TO_REBALANCE,
        }
    }
}

impl BtreeConfig {
    /// Config with the given node size and the remaining fields defaulted.
    pub fn with_node_size(node_size: usize) -> Self {
        Self {
            node_size,
            ..Self::default()
        }
    }

    /// Validate the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.node_size <= NODE_HEADER_LEN {
            return Err(BtreeError::InvalidArgument(format!(
                "node_size {} does not leave room for the node header",
                self.node_size
            )));
        }
        // Slotted layouts address the area with 16-bit offsets.
        if self.node_size > 65536 {
            return Err(BtreeError::InvalidArgument(format!(
                "node_size {} exceeds the 64 KiB addressing limit",
                self.node_size
            )));
        }
        if self.ideal_fill_pct == 0 || self.ideal_fill_pct > 100 {
            return Err(BtreeError::InvalidArgument(format!(
                "ideal_fill_pct {} out of range",
                self.ideal_fill_pct
            )));
        }
        if self.split_pct == 0 || self.split_pct >= 100 {
            return Err(BtreeError::InvalidArgument(format!(
                "split_pct {} out of range",
                self.split_pct
            )));
        }
        if self.max_nodes_to_rebalance == 0 {
            return Err(BtreeError::InvalidArgument(
                "max_nodes_to_rebalance must be at least 1".into(),
            ));
        }
        let area = self.node_area_size();
        if self.max_key_size + self.max_value_size > area / 2 {
            return Err(BtreeError::InvalidArgument(format!(
                "max key+value size {} too large for node area {}",
                self.max_key_size + self.max_value_size,
                area
            )));
        }
        Ok(())
    }

    /// Bytes available for slots and payload after the node header.
    pub fn node_area_size(&self) -> usize {
        self.node_size - NODE_HEADER_LEN
    }

    /// Occupied-byte threshold above which a node no longer accepts merges.
    pub fn ideal_fill_size(&self) -> usize {
        self.node_area_size() * self.ideal_fill_pct as usize / 100
    }

    /// Occupied-byte threshold below which a node becomes merge-eligible.
    pub fn merge_suggested_size(&self) -> usize {
        self.node_area_size() - self.ideal_fill_size()
    }

    /// How many filled bytes a split should move to the new right sibling.
    pub fn split_size(&self, filled_size: usize) -> usize {
        filled_size * self.split_pct as usize / 100
    }
}
