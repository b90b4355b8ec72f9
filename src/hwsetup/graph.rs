// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Subpass dependency tracking for the schedule.

use crate::error::{Error, try_filled, try_push};
use crate::pass::RenderPass;

#[derive(Debug, Clone, Default)]
struct Node {
    /// Subpasses that depend on this one.
    out_subpasses: Vec<usize>,
    /// Dependencies not yet scheduled.
    in_count: usize,
    scheduled: bool,
}

/// In-degree counting over the subpass dependency lists.
#[derive(Debug)]
pub(crate) struct SubpassGraph {
    nodes: Vec<Node>,
}

impl SubpassGraph {
    pub(crate) fn new(pass: &RenderPass) -> Result<Self, Error> {
        let mut nodes = try_filled(pass.subpasses().len(), Node::default())?;
        for (index, subpass) in pass.subpasses().iter().enumerate() {
            nodes[index].in_count = subpass.dependencies.len();
            for dependency in &subpass.dependencies {
                try_push(&mut nodes[dependency.subpass].out_subpasses, index)?;
            }
        }
        Ok(SubpassGraph { nodes })
    }

    /// Lowest-indexed unscheduled subpass whose dependencies are all scheduled.
    pub(crate) fn pick_ready(&self) -> Option<usize> {
        self.nodes
            .iter()
            .position(|node| !node.scheduled && node.in_count == 0)
    }

    pub(crate) fn on_scheduled(&mut self, subpass: usize) {
        let node = &mut self.nodes[subpass];
        assert!(!node.scheduled, "subpass {subpass} scheduled twice");
        node.scheduled = true;
        for i in 0..self.nodes[subpass].out_subpasses.len() {
            let dependent = self.nodes[subpass].out_subpasses[i];
            let in_count = &mut self.nodes[dependent].in_count;
            *in_count = in_count
                .checked_sub(1)
                .expect("dependent has more scheduled dependencies than it declared");
        }
    }
}
