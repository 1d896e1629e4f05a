//! Hostfile assembly.
//!
//! The hostfile lists one line per connection slot: each ready worker's
//! address repeated once per core, so the parallel-cluster constructor on
//! the manager opens one connection per core.

use std::net::IpAddr;

use serde::Serialize;

use super::node::{ClusterNode, NodeRole, NodeState};

/// One worker's contribution to the hostfile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostfileEntry {
    pub address: String,
    /// How many consecutive lines this address occupies.
    pub slots: u32,
}

/// Knobs for hostfile assembly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostfileOptions {
    /// Also give the manager `cores - 1` slots, keeping one core for the
    /// interactive session.
    pub include_manager: bool,
}

/// The assembled hostfile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hostfile {
    entries: Vec<HostfileEntry>,
}

impl Hostfile {
    /// Assemble from ready workers only.
    pub fn assemble<'a>(nodes: impl IntoIterator<Item = &'a ClusterNode>) -> Self {
        Self::assemble_with(nodes, HostfileOptions::default())
    }

    /// Assemble from the given nodes.
    ///
    /// Output order depends only on the addresses, never on input order.
    /// A worker without a known core count gets a single slot.
    pub fn assemble_with<'a>(
        nodes: impl IntoIterator<Item = &'a ClusterNode>,
        options: HostfileOptions,
    ) -> Self {
        let mut entries: Vec<HostfileEntry> = nodes
            .into_iter()
            .filter(|n| n.state == NodeState::Ready)
            .filter_map(|n| {
                let address = n.hostfile_address()?.to_string();
                let slots = match n.role {
                    NodeRole::Worker => n.core_count.unwrap_or(1).max(1),
                    NodeRole::Manager if options.include_manager => {
                        n.core_count.unwrap_or(1).saturating_sub(1)
                    }
                    NodeRole::Manager => 0,
                };
                (slots > 0).then_some(HostfileEntry { address, slots })
            })
            .collect();

        entries.sort_by(|a, b| address_key(&a.address).cmp(&address_key(&b.address)));
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[HostfileEntry] {
        &self.entries
    }

    /// Every line of the hostfile, in order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::repeat(e.address.as_str()).take(e.slots as usize))
    }

    #[must_use]
    pub fn total_slots(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.slots)).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newline-terminated file contents.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.lines() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// IP addresses sort numerically and before hostnames.
fn address_key(address: &str) -> (u8, Option<IpAddr>, &str) {
    match address.parse::<IpAddr>() {
        Ok(ip) => (0, Some(ip), address),
        Err(_) => (1, None, address),
    }
}
