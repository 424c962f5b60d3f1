//! Buffer property negotiation for bypassable nodes.

use contracts::Dimension;
use serde::Serialize;

/// Size constraints of one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BufferRequirement {
    pub min: Dimension,
    pub max: Dimension,
    pub optimal: Dimension,
}

impl Default for BufferRequirement {
    fn default() -> Self {
        Self {
            min: Dimension::new(0, 0),
            max: Dimension::new(u32::MAX, u32::MAX),
            optimal: Dimension::new(0, 0),
        }
    }
}

impl BufferRequirement {
    /// Tighten with a downstream requirement
    fn merge(&mut self, other: &BufferRequirement) {
        self.optimal.width = self.optimal.width.max(other.optimal.width);
        self.optimal.height = self.optimal.height.max(other.optimal.height);
        self.min.width = self.min.width.max(other.min.width);
        self.min.height = self.min.height.max(other.min.height);
        self.max.width = self.max.width.min(other.max.width);
        self.max.height = self.max.height.min(other.max.height);
    }
}

/// Requirements of the inputs connected to one output port
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPortRequirements {
    pub port_index: u32,
    pub connected_inputs: Vec<BufferRequirement>,
}

/// Negotiated requirements, inputs mirror outputs port by port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BufferNegotiation {
    pub outputs: Vec<(u32, BufferRequirement)>,
    pub inputs: Vec<(u32, BufferRequirement)>,
}

/// Aggregate downstream requirements, only a bypassable node forwards them
pub fn negotiate_buffers(bypassable: bool, ports: &[OutputPortRequirements]) -> BufferNegotiation {
    let outputs: Vec<(u32, BufferRequirement)> = ports
        .iter()
        .map(|port| {
            let mut requirement = BufferRequirement::default();
            if bypassable {
                for input in &port.connected_inputs {
                    requirement.merge(input);
                }
            }
            (port.port_index, requirement)
        })
        .collect();

    BufferNegotiation {
        inputs: outputs.clone(),
        outputs,
    }
}
