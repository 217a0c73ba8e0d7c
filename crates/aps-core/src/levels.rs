//! Level and cluster computation over the supply network.
//!
//! The level of an operation is its distance upstream from demand
//! delivery: delivery operations sit at level 1, and every hop through
//! a consumed buffer to the operations producing into it adds one.
//! Sub-operations share the level of the operation using them. Buffers
//! and resources inherit the minimum level of any adjacent operation.
//!
//! A cluster is a connected component of the operations/buffers/
//! resources graph; cluster 0 is reserved for entities with no edges
//! at all. The computation is lazy: structural changes set a flag and
//! the next level or cluster query recomputes the whole model.

use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::operation::OperationKind;
use crate::{BufferId, OperationId, ResourceId};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, VecDeque};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NetNode {
    Operation(OperationId),
    Buffer(BufferId),
    Resource(ResourceId),
}

impl Model {
    /// Level of an operation, recomputing lazily when needed.
    pub fn operation_level(&mut self, id: OperationId) -> i16 {
        self.compute_levels_if_needed();
        self.operation(id).level
    }

    pub fn operation_cluster(&mut self, id: OperationId) -> u16 {
        self.compute_levels_if_needed();
        self.operation(id).cluster
    }

    pub fn buffer_level(&mut self, id: BufferId) -> i16 {
        self.compute_levels_if_needed();
        self.buffer(id).level
    }

    pub fn buffer_cluster(&mut self, id: BufferId) -> u16 {
        self.compute_levels_if_needed();
        self.buffer(id).cluster
    }

    pub fn resource_level(&mut self, id: ResourceId) -> i16 {
        self.compute_levels_if_needed();
        self.resource(id).level
    }

    pub fn resource_cluster(&mut self, id: ResourceId) -> u16 {
        self.compute_levels_if_needed();
        self.resource(id).cluster
    }

    /// The cluster a demand belongs to, through its delivery operation.
    pub fn demand_cluster(&mut self, id: crate::DemandId) -> u16 {
        match self.demand_delivery_operation(id) {
            Some(op) => self.operation_cluster(op),
            None => 0,
        }
    }

    pub(crate) fn compute_levels_if_needed(&mut self) {
        if !self.state.recompute_levels {
            return;
        }
        if let Err(e) = self.compute_levels() {
            // Overflow of the level/cluster counters; surfaced in the
            // log, the model keeps the partially computed numbers.
            error!(error = %e, "level computation failed");
        }
    }

    /// Recompute levels and clusters for the whole model.
    pub fn compute_levels(&mut self) -> PlanResult<()> {
        self.state.recompute_levels = false;

        // Reset: -1 marks an unused entity, cluster 0 an unconnected one.
        for (_, o) in self.operations.iter_mut() {
            o.level = -1;
            o.cluster = 0;
        }
        for (_, b) in self.buffers.iter_mut() {
            b.level = -1;
            b.cluster = 0;
        }
        for (_, r) in self.resources.iter_mut() {
            r.level = -1;
            r.cluster = 0;
        }

        // Build the undirected network graph once; the same edges feed
        // the cluster labelling and the level walk.
        let mut graph: UnGraph<NetNode, ()> = UnGraph::new_undirected();
        let mut nodes: HashMap<NetNode, NodeIndex> = HashMap::new();
        let mut node = |graph: &mut UnGraph<NetNode, ()>, n: NetNode| -> NodeIndex {
            *nodes.entry(n).or_insert_with(|| graph.add_node(n))
        };

        let op_ids: Vec<OperationId> = self.operations().map(|(id, _)| id).collect();
        for op in &op_ids {
            let a = node(&mut graph, NetNode::Operation(*op));
            for f in &self.operation(*op).flows {
                let b = node(&mut graph, NetNode::Buffer(self.flow(*f).buffer));
                graph.add_edge(a, b, ());
            }
            for l in &self.operation(*op).loads {
                let r = node(&mut graph, NetNode::Resource(self.load(*l).resource));
                graph.add_edge(a, r, ());
            }
            let subs: Vec<OperationId> = match &self.operation(*op).kind {
                OperationKind::Routing { steps } => steps.clone(),
                OperationKind::Alternate { alternates, .. } => {
                    alternates.iter().map(|x| x.operation).collect()
                }
                OperationKind::Split { members } => members.iter().map(|m| m.operation).collect(),
                _ => Vec::new(),
            };
            for sub in subs {
                let s = node(&mut graph, NetNode::Operation(sub));
                graph.add_edge(a, s, ());
            }
        }

        // Cluster labelling: breadth-first component sweep. Isolated
        // nodes keep cluster 0.
        let mut next_cluster: u32 = 0;
        let mut visited: HashMap<NodeIndex, u16> = HashMap::new();
        for start in graph.node_indices() {
            if visited.contains_key(&start) {
                continue;
            }
            if graph.neighbors(start).next().is_none() {
                continue;
            }
            next_cluster += 1;
            if next_cluster > u16::MAX as u32 {
                return Err(PlanError::runtime(
                    "Too many clusters in the model; the counter overflows",
                ));
            }
            let cluster = next_cluster as u16;
            let mut queue = VecDeque::new();
            queue.push_back(start);
            while let Some(n) = queue.pop_front() {
                if visited.insert(n, cluster).is_some() {
                    continue;
                }
                for nb in graph.neighbors(n) {
                    if !visited.contains_key(&nb) {
                        queue.push_back(nb);
                    }
                }
            }
        }
        for (idx, cluster) in &visited {
            match graph[*idx] {
                NetNode::Operation(op) => self.operation_mut(op).cluster = *cluster,
                NetNode::Buffer(b) => self.buffer_mut(b).cluster = *cluster,
                NetNode::Resource(r) => self.resource_mut(r).cluster = *cluster,
            }
        }
        self.state.number_of_clusters = next_cluster as u16;

        // Level walk: start at the delivery operations of the demands,
        // expand upstream through consumed buffers to their producers,
        // and downward through sub-operations at the same level.
        let mut queue: VecDeque<(OperationId, i16)> = VecDeque::new();
        let demand_ids: Vec<crate::DemandId> = self.demands().map(|(id, _)| id).collect();
        for d in demand_ids {
            if let Some(op) = self.demand_delivery_operation(d) {
                queue.push_back((op, 1));
            }
        }
        let mut max_level: i16 = 0;
        while let Some((op, level)) = queue.pop_front() {
            if level == i16::MAX {
                return Err(PlanError::runtime(
                    "Too many levels in the model; the counter overflows",
                ));
            }
            {
                let o = self.operation_mut(op);
                if o.level >= level {
                    continue;
                }
                o.level = level;
            }
            if level > max_level {
                max_level = level;
            }

            // Sub-operations execute as part of this one.
            let subs: Vec<OperationId> = match &self.operation(op).kind {
                OperationKind::Routing { steps } => steps.clone(),
                OperationKind::Alternate { alternates, .. } => {
                    alternates.iter().map(|x| x.operation).collect()
                }
                OperationKind::Split { members } => members.iter().map(|m| m.operation).collect(),
                _ => Vec::new(),
            };
            for sub in subs {
                queue.push_back((sub, level));
            }

            // One hop upstream per consumed buffer.
            let flows: Vec<_> = self.operation(op).flows.clone();
            for f in flows {
                let flow = self.flow(f).clone();
                if !flow.is_consumer() {
                    continue;
                }
                let feeders: Vec<OperationId> = self
                    .buffer(flow.buffer)
                    .flows
                    .iter()
                    .filter(|x| self.flow(**x).is_producer())
                    .map(|x| self.flow(*x).operation)
                    .collect();
                for feeder in feeders {
                    queue.push_back((feeder, level + 1));
                }
                if let Some(producer) = self.buffer(flow.buffer).producing_operation {
                    queue.push_back((producer, level + 1));
                }
            }
        }
        self.state.number_of_levels = max_level as u16;

        // Buffers and resources inherit the minimum adjacent level.
        let buffer_ids: Vec<BufferId> = self.buffers().map(|(id, _)| id).collect();
        for b in buffer_ids {
            let mut level = i16::MAX;
            for f in &self.buffer(b).flows {
                let l = self.operation(self.flow(*f).operation).level;
                if l >= 0 && l < level {
                    level = l;
                }
            }
            self.buffer_mut(b).level = if level == i16::MAX { -1 } else { level };
        }
        let resource_ids: Vec<ResourceId> = self.resources().map(|(id, _)| id).collect();
        for r in resource_ids {
            let mut level = i16::MAX;
            for l in &self.resource(r).loads {
                let lv = self.operation(self.load(*l).operation).level;
                if lv >= 0 && lv < level {
                    level = lv;
                }
            }
            self.resource_mut(r).level = if level == i16::MAX { -1 } else { level };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Flow, FlowKind};
    use crate::demand::Demand;
    use crate::dates::date;
    use crate::entities::Item;
    use crate::operation::Operation;
    use crate::resource::{Load, Resource};
    use chrono::Duration;

    /// Raw -> B0 -> Mid -> B1 -> Final, demand on Final.
    fn chain_model() -> (Model, [OperationId; 3], [BufferId; 2]) {
        let mut model = Model::new();
        let raw = model
            .add_operation(Operation::fixed_time("Raw", Duration::hours(1)))
            .unwrap();
        let mid = model
            .add_operation(Operation::fixed_time("Mid", Duration::hours(1)))
            .unwrap();
        let fin = model
            .add_operation(Operation::fixed_time("Final", Duration::hours(1)))
            .unwrap();
        let b0 = model.add_buffer(Buffer::new("B0")).unwrap();
        let b1 = model.add_buffer(Buffer::new("B1")).unwrap();
        model.add_flow(Flow::new(raw, b0, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(mid, b0, FlowKind::Start, -1.0)).unwrap();
        model.add_flow(Flow::new(mid, b1, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(fin, b1, FlowKind::Start, -1.0)).unwrap();

        let item = model.add_item(Item::new("product")).unwrap();
        model.item_mut(item).delivery_operation = Some(fin);
        model
            .add_demand(
                Demand::new("D", 1.0, date(2024, 3, 1, 0, 0, 0)).of(item),
            )
            .unwrap();
        (model, [raw, mid, fin], [b0, b1])
    }

    #[test]
    fn test_levels_count_upstream_hops() {
        let (mut model, [raw, mid, fin], [b0, b1]) = chain_model();
        assert_eq!(model.operation_level(fin), 1);
        assert_eq!(model.operation_level(mid), 2);
        assert_eq!(model.operation_level(raw), 3);
        // Buffers take the minimum adjacent operation level.
        assert_eq!(model.buffer_level(b1), 1);
        assert_eq!(model.buffer_level(b0), 2);
    }

    #[test]
    fn test_single_cluster_for_connected_chain() {
        let (mut model, [raw, _, fin], _) = chain_model();
        let c = model.operation_cluster(fin);
        assert!(c > 0);
        assert_eq!(model.operation_cluster(raw), c);
        assert_eq!(model.number_of_clusters(), 1);
    }

    #[test]
    fn test_unconnected_entities_stay_in_cluster_zero() {
        let (mut model, _, _) = chain_model();
        let lonely_op = model
            .add_operation(Operation::fixed_time("idle", Duration::hours(1)))
            .unwrap();
        let lonely_res = model.add_resource(Resource::new("spare")).unwrap();
        assert_eq!(model.operation_cluster(lonely_op), 0);
        assert_eq!(model.resource_cluster(lonely_res), 0);
        assert_eq!(model.operation_level(lonely_op), -1);
    }

    #[test]
    fn test_resources_join_their_operation_cluster() {
        let (mut model, [_, mid, _], _) = chain_model();
        let res = model.add_resource(Resource::new("machine")).unwrap();
        model.add_load(Load::new(mid, res, 1.0)).unwrap();
        let c = model.operation_cluster(mid);
        assert_eq!(model.resource_cluster(res), c);
        assert_eq!(model.resource_level(res), 2);
    }

    #[test]
    fn test_structural_change_triggers_recompute() {
        let (mut model, [_, _, fin], _) = chain_model();
        assert_eq!(model.operation_level(fin), 1);
        // Adding a new buffer+flow re-arms the lazy flag.
        let extra = model
            .add_operation(Operation::fixed_time("extra", Duration::hours(1)))
            .unwrap();
        let b = model.add_buffer(Buffer::new("B2")).unwrap();
        model.add_flow(Flow::new(extra, b, FlowKind::End, 1.0)).unwrap();
        assert!(model.state.recompute_levels);
        let _ = model.operation_level(extra);
        assert!(!model.state.recompute_levels);
    }
}
