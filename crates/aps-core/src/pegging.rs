//! Pegging: tracing which upstream production feeds which downstream
//! consumption, and in what proportion.
//!
//! The iterator walks the plan graph from any operation plan or
//! demand, upstream (towards raw material) or downstream (towards the
//! delivered item). Its state is a stack of frames; each step pops the
//! current frame and pushes the plans pegged to it, located through
//! the cumulative produced/consumed totals of the buffer timelines.
//! The iterator is single pass and not restartable; callers wanting
//! deduplication remember visited plans themselves.

use crate::buffer::BufferKind;
use crate::model::Model;
use crate::operation::OperationKind;
use crate::timeline::EventKind;
use crate::{BufferId, DemandId, FlowPlanId, PlanId, ROUNDING_ERROR};

/// One pegging record: a plan, the pegged quantity, the offset of that
/// quantity within the plan's production, and the recursion depth from
/// the traversal root.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeggingEntry {
    pub plan: PlanId,
    pub quantity: f64,
    pub offset: f64,
    pub level: u32,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    plan: PlanId,
    quantity: f64,
    offset: f64,
    level: u32,
}

/// Stack-based traversal over the pegging graph.
pub struct PeggingIterator<'m> {
    model: &'m Model,
    stack: Vec<Frame>,
    downstream: bool,
    replace_top: bool,
    started: bool,
}

impl<'m> PeggingIterator<'m> {
    /// Walk upstream from the deliveries of a demand.
    pub fn for_demand(model: &'m Model, demand: DemandId) -> Self {
        let mut it = PeggingIterator {
            model,
            stack: Vec::new(),
            downstream: false,
            replace_top: false,
            started: false,
        };
        // Reversed so the first delivery ends on top of the stack.
        for plan in model.demand(demand).deliveries().iter().rev() {
            let top = model.top_owner(*plan);
            let qty = model.operation_plan(top).quantity;
            it.push_frame(top, qty, 0.0, 0);
        }
        it
    }

    /// Walk from an operation plan, upstream or downstream.
    pub fn for_plan(model: &'m Model, plan: PlanId, downstream: bool) -> Self {
        let mut it = PeggingIterator {
            model,
            stack: Vec::new(),
            downstream,
            replace_top: false,
            started: false,
        };
        let top = model.top_owner(plan);
        // Split parents are not pegging nodes; their branches peg
        // individually.
        let anchor = if matches!(
            model.operation(model.operation_plan(top).operation).kind,
            OperationKind::Split { .. }
        ) {
            plan
        } else {
            top
        };
        let qty = model.operation_plan(anchor).quantity;
        it.push_frame(anchor, qty, 0.0, 0);
        it
    }

    pub fn is_downstream(&self) -> bool {
        self.downstream
    }

    fn push_frame(&mut self, plan: PlanId, quantity: f64, offset: f64, level: u32) {
        if quantity < ROUNDING_ERROR {
            return;
        }
        let frame = Frame {
            plan,
            quantity,
            offset,
            level,
        };
        if self.replace_top {
            *self.stack.last_mut().expect("pegging stack underflow") = frame;
            self.replace_top = false;
        } else {
            self.stack.push(frame);
        }
    }

    /// Replace the top frame by everything pegged to it, or pop it
    /// when nothing is.
    fn advance(&mut self) {
        let Some(top) = self.stack.last().copied() else {
            return;
        };
        self.replace_top = true;
        self.follow(top.plan, top.quantity, top.offset, top.level);
        if self.replace_top {
            self.stack.pop();
            self.replace_top = false;
        }
    }

    fn follow(&mut self, plan: PlanId, qty: f64, offset: f64, level: u32) {
        // Zero-quantity plans have no pegging.
        if self.model.operation_plan(plan).quantity == 0.0 {
            return;
        }
        let flowplans: Vec<FlowPlanId> = self.model.operation_plan(plan).flowplans().to_vec();
        for fp in flowplans {
            let fq = self.model.flowplan_quantity(fp);
            if self.downstream && fq > ROUNDING_ERROR {
                self.follow_buffer(fp, qty, offset, level + 1);
            } else if !self.downstream && fq < -ROUNDING_ERROR {
                self.follow_buffer(fp, qty, offset, level + 1);
            }
        }
        // Child plans peg with the ratio of the quantities.
        let parent_qty = self.model.operation_plan(plan).quantity;
        for child in self.model.child_plans(plan) {
            let cq = self.model.operation_plan(child).quantity;
            self.push_frame(
                child,
                qty * cq / parent_qty,
                offset * cq / parent_qty,
                level + 1,
            );
        }
    }

    /// Locate, in the buffer timeline, the counterpart events whose
    /// cumulative range overlaps the pegged window, and push a frame
    /// per match with rescaled quantity and offset.
    fn follow_buffer(&mut self, fp: FlowPlanId, qty: f64, offset: f64, level: u32) {
        let model = self.model;
        let fq = model.flowplan_quantity(fp);
        let plan = model.flowplan(fp).plan;
        let plan_qty = model.operation_plan(plan).quantity;
        if plan_qty == 0.0 {
            return;
        }
        let buffer: BufferId = model.flowplan_buffer(fp);
        let b = model.buffer(buffer);
        // Reusable tools don't peg.
        if b.tool || matches!(b.kind, BufferKind::Infinite) {
            return;
        }

        // Snapshot the change events in timeline order.
        struct Ev {
            qty: f64,
            cum_prod: f64,
            cum_cons: f64,
            src: FlowPlanId,
        }
        let mut events: Vec<Ev> = Vec::new();
        let mut pos: Option<usize> = None;
        let my_key = model.flowplan(fp).key;
        for (key, ev) in b.timeline.iter() {
            if let EventKind::Change(src) = ev.kind {
                if *key == my_key {
                    pos = Some(events.len());
                }
                events.push(Ev {
                    qty: ev.quantity,
                    cum_prod: ev.cum_produced(),
                    cum_cons: ev.cum_consumed(),
                    src,
                });
            }
        }
        let Some(pos) = pos else { return };
        let f = &events[pos];
        let downstream = self.downstream;

        let mut push_match = |m: &Model, e: &Ev, new_qty: f64, new_offset: f64, producer: bool| {
            let opplan = m.flowplan(e.src).plan;
            let mut top = m.top_owner(opplan);
            if matches!(
                m.operation(m.operation_plan(top).operation).kind,
                OperationKind::Split { .. }
            ) {
                top = opplan;
            }
            let top_qty = m.operation_plan(top).quantity;
            let sign = if producer { 1.0 } else { -1.0 };
            self.push_frame(
                top,
                sign * top_qty * new_qty / e.qty,
                sign * top_qty * new_offset / e.qty,
                level,
            );
        };

        if fq < -ROUNDING_ERROR && !downstream {
            // A consuming flowplan, navigating upstream: find the
            // producing events covering the consumed window.
            let scale = -fq / plan_qty;
            let start_qty = f.cum_cons + f.qty + offset * scale;
            let end_qty = start_qty + qty * scale;
            let mut i = pos;
            if f.cum_prod <= start_qty + ROUNDING_ERROR {
                // Not produced enough yet at this point: move forward.
                while i < events.len() && events[i].cum_prod <= start_qty {
                    i += 1;
                }
                while i < events.len()
                    && ((events[i].qty <= 0.0 && events[i].cum_prod < end_qty)
                        || (events[i].qty > 0.0
                            && events[i].cum_prod - events[i].qty < end_qty))
                {
                    let e = &events[i];
                    if e.qty > ROUNDING_ERROR {
                        let mut new_qty = e.qty;
                        let mut new_offset = 0.0;
                        if e.cum_prod - e.qty < start_qty {
                            new_offset = start_qty - (e.cum_prod - e.qty);
                            new_qty -= new_offset;
                        }
                        if e.cum_prod > end_qty {
                            new_qty -= e.cum_prod - end_qty;
                        }
                        push_match(model, e, new_qty, new_offset, true);
                    }
                    i += 1;
                }
            } else {
                // Produced too much already: move backward.
                loop {
                    let e = &events[i];
                    let past = (e.qty <= 0.0 && e.cum_prod > end_qty)
                        || (e.qty > 0.0 && e.cum_prod - e.qty > end_qty);
                    if !past {
                        break;
                    }
                    if i == 0 {
                        return;
                    }
                    i -= 1;
                }
                loop {
                    let e = &events[i];
                    if e.cum_prod <= start_qty {
                        break;
                    }
                    if e.qty > ROUNDING_ERROR {
                        let mut new_qty = e.qty;
                        let mut new_offset = 0.0;
                        if e.cum_prod - e.qty < start_qty {
                            new_offset = start_qty - (e.cum_prod - e.qty);
                            new_qty -= new_offset;
                        }
                        if e.cum_prod > end_qty {
                            new_qty -= e.cum_prod - end_qty;
                        }
                        push_match(model, e, new_qty, new_offset, true);
                    }
                    if i == 0 {
                        break;
                    }
                    i -= 1;
                }
            }
        } else if fq > ROUNDING_ERROR && downstream {
            // A producing flowplan, navigating downstream: find the
            // consuming events drawing on the produced window.
            let scale = fq / plan_qty;
            let start_qty = f.cum_prod - f.qty + offset * scale;
            let end_qty = start_qty + qty * scale;
            let mut i = pos;
            if f.cum_cons <= start_qty + ROUNDING_ERROR {
                while i < events.len() && events[i].cum_cons <= start_qty {
                    i += 1;
                }
                while i < events.len()
                    && ((events[i].qty <= 0.0
                        && events[i].cum_cons + events[i].qty < end_qty)
                        || (events[i].qty > 0.0 && events[i].cum_cons < end_qty))
                {
                    let e = &events[i];
                    if e.qty < -ROUNDING_ERROR {
                        let mut new_qty = -e.qty;
                        let mut new_offset = 0.0;
                        if e.cum_cons + e.qty < start_qty {
                            new_offset = start_qty - (e.cum_cons + e.qty);
                            new_qty -= new_offset;
                        }
                        if e.cum_cons > end_qty {
                            new_qty -= e.cum_cons - end_qty;
                        }
                        push_match(model, e, new_qty, new_offset, false);
                    }
                    i += 1;
                }
            } else {
                loop {
                    let e = &events[i];
                    let past = (e.qty <= 0.0 && e.cum_cons + e.qty < end_qty)
                        || (e.qty > 0.0 && e.cum_cons < end_qty);
                    if !past {
                        break;
                    }
                    if i == 0 {
                        return;
                    }
                    i -= 1;
                }
                loop {
                    let e = &events[i];
                    if e.cum_cons <= start_qty {
                        break;
                    }
                    if e.qty < -ROUNDING_ERROR {
                        let mut new_qty = -e.qty;
                        let mut new_offset = 0.0;
                        if e.cum_cons + e.qty < start_qty {
                            new_qty -= start_qty - (e.cum_cons + e.qty);
                        }
                        if e.cum_cons > end_qty {
                            new_qty -= e.cum_cons - end_qty;
                        }
                        push_match(model, e, new_qty, new_offset, false);
                    }
                    if i == 0 {
                        break;
                    }
                    i -= 1;
                }
            }
        }
    }
}

impl<'m> Iterator for PeggingIterator<'m> {
    type Item = PeggingEntry;

    fn next(&mut self) -> Option<PeggingEntry> {
        if self.started {
            self.advance();
        } else {
            self.started = true;
        }
        self.stack.last().map(|f| PeggingEntry {
            plan: f.plan,
            quantity: f.quantity,
            offset: f.offset,
            level: f.level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Flow, FlowKind};
    use crate::dates::date;
    use crate::operation::Operation;
    use chrono::Duration;

    #[test]
    fn test_zero_quantity_plans_are_skipped() {
        let mut model = Model::new();
        let make = model
            .add_operation(Operation::fixed_time("make", Duration::hours(1)))
            .unwrap();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::hours(1)))
            .unwrap();
        let b = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(make, b, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(take, b, FlowKind::Start, -1.0)).unwrap();

        let d = date(2024, 3, 1, 0, 0, 0);
        let p1 = model.create_operation_plan(make, 5.0, None, Some(d)).unwrap();
        model.activate(p1).unwrap();
        let p2 = model.create_operation_plan(take, 5.0, Some(d), None).unwrap();
        model.activate(p2).unwrap();
        model.set_quantity(p2, 0.0).unwrap();

        let entries: Vec<_> = PeggingIterator::for_plan(&model, p1, true).collect();
        // Only the root itself: the zero consumer pegs nothing.
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].plan, p1);
    }

    #[test]
    fn test_producer_consumer_pegging() {
        let mut model = Model::new();
        let make = model
            .add_operation(Operation::fixed_time("make", Duration::hours(1)))
            .unwrap();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::hours(1)))
            .unwrap();
        let b = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(make, b, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(take, b, FlowKind::Start, -1.0)).unwrap();

        let d = date(2024, 3, 1, 0, 0, 0);
        let p1 = model.create_operation_plan(make, 5.0, None, Some(d)).unwrap();
        model.activate(p1).unwrap();
        let p2 = model.create_operation_plan(take, 5.0, Some(d), None).unwrap();
        model.activate(p2).unwrap();

        // Downstream from the producer reaches the consumer.
        let entries: Vec<_> = PeggingIterator::for_plan(&model, p1, true).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].plan, p1);
        assert_eq!(entries[0].level, 0);
        assert_eq!(entries[1].plan, p2);
        assert_eq!(entries[1].level, 1);
        assert!((entries[1].quantity - 5.0).abs() < 1e-6);

        // Upstream from the consumer reaches the producer.
        let entries: Vec<_> = PeggingIterator::for_plan(&model, p2, false).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].plan, p1);
    }

    #[test]
    fn test_partial_pegging_proportions() {
        let mut model = Model::new();
        let make = model
            .add_operation(Operation::fixed_time("make", Duration::hours(1)))
            .unwrap();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::hours(1)))
            .unwrap();
        let b = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(make, b, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(take, b, FlowKind::Start, -1.0)).unwrap();

        let d = date(2024, 3, 1, 0, 0, 0);
        // Two producers of 3 and 4; one consumer of 6 drawing 3 + 3.
        let pa = model.create_operation_plan(make, 3.0, None, Some(d)).unwrap();
        model.activate(pa).unwrap();
        let pb = model
            .create_operation_plan(make, 4.0, None, Some(date(2024, 3, 2, 0, 0, 0)))
            .unwrap();
        model.activate(pb).unwrap();
        let pc = model
            .create_operation_plan(take, 6.0, Some(date(2024, 3, 3, 0, 0, 0)), None)
            .unwrap();
        model.activate(pc).unwrap();

        let entries: Vec<_> = PeggingIterator::for_plan(&model, pc, false).collect();
        let pegged: Vec<(PlanId, f64)> = entries[1..]
            .iter()
            .map(|e| (e.plan, (e.quantity * 1e6).round() / 1e6))
            .collect();
        assert!(pegged.contains(&(pa, 3.0)));
        assert!(pegged.contains(&(pb, 3.0)));
    }
}
