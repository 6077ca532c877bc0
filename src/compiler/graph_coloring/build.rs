use super::*;

impl GraphColoringAllocator {
    /// Build the interference graph from the liveness annotations
    pub(super) fn build(&mut self, codes: &[Code]) {
        for code in codes {
            for instr in &code.instrs {
                for temp in instr.temps() {
                    self.graph.add_node(temp);
                    self.node_state.entry(temp).or_insert(NodeState::Initial);
                }

                self.add_clique(&instr.live_in);
                self.add_clique(&instr.live_out);

                // A def interferes with whatever survives it, even if the def is dead
                let move_src = instr.move_pair().map(|(_, src)| src);
                for &def in instr.defs() {
                    for &live in &instr.live_out {
                        if Some(live) != move_src {
                            self.graph.add_edge(def, live);
                        }
                    }
                }

                if let Some((dst, src)) = instr.move_pair() {
                    self.graph.add_move(dst, src);
                }

                for &temp in instr.live_in.iter().chain(&instr.live_out) {
                    *self.spill_weight.entry(temp).or_insert(0) += 1;
                }
            }
        }
        trace!(
            "interference graph: {} nodes, {} edges, {} moves",
            self.graph.nodes.len(),
            self.graph.adj_set.len(),
            self.graph.moves.len()
        );
    }

    fn add_clique(&mut self, live: &HashSet<Temp>) {
        let mut members: Vec<Temp> = live.iter().copied().collect();
        members.sort();
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                self.graph.add_edge(members[i], members[j]);
            }
        }
    }
}
