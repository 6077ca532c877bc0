use super::*;

impl GraphColoringAllocator {
    /// Coalesce: attempt to merge the ends of one move
    pub(super) fn coalesce(&mut self) {
        let Some(id) = self.move_worklist.first().copied() else {
            return;
        };
        let mv = self.graph.moves[id.0];

        // The source's representative is merged into the destination's
        let u = self.get_alias(mv.dst);
        let v = self.get_alias(mv.src);

        if u == v {
            trace!("move {} := {} already coalesced", mv.dst, mv.src);
            self.set_move_state(id, MoveState::Coalesced);
            self.add_worklist(u);
        } else if self.graph.interferes(u, v) {
            trace!("move {} := {} constrained", mv.dst, mv.src);
            self.set_move_state(id, MoveState::Constrained);
            self.add_worklist(u);
            self.add_worklist(v);
        } else if self.briggs(u, v) {
            trace!("coalesce {v} into {u}");
            self.set_move_state(id, MoveState::Coalesced);
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.set_move_state(id, MoveState::Active);
        }
    }

    /// Briggs: the merged node must have fewer than K neighbors of significant degree
    pub(super) fn briggs(&self, u: Temp, v: Temp) -> bool {
        let neighbors: BTreeSet<Temp> = self
            .adjacent(u)
            .into_iter()
            .chain(self.adjacent(v))
            .collect();
        let significant = neighbors
            .iter()
            .filter(|&&n| self.graph.degree(n) >= self.k)
            .count();
        significant < self.k
    }

    /// Move `temp` from freeze to simplify once it is low-degree and move-free
    pub(super) fn add_worklist(&mut self, temp: Temp) {
        if self.state(temp) == NodeState::Freeze
            && !self.is_move_related(temp)
            && self.graph.degree(temp) < self.k
        {
            self.transition(temp, NodeState::Simplify);
        }
    }

    /// Combine two nodes (coalesce v into u)
    pub(super) fn combine(&mut self, u: Temp, v: Temp) {
        self.transition(v, NodeState::Coalesced);
        self.alias.insert(v, u);

        let v_moves: Vec<MoveId> = self.graph.moves_for(v).collect();
        self.graph.move_list.entry(u).or_default().extend(v_moves);
        self.enable_moves(v);

        for neighbor in self.adjacent(v) {
            self.graph.add_edge(neighbor, u);
            self.decrement_degree(neighbor);
        }

        if self.graph.degree(u) >= self.k && self.state(u) == NodeState::Freeze {
            self.transition(u, NodeState::Spill);
        }
    }

    /// Representative of a node, compressing the alias chain on the way
    pub(super) fn get_alias(&mut self, temp: Temp) -> Temp {
        let mut root = temp;
        while self.state(root) == NodeState::Coalesced {
            match self.alias.get(&root) {
                Some(&next) => root = next,
                None => break,
            }
        }

        let mut cursor = temp;
        while cursor != root {
            match self.alias.insert(cursor, root) {
                Some(next) => cursor = next,
                None => {
                    self.alias.remove(&cursor);
                    break;
                }
            }
        }
        root
    }
}
