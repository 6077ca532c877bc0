use super::*;

impl GraphColoringAllocator {
    pub(super) fn make_worklist(&mut self) {
        self.move_state = vec![MoveState::Worklist; self.graph.moves.len()];
        self.move_worklist = (0..self.graph.moves.len()).map(MoveId).collect();

        let nodes: Vec<Temp> = self.graph.nodes.iter().copied().collect();
        for temp in nodes {
            if self.state(temp) != NodeState::Initial {
                continue;
            }
            let next = if self.graph.degree(temp) >= self.k {
                NodeState::Spill
            } else if self.is_move_related(temp) {
                NodeState::Freeze
            } else {
                NodeState::Simplify
            };
            self.transition(temp, next);
        }
    }

    pub(super) fn state(&self, temp: Temp) -> NodeState {
        self.node_state
            .get(&temp)
            .copied()
            .unwrap_or(NodeState::Initial)
    }

    /// Move `temp` out of its current worklist and into the one for `next`.
    pub(super) fn transition(&mut self, temp: Temp, next: NodeState) {
        let prev = self.state(temp);
        if let Some(set) = self.node_set_mut(prev) {
            set.remove(&temp);
        }
        if prev == NodeState::OnStack {
            if self.select_stack.last() == Some(&temp) {
                self.select_stack.pop();
            } else {
                self.select_stack.retain(|&t| t != temp);
            }
        }
        if let Some(set) = self.node_set_mut(next) {
            set.insert(temp);
        }
        if next == NodeState::OnStack {
            self.select_stack.push(temp);
        }
        self.node_state.insert(temp, next);
    }

    pub(super) fn node_set_mut(&mut self, state: NodeState) -> Option<&mut BTreeSet<Temp>> {
        match state {
            NodeState::Simplify => Some(&mut self.simplify_worklist),
            NodeState::Freeze => Some(&mut self.freeze_worklist),
            NodeState::Spill => Some(&mut self.spill_worklist),
            NodeState::Spilled => Some(&mut self.spilled_nodes),
            NodeState::Coalesced => Some(&mut self.coalesced_nodes),
            NodeState::Colored => Some(&mut self.colored_nodes),
            NodeState::Initial | NodeState::OnStack => None,
        }
    }

    pub(super) fn set_move_state(&mut self, id: MoveId, next: MoveState) {
        match self.move_state[id.0] {
            MoveState::Worklist => {
                self.move_worklist.remove(&id);
            }
            MoveState::Active => {
                self.active_moves.remove(&id);
            }
            _ => {}
        }
        match next {
            MoveState::Worklist => {
                self.move_worklist.insert(id);
            }
            MoveState::Active => {
                self.active_moves.insert(id);
            }
            _ => {}
        }
        self.move_state[id.0] = next;
    }

    /// Neighbors that are neither on the select stack nor coalesced away
    pub(super) fn adjacent(&self, temp: Temp) -> Vec<Temp> {
        self.graph
            .adj_list
            .get(&temp)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&n| !matches!(self.state(n), NodeState::OnStack | NodeState::Coalesced))
            .collect()
    }

    /// Moves of `temp` that may still be coalesced
    pub(super) fn node_moves(&self, temp: Temp) -> Vec<MoveId> {
        self.graph
            .moves_for(temp)
            .filter(|id| {
                matches!(
                    self.move_state.get(id.0),
                    Some(MoveState::Worklist) | Some(MoveState::Active)
                )
            })
            .collect()
    }

    pub(super) fn is_move_related(&self, temp: Temp) -> bool {
        !self.node_moves(temp).is_empty()
    }

    /// Simplify: remove a low-degree non-move-related node
    pub(super) fn simplify(&mut self) {
        let Some(temp) = self.simplify_worklist.first().copied() else {
            return;
        };
        trace!("simplify {temp}");
        self.transition(temp, NodeState::OnStack);
        for neighbor in self.adjacent(temp) {
            self.decrement_degree(neighbor);
        }
    }

    /// Decrement degree when a neighbor leaves the graph
    pub(super) fn decrement_degree(&mut self, temp: Temp) {
        let old_degree = self.graph.degree(temp);
        if old_degree == 0 {
            return;
        }
        self.graph.degree.insert(temp, old_degree - 1);

        if old_degree == self.k {
            self.enable_moves(temp);
            for neighbor in self.adjacent(temp) {
                self.enable_moves(neighbor);
            }
            if self.state(temp) == NodeState::Spill {
                let next = if self.is_move_related(temp) {
                    NodeState::Freeze
                } else {
                    NodeState::Simplify
                };
                self.transition(temp, next);
            }
        }
    }

    /// Put the active moves of `temp` back on the move worklist
    pub(super) fn enable_moves(&mut self, temp: Temp) {
        for id in self.node_moves(temp) {
            if self.move_state[id.0] == MoveState::Active {
                self.set_move_state(id, MoveState::Worklist);
            }
        }
    }
}
