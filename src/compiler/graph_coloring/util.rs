use super::*;

impl GraphColoringAllocator {
    /// `v` is adjacent to `u` exactly when `u` is adjacent to `v`.
    pub(super) fn verify_symmetry(&self) -> Result<(), CompileError> {
        for (&u, neighbors) in &self.graph.adj_list {
            for &v in neighbors {
                let mirrored = self
                    .graph
                    .adj_list
                    .get(&v)
                    .is_some_and(|back| back.contains(&u));
                if !mirrored || !self.graph.interferes(u, v) {
                    return Err(CompileError::Internal(format!(
                        "interference edge {u} -- {v} is not symmetric"
                    )));
                }
            }
        }
        let listed: usize = self.graph.adj_list.values().map(BTreeSet::len).sum();
        if listed != 2 * self.graph.adj_set.len() {
            return Err(CompileError::Internal(format!(
                "adjacency lists hold {listed} entries for {} edges",
                self.graph.adj_set.len()
            )));
        }
        Ok(())
    }

    /// Every node sits in exactly the worklist its state names, and every
    /// move in exactly the move set its state names.
    pub(super) fn verify_partition(&self) -> Result<(), CompileError> {
        for &temp in &self.graph.nodes {
            let state = self.state(temp);
            let memberships = [
                (NodeState::Simplify, self.simplify_worklist.contains(&temp)),
                (NodeState::Freeze, self.freeze_worklist.contains(&temp)),
                (NodeState::Spill, self.spill_worklist.contains(&temp)),
                (NodeState::Spilled, self.spilled_nodes.contains(&temp)),
                (NodeState::Coalesced, self.coalesced_nodes.contains(&temp)),
                (NodeState::Colored, self.colored_nodes.contains(&temp)),
                (NodeState::OnStack, self.select_stack.contains(&temp)),
            ];
            let found: Vec<NodeState> = memberships
                .iter()
                .filter(|(_, member)| *member)
                .map(|(s, _)| *s)
                .collect();
            if found != [state] {
                return Err(CompileError::Internal(format!(
                    "{temp} is {state:?} but found in {found:?}"
                )));
            }
        }

        let classified = self.simplify_worklist.len()
            + self.freeze_worklist.len()
            + self.spill_worklist.len()
            + self.spilled_nodes.len()
            + self.coalesced_nodes.len()
            + self.colored_nodes.len()
            + self.select_stack.len();
        if classified != self.graph.nodes.len() {
            return Err(CompileError::Internal(format!(
                "{classified} classified nodes for {} temps",
                self.graph.nodes.len()
            )));
        }

        for (index, state) in self.move_state.iter().enumerate() {
            let id = MoveId(index);
            let in_worklist = self.move_worklist.contains(&id);
            let in_active = self.active_moves.contains(&id);
            let consistent = match state {
                MoveState::Worklist => in_worklist && !in_active,
                MoveState::Active => in_active && !in_worklist,
                _ => !in_worklist && !in_active,
            };
            if !consistent {
                return Err(CompileError::Internal(format!(
                    "move {index} is {state:?} but worklist={in_worklist} active={in_active}"
                )));
            }
        }
        Ok(())
    }

    /// No two interfering temps share a register.
    pub(super) fn verify_coloring(&self) -> Result<(), CompileError> {
        for &(u, v) in &self.graph.adj_set {
            if let (Some(cu), Some(cv)) = (self.color.get(&u), self.color.get(&v)) {
                if cu == cv {
                    return Err(CompileError::Internal(format!(
                        "interfering temps {u} and {v} both colored {cu}"
                    )));
                }
            }
        }
        for (&temp, reg) in &self.color {
            if usize::from(reg.0) >= self.k {
                return Err(CompileError::Internal(format!(
                    "{temp} colored {reg}, outside the {} allocatable registers",
                    self.k
                )));
            }
        }
        Ok(())
    }
}
