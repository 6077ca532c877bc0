use super::*;

impl GraphColoringAllocator {
    /// Freeze: give up coalescing on a move-related node
    pub(super) fn freeze(&mut self) {
        let Some(temp) = self.freeze_worklist.first().copied() else {
            return;
        };
        trace!("freeze {temp}");
        self.transition(temp, NodeState::Simplify);
        self.freeze_moves(temp);
    }

    /// Freeze all moves involving a node
    pub(super) fn freeze_moves(&mut self, temp: Temp) {
        let rep = self.get_alias(temp);
        for id in self.node_moves(temp) {
            let mv = self.graph.moves[id.0];
            let other = if self.get_alias(mv.src) == rep {
                self.get_alias(mv.dst)
            } else {
                self.get_alias(mv.src)
            };
            self.set_move_state(id, MoveState::Frozen);

            if self.state(other) == NodeState::Freeze
                && !self.is_move_related(other)
                && self.graph.degree(other) < self.k
            {
                self.transition(other, NodeState::Simplify);
            }
        }
    }

    /// Select a node to spill: the one with the most live-set memberships.
    ///
    /// This is the reverse of the usual cheapest-first heuristic and can cost
    /// extra rounds. Temps created by earlier spill rewrites are skipped
    /// while anything else is available.
    pub(super) fn select_spill(&mut self) {
        let preferred = self.heaviest(
            self.spill_worklist
                .iter()
                .copied()
                .filter(|t| !self.no_spill.contains(t)),
        );
        let choice = preferred.or_else(|| {
            let fallback = self.heaviest(self.spill_worklist.iter().copied());
            if let Some(temp) = fallback {
                warn!("every spill candidate was introduced by spilling; choosing {temp} anyway");
            }
            fallback
        });

        if let Some(temp) = choice {
            trace!("potential spill {temp}");
            self.transition(temp, NodeState::Simplify);
            self.freeze_moves(temp);
        }
    }

    /// Highest spill weight; equal weights prefer the lower-numbered temp
    fn heaviest(&self, candidates: impl Iterator<Item = Temp>) -> Option<Temp> {
        candidates.max_by(|a, b| {
            let wa = self.spill_weight.get(a).copied().unwrap_or(0);
            let wb = self.spill_weight.get(b).copied().unwrap_or(0);
            wa.cmp(&wb).then_with(|| b.cmp(a))
        })
    }

    /// Assign colors (registers) to nodes
    pub(super) fn assign_colors(&mut self) {
        while let Some(&temp) = self.select_stack.last() {
            let mut ok_colors: BTreeSet<u8> = (0..self.k).map(|c| c as u8).collect();

            let neighbors: Vec<Temp> = self
                .graph
                .adj_list
                .get(&temp)
                .into_iter()
                .flatten()
                .copied()
                .collect();
            for neighbor in neighbors {
                let alias = self.get_alias(neighbor);
                if self.state(alias) == NodeState::Colored {
                    if let Some(reg) = self.color.get(&alias) {
                        ok_colors.remove(&reg.0);
                    }
                }
            }

            match ok_colors.first() {
                Some(&c) => {
                    self.color.insert(temp, PhysReg(c));
                    self.transition(temp, NodeState::Colored);
                }
                None => {
                    trace!("actual spill {temp}");
                    self.transition(temp, NodeState::Spilled);
                }
            }
        }

        let coalesced: Vec<Temp> = self.coalesced_nodes.iter().copied().collect();
        for temp in coalesced {
            let alias = self.get_alias(temp);
            if let Some(&reg) = self.color.get(&alias) {
                self.color.insert(temp, reg);
            }
        }
    }
}
