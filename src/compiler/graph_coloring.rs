//! Graph Coloring Register Allocator (Iterated Register Coalescing)
//!
//! One interference graph is built over every temporary of every function;
//! temporaries of different functions are never live together, so they
//! simply end up in disconnected components.
//!
//! ## Algorithm Overview (Appel's Iterated Register Coalescing)
//!
//! 1. **Build**: cliques over each instruction's live-in and live-out sets,
//!    plus def/live-out edges; every Move goes on the move worklist
//! 2. **Simplify**: push a low-degree non-move-related node on the select stack
//! 3. **Coalesce**: merge the ends of a move when the Briggs test allows it
//! 4. **Freeze**: give up coalescing the moves of a low-degree node
//! 5. **Spill**: push the heaviest high-degree node optimistically
//! 6. **Select**: pop the stack and hand out the lowest free color
//!
//! Anything left uncolored is returned as spilled; rewriting the program and
//! retrying is the driver's job.
//!
//! ## References
//!
//! - Briggs, P. et al. "Improvements to Graph Coloring Register Allocation" (1994)
//! - George, L. and Appel, A. "Iterated Register Coalescing" (1996)
//! - Appel, A. "Modern Compiler Implementation" Chapter 11

use std::collections::{BTreeSet, HashMap, HashSet};

use log::{debug, trace, warn};

use super::CompileError;
use super::asm::{Code, PhysReg, Temp};

/// Result of one allocation round
#[derive(Debug, Clone, Default)]
pub struct ColoringResult {
    /// Temp -> register, coalesced temps included
    pub colors: HashMap<Temp, PhysReg>,
    /// Temps that could not be colored this round
    pub spilled: BTreeSet<Temp>,
    /// Number of moves whose ends were merged
    pub coalesced_moves: usize,
}

/// Index of a Move instruction in [`InterferenceGraph::moves`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct MoveId(usize);

/// A move instruction that may be coalesced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Move {
    dst: Temp,
    src: Temp,
}

/// Interference graph for register allocation
struct InterferenceGraph {
    /// Every temporary mentioned anywhere
    nodes: BTreeSet<Temp>,
    /// Edge set with canonical `(low, high)` ordering
    adj_set: HashSet<(Temp, Temp)>,
    /// Adjacency lists, never shrunk once built
    adj_list: HashMap<Temp, BTreeSet<Temp>>,
    /// Current degree of each node
    degree: HashMap<Temp, usize>,
    /// Moves involving each node
    move_list: HashMap<Temp, BTreeSet<MoveId>>,
    /// Every Move instruction, in program order
    moves: Vec<Move>,
}

impl InterferenceGraph {
    fn new() -> Self {
        Self {
            nodes: BTreeSet::new(),
            adj_set: HashSet::new(),
            adj_list: HashMap::new(),
            degree: HashMap::new(),
            move_list: HashMap::new(),
            moves: Vec::new(),
        }
    }

    fn add_node(&mut self, temp: Temp) {
        if self.nodes.insert(temp) {
            self.adj_list.entry(temp).or_default();
            self.degree.entry(temp).or_insert(0);
        }
    }

    fn add_edge(&mut self, u: Temp, v: Temp) {
        if u == v {
            return;
        }
        if self.adj_set.insert(canonical(u, v)) {
            self.adj_list.entry(u).or_default().insert(v);
            self.adj_list.entry(v).or_default().insert(u);
            *self.degree.entry(u).or_insert(0) += 1;
            *self.degree.entry(v).or_insert(0) += 1;
        }
    }

    fn interferes(&self, u: Temp, v: Temp) -> bool {
        self.adj_set.contains(&canonical(u, v))
    }

    fn degree(&self, temp: Temp) -> usize {
        self.degree.get(&temp).copied().unwrap_or(0)
    }

    fn add_move(&mut self, dst: Temp, src: Temp) {
        let id = MoveId(self.moves.len());
        self.moves.push(Move { dst, src });
        self.move_list.entry(dst).or_default().insert(id);
        self.move_list.entry(src).or_default().insert(id);
    }

    fn moves_for(&self, temp: Temp) -> impl Iterator<Item = MoveId> + '_ {
        self.move_list
            .get(&temp)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }
}

fn canonical(u: Temp, v: Temp) -> (Temp, Temp) {
    if u < v { (u, v) } else { (v, u) }
}

/// Worklist membership of each node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum NodeState {
    /// Not yet categorized
    Initial,
    /// Low-degree, non-move-related
    Simplify,
    /// Low-degree, move-related
    Freeze,
    /// High-degree
    Spill,
    /// Could not be colored
    Spilled,
    /// Coalesced into another node
    Coalesced,
    /// On the select stack
    OnStack,
    /// Already colored
    Colored,
}

/// Move state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveState {
    /// Waiting to be considered
    Worklist,
    /// Ends merged
    Coalesced,
    /// Ends interfere
    Constrained,
    /// Gave up coalescing
    Frozen,
    /// Failed the conservative test, may be retried
    Active,
}

/// The main graph coloring allocator
pub struct GraphColoringAllocator {
    /// Number of available registers (K)
    k: usize,
    /// The interference graph
    graph: InterferenceGraph,
    /// State of each node
    node_state: HashMap<Temp, NodeState>,
    /// State of each move, indexed by [`MoveId`]
    move_state: Vec<MoveState>,
    simplify_worklist: BTreeSet<Temp>,
    freeze_worklist: BTreeSet<Temp>,
    spill_worklist: BTreeSet<Temp>,
    spilled_nodes: BTreeSet<Temp>,
    coalesced_nodes: BTreeSet<Temp>,
    colored_nodes: BTreeSet<Temp>,
    /// Moves ready to be considered for coalescing
    move_worklist: BTreeSet<MoveId>,
    /// Moves not yet ready for coalescing
    active_moves: BTreeSet<MoveId>,
    /// Nodes removed during simplify, to be colored
    select_stack: Vec<Temp>,
    /// Coalesced node -> the node it was merged into
    alias: HashMap<Temp, Temp>,
    /// Final coloring
    color: HashMap<Temp, PhysReg>,
    /// Live-in/live-out memberships per node
    spill_weight: HashMap<Temp, usize>,
    /// Temps introduced by spill rewriting; never chosen for spilling again
    no_spill: HashSet<Temp>,
}

#[path = "graph_coloring/build.rs"]
mod build;

#[path = "graph_coloring/util.rs"]
mod util;

#[path = "graph_coloring/worklist.rs"]
mod worklist;

#[path = "graph_coloring/coalesce.rs"]
mod coalesce;

#[path = "graph_coloring/coloring.rs"]
mod coloring;

impl GraphColoringAllocator {
    /// Create an allocator for `k` registers that never selects a temp in
    /// `no_spill` as a spill candidate unless nothing else is left.
    pub fn new(k: usize, no_spill: HashSet<Temp>) -> Self {
        Self {
            k,
            graph: InterferenceGraph::new(),
            node_state: HashMap::new(),
            move_state: Vec::new(),
            simplify_worklist: BTreeSet::new(),
            freeze_worklist: BTreeSet::new(),
            spill_worklist: BTreeSet::new(),
            spilled_nodes: BTreeSet::new(),
            coalesced_nodes: BTreeSet::new(),
            colored_nodes: BTreeSet::new(),
            move_worklist: BTreeSet::new(),
            active_moves: BTreeSet::new(),
            select_stack: Vec::new(),
            alias: HashMap::new(),
            color: HashMap::new(),
            spill_weight: HashMap::new(),
            no_spill,
        }
    }

    /// Run one full allocation round over `codes`, whose liveness must be current.
    pub fn allocate(&mut self, codes: &[Code]) -> Result<ColoringResult, CompileError> {
        if self.k == 0 {
            return Err(CompileError::InvalidConfig(
                "cannot color with zero registers".into(),
            ));
        }

        self.build(codes);
        self.verify_symmetry()?;

        self.make_worklist();
        self.verify_partition()?;

        // Main loop: simplify, coalesce, freeze, or select spill
        loop {
            if !self.simplify_worklist.is_empty() {
                self.simplify();
            } else if !self.move_worklist.is_empty() {
                self.coalesce();
            } else if !self.freeze_worklist.is_empty() {
                self.freeze();
            } else if !self.spill_worklist.is_empty() {
                self.select_spill();
            } else {
                break;
            }
        }
        self.verify_symmetry()?;
        self.verify_partition()?;

        self.assign_colors();
        self.verify_partition()?;
        self.verify_coloring()?;

        let coalesced_moves = self
            .move_state
            .iter()
            .filter(|&&s| s == MoveState::Coalesced)
            .count();
        debug!(
            "colored {} temps with k={}: {} spilled, {} of {} moves coalesced",
            self.colored_nodes.len() + self.coalesced_nodes.len(),
            self.k,
            self.spilled_nodes.len(),
            coalesced_moves,
            self.graph.moves.len()
        );

        Ok(ColoringResult {
            colors: self.color.clone(),
            spilled: self.spilled_nodes.clone(),
            coalesced_moves,
        })
    }
}

/// Convenience function to run one allocation round
pub fn color_program(
    codes: &[Code],
    k: usize,
    no_spill: &HashSet<Temp>,
) -> Result<ColoringResult, CompileError> {
    let mut allocator = GraphColoringAllocator::new(k, no_spill.clone());
    allocator.allocate(codes)
}
