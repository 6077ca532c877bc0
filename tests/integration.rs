//! End-to-end tests for the MMIX back end
//!
//! These drive whole functions through selection, liveness and allocation
//! via the public API and check the properties the emitter relies on.

use std::collections::HashMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use mmix_backend::compiler::asm::{AsmInstr, MachInst, PhysReg};
use mmix_backend::compiler::liveness::{self, FlowGraph};
use mmix_backend::compiler::CompilationUnit;
use mmix_backend::{
    AllocatedFunction, AllocatedProgram, BinOpKind, CodeChunk, CompileError, Expr, Frame, Label,
    Stmt, TargetConfig, Temp, compile,
};

const FP: Temp = Temp(0);
const RV: Temp = Temp(1);

fn t(n: u32) -> Expr {
    Expr::Temp(Temp(n))
}

fn function(name: &str, mut stmts: Vec<Stmt>) -> CodeChunk {
    let exit = Label::new(format!("{name}_exit"));
    stmts.push(Stmt::Jump(exit.clone()));
    CodeChunk {
        frame: Frame {
            label: Label::new(name),
            depth: 0,
            locals_size: 16,
            args_size: 0,
            size: 32,
            fp: FP,
            rv: RV,
        },
        entry: Label::new(name),
        exit,
        stmts,
    }
}

fn text(function: &AllocatedFunction) -> Vec<String> {
    function.instrs.iter().map(ToString::to_string).collect()
}

/// No def may share a register with anything else live past it.
fn assert_no_clobber(program: &AllocatedProgram) {
    for function in &program.functions {
        for instr in &function.code.instrs {
            let move_src = instr.move_pair().map(|(_, src)| src);
            for def in instr.defs() {
                let def_reg = program.colors[def];
                for live in &instr.live_out {
                    if live == def || Some(*live) == move_src {
                        continue;
                    }
                    assert_ne!(
                        program.colors[live], def_reg,
                        "`{instr}` clobbers {live} in {}",
                        function.frame.label
                    );
                }
            }
        }
    }
}

fn assert_registers_below(program: &AllocatedProgram, k: u8) {
    for function in &program.functions {
        for instr in &function.instrs {
            if let MachInst::Op { uses, defs, .. } = instr {
                for reg in uses.iter().chain(defs.iter()) {
                    assert!(reg.0 < k, "{reg} out of range in `{instr}`");
                }
            }
        }
    }
}

fn sum_of_five() -> CodeChunk {
    let mut stmts: Vec<Stmt> = (2..=6)
        .map(|n| Stmt::mov(t(n), Expr::Const(i64::from(n) * 10)))
        .collect();
    let sum = (3..=6).fold(t(2), |acc, n| Expr::binop(BinOpKind::Add, acc, t(n)));
    stmts.push(Stmt::mov(t(1), sum));
    function("sum", stmts)
}

fn counting_loop() -> CodeChunk {
    // i = 0; n = 10; while i < n { i = i + 1 }; return i
    function(
        "count",
        vec![
            Stmt::mov(t(2), Expr::Const(0)),
            Stmt::mov(t(3), Expr::Const(10)),
            Stmt::Label(Label::new("loop")),
            Stmt::CJump {
                cond: Expr::binop(BinOpKind::Lt, t(2), t(3)),
                pos: Label::new("body"),
                neg: Label::new("done"),
            },
            Stmt::Label(Label::new("body")),
            Stmt::mov(t(2), Expr::binop(BinOpKind::Add, t(2), Expr::Const(1))),
            Stmt::Jump(Label::new("loop")),
            Stmt::Label(Label::new("done")),
            Stmt::mov(t(1), t(2)),
        ],
    )
}

mod allocation {
    use super::*;

    /// Copies between non-interfering temporaries vanish with two registers
    #[test]
    fn test_coalesced_copies_need_no_spill() {
        let program = compile(
            &[function(
                "f",
                vec![
                    Stmt::mov(t(2), Expr::Const(5)),
                    Stmt::mov(t(3), Expr::binop(BinOpKind::Add, t(2), Expr::Const(3))),
                    Stmt::mov(t(1), t(3)),
                ],
            )],
            &TargetConfig::default().with_num_regs(2),
        )
        .unwrap();

        assert_eq!(program.stats.spilled, 0);
        assert_eq!(program.stats.rounds, 1);
        assert_eq!(
            text(&program.functions[0]),
            vec!["SETL $0,5", "ADD $0,$0,3", "JMP f_exit"]
        );
        assert_no_clobber(&program);
    }

    /// Five simultaneously live values cannot fit in two registers
    #[test]
    fn test_high_pressure_spills_to_frame_slots() {
        let program = compile(&[sum_of_five()], &TargetConfig::default().with_num_regs(2)).unwrap();

        assert!(program.stats.spilled > 0);
        assert!(program.stats.rounds > 1);
        let function = &program.functions[0];
        assert!(function.temp_size > 0);
        let code = text(function);
        assert!(code.iter().any(|s| s.starts_with("STO ")));
        assert!(code.iter().any(|s| s.starts_with("LDO ")));
        assert_registers_below(&program, 2);
        assert_no_clobber(&program);
    }

    /// The same function fits once enough registers are available
    #[test]
    fn test_enough_registers_avoid_spilling() {
        let program = compile(&[sum_of_five()], &TargetConfig::default().with_num_regs(8)).unwrap();
        assert_eq!(program.stats.spilled, 0);
        assert_eq!(program.functions[0].temp_size, 0);
        assert_registers_below(&program, 8);
        assert_no_clobber(&program);
    }

    /// Values on exclusive branches may share a register
    #[test]
    fn test_branch_values_share_a_register() {
        let program = compile(
            &[function(
                "f",
                vec![
                    Stmt::mov(t(2), Expr::Const(1)),
                    Stmt::CJump {
                        cond: t(2),
                        pos: Label::new("then"),
                        neg: Label::new("else"),
                    },
                    Stmt::Label(Label::new("then")),
                    Stmt::mov(t(3), Expr::Const(10)),
                    Stmt::mov(t(1), t(3)),
                    Stmt::Jump(Label::new("f_exit")),
                    Stmt::Label(Label::new("else")),
                    Stmt::mov(t(4), Expr::Const(20)),
                    Stmt::mov(t(1), t(4)),
                ],
            )],
            &TargetConfig::default().with_num_regs(2),
        )
        .unwrap();

        assert_eq!(program.stats.spilled, 0);
        assert_eq!(program.colors[&Temp(3)], program.colors[&Temp(4)]);
        assert_no_clobber(&program);
    }

    #[test]
    fn test_self_move_is_dropped() {
        let program = compile(
            &[function(
                "f",
                vec![
                    Stmt::mov(t(2), Expr::Const(1)),
                    Stmt::mov(t(2), t(2)),
                    Stmt::mov(t(1), t(2)),
                ],
            )],
            &TargetConfig::default(),
        )
        .unwrap();
        assert_eq!(text(&program.functions[0]), vec!["SETL $0,1", "JMP f_exit"]);
    }

    /// A loop keeps its counter and bound live around the back edge
    #[test]
    fn test_loop_allocates_without_spilling() {
        let program = compile(&[counting_loop()], &TargetConfig::default().with_num_regs(3)).unwrap();

        assert_eq!(program.stats.spilled, 0);
        assert_ne!(program.colors[&Temp(2)], program.colors[&Temp(3)]);
        let code = text(&program.functions[0]);
        assert!(code.contains(&"loop:".to_string()));
        assert!(code.iter().any(|s| s.starts_with("CMP ")));
        assert!(code.iter().any(|s| s.starts_with("ZSN ")));
        assert_registers_below(&program, 3);
        assert_no_clobber(&program);
    }

    /// Every function in a unit is allocated; calls use the register window
    #[test]
    fn test_caller_and_callee_are_both_allocated() {
        let callee = function(
            "g",
            vec![Stmt::mov(
                t(1),
                Expr::binop(
                    BinOpKind::Mul,
                    Expr::mem(Expr::binop(BinOpKind::Add, Expr::Temp(FP), Expr::Const(8))),
                    Expr::Const(2),
                ),
            )],
        );
        let caller = function(
            "f",
            vec![
                Stmt::mov(t(10), Expr::Const(4)),
                Stmt::mov(t(11), Expr::call(Label::new("g"), vec![t(10)])),
                Stmt::mov(t(1), Expr::binop(BinOpKind::Add, t(11), t(10))),
            ],
        );
        let program = compile(&[callee, caller], &TargetConfig::default().with_num_regs(4)).unwrap();

        assert_eq!(program.functions.len(), 2);
        assert_eq!(program.functions[0].frame.label, Label::new("g"));
        assert!(text(&program.functions[0]).contains(&"LDO $0,$253,8".to_string()));
        assert!(text(&program.functions[1]).contains(&"PUSHJ $4,g".to_string()));
        assert_registers_below(&program, 4);
        assert_no_clobber(&program);
    }

    #[test]
    fn test_every_surviving_temp_has_a_register() {
        let program = compile(
            &[sum_of_five(), counting_loop()],
            &TargetConfig::default().with_num_regs(3),
        )
        .unwrap();

        let registers: HashMap<Temp, PhysReg> = program.colors.clone();
        for function in &program.functions {
            for instr in &function.code.instrs {
                for temp in instr.uses().iter().chain(instr.defs()) {
                    assert!(registers.contains_key(temp), "{temp} has no register");
                }
            }
        }
        assert!(program.stats.spilled > 0);
        assert_no_clobber(&program);
    }

    #[test]
    fn test_spill_budget_is_reported() {
        let chunk = function(
            "f",
            vec![
                Stmt::mov(t(2), Expr::Const(1)),
                Stmt::mov(t(3), Expr::Const(2)),
                Stmt::mov(t(1), Expr::binop(BinOpKind::Sub, t(2), t(3))),
            ],
        );
        let config = TargetConfig::default()
            .with_num_regs(1)
            .with_max_spill_rounds(2);
        let err = compile(&[chunk], &config).expect_err("one register cannot hold two operands");
        assert!(matches!(err, CompileError::SpillLimit { rounds: 2 }));
        assert!(err.to_string().contains("2 spill rounds"));
    }
}

mod convergence {
    use super::*;

    /// Straight-line and if/else code over a handful of variables, with
    /// repeated writes, stores through the frame pointer and early returns.
    struct ProgramGen {
        rng: SmallRng,
        vars: Vec<u32>,
        labels: u32,
    }

    impl ProgramGen {
        fn new(seed: u64) -> Self {
            let mut rng = SmallRng::seed_from_u64(seed);
            let count = rng.gen_range(2..6);
            Self {
                rng,
                vars: (2..2 + count).collect(),
                labels: 0,
            }
        }

        fn var(&mut self) -> u32 {
            self.vars[self.rng.gen_range(0..self.vars.len())]
        }

        fn label(&mut self) -> Label {
            self.labels += 1;
            Label::new(format!("L{}", self.labels))
        }

        fn assign(&mut self, dst: u32, out: &mut Vec<Stmt>) {
            let roll: f64 = self.rng.r#gen();
            let src = if roll < 0.3 {
                Expr::Const(self.rng.gen_range(0..100))
            } else if roll < 0.5 {
                let c = self.rng.gen_range(1..50);
                Expr::binop(BinOpKind::Add, t(self.var()), Expr::Const(c))
            } else if roll < 0.8 {
                let op = [BinOpKind::Add, BinOpKind::Sub, BinOpKind::Mul][self.rng.gen_range(0..3)];
                Expr::binop(op, t(self.var()), t(self.var()))
            } else {
                t(self.var())
            };
            out.push(Stmt::mov(t(dst), src));
        }

        fn store(&mut self, var: u32, offset: i64, out: &mut Vec<Stmt>) {
            let addr = Expr::binop(BinOpKind::Add, Expr::Temp(FP), Expr::Const(offset));
            out.push(Stmt::mov(Expr::mem(addr), t(var)));
        }

        fn program(&mut self) -> CodeChunk {
            let mut out = Vec::new();
            for var in self.vars.clone() {
                let value = self.rng.gen_range(0..100);
                out.push(Stmt::mov(t(var), Expr::Const(value)));
            }
            if self.rng.gen_bool(0.5) {
                self.assign(1, &mut out);
            }

            for _ in 0..self.rng.gen_range(3..12) {
                let roll: f64 = self.rng.r#gen();
                if roll < 0.55 {
                    let dst = self.var();
                    self.assign(dst, &mut out);
                } else if roll < 0.7 {
                    let var = self.var();
                    let offset = 8 * self.rng.gen_range(1..5);
                    self.store(var, offset, &mut out);
                } else {
                    let (then, els, join) = (self.label(), self.label(), self.label());
                    out.push(Stmt::CJump {
                        cond: Expr::binop(BinOpKind::Lt, t(self.var()), t(self.var())),
                        pos: then.clone(),
                        neg: els.clone(),
                    });
                    out.push(Stmt::Label(then));
                    let dst = self.var();
                    self.assign(dst, &mut out);
                    out.push(Stmt::Jump(join.clone()));
                    out.push(Stmt::Label(els));
                    let dst = self.var();
                    self.assign(dst, &mut out);
                    if self.rng.gen_bool(0.3) {
                        self.assign(1, &mut out);
                        out.push(Stmt::Jump(Label::new("f_exit")));
                    }
                    out.push(Stmt::Label(join));
                }
            }

            let sum = Expr::binop(BinOpKind::Add, t(self.var()), t(self.var()));
            out.push(Stmt::mov(t(1), sum));
            for var in self.vars.clone() {
                if self.rng.gen_bool(0.5) {
                    self.store(var, 8 * i64::from(var), &mut out);
                }
            }
            function("f", out)
        }
    }

    /// No instruction these programs select needs more than two registers,
    /// so every one of them must allocate with two.
    #[test]
    fn test_random_programs_converge() {
        for seed in 0..300 {
            let chunk = ProgramGen::new(seed).program();
            for k in [2u8, 3] {
                let config = TargetConfig::default().with_num_regs(usize::from(k));
                let program = compile(std::slice::from_ref(&chunk), &config)
                    .unwrap_or_else(|err| panic!("seed {seed} with k={k}: {err}"));
                assert!(program.stats.rounds <= 8, "seed {seed}: {:?}", program.stats);
                assert_registers_below(&program, k);
                assert_no_clobber(&program);
            }
        }
    }
}

mod liveness_analysis {
    use super::*;

    fn analyzed(chunk: &CodeChunk) -> CompilationUnit {
        let mut unit = CompilationUnit::select(std::slice::from_ref(chunk)).unwrap();
        liveness::analyze_unit(&mut unit);
        unit
    }

    /// A second sweep over converged sets changes nothing
    #[test]
    fn test_fixpoint_is_stable() {
        for chunk in [sum_of_five(), counting_loop()] {
            let mut unit = analyzed(&chunk);
            let code = &mut unit.codes[0];
            let before: Vec<AsmInstr> = code.instrs.clone();
            let graph = FlowGraph::build(code);
            assert!(!liveness::iterate_once(code, &graph));
            assert_eq!(code.instrs, before);
        }
    }

    #[test]
    fn test_every_use_is_live_in() {
        for chunk in [sum_of_five(), counting_loop()] {
            let unit = analyzed(&chunk);
            for instr in &unit.codes[0].instrs {
                for temp in instr.uses() {
                    assert!(instr.live_in.contains(temp), "{temp} not live into `{instr}`");
                }
            }
        }
    }

    /// The loop bound stays live on the back edge
    #[test]
    fn test_loop_bound_is_live_across_back_edge() {
        let unit = analyzed(&counting_loop());
        let code = &unit.codes[0];
        let back_edge = code
            .instrs
            .iter()
            .find(|instr| instr.jumps() == [Label::new("loop")])
            .expect("loop has a back edge");
        assert!(back_edge.live_out.contains(&Temp(2)));
        assert!(back_edge.live_out.contains(&Temp(3)));
    }

    #[test]
    fn test_return_value_is_live_at_exit_jump() {
        let unit = analyzed(&counting_loop());
        let code = &unit.codes[0];
        let last = code.instrs.last().expect("function is not empty");
        assert_eq!(last.jumps(), [Label::new("count_exit")]);
        assert!(last.live_out.contains(&RV));
    }
}
