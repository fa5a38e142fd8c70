//! Block emitter.
//!
//! Emission runs in two passes. Planning maps every guest instruction to
//! templates and slot values and fails before anything is written if a
//! template is missing. Materialization then reserves the exact byte count,
//! copies and patches each template, and publishes the finished block.

use ppcjit_backend::{displacement, Instance, Relocator, Reserve};
use ppcjit_core::state::{self, crf};
use ppcjit_core::{
    BlockId, BranchCond, ExitSlot, GuestInsn, JitConfig, JitError, Op, OpClass, Result, Shape,
    SlotKind, Template, TemplateKey, TemplateRegistry, TerminalKind, Width, JUMP_CACHE_SIZE,
};
use tracing::{debug, warn};

use crate::{Engine, Stubs};

/// Value supplied for one template slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotValue {
    Imm(u64),
    /// Absolute host address.
    Host(usize),
    /// Buffer offset of a code-buffer stub.
    Stub(usize),
    /// Position of a label inside the block being emitted.
    Label(usize),
    /// Chained exit `k` of the block.
    Exit(usize),
}

use SlotValue::{Exit, Host, Imm, Label, Stub};

#[derive(Debug)]
enum Step {
    Emit {
        template: &'static Template,
        values: Vec<SlotValue>,
    },
    Label(usize),
}

/// Templates and values for one block, before any byte is written.
#[derive(Debug)]
struct Plan {
    steps: Vec<Step>,
    /// Guest PC of each chained exit.
    exits: Vec<u32>,
    labels: usize,
    terminal: TerminalKind,
    end_pc: u64,
    icount: u32,
}

impl Plan {
    fn size(&self) -> usize {
        self.steps
            .iter()
            .map(|s| match s {
                Step::Emit { template, .. } => template.len(),
                Step::Label(_) => 0,
            })
            .sum()
    }
}

struct Planner<'a, R: TemplateRegistry> {
    registry: &'a R,
    stubs: &'a Stubs,
    config: &'a JitConfig,
    reloc: &'a Relocator,
    /// Host range of the code buffer, for choosing the helper call form.
    code_range: (u64, u64),
    plan: Plan,
}

#[inline]
fn off(field: usize) -> SlotValue {
    Imm(field as u64)
}

#[inline]
fn gpr(r: u8) -> SlotValue {
    off(state::gpr(r))
}

#[inline]
fn simm(v: i16) -> SlotValue {
    Imm(u64::from(v as i32 as u32))
}

impl<R: TemplateRegistry> Planner<'_, R> {
    fn emit(&mut self, class: OpClass, shape: Shape, values: Vec<SlotValue>) -> Result<()> {
        let template = self.registry.get(TemplateKey::new(class, shape))?;
        assert_eq!(
            template.slots.len(),
            values.len(),
            "`{}` has {} slots, planned {}",
            template.name,
            template.slots.len(),
            values.len()
        );
        self.plan.steps.push(Step::Emit { template, values });
        Ok(())
    }

    fn label(&mut self) -> usize {
        let n = self.plan.labels;
        self.plan.labels += 1;
        n
    }

    fn place_label(&mut self, n: usize) {
        self.plan.steps.push(Step::Label(n));
    }

    fn store_imm(&mut self, field: usize, value: u32) -> Result<()> {
        if value == 0 {
            self.emit(OpClass::StoreImm, Shape::Zero, vec![off(field)])
        } else {
            self.emit(
                OpClass::StoreImm,
                Shape::Imm,
                vec![off(field), Imm(u64::from(value))],
            )
        }
    }

    fn move_field(&mut self, src: usize, dst: usize) -> Result<()> {
        self.emit(OpClass::Move, Shape::Reg, vec![off(src), off(dst)])
    }

    /// `dst = src <op> imm`, or a plain move when `imm` is zero.
    fn alu_imm(&mut self, class: OpClass, dst: u8, src: u8, imm: SlotValue) -> Result<()> {
        if imm == Imm(0) {
            self.emit(class, Shape::Zero, vec![gpr(src), gpr(dst)])
        } else {
            self.emit(class, Shape::Imm, vec![gpr(src), imm, gpr(dst)])
        }
    }

    fn alu_reg(&mut self, class: OpClass, dst: u8, a: u8, b: u8) -> Result<()> {
        self.emit(class, Shape::Reg, vec![gpr(a), gpr(b), gpr(dst)])
    }

    fn compare(
        &mut self,
        class: OpClass,
        field: u8,
        ra: u8,
        rhs: SlotValue,
        shape: Shape,
    ) -> Result<()> {
        assert!(field < 8, "cr field {field} out of range");
        self.emit(
            class,
            shape,
            vec![
                gpr(ra),
                rhs,
                Imm(u64::from(crf::shift(field))),
                off(state::CR),
                Imm(u64::from(crf::keep_mask(field))),
                off(state::CR),
            ],
        )
    }

    /// `pc = target`, poll the preemption word, then jump through a
    /// chainable exit.
    fn exit_to(&mut self, target: u32) -> Result<()> {
        self.store_imm(state::PC, target)?;
        self.preempt_check()?;
        let k = self.plan.exits.len();
        self.plan.exits.push(target);
        self.emit(OpClass::ChainJump, Shape::Direct, vec![Exit(k)])
    }

    fn preempt_check(&mut self) -> Result<()> {
        self.emit(
            OpClass::PreemptCheck,
            Shape::Fixed,
            vec![off(state::LINK_PREEMPT), Stub(self.stubs.preempt)],
        )
    }

    /// Leave through one of the dispatcher stubs with `pc = next`.
    fn leave_via(&mut self, stub: usize, next: u32) -> Result<()> {
        self.store_imm(state::PC, next)?;
        self.emit(OpClass::ChainJump, Shape::Direct, vec![Stub(stub)])
    }

    fn indirect(&mut self, src: usize) -> Result<()> {
        self.emit(
            OpClass::IndirectTarget,
            Shape::Reg,
            vec![off(src), off(state::PC)],
        )?;
        self.preempt_check()?;
        self.emit(
            OpClass::IndirectLookup,
            Shape::Fixed,
            vec![
                off(state::PC),
                Imm((JUMP_CACHE_SIZE - 1) as u64),
                off(state::LINK_JUMP_CACHE),
                Stub(self.stubs.dispatch),
            ],
        )
    }

    fn call_interpreter(&mut self, pc: u32, handler: usize, opcode: u32) -> Result<()> {
        self.store_imm(state::PC, pc)?;
        let (lo, hi) = self.code_range;
        let target = handler as u64;
        let near = displacement(lo, target, Width::W32).is_ok()
            && displacement(hi, target, Width::W32).is_ok();
        let shape = if near { Shape::Direct } else { Shape::Absolute };
        self.emit(
            OpClass::CallHelper,
            shape,
            vec![Imm(u64::from(opcode)), Host(handler)],
        )
    }

    fn insn(&mut self, insn: &GuestInsn) -> Result<()> {
        let next = insn.pc.wrapping_add(4);
        match insn.op {
            Op::Li { rd, simm: v } => self.store_imm(state::gpr(rd), v as i32 as u32)?,
            Op::Addi { rd, ra: 0, simm: v } => self.store_imm(state::gpr(rd), v as i32 as u32)?,
            Op::Addi { rd, ra, simm: v } => self.alu_imm(OpClass::AddImm, rd, ra, simm(v))?,
            Op::Add { rd, ra, rb } => self.alu_reg(OpClass::Add, rd, ra, rb)?,
            Op::Subf { rd, ra, rb } => self.alu_reg(OpClass::Subf, rd, rb, ra)?,
            Op::Mullw { rd, ra, rb } => self.alu_reg(OpClass::Mullw, rd, ra, rb)?,
            Op::And { ra, rs, rb } => self.alu_reg(OpClass::And, ra, rs, rb)?,
            Op::Or { ra, rs, rb } => self.alu_reg(OpClass::Or, ra, rs, rb)?,
            Op::Xor { ra, rs, rb } => self.alu_reg(OpClass::Xor, ra, rs, rb)?,
            Op::Ori { ra, rs, uimm } => {
                self.alu_imm(OpClass::OrImm, ra, rs, Imm(u64::from(uimm)))?
            }
            Op::Xori { ra, rs, uimm } => {
                self.alu_imm(OpClass::XorImm, ra, rs, Imm(u64::from(uimm)))?
            }
            Op::Lwz { rd, ra: 0, d } => self.load_abs(rd, d as i32 as u32)?,
            Op::Lwz { rd, ra, d } => {
                self.emit(OpClass::LoadWord, Shape::Imm, vec![gpr(ra), simm(d), gpr(rd)])?
            }
            Op::Stw { rs, ra: 0, d } => self.store_abs(rs, d as i32 as u32)?,
            Op::Stw { rs, ra, d } => {
                self.emit(OpClass::StoreWord, Shape::Imm, vec![gpr(ra), simm(d), gpr(rs)])?
            }
            Op::LwzAbs { rd, addr } => self.load_abs(rd, addr)?,
            Op::StwAbs { rs, addr } => self.store_abs(rs, addr)?,
            Op::Cmpw { crf, ra, rb } => {
                self.compare(OpClass::Compare, crf, ra, gpr(rb), Shape::Reg)?
            }
            Op::Cmplw { crf, ra, rb } => {
                self.compare(OpClass::CompareLogical, crf, ra, gpr(rb), Shape::Reg)?
            }
            Op::Cmpwi { crf, ra, simm: v } => {
                self.compare(OpClass::Compare, crf, ra, simm(v), Shape::Imm)?
            }
            Op::Cmplwi { crf, ra, uimm } => self.compare(
                OpClass::CompareLogical,
                crf,
                ra,
                Imm(u64::from(uimm)),
                Shape::Imm,
            )?,
            Op::Mtctr { rs } => self.move_field(state::gpr(rs), state::CTR)?,
            Op::Mtlr { rs } => self.move_field(state::gpr(rs), state::LR)?,
            Op::Mfctr { rd } => self.move_field(state::CTR, state::gpr(rd))?,
            Op::Mflr { rd } => self.move_field(state::LR, state::gpr(rd))?,
            Op::CallInterpreter { handler, opcode } => {
                self.call_interpreter(insn.pc, handler as usize, opcode)?
            }

            Op::B { target } => {
                self.plan.terminal = TerminalKind::Chained;
                self.exit_to(target)?;
            }
            Op::Bl { target } => {
                self.plan.terminal = TerminalKind::Chained;
                self.store_imm(state::LR, next)?;
                self.exit_to(target)?;
            }
            Op::Bc { cond, target } => {
                self.plan.terminal = TerminalKind::Chained;
                let fallthrough = self.label();
                match cond {
                    BranchCond::DecCtrNonZero => self.emit(
                        OpClass::CondBranch,
                        Shape::CtrNonZero,
                        vec![off(state::CTR), Label(fallthrough)],
                    )?,
                    BranchCond::CrSet(bi) | BranchCond::CrClear(bi) => {
                        assert!(bi < 32, "cr bit {bi} out of range");
                        let shape = if matches!(cond, BranchCond::CrSet(_)) {
                            Shape::CrSet
                        } else {
                            Shape::CrClear
                        };
                        self.emit(
                            OpClass::CondBranch,
                            shape,
                            vec![off(state::CR), Imm(u64::from(crf::bit(bi))), Label(fallthrough)],
                        )?
                    }
                }
                self.exit_to(target)?;
                self.place_label(fallthrough);
                self.exit_to(next)?;
            }
            Op::Blr => {
                self.plan.terminal = TerminalKind::Indirect;
                self.indirect(state::LR)?;
            }
            Op::Bctr => {
                self.plan.terminal = TerminalKind::Indirect;
                self.indirect(state::CTR)?;
            }
            Op::Sc => {
                self.plan.terminal = TerminalKind::Dispatcher;
                self.leave_via(self.stubs.syscall, next)?;
            }
            Op::Icbi { ra, rb } => {
                self.plan.terminal = TerminalKind::Dispatcher;
                if ra == 0 {
                    self.move_field(state::gpr(rb), state::ICBI_EA)?;
                } else {
                    self.emit(
                        OpClass::Add,
                        Shape::Reg,
                        vec![gpr(ra), gpr(rb), off(state::ICBI_EA)],
                    )?;
                }
                self.leave_via(self.stubs.invalidate, next)?;
            }
        }
        Ok(())
    }

    fn load_abs(&mut self, rd: u8, addr: u32) -> Result<()> {
        let key = TemplateKey::new(OpClass::LoadWordAbs, Shape::Absolute);
        match self.reachable_host(key, addr)? {
            Some(host) => {
                self.emit(OpClass::LoadWordAbs, Shape::Absolute, vec![Host(host), gpr(rd)])
            }
            None => self.emit(
                OpClass::LoadWord,
                Shape::Absolute,
                vec![Imm(u64::from(addr)), gpr(rd)],
            ),
        }
    }

    fn store_abs(&mut self, rs: u8, addr: u32) -> Result<()> {
        let key = TemplateKey::new(OpClass::StoreWordAbs, Shape::Absolute);
        match self.reachable_host(key, addr)? {
            Some(host) => {
                self.emit(OpClass::StoreWordAbs, Shape::Absolute, vec![gpr(rs), Host(host)])
            }
            None => self.emit(
                OpClass::StoreWord,
                Shape::Absolute,
                vec![Imm(u64::from(addr)), gpr(rs)],
            ),
        }
    }

    /// Host address of `addr` when the canonical-address slot of `key` can
    /// encode it. `None` means the access must index region A at run time,
    /// which wraps the guest address mod 2^32. Kernel window addresses have
    /// no such fallback.
    fn reachable_host(&self, key: TemplateKey, addr: u32) -> Result<Option<usize>> {
        let width = self
            .registry
            .get(key)?
            .slots
            .iter()
            .find_map(|s| match s.kind {
                SlotKind::CanonicalAddress { width, .. } => Some(width),
                _ => None,
            })
            .unwrap_or(Width::W32);
        let host = self.config.host_addr(addr);
        match self.reloc.canonical(host as u64, width) {
            Ok(_) => Ok(Some(host)),
            Err(err) if self.config.kernel_window.is_some_and(|w| w.contains(addr)) => Err(err),
            Err(_) => Ok(None),
        }
    }
}

impl<R: TemplateRegistry> Engine<R> {
    /// Translate `insns` into a block entered at `pc` and publish it.
    ///
    /// Instructions after the first terminal are ignored. A sequence with
    /// no terminal falls through to the instruction after the last one.
    pub fn emit_block(&mut self, pc: u32, insns: &[GuestInsn]) -> Result<BlockId> {
        let plan = self.plan(pc, insns)?;
        let size = plan.size();

        if self.buf.reserve(size)? == Reserve::Flushed {
            warn!(pc, size, "code buffer exhausted");
            self.flush("capacity");
        } else if let Some(old) = self.cache.lookup(pc) {
            self.invalidate_blocks(&[old])?;
        }

        let id = self.cache.alloc(pc, plan.end_pc, plan.icount);
        let start = self.buf.offset();
        if let Err(err) = self.materialize(id, &plan) {
            self.buf.rewind(start);
            self.cache.discard(id);
            return Err(err);
        }

        let host_size = self.buf.offset() - start;
        self.buf.sync_icache(start, host_size);
        {
            let block = self.cache.get_mut(id);
            block.host_offset = start;
            block.host_size = host_size;
            block.terminal = plan.terminal;
        }
        self.cache.publish(id);
        self.stats.blocks_translated += 1;
        self.stats.insns_translated += u64::from(plan.icount);
        debug!(
            pc,
            end = plan.end_pc,
            icount = plan.icount,
            host_offset = start,
            host_size,
            "translated block"
        );

        if self.config.direct_chaining {
            for exit in 0..plan.exits.len() {
                let target = plan.exits[exit];
                match self.cache.lookup(target) {
                    Some(dst) => self.link(id, exit, dst)?,
                    None => self.chains.add(target, id, exit),
                }
            }
            self.resolve_pending(id)?;
        }
        Ok(id)
    }

    fn plan(&self, pc: u32, insns: &[GuestInsn]) -> Result<Plan> {
        let len = insns
            .iter()
            .position(|i| i.op.is_terminal())
            .map_or(insns.len(), |t| t + 1);
        let insns = &insns[..len];
        let Some(last) = insns.last() else {
            return Err(JitError::EmptyBlock { pc });
        };

        let base = self.buf.addr_at(0) as u64;
        let mut planner = Planner {
            registry: &self.registry,
            stubs: &self.stubs,
            config: &self.config,
            reloc: &self.reloc,
            code_range: (base, base + self.buf.capacity() as u64),
            plan: Plan {
                steps: Vec::with_capacity(insns.len() * 2 + 4),
                exits: Vec::new(),
                labels: 0,
                terminal: TerminalKind::Chained,
                end_pc: u64::from(last.pc) + 4,
                icount: insns.len() as u32,
            },
        };
        for insn in insns {
            planner.insn(insn)?;
        }
        if !last.op.is_terminal() {
            planner.exit_to(last.pc.wrapping_add(4))?;
        }
        Ok(planner.plan)
    }

    /// Write every step of `plan` at the cursor and record the exits of
    /// block `id`. The buffer has room for the whole plan.
    fn materialize(&mut self, id: BlockId, plan: &Plan) -> Result<()> {
        let mut instances: Vec<Instance> = Vec::with_capacity(plan.steps.len());
        let mut labels: Vec<Option<usize>> = vec![None; plan.labels];
        let mut forward: Vec<(usize, usize, usize)> = Vec::new();
        let mut exits = Vec::with_capacity(plan.exits.len());
        let dispatch = self.buf.addr_at(self.stubs.dispatch) as u64;

        for step in &plan.steps {
            let (template, values) = match step {
                Step::Label(n) => {
                    labels[*n] = Some(self.buf.offset());
                    continue;
                }
                Step::Emit { template, values } => (*template, values),
            };
            let mut inst = self.reloc.place(&mut self.buf, template);
            for (slot, value) in values.iter().enumerate() {
                let raw = match *value {
                    Imm(v) => v,
                    Host(addr) => addr as u64,
                    Stub(offset) => self.buf.addr_at(offset) as u64,
                    Label(n) => {
                        forward.push((instances.len(), slot, n));
                        continue;
                    }
                    Exit(k) => {
                        exits.push(ExitSlot {
                            target_pc: plan.exits[k],
                            site: inst.branch_site(slot),
                            linked: None,
                        });
                        dispatch
                    }
                };
                self.reloc.patch(&mut self.buf, &mut inst, slot, raw)?;
            }
            instances.push(inst);
        }

        for (i, slot, n) in forward {
            let Some(at) = labels[n] else {
                panic!("label {n} used but never placed");
            };
            let target = self.buf.addr_at(at) as u64;
            self.reloc.patch(&mut self.buf, &mut instances[i], slot, target)?;
        }

        for inst in &instances {
            inst.seal();
        }
        self.cache.get_mut(id).exits = exits;
        Ok(())
    }
}
