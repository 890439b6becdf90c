//! x86-64 instruction decoding helpers: trampoline chains, the stylised
//! function prologue, the cached-call skeleton, and argument marshalling.
//!
//! Every helper here advances a decoder cursor linearly and fails on any
//! instruction it does not recognise; callers turn a [`DisasmError`] into
//! an `UnparsableFunction` artefact rather than propagating it, except
//! where the caller has decided a deviation is a cross-check failure.

use iced_x86::{Code, Decoder, DecoderOptions, Instruction, InstructionInfoFactory, Register};

use crate::error::{DisasmError, DisasmResult};
use crate::image::Image;

const DECODE_WINDOW: usize = 0x1000;

/// Registers used for the first four integer/pointer arguments under the
/// Microsoft x64 calling convention.
pub const ARG_REGS: [Register; 4] = [Register::RCX, Register::RDX, Register::R8, Register::R9];

fn arg_reg_index(reg: Register) -> Option<usize> {
    ARG_REGS.iter().position(|&r| r == reg)
}

/// A decoder cursor anchored at an RVA inside an [`Image`], re-windowed
/// lazily as it's re-seated by [`CodeCursor::jump`].
pub struct CodeCursor<'a> {
    image: &'a Image,
    decoder: Decoder<'a>,
    info_factory: InstructionInfoFactory,
}

impl<'a> CodeCursor<'a> {
    pub fn new(image: &'a Image, addr: u64) -> DisasmResult<Self> {
        let bytes = image.code_window(addr, DECODE_WINDOW)?;
        let decoder = Decoder::with_ip(64, bytes, addr, DecoderOptions::NONE);
        Ok(CodeCursor {
            image,
            decoder,
            info_factory: InstructionInfoFactory::new(),
        })
    }

    pub fn addr(&self) -> u64 {
        self.decoder.ip()
    }

    /// Re-seats the decoder at `addr`, discarding whatever window it had.
    pub fn jump(&mut self, addr: u64) -> DisasmResult<()> {
        let bytes = self.image.code_window(addr, DECODE_WINDOW)?;
        self.decoder = Decoder::with_ip(64, bytes, addr, DecoderOptions::NONE);
        Ok(())
    }

    fn next(&mut self) -> Instruction {
        self.decoder.decode()
    }

    fn next_checked(&mut self, context: &'static str) -> DisasmResult<Instruction> {
        let inst = self.next();
        if inst.code() == Code::INVALID {
            return Err(DisasmError::UnexpectedInstruction {
                ip: inst.ip(),
                code: "INVALID".to_string(),
                context,
            });
        }
        Ok(inst)
    }

    fn expect(&mut self, code: Code, context: &'static str) -> DisasmResult<Instruction> {
        let inst = self.next_checked(context)?;
        if inst.code() != code {
            return Err(DisasmError::UnexpectedInstruction {
                ip: inst.ip(),
                code: format!("{:?}", inst.code()),
                context,
            });
        }
        Ok(inst)
    }
}

/// A single `JMP rel32` hop recorded while walking a trampoline chain.
#[derive(Debug, Clone, Copy)]
pub struct TrampolineHop {
    pub at_rva: u64,
    pub target_rva: u64,
}

/// Walks zero or more consecutive `JMP rel32` instructions starting at
/// `addr`, returning the hops taken and the RVA of the first non-jump
/// instruction (the real function entry).
pub fn parse_trampolines(image: &Image, addr: u64) -> DisasmResult<(Vec<TrampolineHop>, u64)> {
    let mut cursor = CodeCursor::new(image, addr)?;
    let mut hops = Vec::new();
    loop {
        let inst = cursor.next_checked("trampoline chain")?;
        if inst.code() == Code::Jmp_rel32_64 {
            let target = inst.near_branch_target();
            hops.push(TrampolineHop { at_rva: inst.ip(), target_rva: target });
            cursor.jump(target)?;
            continue;
        }
        return Ok((hops, inst.ip()));
    }
}

/// Stylised function prologue: optional `MOV R11,RSP`, zero or more
/// `PUSH r64`, zero or more reordered `LEA r64,[mem]`, then either
/// `SUB RSP,imm8/imm32` or the `_chkstk` form.
#[derive(Debug, Clone, Copy)]
pub struct Prologue {
    pub stack_size: i64,
    pub stack_save_reg: Option<Register>,
}

pub fn parse_fn_prelude(cursor: &mut CodeCursor<'_>) -> DisasmResult<Prologue> {
    let mut inst = cursor.next_checked("function prelude")?;

    let mut stack_save_reg = None;
    if inst.code() == Code::Mov_r64_rm64 && inst.op1_register() == Register::RSP {
        stack_save_reg = Some(inst.op0_register());
        inst = cursor.next_checked("function prelude")?;
    }

    while inst.code() == Code::Push_r64 {
        inst = cursor.next_checked("function prelude")?;
    }

    while inst.code() == Code::Lea_r64_m {
        inst = cursor.next_checked("function prelude")?;
    }

    let stack_size = if inst.code() == Code::Mov_r32_imm32 && inst.op0_register() == Register::RAX {
        let size = inst.immediate32() as i64;
        let call = cursor.expect(Code::Call_rel32_64, "chkstk call")?;
        let _ = call;
        let sub = cursor.expect(Code::Sub_r64_rm64, "chkstk epilogue")?;
        if sub.op0_register() != Register::RSP || sub.op1_register() != Register::RAX {
            return Err(DisasmError::UnexpectedInstruction {
                ip: sub.ip(),
                code: format!("{:?}", sub.code()),
                context: "chkstk epilogue",
            });
        }
        size
    } else if inst.code() == Code::Sub_rm64_imm8 {
        inst.immediate8() as i64
    } else if inst.code() == Code::Sub_rm64_imm32 {
        inst.immediate32() as i64
    } else {
        return Err(DisasmError::UnexpectedInstruction {
            ip: inst.ip(),
            code: format!("{:?}", inst.code()),
            context: "function prelude",
        });
    };

    Ok(Prologue { stack_size, stack_save_reg })
}

/// A recovered call with its marshalled arguments, in calling-convention
/// order, and the target RVA of the final `CALL rel32`.
#[derive(Debug, Clone)]
pub struct GatheredCall {
    pub target_rva: u64,
    pub arguments: Vec<u64>,
}

/// Parses the argument-marshalling block up to and including the final
/// `CALL rel32`, tracking a small register file as described in the
/// disassembler component design.
pub fn gather_call_params(
    cursor: &mut CodeCursor<'_>,
    stack_size: i64,
    stack_save_reg: Option<Register>,
) -> DisasmResult<GatheredCall> {
    let mut regs: std::collections::HashMap<Register, u64> = std::collections::HashMap::new();
    const FAKE_STACK_BOTTOM: u64 = 0x1000_0000_0000_0000;
    regs.insert(Register::RSP, FAKE_STACK_BOTTOM);
    if let Some(reg) = stack_save_reg {
        regs.insert(reg, FAKE_STACK_BOTTOM + stack_size as u64);
    }

    // (value, size_bytes, slot); slot is sorted descending, negative
    // slots are dropped.
    let mut entries: Vec<(u64, u8, i64)> = Vec::new();

    loop {
        let inst = cursor.next_checked("argument marshalling")?;
        if inst.code() == Code::Call_rel32_64 {
            let target = inst.near_branch_target();
            entries.sort_by(|a, b| b.2.cmp(&a.2));
            let arguments = entries.into_iter().filter(|e| e.2 >= 0).map(|e| e.0).collect();
            return Ok(GatheredCall { target_rva: target, arguments });
        }

        let info = cursor.info_factory.info(&inst);

        match inst.code() {
            Code::Lea_r64_m => {
                let value = inst.memory_displacement64();
                let reg = info.used_registers()[0].register();
                regs.insert(reg, value);
                if let Some(idx) = arg_reg_index(reg) {
                    entries.push((value, 8, 0xFFFF - idx as i64));
                } else if reg == Register::RAX {
                    let follow = cursor.next_checked("argument marshalling")?;
                    if follow.code() != Code::Mov_rm64_r64 {
                        return Err(DisasmError::UnexpectedInstruction {
                            ip: follow.ip(),
                            code: format!("{:?}", follow.code()),
                            context: "argument marshalling (LEA RAX follow-up)",
                        });
                    }
                    let follow_info = cursor.info_factory.info(&follow);
                    let mem = follow_info.used_memory()[0];
                    if mem.base() != Register::R11 {
                        return Err(DisasmError::UnexpectedInstruction {
                            ip: follow.ip(),
                            code: format!("{:?}", follow.code()),
                            context: "argument marshalling (expected [R11+disp])",
                        });
                    }
                    let slot = -(mem.displacement() as i64);
                    entries.push((value, 8, slot));
                } else {
                    return Err(DisasmError::UnexpectedInstruction {
                        ip: inst.ip(),
                        code: format!("{:?}", inst.code()),
                        context: "argument marshalling (LEA into unexpected register)",
                    });
                }
            }
            Code::Mov_rm64_imm32 => {
                let mem = info.used_memory()[0];
                if mem.base() != Register::R11 {
                    return Err(DisasmError::UnexpectedInstruction {
                        ip: inst.ip(),
                        code: format!("{:?}", inst.code()),
                        context: "argument marshalling (MOV qword [R11+disp],imm32)",
                    });
                }
                let slot = -(mem.displacement() as i64);
                let value = inst.immediate32() as i32 as i64 as u64;
                entries.push((value, 8, slot));
            }
            Code::Mov_rm32_imm32 => {
                let mem = info.used_memory()[0];
                let value = inst.immediate32() as u64;
                if mem.base() == Register::R11 {
                    let slot = -(mem.displacement() as i64);
                    entries.push((value, 4, slot));
                } else if mem.base() == Register::RSP {
                    let slot = stack_size - mem.displacement() as i64;
                    entries.push((value, 4, slot));
                } else {
                    return Err(DisasmError::UnexpectedInstruction {
                        ip: inst.ip(),
                        code: format!("{:?}", inst.code()),
                        context: "argument marshalling (MOV dword [base+disp],imm32)",
                    });
                }
            }
            Code::Mov_rm64_r64 => {
                let mem = info.used_memory()[0];
                let src_reg = info.used_registers()[1].register();
                let value = *regs.get(&src_reg).unwrap_or(&0);
                if mem.base() == Register::R11 {
                    let slot = -(mem.displacement() as i64);
                    entries.push((value, 8, slot));
                } else if mem.base() == Register::RSP {
                    let slot = stack_size - mem.displacement() as i64;
                    entries.push((value, 8, slot));
                } else {
                    return Err(DisasmError::UnexpectedInstruction {
                        ip: inst.ip(),
                        code: format!("{:?}", inst.code()),
                        context: "argument marshalling (MOV [base+disp],r64)",
                    });
                }
            }
            Code::Mov_r64_imm64 => {
                let reg = info.used_registers()[0].register();
                let value = inst.immediate64();
                if let Some(idx) = arg_reg_index(reg) {
                    entries.push((value, 8, 0xFFFF - idx as i64));
                } else {
                    regs.insert(reg, value);
                }
            }
            other => {
                return Err(DisasmError::UnexpectedInstruction {
                    ip: inst.ip(),
                    code: format!("{:?}", other),
                    context: "argument marshalling",
                });
            }
        }
    }
}

/// Result of parsing the lazy-cache/construct pattern: a cache-variable
/// RVA, the constructor that was called, its marshalled arguments, and
/// the RVA just past the last instruction consumed (best-effort if the
/// epilogue deviated from the expected shape).
#[derive(Debug, Clone)]
pub struct CachedCall {
    pub cache_rva: u64,
    pub called_fn_rva: u64,
    pub arguments: Vec<u64>,
    pub end_rva: u64,
}

/// Parses the prologue, the cached-call skeleton (either form), the
/// argument-marshalling block, and — best-effort — the epilogue. A
/// leading `CALL rel32` instead of a cache check means this function is
/// a redirect; it is followed recursively.
pub fn parse_cached_call(image: &Image, addr: u64) -> DisasmResult<CachedCall> {
    let mut cursor = CodeCursor::new(image, addr)?;
    let prologue = parse_fn_prelude(&mut cursor)?;

    let inst = cursor.next_checked("cached-call skeleton")?;

    if inst.code() == Code::Call_rel32_64 {
        return parse_cached_call(image, inst.near_branch_target());
    }

    let cache_rva = if inst.code() == Code::Mov_r64_rm64 {
        let cache_rva = inst.memory_displacement64();
        cursor.expect(Code::Test_rm64_r64, "cached-call skeleton (form 1)")?;
        let jne = cursor.next_checked("cached-call skeleton (form 1)")?;
        if !matches!(jne.code(), Code::Jne_rel8_64 | Code::Jne_rel32_64) {
            return Err(DisasmError::UnexpectedInstruction {
                ip: jne.ip(),
                code: format!("{:?}", jne.code()),
                context: "cached-call skeleton (form 1 JNE)",
            });
        }
        cache_rva
    } else if inst.code() == Code::Cmp_rm64_imm8 {
        let cache_rva = inst.memory_displacement64();
        let jnz = cursor.next_checked("cached-call skeleton (form 2)")?;
        if !matches!(jnz.code(), Code::Jne_rel8_64 | Code::Jne_rel32_64) {
            return Err(DisasmError::UnexpectedInstruction {
                ip: jnz.ip(),
                code: format!("{:?}", jnz.code()),
                context: "cached-call skeleton (form 2 JNZ)",
            });
        }
        cache_rva
    } else {
        return Err(DisasmError::UnexpectedInstruction {
            ip: inst.ip(),
            code: format!("{:?}", inst.code()),
            context: "cached-call skeleton",
        });
    };

    let call = gather_call_params(&mut cursor, prologue.stack_size, prologue.stack_save_reg)?;

    // Epilogue: MOV RAX,[cache]; ADD RSP,stack_size; RET. A deviation
    // here is logged, not fatal (see open questions).
    let mov_back = cursor.next_checked("cached-call epilogue")?;
    if mov_back.code() == Code::Mov_r64_rm64 {
        let info = cursor.info_factory.info(&mov_back);
        let mem = info.used_memory()[0];
        if mem.displacement() != cache_rva {
            log::warn!(
                "cached-call epilogue at {:#x} reloads a different cache slot than expected",
                mov_back.ip()
            );
        }
        let add = cursor.next_checked("cached-call epilogue")?;
        if add.code() == Code::Add_rm64_imm8 && add.immediate8() as i64 == prologue.stack_size {
            let ret = cursor.next_checked("cached-call epilogue")?;
            if ret.code() != Code::Retnq {
                log::warn!("cached-call epilogue at {:#x} is missing its RET", ret.ip());
            }
        } else {
            log::warn!("cached-call epilogue at {:#x} has an unexpected ADD RSP", add.ip());
        }
    } else {
        log::warn!(
            "unexpected instruction after cached call at {:#x}: {:?}",
            mov_back.ip(),
            mov_back.code()
        );
    }

    Ok(CachedCall {
        cache_rva,
        called_fn_rva: call.target_rva,
        arguments: call.arguments,
        end_rva: cursor.addr(),
    })
}

/// The fixed shape a `Z_Construct_UXXX_*` seed candidate must have, once a
/// `SUB RSP,0x28` anchor has been found in `.text`: the cache-check skeleton,
/// a short `JNZ` over the constructor call, `LEA RDX`/`LEA RCX` setting up
/// the constructor's two arguments, the `CALL` itself, and the reload that
/// starts the epilogue.
#[derive(Debug, Clone, Copy)]
pub struct ZConstructSeedShape {
    pub struct_rva: u64,
    pub call_rva: u64,
}

pub fn parse_z_construct_seed_shape(image: &Image, fn_rva: u64) -> DisasmResult<ZConstructSeedShape> {
    let mut cursor = CodeCursor::new(image, fn_rva)?;

    let sub = cursor.expect(Code::Sub_rm64_imm8, "z-construct prologue")?;
    if sub.immediate8() != 0x28 {
        return Err(DisasmError::UnexpectedInstruction {
            ip: sub.ip(),
            code: format!("{:?}", sub.code()),
            context: "z-construct prologue (expected SUB RSP,0x28)",
        });
    }

    let check = cursor.next_checked("z-construct cache check")?;
    if check.code() == Code::Mov_r64_rm64 {
        cursor.expect(Code::Test_rm64_r64, "z-construct cache check (form 1)")?;
    } else if check.code() == Code::Cmp_rm64_imm8 {
        // form 2: nothing further before the JNZ.
    } else {
        return Err(DisasmError::UnexpectedInstruction {
            ip: check.ip(),
            code: format!("{:?}", check.code()),
            context: "z-construct cache check",
        });
    }

    let jnz = cursor.next_checked("z-construct JNZ")?;
    if !matches!(jnz.code(), Code::Jne_rel8_64 | Code::Jne_rel32_64) {
        return Err(DisasmError::UnexpectedInstruction {
            ip: jnz.ip(),
            code: format!("{:?}", jnz.code()),
            context: "z-construct JNZ",
        });
    }

    let lea_rdx = cursor.expect(Code::Lea_r64_m, "z-construct LEA RDX")?;
    if lea_rdx.op0_register() != Register::RDX {
        return Err(DisasmError::UnexpectedInstruction {
            ip: lea_rdx.ip(),
            code: format!("{:?}", lea_rdx.code()),
            context: "z-construct LEA RDX",
        });
    }
    let struct_rva = lea_rdx.memory_displacement64();

    let lea_rcx = cursor.expect(Code::Lea_r64_m, "z-construct LEA RCX")?;
    if lea_rcx.op0_register() != Register::RCX {
        return Err(DisasmError::UnexpectedInstruction {
            ip: lea_rcx.ip(),
            code: format!("{:?}", lea_rcx.code()),
            context: "z-construct LEA RCX",
        });
    }

    let call = cursor.expect(Code::Call_rel32_64, "z-construct CALL")?;
    let call_rva = call.near_branch_target();

    cursor.expect(Code::Mov_r64_rm64, "z-construct epilogue reload")?;

    Ok(ZConstructSeedShape { struct_rva, call_rva })
}
