//! Assembler driver.
//!
//! Reads a tiny line-oriented directive format (one instruction per line,
//! `mnemonic operand, operand`) and assembles it with `ember-asm`, printing
//! the resulting machine code as space-separated hex bytes. With
//! `--parse-data` the input is instead treated as that same hex dump,
//! byte-validated and echoed back — there is no disassembler in `ember-asm`
//! to turn machine code back into mnemonics, so round-tripping hex is as far
//! as this driver goes.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ember_asm::{ArithOp, Assembler, Operand, OperandSize, Reg};

#[derive(Parser)]
#[command(name = "ember-asmdump")]
#[command(about = "Assemble directive text, or round-trip a machine-code hex dump")]
struct Cli {
    /// Treat the input as an ASCII hex byte dump instead of directive text.
    #[arg(long)]
    parse_data: bool,
    /// Input file; reads stdin when omitted.
    filename: Option<PathBuf>,
}

fn read_input(path: &Option<PathBuf>) -> std::io::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn parse_reg(s: &str) -> Result<Reg, String> {
    match s.trim().to_ascii_lowercase().as_str() {
        "rax" => Ok(Reg::Rax),
        "rcx" => Ok(Reg::Rcx),
        "rdx" => Ok(Reg::Rdx),
        "rbx" => Ok(Reg::Rbx),
        "rsp" => Ok(Reg::Rsp),
        "rbp" => Ok(Reg::Rbp),
        "rsi" => Ok(Reg::Rsi),
        "rdi" => Ok(Reg::Rdi),
        "r8" => Ok(Reg::R8),
        "r9" => Ok(Reg::R9),
        "r10" => Ok(Reg::R10),
        "r11" => Ok(Reg::R11),
        "r12" => Ok(Reg::R12),
        "r13" => Ok(Reg::R13),
        "r14" => Ok(Reg::R14),
        "r15" => Ok(Reg::R15),
        other => Err(format!("unknown register {other:?}")),
    }
}

fn parse_operand(s: &str) -> Result<Operand, String> {
    let s = s.trim();
    if let Ok(reg) = parse_reg(s) {
        return Ok(Operand::Reg(reg));
    }
    Err(format!("unsupported operand {s:?} (only bare registers are accepted)"))
}

/// Assembles one directive per line. Recognizes the handful of mnemonics
/// needed to exercise a real call path end to end (`push`, `pop`, `mov`,
/// `ret`, and the arithmetic ops); anything else is a usage error.
fn assemble_directives(source: &str) -> Result<Vec<u8>, String> {
    let mut asm = Assembler::new();
    for (lineno, line) in source.lines().enumerate() {
        let line = line.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let (mnemonic, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let operands: Vec<&str> = rest.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let err = |msg: String| format!("line {}: {}", lineno + 1, msg);

        match mnemonic.to_ascii_lowercase().as_str() {
            "ret" => asm.ret(),
            "push" => {
                let &[r] = operands.as_slice() else { return Err(err("push takes one register operand".to_string())) };
                asm.push_reg(parse_reg(r).map_err(&err)?);
            }
            "pop" => {
                let &[r] = operands.as_slice() else { return Err(err("pop takes one register operand".to_string())) };
                asm.pop_reg(parse_reg(r).map_err(&err)?);
            }
            "mov" => {
                let &[dst, src] = operands.as_slice() else { return Err(err("mov takes two operands".to_string())) };
                let dst_op = parse_operand(dst).map_err(&err)?;
                if let Ok(imm) = src.trim().parse::<i64>() {
                    let Operand::Reg(dst_reg) = dst_op else { return Err(err("mov imm destination must be a register".to_string())) };
                    asm.mov_reg_imm64(dst_reg, imm).map_err(|e| err(e.to_string()))?;
                } else {
                    let src_reg = parse_reg(src).map_err(&err)?;
                    asm.mov_rm_reg(dst_op, src_reg, OperandSize::QWord).map_err(|e| err(e.to_string()))?;
                }
            }
            "add" | "sub" | "and" | "or" | "xor" | "cmp" => {
                let &[dst, src] = operands.as_slice() else { return Err(err("this op takes two operands".to_string())) };
                let op = match mnemonic.to_ascii_lowercase().as_str() {
                    "add" => ArithOp::Add,
                    "sub" => ArithOp::Sub,
                    "and" => ArithOp::And,
                    "or" => ArithOp::Or,
                    "xor" => ArithOp::Xor,
                    _ => ArithOp::Cmp,
                };
                let dst_op = parse_operand(dst).map_err(&err)?;
                let src_reg = parse_reg(src).map_err(&err)?;
                asm.op_rm_reg(op, dst_op, src_reg, OperandSize::QWord).map_err(|e| err(e.to_string()))?;
            }
            other => return Err(err(format!("unrecognized mnemonic {other:?}"))),
        }
    }
    let (code, _offsets) = asm.finish().map_err(|e| e.to_string())?;
    Ok(code)
}

fn parse_hex_dump(text: &str) -> Result<Vec<u8>, String> {
    text.split_whitespace()
        .map(|tok| u8::from_str_radix(tok, 16).map_err(|e| format!("bad hex byte {tok:?}: {e}")))
        .collect()
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let input = match read_input(&cli.filename) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("ember-asmdump: {e}");
            return ExitCode::from(2);
        }
    };

    let result = if cli.parse_data { parse_hex_dump(&input) } else { assemble_directives(&input) };
    match result {
        Ok(bytes) => {
            println!("{}", to_hex(&bytes));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("ember-asmdump: {e}");
            ExitCode::from(1)
        }
    }
}
