//! Labels and backpatching
//!
//! An [`Assembler`](crate::assembler::Assembler) doesn't know the final
//! address of a forward jump target until it's emitted further down the
//! stream, so every `jmp`/`jcc`/`call` against a not-yet-defined label is
//! recorded as a [`Patch`] and resolved once the whole stream is built.

use rustc_hash::FxHashMap;

use crate::cc::Cc;
use crate::error::{AsmError, AsmResult};

/// An opaque handle to a label, created by
/// [`Assembler::new_label`](crate::assembler::Assembler::new_label).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) u32);

/// Shape of the instruction a pending patch needs to rewrite once its
/// target's offset is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchKind {
    /// `0xEB rel8` — unconditional short jump.
    JmpRel8,
    /// `0xE9 rel32` — unconditional near jump.
    JmpRel32,
    /// `0x70+cc rel8` — conditional short jump.
    JccRel8(Cc),
    /// `0x0F 0x80+cc rel32` — conditional near jump.
    JccRel32(Cc),
    /// `0xE8 rel32` — near call.
    CallRel32,
}

impl PatchKind {
    /// Byte length of the relative field this patch rewrites (not counting
    /// the opcode byte(s) already emitted).
    pub fn field_len(self) -> usize {
        match self {
            PatchKind::JmpRel8 | PatchKind::JccRel8(_) => 1,
            PatchKind::JmpRel32 | PatchKind::JccRel32(_) | PatchKind::CallRel32 => 4,
        }
    }
}

/// A use of a label whose displacement must be patched in once the label is
/// bound (or immediately, if the label is already bound when the use is
/// emitted and happens to be a backward reference).
#[derive(Debug, Clone, Copy)]
pub struct Patch {
    pub label: Label,
    pub kind: PatchKind,
    /// Offset of the first byte of the relative field within the code buffer.
    pub field_offset: usize,
    /// Offset of the byte immediately following the whole instruction: the
    /// relative displacement is measured from here (AMD64 `rel8`/`rel32` are
    /// relative to the next instruction's address).
    pub instr_end: usize,
}

/// Tracks label definitions and outstanding patches across an assembly pass.
#[derive(Debug, Default)]
pub struct LabelTable {
    next_id: u32,
    bound: FxHashMap<u32, usize>,
    names: FxHashMap<u32, String>,
    pending: Vec<Patch>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_label(&mut self, name: impl Into<String>) -> Label {
        let id = self.next_id;
        self.next_id += 1;
        self.names.insert(id, name.into());
        Label(id)
    }

    pub fn bind(&mut self, label: Label, offset: usize) -> AsmResult<()> {
        if self.bound.insert(label.0, offset).is_some() {
            let name = self.names.get(&label.0).cloned().unwrap_or_default();
            return Err(AsmError::DuplicateLabel(name));
        }
        Ok(())
    }

    pub fn offset_of(&self, label: Label) -> Option<usize> {
        self.bound.get(&label.0).copied()
    }

    pub fn record_patch(&mut self, patch: Patch) {
        self.pending.push(patch);
    }

    /// Resolve every pending patch against the final code buffer, rewriting
    /// relative displacements in place.
    pub fn apply(&self, code: &mut [u8]) -> AsmResult<()> {
        for patch in &self.pending {
            let target = self.offset_of(patch.label).ok_or_else(|| {
                let name = self.names.get(&patch.label.0).cloned().unwrap_or_default();
                AsmError::UndefinedLabel(name)
            })?;
            let rel = target as i64 - patch.instr_end as i64;
            match patch.kind.field_len() {
                1 => {
                    let rel8 = i8::try_from(rel)
                        .map_err(|_| AsmError::DisplacementOutOfRange(rel, 8))?;
                    code[patch.field_offset] = rel8 as u8;
                }
                4 => {
                    let rel32 = i32::try_from(rel)
                        .map_err(|_| AsmError::DisplacementOutOfRange(rel, 32))?;
                    code[patch.field_offset..patch.field_offset + 4]
                        .copy_from_slice(&rel32.to_le_bytes());
                }
                _ => unreachable!(),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_bind_is_rejected() {
        let mut labels = LabelTable::new();
        let l = labels.new_label("loop_top");
        labels.bind(l, 0).unwrap();
        assert!(matches!(labels.bind(l, 10), Err(AsmError::DuplicateLabel(_))));
    }

    #[test]
    fn undefined_label_fails_on_apply() {
        let mut labels = LabelTable::new();
        let l = labels.new_label("never_bound");
        labels.record_patch(Patch {
            label: l,
            kind: PatchKind::JmpRel32,
            field_offset: 0,
            instr_end: 4,
        });
        let mut code = vec![0u8; 4];
        assert!(matches!(labels.apply(&mut code), Err(AsmError::UndefinedLabel(_))));
    }

    #[test]
    fn forward_patch_computes_relative_displacement() {
        let mut labels = LabelTable::new();
        let l = labels.new_label("target");
        labels.record_patch(Patch {
            label: l,
            kind: PatchKind::JmpRel32,
            field_offset: 2,
            instr_end: 6,
        });
        labels.bind(l, 20).unwrap();
        let mut code = vec![0u8; 6];
        labels.apply(&mut code).unwrap();
        let rel = i32::from_le_bytes(code[2..6].try_into().unwrap());
        assert_eq!(rel, 14);
    }
}
