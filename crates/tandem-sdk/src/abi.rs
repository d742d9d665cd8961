//! Bridge calling convention
//!
//! When managed code calls a bridge method, the managed runtime packs the
//! receiver and arguments into an [`ArgBuffer`]: a fixed block of
//! general-purpose slots, a fixed block of floating-point slots, and a stack
//! region for everything that overflows either block. The receiver of an
//! instance call takes the first general-purpose slot.

use crate::managed::{ManagedValue, ObjectRef, TypeTag};

/// Number of general-purpose argument slots
pub const GPR_SLOTS: usize = 8;
/// Number of floating-point argument slots
pub const FPR_SLOTS: usize = 8;

/// Raw argument buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgBuffer {
    gpr: [u64; GPR_SLOTS],
    fpr: [u64; FPR_SLOTS],
    stack: Vec<u64>,
}

impl ArgBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// General-purpose slot
    pub fn gpr(&self, index: usize) -> Option<u64> {
        self.gpr.get(index).copied()
    }

    /// Floating-point slot
    pub fn fpr(&self, index: usize) -> Option<u64> {
        self.fpr.get(index).copied()
    }

    /// Stack slot
    pub fn stack(&self, index: usize) -> Option<u64> {
        self.stack.get(index).copied()
    }

    /// Number of stack slots in use
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Pack a call: the optional receiver, then each argument by its type
    pub fn pack(receiver: Option<ObjectRef>, params: &[TypeTag], args: &[ManagedValue]) -> Self {
        let mut writer = ArgWriter::new();
        if let Some(receiver) = receiver {
            writer.push(false, receiver.to_raw() as u64);
        }
        for (tag, value) in params.iter().zip(args) {
            writer.push(tag.is_float(), value.to_bits());
        }
        writer.finish()
    }
}

/// Fills an [`ArgBuffer`] slot by slot
#[derive(Debug, Default)]
pub struct ArgWriter {
    buf: ArgBuffer,
    gpr_used: usize,
    fpr_used: usize,
}

impl ArgWriter {
    /// Empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one slot
    pub fn push(&mut self, float: bool, bits: u64) {
        if float && self.fpr_used < FPR_SLOTS {
            self.buf.fpr[self.fpr_used] = bits;
            self.fpr_used += 1;
        } else if !float && self.gpr_used < GPR_SLOTS {
            self.buf.gpr[self.gpr_used] = bits;
            self.gpr_used += 1;
        } else {
            self.buf.stack.push(bits);
        }
    }

    /// Finish writing
    pub fn finish(self) -> ArgBuffer {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{ClassId, PrimitiveKind};

    #[test]
    fn test_pack_splits_regions() {
        let int = TypeTag::Primitive(PrimitiveKind::I32);
        let dbl = TypeTag::Primitive(PrimitiveKind::F64);
        let params = [int, dbl, int];
        let args = [
            ManagedValue::I32(1),
            ManagedValue::F64(2.5),
            ManagedValue::I32(3),
        ];
        let buf = ArgBuffer::pack(Some(ObjectRef::from_raw(9)), &params, &args);
        assert_eq!(buf.gpr(0), Some(9));
        assert_eq!(buf.gpr(1), Some(1));
        assert_eq!(buf.gpr(2), Some(3));
        assert_eq!(buf.fpr(0), Some(2.5f64.to_bits()));
        assert_eq!(buf.stack_len(), 0);
    }

    #[test]
    fn test_overflow_goes_to_stack() {
        let tag = TypeTag::Ref(ClassId::from_raw(1));
        let params = vec![tag; GPR_SLOTS + 2];
        let args: Vec<_> = (1..=GPR_SLOTS as u32 + 2)
            .map(|i| ManagedValue::object(ObjectRef::from_raw(i)))
            .collect();
        let buf = ArgBuffer::pack(None, &params, &args);
        assert_eq!(buf.stack_len(), 2);
        assert_eq!(buf.stack(0), Some(GPR_SLOTS as u64 + 1));
        assert_eq!(buf.stack(1), Some(GPR_SLOTS as u64 + 2));
    }
}
