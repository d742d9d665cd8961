//! Argument buffer reader
//!
//! Mirrors [`ArgWriter`](tandem_sdk::ArgWriter): floating-point slots come
//! from the floating-point region, everything else from the general-purpose
//! region, and a slot that does not fit its region comes from the stack in
//! order.

use tandem_sdk::{
    ArgBuffer, InteropError, InteropResult, ManagedValue, ObjectRef, TypeTag, FPR_SLOTS, GPR_SLOTS,
};

/// Walks an [`ArgBuffer`] in lock-step with a signature
pub struct ArgReader<'a> {
    buf: &'a ArgBuffer,
    gpr: usize,
    fpr: usize,
    stack: usize,
}

impl<'a> ArgReader<'a> {
    /// Reader at the first slot
    pub fn new(buf: &'a ArgBuffer) -> Self {
        Self {
            buf,
            gpr: 0,
            fpr: 0,
            stack: 0,
        }
    }

    fn next_bits(&mut self, float: bool) -> InteropResult<u64> {
        let bits = if float && self.fpr < FPR_SLOTS {
            self.fpr += 1;
            self.buf.fpr(self.fpr - 1)
        } else if !float && self.gpr < GPR_SLOTS {
            self.gpr += 1;
            self.buf.gpr(self.gpr - 1)
        } else {
            self.stack += 1;
            self.buf.stack(self.stack - 1)
        };
        bits.ok_or_else(|| InteropError::resolution("argument buffer holds fewer slots than the signature"))
    }

    /// Read the receiver of an instance call
    pub fn receiver(&mut self) -> InteropResult<ObjectRef> {
        match self.next_bits(false)? {
            0 => Err(InteropError::type_mismatch("receiver", "null")),
            raw => Ok(ObjectRef::from_raw(raw as u32)),
        }
    }

    /// Read the next slot as a value of type `tag`
    pub fn read(&mut self, tag: TypeTag) -> InteropResult<ManagedValue> {
        let bits = self.next_bits(tag.is_float())?;
        Ok(ManagedValue::from_bits(tag, bits))
    }
}
