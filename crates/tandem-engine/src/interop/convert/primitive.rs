//! Primitive value codecs
//!
//! Every managed primitive becomes a script number, except `boolean` which
//! becomes a script boolean. In the other direction integral kinds narrower
//! than 64 bits wrap modulo 2^N after truncation (as `ToInt32` does), `long`
//! saturates, and `char` also accepts a one-character string.

use tandem_sdk::{InteropError, InteropResult, ManagedValue, PrimitiveKind, ScriptValue};

/// Conversion between one primitive kind and script values
pub trait PrimitiveConvert: Sized + Copy {
    /// Kind handled by this codec
    const KIND: PrimitiveKind;

    /// Convert a script value
    fn from_script(value: &ScriptValue) -> InteropResult<Self>;

    /// Convert to a script value
    fn to_script(self) -> ScriptValue;

    /// Wrap as a managed value
    fn into_managed(self) -> ManagedValue;

    /// Extract from a managed value of the same kind
    fn from_managed(value: ManagedValue) -> Option<Self>;
}

fn mismatch(kind: PrimitiveKind, value: &ScriptValue) -> InteropError {
    InteropError::type_mismatch(kind.name(), value.kind_name())
}

fn number(kind: PrimitiveKind, value: &ScriptValue) -> InteropResult<f64> {
    value.as_number().ok_or_else(|| mismatch(kind, value))
}

/// Truncate and wrap modulo 2^`bits` into the signed range
fn wrap_integral(n: f64, bits: u32) -> i64 {
    if !n.is_finite() {
        return 0;
    }
    let modulus = 2f64.powi(bits as i32);
    let wrapped = n.trunc().rem_euclid(modulus);
    let half = modulus / 2.0;
    if wrapped >= half {
        (wrapped - modulus) as i64
    } else {
        wrapped as i64
    }
}

macro_rules! integral_convert {
    ($ty:ty, $kind:ident, $variant:ident, $bits:expr) => {
        impl PrimitiveConvert for $ty {
            const KIND: PrimitiveKind = PrimitiveKind::$kind;

            fn from_script(value: &ScriptValue) -> InteropResult<Self> {
                Ok(wrap_integral(number(Self::KIND, value)?, $bits) as $ty)
            }

            fn to_script(self) -> ScriptValue {
                ScriptValue::Number(self as f64)
            }

            fn into_managed(self) -> ManagedValue {
                ManagedValue::$variant(self)
            }

            fn from_managed(value: ManagedValue) -> Option<Self> {
                match value {
                    ManagedValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

integral_convert!(i8, I8, I8, 8);
integral_convert!(i16, I16, I16, 16);
integral_convert!(i32, I32, I32, 32);

impl PrimitiveConvert for bool {
    const KIND: PrimitiveKind = PrimitiveKind::Bool;

    fn from_script(value: &ScriptValue) -> InteropResult<Self> {
        value.as_bool().ok_or_else(|| mismatch(Self::KIND, value))
    }

    fn to_script(self) -> ScriptValue {
        ScriptValue::Bool(self)
    }

    fn into_managed(self) -> ManagedValue {
        ManagedValue::Bool(self)
    }

    fn from_managed(value: ManagedValue) -> Option<Self> {
        value.as_bool()
    }
}

/// UTF-16 code unit
impl PrimitiveConvert for u16 {
    const KIND: PrimitiveKind = PrimitiveKind::Char;

    fn from_script(value: &ScriptValue) -> InteropResult<Self> {
        match value {
            ScriptValue::Number(n) => Ok(wrap_integral(*n, 16) as u16),
            ScriptValue::String(s) => {
                let mut units = s.encode_utf16();
                match (units.next(), units.next()) {
                    (Some(unit), None) => Ok(unit),
                    _ => Err(InteropError::type_mismatch(
                        "char",
                        format!("string of length {}", s.encode_utf16().count()),
                    )),
                }
            }
            other => Err(mismatch(Self::KIND, other)),
        }
    }

    fn to_script(self) -> ScriptValue {
        ScriptValue::Number(self as f64)
    }

    fn into_managed(self) -> ManagedValue {
        ManagedValue::Char(self)
    }

    fn from_managed(value: ManagedValue) -> Option<Self> {
        match value {
            ManagedValue::Char(c) => Some(c),
            _ => None,
        }
    }
}

impl PrimitiveConvert for i64 {
    const KIND: PrimitiveKind = PrimitiveKind::I64;

    fn from_script(value: &ScriptValue) -> InteropResult<Self> {
        // `as` saturates and maps NaN to 0
        Ok(number(Self::KIND, value)? as i64)
    }

    fn to_script(self) -> ScriptValue {
        ScriptValue::Number(self as f64)
    }

    fn into_managed(self) -> ManagedValue {
        ManagedValue::I64(self)
    }

    fn from_managed(value: ManagedValue) -> Option<Self> {
        value.as_i64()
    }
}

impl PrimitiveConvert for f32 {
    const KIND: PrimitiveKind = PrimitiveKind::F32;

    fn from_script(value: &ScriptValue) -> InteropResult<Self> {
        Ok(number(Self::KIND, value)? as f32)
    }

    fn to_script(self) -> ScriptValue {
        ScriptValue::Number(self as f64)
    }

    fn into_managed(self) -> ManagedValue {
        ManagedValue::F32(self)
    }

    fn from_managed(value: ManagedValue) -> Option<Self> {
        match value {
            ManagedValue::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl PrimitiveConvert for f64 {
    const KIND: PrimitiveKind = PrimitiveKind::F64;

    fn from_script(value: &ScriptValue) -> InteropResult<Self> {
        number(Self::KIND, value)
    }

    fn to_script(self) -> ScriptValue {
        ScriptValue::Number(self)
    }

    fn into_managed(self) -> ManagedValue {
        ManagedValue::F64(self)
    }

    fn from_managed(value: ManagedValue) -> Option<Self> {
        value.as_f64()
    }
}

fn decode<T: PrimitiveConvert>(value: &ScriptValue) -> InteropResult<ManagedValue> {
    T::from_script(value).map(T::into_managed)
}

/// Convert a script value to a managed primitive of `kind`
pub fn to_managed(kind: PrimitiveKind, value: &ScriptValue) -> InteropResult<ManagedValue> {
    match kind {
        PrimitiveKind::Bool => decode::<bool>(value),
        PrimitiveKind::I8 => decode::<i8>(value),
        PrimitiveKind::Char => decode::<u16>(value),
        PrimitiveKind::I16 => decode::<i16>(value),
        PrimitiveKind::I32 => decode::<i32>(value),
        PrimitiveKind::I64 => decode::<i64>(value),
        PrimitiveKind::F32 => decode::<f32>(value),
        PrimitiveKind::F64 => decode::<f64>(value),
    }
}

/// Convert a managed primitive to a script value
pub fn to_script(value: ManagedValue) -> InteropResult<ScriptValue> {
    match value {
        ManagedValue::Bool(v) => Ok(v.to_script()),
        ManagedValue::I8(v) => Ok(v.to_script()),
        ManagedValue::Char(v) => Ok(v.to_script()),
        ManagedValue::I16(v) => Ok(v.to_script()),
        ManagedValue::I32(v) => Ok(v.to_script()),
        ManagedValue::I64(v) => Ok(v.to_script()),
        ManagedValue::F32(v) => Ok(v.to_script()),
        ManagedValue::F64(v) => Ok(v.to_script()),
        ManagedValue::Void => Ok(ScriptValue::Undefined),
        ManagedValue::Ref(_) => Err(InteropError::type_mismatch("primitive", "reference")),
    }
}
