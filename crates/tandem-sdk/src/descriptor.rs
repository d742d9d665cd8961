//! Method descriptor grammar
//!
//! A descriptor lists the return type first, then every parameter:
//!
//! ```text
//! descriptor := return param*
//! type       := 'V' | 'Z' | 'B' | 'C' | 'S' | 'I' | 'J' | 'F' | 'D'
//!             | 'L' dotted.class.Name ';'
//!             | '[' type
//! ```
//!
//! `DescriptorCursor` splits a descriptor into type fragments without
//! allocating. Resolving reference fragments to classes is the job of the
//! runtime that owns the class table.

use crate::managed::PrimitiveKind;

/// Descriptor character for `void` (return position only)
pub const VOID: u8 = b'V';
/// Prefix of a reference type fragment
pub const CLASS_PREFIX: u8 = b'L';
/// Terminator of a reference type fragment
pub const CLASS_SUFFIX: u8 = b';';
/// Prefix of an array type fragment
pub const ARRAY_PREFIX: u8 = b'[';

/// Malformed descriptor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    /// Descriptor is empty (no return type)
    #[error("empty descriptor")]
    Empty,
    /// Descriptor ended in the middle of a type
    #[error("descriptor '{0}' ends inside a type")]
    UnexpectedEnd(String),
    /// Unknown type character
    #[error("invalid character '{ch}' at {pos} in descriptor '{descriptor}'")]
    InvalidChar {
        /// Offending character
        ch: char,
        /// Byte offset
        pos: usize,
        /// Whole descriptor
        descriptor: String,
    },
}

/// Classified type fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fragment<'a> {
    /// `V`
    Void,
    /// A primitive type
    Primitive(PrimitiveKind),
    /// `Lname;`, carries the dotted class name
    Class(&'a str),
    /// `[T`, carries the component fragment
    Array(&'a str),
}

impl<'a> Fragment<'a> {
    /// Classify a single, well-formed type fragment
    pub fn classify(fragment: &'a str) -> Fragment<'a> {
        let bytes = fragment.as_bytes();
        match bytes.first() {
            Some(&VOID) => Fragment::Void,
            Some(&CLASS_PREFIX) => Fragment::Class(&fragment[1..fragment.len() - 1]),
            Some(&ARRAY_PREFIX) => Fragment::Array(&fragment[1..]),
            Some(&c) => match PrimitiveKind::from_descriptor_char(c as char) {
                Some(kind) => Fragment::Primitive(kind),
                None => Fragment::Void,
            },
            None => Fragment::Void,
        }
    }
}

/// Lazily splits a descriptor into type fragments
#[derive(Debug, Clone)]
pub struct DescriptorCursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> DescriptorCursor<'a> {
    /// Create a cursor positioned at the return type
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Restart from the return type
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Byte offset of the next fragment
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether every fragment has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.src.len()
    }

    /// Return the next fragment, or `None` at the end
    pub fn next_fragment(&mut self) -> Result<Option<&'a str>, DescriptorError> {
        if self.is_exhausted() {
            return Ok(None);
        }
        let start = self.pos;
        let end = self.fragment_end(start)?;
        self.pos = end;
        Ok(Some(&self.src[start..end]))
    }

    fn fragment_end(&self, start: usize) -> Result<usize, DescriptorError> {
        let bytes = self.src.as_bytes();
        let mut pos = start;
        // Array prefixes nest
        while pos < bytes.len() && bytes[pos] == ARRAY_PREFIX {
            pos += 1;
        }
        let Some(&c) = bytes.get(pos) else {
            return Err(DescriptorError::UnexpectedEnd(self.src.to_string()));
        };
        match c {
            CLASS_PREFIX => match self.src[pos..].find(CLASS_SUFFIX as char) {
                Some(rel) if rel > 1 => Ok(pos + rel + 1),
                _ => Err(DescriptorError::UnexpectedEnd(self.src.to_string())),
            },
            VOID if pos == start => Ok(pos + 1),
            _ if PrimitiveKind::from_descriptor_char(c as char).is_some() => Ok(pos + 1),
            _ => Err(DescriptorError::InvalidChar {
                ch: c as char,
                pos,
                descriptor: self.src.to_string(),
            }),
        }
    }
}

impl<'a> Iterator for DescriptorCursor<'a> {
    type Item = Result<&'a str, DescriptorError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_fragment().transpose()
    }
}

/// Validate a descriptor and return its parameter count
pub fn param_count(descriptor: &str) -> Result<usize, DescriptorError> {
    let mut cursor = DescriptorCursor::new(descriptor);
    if cursor.next_fragment()?.is_none() {
        return Err(DescriptorError::Empty);
    }
    let mut count = 0;
    while let Some(fragment) = cursor.next_fragment()? {
        if fragment.as_bytes()[0] == VOID {
            return Err(DescriptorError::InvalidChar {
                ch: 'V',
                pos: cursor.position() - 1,
                descriptor: descriptor.to_string(),
            });
        }
        count += 1;
    }
    Ok(count)
}

/// Reference fragment for a class name (`Lname;`)
pub fn class_fragment(name: &str) -> String {
    format!("L{};", name)
}
