//! Parser for parameter scan format strings.
//!
//! A format string lists the expected request parameters, one character
//! each, optionally interleaved with modifiers:
//!
//! | char | meaning |
//! |---|---|
//! | `b` `t` `d` `u` | integer (boolean, timestamp, signed, unsigned) |
//! | `f` | double |
//! | `s` `S` | string |
//! | `{` | structure (not supported when scanning) |
//! | `*` | every following parameter is optional |
//! | `.` | coerce the next parameter between int, double and string |

use crate::packet::RecordType;

/// Type a directive asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanKind {
    /// Integer-like parameter.
    Int,
    /// Double parameter.
    Double,
    /// String parameter.
    Str,
    /// Nested structure.
    Struct,
}

impl ScanKind {
    /// Wire type matching this kind.
    #[must_use]
    pub const fn record_type(self) -> RecordType {
        match self {
            Self::Int => RecordType::Int,
            Self::Double => RecordType::Double,
            Self::Str => RecordType::Str,
            Self::Struct => RecordType::Struct,
        }
    }
}

/// One parameter to read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Directive {
    /// Format character as written.
    pub ch: char,
    /// Requested type.
    pub kind: ScanKind,
    /// Number of parameter directives before this one.
    pub index: usize,
    /// Running out of data here is not an error.
    pub optional: bool,
    /// Coercion between int, double and string is allowed.
    pub autoconvert: bool,
}

/// An unknown character in a format string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvalidChar {
    /// The offending character.
    pub ch: char,
    /// Number of parameter directives before it.
    pub index: usize,
}

/// Iterator over the directives of a format string.
///
/// Iteration stops after the first [`InvalidChar`].
///
/// # Examples
///
/// ```
/// use binrpc::format::{ScanFormat, ScanKind};
///
/// let kinds: Vec<_> = ScanFormat::new("d*.s", false)
///     .map(|d| d.map(|d| (d.kind, d.optional, d.autoconvert)))
///     .collect::<Result<_, _>>()
///     .expect("valid format");
/// assert_eq!(
///     kinds,
///     vec![(ScanKind::Int, false, false), (ScanKind::Str, true, true)]
/// );
/// ```
#[derive(Clone, Debug)]
pub struct ScanFormat<'a> {
    chars: std::str::Chars<'a>,
    default_autoconvert: bool,
    optional: bool,
    autoconvert: bool,
    index: usize,
    failed: bool,
}

impl<'a> ScanFormat<'a> {
    /// Parse `fmt`; `autoconvert` enables coercion for every parameter.
    #[must_use]
    pub fn new(fmt: &'a str, autoconvert: bool) -> Self {
        Self {
            chars: fmt.chars(),
            default_autoconvert: autoconvert,
            optional: false,
            autoconvert,
            index: 0,
            failed: false,
        }
    }
}

impl Iterator for ScanFormat<'_> {
    type Item = Result<Directive, InvalidChar>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let ch = self.chars.next()?;
            let kind = match ch {
                '*' => {
                    self.optional = true;
                    continue;
                }
                '.' => {
                    self.autoconvert = true;
                    continue;
                }
                'b' | 't' | 'd' | 'u' => ScanKind::Int,
                'f' => ScanKind::Double,
                's' | 'S' => ScanKind::Str,
                '{' => ScanKind::Struct,
                _ => {
                    self.failed = true;
                    return Some(Err(InvalidChar {
                        ch,
                        index: self.index,
                    }));
                }
            };
            let directive = Directive {
                ch,
                kind,
                index: self.index,
                optional: self.optional,
                autoconvert: self.autoconvert,
            };
            self.autoconvert = self.default_autoconvert;
            self.index += 1;
            return Some(Ok(directive));
        }
    }
}
