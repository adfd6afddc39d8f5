//! Reserved vocabulary and built-in type knowledge.
//!
//! All lookups take uppercased input.

/// Language keywords, block and section markers.
const KEYWORDS: &[&str] = &[
    "PROGRAM", "END_PROGRAM", "FUNCTION", "END_FUNCTION", "FUNCTION_BLOCK",
    "END_FUNCTION_BLOCK", "ORGANIZATION_BLOCK", "END_ORGANIZATION_BLOCK", "DATA_BLOCK",
    "END_DATA_BLOCK", "TYPE", "END_TYPE", "STRUCT", "END_STRUCT", "VAR", "VAR_INPUT",
    "VAR_OUTPUT", "VAR_IN_OUT", "VAR_GLOBAL", "VAR_EXTERNAL", "VAR_TEMP", "VAR_STAT",
    "VAR_CONFIG", "VAR_ACCESS", "END_VAR", "CONSTANT", "RETAIN", "NON_RETAIN", "PERSISTENT",
    "AT", "IF", "THEN", "ELSIF", "ELSE", "END_IF", "CASE", "OF", "END_CASE", "FOR", "TO",
    "BY", "DO", "END_FOR", "WHILE", "END_WHILE", "REPEAT", "UNTIL", "END_REPEAT", "EXIT",
    "CONTINUE", "RETURN", "REGION", "END_REGION", "ARRAY", "POINTER", "REFERENCE", "REF_TO",
    "TRUE", "FALSE", "BEGIN", "CONFIGURATION", "END_CONFIGURATION", "RESOURCE",
    "END_RESOURCE", "TASK", "WITH", "ON", "METHOD", "END_METHOD", "PROPERTY",
    "END_PROPERTY", "INTERFACE", "END_INTERFACE", "EXTENDS", "IMPLEMENTS", "THIS", "SUPER",
];

/// Elementary data types.
const BUILTIN_TYPES: &[&str] = &[
    "BOOL", "BYTE", "WORD", "DWORD", "LWORD", "SINT", "INT", "DINT", "LINT", "USINT", "UINT",
    "UDINT", "ULINT", "REAL", "LREAL", "TIME", "LTIME", "DATE", "TIME_OF_DAY", "TOD",
    "DATE_AND_TIME", "DT", "STRING", "WSTRING", "CHAR", "WCHAR", "ANY", "ANY_NUM", "VARIANT",
    "VOID",
];

/// Operators and instruction-list mnemonics.
const OPERATORS: &[&str] = &[
    "AND", "OR", "XOR", "NOT", "MOD", "LD", "LDN", "ST", "STN", "S", "R", "ANDN", "ORN",
    "XORN", "ADD", "SUB", "MUL", "DIV", "GT", "GE", "EQ", "NE", "LE", "LT", "JMP", "JMPC",
    "JMPCN", "CAL", "CALC", "CALCN", "RET", "RETC", "RETCN",
];

/// Function blocks from the IEC standard library.
const STANDARD_FBS: &[(&str, u64)] = &[
    ("TON", 24),
    ("TOF", 24),
    ("TP", 24),
    ("CTU", 12),
    ("CTD", 12),
    ("CTUD", 16),
    ("R_TRIG", 2),
    ("F_TRIG", 2),
    ("SR", 1),
    ("RS", 1),
];

/// Bytes assumed for a type whose layout is not known.
pub const UNKNOWN_TYPE_BYTES: u64 = 16;

/// Whether `upper` may not be used as a declared identifier.
pub fn is_reserved(upper: &str) -> bool {
    KEYWORDS.contains(&upper) || BUILTIN_TYPES.contains(&upper) || OPERATORS.contains(&upper)
}

pub fn is_keyword(upper: &str) -> bool {
    KEYWORDS.contains(&upper)
}

pub fn is_builtin_type(upper: &str) -> bool {
    BUILTIN_TYPES.contains(&upper)
}

pub fn is_standard_fb(upper: &str) -> bool {
    STANDARD_FBS.iter().any(|(name, _)| *name == upper)
}

/// Section keyword opening a declaration block.
pub fn is_var_section(upper: &str) -> bool {
    matches!(
        upper,
        "VAR"
            | "VAR_INPUT"
            | "VAR_OUTPUT"
            | "VAR_IN_OUT"
            | "VAR_GLOBAL"
            | "VAR_EXTERNAL"
            | "VAR_TEMP"
            | "VAR_STAT"
            | "VAR_CONFIG"
            | "VAR_ACCESS"
    )
}

/// Storage size of an elementary type or standard FB.
pub fn elementary_size(upper: &str) -> Option<u64> {
    let size = match upper {
        "BOOL" | "BYTE" | "SINT" | "USINT" | "CHAR" => 1,
        "WORD" | "INT" | "UINT" | "WCHAR" => 2,
        "DWORD" | "DINT" | "UDINT" | "REAL" | "TIME" | "DATE" | "TIME_OF_DAY" | "TOD" => 4,
        "LWORD" | "LINT" | "ULINT" | "LREAL" | "LTIME" | "DATE_AND_TIME" | "DT" => 8,
        "STRING" => 81,
        "WSTRING" => 162,
        _ => return STANDARD_FBS.iter().find(|(n, _)| *n == upper).map(|(_, s)| *s),
    };
    Some(size)
}

/// Normalized type text as produced by the extractor, e.g.
/// `ARRAY[1..10] OF INT`, `STRING[20]`, `POINTER TO REAL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    Named(String),
    Array { elements: u64, of: Box<TypeShape> },
    SizedString { wide: bool, len: u64 },
    Pointer,
    Struct,
}

impl TypeShape {
    pub fn parse(type_text: &str) -> TypeShape {
        let t = type_text.trim();
        if let Some(rest) = t.strip_prefix("ARRAY") {
            let (dims, of) = match rest.split_once(" OF ") {
                Some(parts) => parts,
                None => return TypeShape::Named(t.to_string()),
            };
            let elements = array_elements(dims);
            return TypeShape::Array {
                elements,
                of: Box::new(TypeShape::parse(of)),
            };
        }
        if t.starts_with("POINTER") || t.starts_with("REFERENCE") || t.starts_with("REF_TO") {
            return TypeShape::Pointer;
        }
        if t == "STRUCT" {
            return TypeShape::Struct;
        }
        for (prefix, wide) in [("WSTRING", true), ("STRING", false)] {
            if let Some(len) = t
                .strip_prefix(prefix)
                .and_then(|r| {
                    r.strip_prefix('[')
                        .and_then(|r| r.strip_suffix(']'))
                        .or_else(|| r.strip_prefix('(').and_then(|r| r.strip_suffix(')')))
                })
                .and_then(|n| n.trim().parse::<u64>().ok())
            {
                return TypeShape::SizedString { wide, len };
            }
        }
        TypeShape::Named(t.to_string())
    }

    /// Estimated storage in bytes.
    pub fn size(&self) -> u64 {
        match self {
            TypeShape::Named(n) => elementary_size(n).unwrap_or(UNKNOWN_TYPE_BYTES),
            TypeShape::Array { elements, of } => elements.saturating_mul(of.size()),
            TypeShape::SizedString { wide, len } => {
                if *wide {
                    (len + 1) * 2
                } else {
                    len + 1
                }
            }
            TypeShape::Pointer => 8,
            TypeShape::Struct => UNKNOWN_TYPE_BYTES,
        }
    }

    /// The innermost named type, if the shape has one.
    pub fn base_name(&self) -> Option<&str> {
        match self {
            TypeShape::Named(n) => Some(n),
            TypeShape::Array { of, .. } => of.base_name(),
            _ => None,
        }
    }
}

/// Element count of `[a..b, c..d]`; unparseable bounds count as one element.
fn array_elements(dims: &str) -> u64 {
    let inner = dims.trim().trim_start_matches('[').trim_end_matches(']');
    inner
        .split(',')
        .map(|range| {
            let mut bounds = range.split("..").map(|b| b.trim().parse::<i64>());
            match (bounds.next(), bounds.next()) {
                (Some(Ok(lo)), Some(Ok(hi))) if hi >= lo => (hi - lo + 1) as u64,
                _ => 1,
            }
        })
        .fold(1u64, |acc, n| acc.saturating_mul(n))
}
