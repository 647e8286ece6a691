/// An entry in the error code registry.
pub struct ErrorEntry {
    pub code: &'static str,
    /// One-line description for listings.
    pub short: &'static str,
    /// Full explanation for `sdvu explain`.
    pub long: &'static str,
}

/// All stable error codes reported by the compiler.
pub static REGISTRY: &[ErrorEntry] = &[
    // ── Scanner ──────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SDVU-L001",
        short: "unexpected character",
        long: r#"## SDVU-L001: unexpected character

The scanner met a character that starts no token. The statement
holding it emits no code, and compilation resumes at the next `,`,
`;` or keyword, so later errors are still reported.

**Example:**

    int x = 5 $ 2;
"#,
    },
    ErrorEntry {
        code: "SDVU-L002",
        short: "number literal too large",
        long: r#"## SDVU-L002: number literal too large

A run of digits does not fit in 32 bits. No value of any type is that
large; `int` holds -32768..=32767 and `byte` holds 0..=255.
"#,
    },
    // ── Parser ───────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SDVU-P001",
        short: "syntax error",
        long: r#"## SDVU-P001: syntax error

The token shown does not fit the grammar at this point. The message
names what was expected. A program is a list of global declarations
and processes:

    int x = 0;
    process inc
        guardblock t_go = x < 10;
        guardcondition t_go;
        effect x = x + 1;

Assignments inside a section are separated by `,` and the section ends
with `;`. After a syntax error the compiler skips to the next `,`, `;`
or keyword and continues.
"#,
    },
    // ── Semantic ─────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SDVU-S001",
        short: "undeclared global",
        long: r#"## SDVU-S001: undeclared global

A name without the `t_` prefix refers to a global, and every global
must be declared before the first process that uses it.

**Fix:**

    int y = 0;
"#,
    },
    ErrorEntry {
        code: "SDVU-S002",
        short: "temporary read before assignment",
        long: r#"## SDVU-S002: temporary read before assignment

Temporaries (names starting with `t_`) live only within one process
and must be assigned before they are read. Reading a temporary also
releases its register, so a temporary can be read once per
assignment.
"#,
    },
    ErrorEntry {
        code: "SDVU-S003",
        short: "name already declared",
        long: r#"## SDVU-S003: name already declared

A global or state name was declared twice. Globals and state names
share one namespace.
"#,
    },
    ErrorEntry {
        code: "SDVU-S004",
        short: "global uses the temporary prefix",
        long: r#"## SDVU-S004: global uses the temporary prefix

The `t_` prefix marks temporaries. A global declared with it could
never be referenced, so the declaration is rejected.
"#,
    },
    ErrorEntry {
        code: "SDVU-S005",
        short: "value out of range",
        long: r#"## SDVU-S005: value out of range

A literal does not fit the type it is assigned to, a literal array
index lies outside the array, or an initializer list has the wrong
length.

| type  | range            |
|-------|------------------|
| bool  | true, false, 0, 1 |
| byte  | 0..=255          |
| int   | -32768..=32767   |
| state | 0..count         |
"#,
    },
    ErrorEntry {
        code: "SDVU-S006",
        short: "indexed name is not an array",
        long: r#"## SDVU-S006: indexed name is not an array

`name[i]` is only valid when `name` was declared with a length, as in
`byte buf[4] = 0;`.
"#,
    },
    ErrorEntry {
        code: "SDVU-S007",
        short: "array used without an index",
        long: r#"## SDVU-S007: array used without an index

Arrays have no value as a whole. Read or write one element at a time:

    t_first = buf[0]
"#,
    },
    ErrorEntry {
        code: "SDVU-S008",
        short: "guard condition is not a temporary",
        long: r#"## SDVU-S008: guard condition is not a temporary

The guard condition names a temporary computed in the guard block. The
process body runs only when that temporary is non-zero.

**Fix:**

    guardblock t_ready = ready;
    guardcondition t_ready;
"#,
    },
    // ── Resources ────────────────────────────────────────────────────────────
    ErrorEntry {
        code: "SDVU-R001",
        short: "register file exhausted",
        long: r#"## SDVU-R001: register file exhausted

Every general register holds a live temporary or an operand of the
instruction being built. Read some temporaries before assigning new
ones, or compile with more registers (`--registers`).
"#,
    },
    ErrorEntry {
        code: "SDVU-R002",
        short: "value does not fit its instruction field",
        long: r#"## SDVU-R002: value does not fit its instruction field

Operand immediates take 11 bits (0..=2047), `LOAD` immediates 16 bits
and addresses 20 bits. Larger constants must come from a global, and an
array used with a computed index must start below address 2048.
"#,
    },
];

/// Look up an error entry by code (e.g. `"SDVU-S001"`).
pub fn lookup(code: &str) -> Option<&'static ErrorEntry> {
    REGISTRY.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::CodecError;
    use crate::compiler::ErrorKind;
    use crate::lexer::LexError;

    #[test]
    fn lookup_known_code() {
        let e = lookup("SDVU-S001").expect("SDVU-S001 should be in registry");
        assert_eq!(e.code, "SDVU-S001");
        assert!(e.long.contains("SDVU-S001"));
        assert_eq!(lookup("sdvu-s001").map(|e| e.code), Some("SDVU-S001"));
    }

    #[test]
    fn lookup_unknown_returns_none() {
        assert!(lookup("SDVU-X999").is_none());
        assert!(lookup("").is_none());
    }

    #[test]
    fn all_codes_unique() {
        let mut codes: Vec<&str> = REGISTRY.iter().map(|e| e.code).collect();
        codes.sort_unstable();
        let before = codes.len();
        codes.dedup();
        assert_eq!(codes.len(), before, "duplicate codes in registry");
    }

    #[test]
    fn every_error_kind_is_registered() {
        let kinds = [
            ErrorKind::Lexical(LexError::UnexpectedCharacter('$')),
            ErrorKind::Lexical(LexError::NumberTooLarge("9".into())),
            ErrorKind::Syntax(String::new()),
            ErrorKind::UndeclaredVariable(String::new()),
            ErrorKind::UndefinedTemporary(String::new()),
            ErrorKind::DuplicateGlobal(String::new()),
            ErrorKind::ReservedPrefix(String::new()),
            ErrorKind::OutOfRange(String::new()),
            ErrorKind::NotAnArray(String::new()),
            ErrorKind::MissingIndex(String::new()),
            ErrorKind::GuardNotTemporary(String::new()),
            ErrorKind::RegisterExhausted,
            ErrorKind::FieldOverflow(CodecError::NotAJump { index: 0 }),
        ];
        for kind in &kinds {
            let entry = lookup(kind.code()).unwrap_or_else(|| panic!("{} not registered", kind.code()));
            assert!(!entry.short.is_empty());
            assert!(entry.long.starts_with(&format!("## {}:", entry.code)));
        }
        assert_eq!(kinds.len(), REGISTRY.len());
    }
}
