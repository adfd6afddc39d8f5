//! Logic fact extraction.
//!
//! `extract` walks each file's token stream once, tracking block nesting,
//! and reads declaration blocks with a small recursive-descent parser.
//! Problems are recorded in the facts; extraction itself never fails.

use std::collections::{BTreeSet, HashMap};

use logicdeploy_state::{LogicFile, Snapshot};
use tracing::debug;

use crate::facts::*;
use crate::lexer::{tokenize, LexIssue, Token, TokenKind};
use crate::reserved::{self, TypeShape};

/// Extract structural facts from every file of a snapshot.
///
/// Pure and deterministic: the same snapshot always yields equal facts.
pub fn extract(snapshot: &Snapshot) -> ExtractedFacts {
    let mut facts = ExtractedFacts {
        snapshot_id: snapshot.snapshot_id.clone(),
        snapshot_digest: snapshot.digest(),
        declarations: Default::default(),
        bindings: Vec::new(),
        pous: Vec::new(),
        program_count: 0,
        function_count: 0,
        function_block_count: 0,
        user_types: Vec::new(),
        io_usages: Vec::new(),
        write_sites: Vec::new(),
        redeclarations: Vec::new(),
        rejected_identifiers: Vec::new(),
        structure_issues: Vec::new(),
        notes: Vec::new(),
        files: Vec::new(),
        totals: Totals::default(),
    };

    let mut first_in_scope: HashMap<(String, String, String), u32> = HashMap::new();

    for file in &snapshot.files {
        let scan = FileScanner::new(file).run();
        debug!(
            file = %file.path,
            pous = scan.pous.len(),
            declarations = scan.declarations.len(),
            degraded = scan.degraded,
            "scanned logic file"
        );

        for decl in scan.declarations {
            if reserved::is_reserved(&decl.name) {
                facts.rejected_identifiers.push(RejectedIdentifier {
                    name: decl.name,
                    file: decl.file,
                    line: decl.line,
                });
                continue;
            }
            let key = (decl.file.clone(), decl.scope.clone(), decl.name.clone());
            if let Some(first_line) = first_in_scope.get(&key) {
                facts.redeclarations.push(Redeclaration {
                    name: decl.name,
                    file: decl.file,
                    line: decl.line,
                    first_line: *first_line,
                    scope: decl.scope,
                });
                continue;
            }
            first_in_scope.insert(key, decl.line);
            if let Some(address) = &decl.address {
                facts.bindings.push(IoBinding {
                    name: decl.name.clone(),
                    address: address.clone(),
                    file: decl.file.clone(),
                    line: decl.line,
                });
            }
            facts.declarations.entry(decl.name.clone()).or_insert(decl);
        }

        facts.pous.extend(scan.pous);
        facts.user_types.extend(scan.user_types);
        facts.io_usages.extend(scan.io_usages);
        facts.write_sites.extend(scan.write_sites);
        facts.structure_issues.extend(scan.structure_issues);
        facts.notes.extend(scan.notes);
        facts.files.push(scan.summary);
    }

    for pou in &facts.pous {
        match pou.kind {
            PouKind::Program => facts.program_count += 1,
            PouKind::Function => facts.function_count += 1,
            PouKind::FunctionBlock => facts.function_block_count += 1,
        }
    }

    facts.totals = Totals {
        files: facts.files.len(),
        lines: facts.files.iter().map(|f| u64::from(f.lines)).sum(),
        declarations: facts.declarations.len(),
        io_usages: facts.io_usages.len(),
        write_sites: facts.write_sites.len(),
        statement_lines: facts.files.iter().map(|f| u64::from(f.statement_lines)).sum(),
    };
    facts
}

// ---------------------------------------------------------------------------
// Per-file scan
// ---------------------------------------------------------------------------

struct FileScan {
    pous: Vec<PouFact>,
    declarations: Vec<Declaration>,
    user_types: Vec<UserType>,
    io_usages: Vec<IoUsage>,
    write_sites: Vec<WriteSite>,
    structure_issues: Vec<StructureIssue>,
    notes: Vec<FactNote>,
    degraded: bool,
    summary: FileSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Pou(PouKind),
    /// Declares a scope without counting as a POU (`DATA_BLOCK`).
    Scope,
    /// Nested member (`METHOD`, `ACTION`) that keeps the outer scope.
    Member,
    Control,
}

#[derive(Debug, Clone)]
struct OpenBlock {
    opener: String,
    closer: String,
    kind: BlockKind,
    name: Option<String>,
    line: u32,
    arbitrated: bool,
}

enum DeclError {
    Unterminated { line: u32 },
    Malformed { line: u32, detail: String },
}

const KNOWN_CLOSERS: &[&str] = &[
    "END_PROGRAM",
    "END_FUNCTION",
    "END_FUNCTION_BLOCK",
    "END_ORGANIZATION_BLOCK",
    "END_DATA_BLOCK",
    "END_METHOD",
    "END_PROPERTY",
    "END_ACTION",
    "END_IF",
    "END_CASE",
    "END_FOR",
    "END_WHILE",
    "END_REPEAT",
    "END_REGION",
    "END_VAR",
    "END_TYPE",
    "END_STRUCT",
];

fn block_opener(upper: &str) -> Option<BlockKind> {
    Some(match upper {
        "PROGRAM" | "ORGANIZATION_BLOCK" => BlockKind::Pou(PouKind::Program),
        "FUNCTION" => BlockKind::Pou(PouKind::Function),
        "FUNCTION_BLOCK" => BlockKind::Pou(PouKind::FunctionBlock),
        "DATA_BLOCK" => BlockKind::Scope,
        "METHOD" | "PROPERTY" | "ACTION" => BlockKind::Member,
        "IF" | "CASE" | "FOR" | "WHILE" | "REPEAT" | "REGION" => BlockKind::Control,
        _ => return None,
    })
}

fn is_arbitrated_pragma(text: &str) -> bool {
    text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|w| w.eq_ignore_ascii_case("arbitrated"))
}

/// Render type tokens as canonical uppercase text (`ARRAY[1..10] OF INT`).
fn join_type(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<TokenKind> = None;
    for tok in tokens {
        let wordy = matches!(tok.kind, TokenKind::Ident | TokenKind::Number);
        let needs_space = match prev {
            Some(TokenKind::Ident) | Some(TokenKind::Number) => wordy,
            Some(TokenKind::RBracket) | Some(TokenKind::RParen) => tok.kind == TokenKind::Ident,
            _ => false,
        };
        if needs_space {
            out.push(' ');
        }
        out.push_str(&tok.text.to_ascii_uppercase());
        prev = Some(tok.kind);
    }
    out
}

struct FileScanner<'a> {
    file: &'a LogicFile,
    tokens: Vec<Token>,
    lex_issues: Vec<LexIssue>,
    pos: usize,
    blocks: Vec<OpenBlock>,
    pending_arbitrated: bool,
    references: BTreeSet<String>,
    statement_lines: BTreeSet<u32>,
    degraded: bool,
    out: FileScan,
}

impl<'a> FileScanner<'a> {
    fn new(file: &'a LogicFile) -> Self {
        let lexed = tokenize(&file.content, file.dialect);
        let summary = FileSummary {
            path: file.path.clone(),
            dialect: file.dialect,
            extension: file.extension(),
            size: file.size,
            lines: file.content.lines().count() as u32,
            blank: file.content.trim().is_empty(),
            has_nul: file.content.contains('\0'),
            degraded: false,
            defines_pous: BTreeSet::new(),
            defines_types: BTreeSet::new(),
            references: BTreeSet::new(),
            statement_lines: 0,
        };
        Self {
            file,
            tokens: lexed.tokens,
            lex_issues: lexed.issues,
            pos: 0,
            blocks: Vec::new(),
            pending_arbitrated: false,
            references: BTreeSet::new(),
            statement_lines: BTreeSet::new(),
            degraded: false,
            out: FileScan {
                pous: Vec::new(),
                declarations: Vec::new(),
                user_types: Vec::new(),
                io_usages: Vec::new(),
                write_sites: Vec::new(),
                structure_issues: Vec::new(),
                notes: Vec::new(),
                degraded: false,
                summary,
            },
        }
    }

    fn run(mut self) -> FileScan {
        for issue in std::mem::take(&mut self.lex_issues) {
            let (line, kind) = match issue {
                LexIssue::UnterminatedComment { line } | LexIssue::UnterminatedPragma { line } => {
                    (line, StructureIssueKind::UnterminatedComment)
                }
                LexIssue::UnterminatedString { line } => {
                    (line, StructureIssueKind::UnterminatedString)
                }
            };
            self.issue(line, kind);
        }

        if self.tokens.is_empty() {
            self.out.notes.push(FactNote {
                kind: FactNoteKind::EmptyFile,
                file: self.file.path.clone(),
                line: 1,
                message: format!("{} contains no logic", self.file.path),
            });
        }

        while self.pos < self.tokens.len() {
            self.step();
        }

        for block in std::mem::take(&mut self.blocks) {
            self.issue(
                block.line,
                StructureIssueKind::Unclosed {
                    opener: block.opener.clone(),
                },
            );
        }

        let declared: BTreeSet<String> = self
            .out
            .declarations
            .iter()
            .map(|d| d.name.clone())
            .collect();
        if self.degraded {
            // A file with an unreadable declaration block contributes no declarations.
            self.out.declarations.clear();
        }
        self.out.degraded = self.degraded;
        self.out.summary.degraded = self.degraded;
        self.out.summary.statement_lines = self.statement_lines.len() as u32;
        for pou in &self.out.pous {
            self.out.summary.defines_pous.insert(pou.name.clone());
        }
        for ty in &self.out.user_types {
            self.out.summary.defines_types.insert(ty.name.clone());
        }
        let defined: BTreeSet<String> = self
            .out
            .summary
            .defines_pous
            .union(&self.out.summary.defines_types)
            .cloned()
            .collect();
        self.out.summary.references = self
            .references
            .into_iter()
            .filter(|r| !defined.contains(r) && !declared.contains(r))
            .collect();
        self.out
    }

    fn issue(&mut self, line: u32, kind: StructureIssueKind) {
        self.out.structure_issues.push(StructureIssue {
            file: self.file.path.clone(),
            line,
            kind,
        });
    }

    fn scope(&self) -> String {
        self.blocks
            .iter()
            .rev()
            .find(|b| matches!(b.kind, BlockKind::Pou(_) | BlockKind::Scope))
            .and_then(|b| b.name.clone())
            .unwrap_or_else(|| GLOBAL_SCOPE.to_string())
    }

    fn in_pou(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b.kind, BlockKind::Pou(_)))
    }

    fn scope_arbitrated(&self) -> bool {
        self.blocks
            .iter()
            .rev()
            .find(|b| matches!(b.kind, BlockKind::Pou(_)))
            .is_some_and(|b| b.arbitrated)
    }

    fn skip_pragmas(&self, mut i: usize) -> usize {
        while i < self.tokens.len() && self.tokens[i].kind == TokenKind::Pragma {
            i += 1;
        }
        i
    }

    fn step(&mut self) {
        let tok = self.tokens[self.pos].clone();
        let upper = tok.upper();
        let opener = if tok.kind == TokenKind::Ident {
            block_opener(&upper)
        } else {
            None
        };

        if tok.kind != TokenKind::Pragma && !matches!(opener, Some(BlockKind::Pou(_))) {
            self.pending_arbitrated = false;
        }

        match tok.kind {
            TokenKind::Pragma => {
                if is_arbitrated_pragma(&tok.text) {
                    self.pending_arbitrated = true;
                }
                self.pos += 1;
            }
            TokenKind::Ident => {
                if let Some(kind) = opener {
                    self.open_block(&tok, upper, kind);
                } else if KNOWN_CLOSERS.contains(&upper.as_str()) {
                    self.close_block(&tok, &upper);
                    self.pos += 1;
                } else if reserved::is_var_section(&upper) {
                    self.var_block();
                } else if upper == "TYPE" {
                    self.type_block();
                } else {
                    let next = self.skip_pragmas(self.pos + 1);
                    if self.in_pou()
                        && self.tokens.get(next).map(|t| t.kind) == Some(TokenKind::LParen)
                        && !reserved::is_reserved(&upper)
                    {
                        self.references.insert(upper);
                    }
                    self.pos += 1;
                }
            }
            TokenKind::Assign => {
                self.assignment();
                self.pos += 1;
            }
            TokenKind::OutputAssign => {
                self.output_binding();
                self.pos += 1;
            }
            TokenKind::Address => {
                let next = self.tokens.get(self.pos + 1).map(|t| t.kind);
                let prev = self.pos.checked_sub(1).map(|p| self.tokens[p].kind);
                let after_at = self.pos > 0 && self.tokens[self.pos - 1].is_keyword("AT");
                let written =
                    next == Some(TokenKind::Assign) || prev == Some(TokenKind::OutputAssign);
                if !written && !after_at {
                    if let Some(address) = IoAddress::parse(&tok.text) {
                        self.out.io_usages.push(IoUsage {
                            address,
                            access: IoAccess::Read,
                            file: self.file.path.clone(),
                            line: tok.line,
                            scope: self.scope(),
                        });
                    }
                }
                self.pos += 1;
            }
            TokenKind::Semicolon => {
                if self.in_pou() {
                    self.statement_lines.insert(tok.line);
                }
                self.pos += 1;
            }
            _ => self.pos += 1,
        }
    }

    // -- blocks --------------------------------------------------------------

    fn open_block(&mut self, tok: &Token, upper: String, kind: BlockKind) {
        let closer = format!("END_{upper}");
        let mut name = None;
        self.pos += 1;

        if !matches!(kind, BlockKind::Control) {
            let i = self.skip_pragmas(self.pos);
            if let Some(t) = self.tokens.get(i) {
                if t.kind == TokenKind::Ident && !reserved::is_keyword(&t.upper()) {
                    name = Some(t.upper());
                    self.pos = i + 1;
                }
            }
        }

        if let BlockKind::Pou(pou_kind) = kind {
            if let Some(outer) = self
                .blocks
                .iter()
                .rev()
                .find(|b| matches!(b.kind, BlockKind::Pou(_)))
                .and_then(|b| b.name.clone())
            {
                self.issue(
                    tok.line,
                    StructureIssueKind::NestedPou {
                        outer,
                        inner: name.clone().unwrap_or_else(|| upper.clone()),
                    },
                );
            }
            self.out.pous.push(PouFact {
                name: name.clone().unwrap_or_else(|| format!("<{}>", upper.to_ascii_lowercase())),
                kind: pou_kind,
                file: self.file.path.clone(),
                line: tok.line,
                arbitrated: self.pending_arbitrated,
            });
        }

        self.blocks.push(OpenBlock {
            opener: upper,
            closer,
            kind,
            name,
            line: tok.line,
            arbitrated: self.pending_arbitrated,
        });
        self.pending_arbitrated = false;
    }

    fn close_block(&mut self, tok: &Token, upper: &str) {
        match self.blocks.last() {
            Some(top) if top.closer == upper => {
                self.blocks.pop();
            }
            Some(top) => {
                let expected = top.closer.clone();
                if let Some(idx) = self.blocks.iter().rposition(|b| b.closer == upper) {
                    self.issue(
                        tok.line,
                        StructureIssueKind::Mismatched {
                            expected,
                            found: upper.to_string(),
                        },
                    );
                    self.blocks.truncate(idx);
                } else {
                    self.issue(
                        tok.line,
                        StructureIssueKind::UnexpectedClose {
                            found: upper.to_string(),
                        },
                    );
                }
            }
            None => self.issue(
                tok.line,
                StructureIssueKind::UnexpectedClose {
                    found: upper.to_string(),
                },
            ),
        }
    }

    // -- declarations --------------------------------------------------------

    fn var_block(&mut self) {
        let start = self.pos;
        let start_line = self.tokens[start].line;
        match self.parse_var_block(start) {
            Ok((decls, next)) => {
                for decl in &decls {
                    if let Some(base) = TypeShape::parse(&decl.var_type).base_name() {
                        if !reserved::is_builtin_type(base) && !reserved::is_standard_fb(base) {
                            self.references.insert(base.to_string());
                        }
                    }
                }
                self.out.declarations.extend(decls);
                self.pos = next;
            }
            Err(err) => {
                let (line, detail) = match err {
                    DeclError::Unterminated { line } => {
                        (line, "declaration block is never closed".to_string())
                    }
                    DeclError::Malformed { line, detail } => (line, detail),
                };
                self.degraded = true;
                self.out.notes.push(FactNote {
                    kind: FactNoteKind::ExtractionDegraded,
                    file: self.file.path.clone(),
                    line,
                    message: format!(
                        "declaration block at line {start_line} unreadable ({detail}); \
                         declarations of this file are ignored"
                    ),
                });
                // Resume after the block's END_VAR when there is one.
                let resume = (start + 1..self.tokens.len())
                    .find(|&i| self.tokens[i].is_keyword("END_VAR"))
                    .filter(|&i| {
                        !(start + 1..i).any(|j| reserved::is_var_section(&self.tokens[j].upper()))
                    });
                self.pos = match resume {
                    Some(i) => i + 1,
                    None => start + 1,
                };
            }
        }
    }

    fn parse_var_block(&self, start: usize) -> Result<(Vec<Declaration>, usize), DeclError> {
        let section_tok = &self.tokens[start];
        let section =
            VarSection::from_keyword(&section_tok.upper()).unwrap_or(VarSection::Var);
        let scope = self.scope();
        let mut decls = Vec::new();
        let mut i = start + 1;

        while self.tokens.get(i).is_some_and(|t| {
            ["CONSTANT", "RETAIN", "NON_RETAIN", "PERSISTENT"]
                .iter()
                .any(|q| t.is_keyword(q))
        }) {
            i += 1;
        }

        let unterminated = DeclError::Unterminated {
            line: section_tok.line,
        };

        loop {
            i = self.skip_pragmas(i);
            let Some(tok) = self.tokens.get(i) else {
                return Err(unterminated);
            };
            if tok.is_keyword("END_VAR") {
                return Ok((decls, i + 1));
            }
            let upper = tok.upper();
            if tok.kind != TokenKind::Ident
                || reserved::is_var_section(&upper)
                || block_opener(&upper).is_some()
                || upper.starts_with("END_")
            {
                return Err(DeclError::Malformed {
                    line: tok.line,
                    detail: format!("unexpected `{}` in declaration block", tok.text),
                });
            }

            // ident {, ident}
            let mut names = vec![(upper, tok.line)];
            i = self.skip_pragmas(i + 1);
            while self.tokens.get(i).map(|t| t.kind) == Some(TokenKind::Comma) {
                i = self.skip_pragmas(i + 1);
                match self.tokens.get(i) {
                    Some(t) if t.kind == TokenKind::Ident => names.push((t.upper(), t.line)),
                    Some(t) => {
                        return Err(DeclError::Malformed {
                            line: t.line,
                            detail: "expected identifier after `,`".to_string(),
                        })
                    }
                    None => return Err(unterminated),
                }
                i = self.skip_pragmas(i + 1);
            }

            // [AT %addr]
            let mut address = None;
            if self.tokens.get(i).is_some_and(|t| t.is_keyword("AT")) {
                i += 1;
                match self.tokens.get(i) {
                    Some(t) if t.kind == TokenKind::Address => {
                        address = Some(IoAddress::parse(&t.text).ok_or_else(|| {
                            DeclError::Malformed {
                                line: t.line,
                                detail: format!("`{}` is not a valid I/O address", t.text),
                            }
                        })?);
                        i += 1;
                    }
                    Some(t) => {
                        return Err(DeclError::Malformed {
                            line: t.line,
                            detail: "expected address after AT".to_string(),
                        })
                    }
                    None => return Err(unterminated),
                }
                i = self.skip_pragmas(i);
            }

            // : type
            match self.tokens.get(i) {
                Some(t) if t.kind == TokenKind::Colon => i += 1,
                Some(t) => {
                    return Err(DeclError::Malformed {
                        line: t.line,
                        detail: format!("expected `:` but found `{}`", t.text),
                    })
                }
                None => return Err(unterminated),
            }

            let type_start = i;
            let var_type;
            if self.tokens.get(i).is_some_and(|t| t.is_keyword("STRUCT")) {
                let mut depth = 0usize;
                loop {
                    let Some(t) = self.tokens.get(i) else {
                        return Err(unterminated);
                    };
                    if t.is_keyword("STRUCT") {
                        depth += 1;
                    } else if t.is_keyword("END_STRUCT") {
                        depth -= 1;
                        if depth == 0 {
                            i += 1;
                            break;
                        }
                    } else if t.is_keyword("END_VAR") {
                        return Err(DeclError::Malformed {
                            line: t.line,
                            detail: "STRUCT is never closed".to_string(),
                        });
                    }
                    i += 1;
                }
                var_type = "STRUCT".to_string();
            } else {
                let mut depth = 0i32;
                loop {
                    let Some(t) = self.tokens.get(i) else {
                        return Err(unterminated);
                    };
                    match t.kind {
                        TokenKind::LParen | TokenKind::LBracket => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                        TokenKind::Assign | TokenKind::Semicolon if depth <= 0 => break,
                        _ => {}
                    }
                    if t.is_keyword("END_VAR") {
                        return Err(DeclError::Malformed {
                            line: t.line,
                            detail: "declaration is missing `;`".to_string(),
                        });
                    }
                    i += 1;
                }
                let type_tokens: Vec<Token> = self.tokens[type_start..i]
                    .iter()
                    .filter(|t| t.kind != TokenKind::Pragma)
                    .cloned()
                    .collect();
                if type_tokens.is_empty() {
                    return Err(DeclError::Malformed {
                        line: self.tokens[type_start.min(self.tokens.len() - 1)].line,
                        detail: "declaration has no type".to_string(),
                    });
                }
                var_type = join_type(&type_tokens);
            }

            // [:= init]
            if self.tokens.get(i).map(|t| t.kind) == Some(TokenKind::Assign) {
                let mut depth = 0i32;
                i += 1;
                loop {
                    let Some(t) = self.tokens.get(i) else {
                        return Err(unterminated);
                    };
                    match t.kind {
                        TokenKind::LParen | TokenKind::LBracket => depth += 1,
                        TokenKind::RParen | TokenKind::RBracket => depth -= 1,
                        TokenKind::Semicolon if depth <= 0 => break,
                        _ => {}
                    }
                    if t.is_keyword("END_VAR") {
                        return Err(DeclError::Malformed {
                            line: t.line,
                            detail: "initializer is missing `;`".to_string(),
                        });
                    }
                    i += 1;
                }
            }

            // ;
            match self.tokens.get(i) {
                Some(t) if t.kind == TokenKind::Semicolon => i += 1,
                Some(t) => {
                    return Err(DeclError::Malformed {
                        line: t.line,
                        detail: format!("expected `;` but found `{}`", t.text),
                    })
                }
                None => return Err(unterminated),
            }

            for (name, line) in names {
                decls.push(Declaration {
                    name,
                    var_type: var_type.clone(),
                    file: self.file.path.clone(),
                    line,
                    section,
                    scope: scope.clone(),
                    address: address.clone(),
                });
            }
        }
    }

    fn type_block(&mut self) {
        let start_line = self.tokens[self.pos].line;
        let mut i = self.pos + 1;
        loop {
            i = self.skip_pragmas(i);
            let Some(tok) = self.tokens.get(i) else {
                self.issue(
                    start_line,
                    StructureIssueKind::Unclosed {
                        opener: "TYPE".to_string(),
                    },
                );
                self.pos = i;
                return;
            };
            if tok.is_keyword("END_TYPE") {
                self.pos = i + 1;
                return;
            }
            if tok.kind != TokenKind::Ident {
                i += 1;
                continue;
            }

            self.out.user_types.push(UserType {
                name: tok.upper(),
                file: self.file.path.clone(),
                line: tok.line,
            });
            i += 1;

            // Skip the definition up to its terminating `;` at depth zero.
            let mut depth = 0i32;
            while let Some(t) = self.tokens.get(i) {
                if t.is_keyword("STRUCT") {
                    depth += 1;
                } else if t.is_keyword("END_STRUCT") {
                    depth -= 1;
                } else if t.is_keyword("END_TYPE") && depth <= 0 {
                    break;
                } else if t.kind == TokenKind::Semicolon && depth <= 0 {
                    i += 1;
                    break;
                } else if t.kind == TokenKind::Ident {
                    let prev = i.checked_sub(1).map(|p| &self.tokens[p]);
                    let typed = prev.is_some_and(|p| p.kind == TokenKind::Colon || p.is_keyword("OF"));
                    let upper = t.upper();
                    if typed
                        && !reserved::is_reserved(&upper)
                        && !reserved::is_standard_fb(&upper)
                    {
                        self.references.insert(upper);
                    }
                }
                i += 1;
            }
        }
    }

    // -- writes ----------------------------------------------------------------

    /// Start index of the lvalue ending just before `end`, if the tokens
    /// there form `atom (. atom | [..] | ^)*`.
    fn lvalue_start(&self, end: usize) -> Option<usize> {
        let mut j = end;
        let mut expect_atom = true;
        while j > 0 {
            let t = &self.tokens[j - 1];
            if expect_atom {
                match t.kind {
                    TokenKind::Ident | TokenKind::Address
                        if !reserved::is_keyword(&t.upper()) =>
                    {
                        j -= 1;
                        expect_atom = false;
                    }
                    TokenKind::RBracket => {
                        let mut depth = 0i32;
                        while j > 0 {
                            match self.tokens[j - 1].kind {
                                TokenKind::RBracket => depth += 1,
                                TokenKind::LBracket => depth -= 1,
                                _ => {}
                            }
                            j -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                    }
                    TokenKind::Op if t.text == "^" => j -= 1,
                    _ => break,
                }
            } else if t.kind == TokenKind::Dot {
                j -= 1;
                expect_atom = true;
            } else {
                break;
            }
        }
        (j < end && !expect_atom).then_some(j)
    }

    /// Length of the lvalue starting at `start`.
    fn lvalue_len(&self, start: usize) -> usize {
        let mut i = start;
        match self.tokens.get(i).map(|t| t.kind) {
            Some(TokenKind::Ident) | Some(TokenKind::Address) => i += 1,
            _ => return 0,
        }
        loop {
            match self.tokens.get(i).map(|t| t.kind) {
                Some(TokenKind::Dot)
                    if self
                        .tokens
                        .get(i + 1)
                        .is_some_and(|t| t.kind == TokenKind::Ident) =>
                {
                    i += 2
                }
                Some(TokenKind::LBracket) => {
                    let mut depth = 0i32;
                    while let Some(t) = self.tokens.get(i) {
                        match t.kind {
                            TokenKind::LBracket => depth += 1,
                            TokenKind::RBracket => depth -= 1,
                            _ => {}
                        }
                        i += 1;
                        if depth == 0 {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        i - start
    }

    fn record_write(&mut self, start: usize, len: usize) {
        let base = &self.tokens[start];
        let lvalue: String = self.tokens[start..start + len]
            .iter()
            .map(|t| t.text.to_ascii_uppercase())
            .collect();
        let target = if base.kind == TokenKind::Address {
            match IoAddress::parse(&base.text) {
                Some(a) => WriteTarget::Address(a),
                None => return,
            }
        } else {
            WriteTarget::Identifier(base.upper())
        };
        let scope = self.scope();
        if let WriteTarget::Address(a) = &target {
            self.out.io_usages.push(IoUsage {
                address: a.clone(),
                access: IoAccess::Write,
                file: self.file.path.clone(),
                line: base.line,
                scope: scope.clone(),
            });
        }
        self.out.write_sites.push(WriteSite {
            target,
            lvalue,
            file: self.file.path.clone(),
            line: base.line,
            scope,
            arbitrated: self.scope_arbitrated(),
        });
    }

    fn assignment(&mut self) {
        if !self.in_pou() {
            return;
        }
        let Some(start) = self.lvalue_start(self.pos) else {
            return;
        };
        // `name := value` inside a call is a parameter binding, not a write.
        let prev = start.checked_sub(1).map(|p| self.tokens[p].kind);
        if matches!(prev, Some(TokenKind::LParen) | Some(TokenKind::Comma)) {
            return;
        }
        self.record_write(start, self.pos - start);
    }

    fn output_binding(&mut self) {
        if !self.in_pou() {
            return;
        }
        let start = self.pos + 1;
        let len = self.lvalue_len(start);
        if len > 0 {
            self.record_write(start, len);
        }
    }
}
