//! Single-pass compiler. There is no syntax tree: every grammar rule emits
//! its instructions into the [`Program`] as soon as it is recognized, and
//! forward jumps are patched once their target is known.

mod expr;
mod stmt;

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde::Serialize;

use crate::lexer::{LexError, Lexeme, Lexer, Span, Token};
use crate::program::{INVALID_ADDRESS, Instruction, Opcode, Operand, Program};
use crate::vm::env::STANDARD_FUNCTIONS;

/// First error found in a source; compilation stops there.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("Error in line {line}: {message}")]
pub struct CompileError {
    pub line: u32,
    pub span: Span,
    pub message: String,
}

impl From<LexError> for CompileError {
    fn from(e: LexError) -> Self {
        CompileError {
            line: e.line,
            span: Span { start: e.position, end: e.position + e.snippet.len() },
            message: format!("'{}': {}", e.snippet, e.suggestion),
        }
    }
}

type Result<T = ()> = std::result::Result<T, CompileError>;

/// Compiles with the default settings: optimizer on, standard functions known.
pub fn compile(source: &str) -> Result<Program> {
    Compiler::new().compile(source)
}

#[derive(Debug, Clone)]
pub struct Compiler {
    known_functions: HashSet<String>,
    optimize: bool,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Compiler { known_functions: STANDARD_FUNCTIONS.iter().map(|s| s.to_string()).collect(), optimize: true }
    }

    /// Host functions scripts may call without defining them.
    pub fn with_known_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_functions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn optimize(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn compile(&self, source: &str) -> Result<Program> {
        let mut parser = Parser::new(source);
        parser.program_body()?;
        let mut program = parser.program;

        let unresolved = program.resolve_functions();
        // with modules in play, calls are bound when the modules are linked
        if program.required_modules.is_empty() {
            let missing = unresolved
                .into_iter()
                .find(|(name, _)| !name.contains("::") && !self.known_functions.contains(name));
            if let Some((name, line)) = missing {
                return Err(CompileError {
                    line,
                    span: Span::UNKNOWN,
                    message: format!("function '{name}' is not defined"),
                });
            }
        }

        if self.optimize {
            program.optimize();
        }
        log::debug!(
            "compiled {} instructions, {} functions, {} constants",
            program.len(),
            program.functions.len(),
            program.constants.len()
        );
        Ok(program)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Loop,
    Switch,
    Try,
}

/// Open loop, switch or try region; collects the break and continue
/// jumps that leave it.
#[derive(Debug)]
struct Block {
    kind: BlockKind,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

struct Parser<'src> {
    lexer: Lexer<'src>,
    tokens: Vec<Lexeme>,
    pos: usize,
    exhausted: bool,
    program: Program,
    /// Forward jumps waiting for their target.
    addresses: Vec<usize>,
    blocks: Vec<Block>,
    expr_vars: HashMap<Rc<str>, usize>,
    /// Line and span of the last consumed token.
    line: u32,
    span: Span,
}

impl<'src> Parser<'src> {
    fn new(source: &'src str) -> Self {
        Parser {
            lexer: Lexer::new(source),
            tokens: Vec::new(),
            pos: 0,
            exhausted: false,
            program: Program::new(),
            addresses: Vec::new(),
            blocks: Vec::new(),
            expr_vars: HashMap::new(),
            line: 1,
            span: Span::UNKNOWN,
        }
    }

    /// Top-level statements form `$main` at address 0.
    fn program_body(&mut self) -> Result {
        self.program.add_function("$main", 0);
        while self.peek()?.is_some() {
            self.top_level()?;
        }
        self.emit_op(Opcode::RetNull);
        Ok(())
    }

    // ---- tokens ----

    fn fill(&mut self, lookahead: usize) -> Result {
        while !self.exhausted && self.tokens.len() <= self.pos + lookahead {
            match self.lexer.next_token() {
                Some(lexeme) => self.tokens.push(lexeme?),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    fn peek_nth(&mut self, n: usize) -> Result<Option<&Token>> {
        self.fill(n)?;
        Ok(self.tokens.get(self.pos + n).map(|l| &l.token))
    }

    fn peek(&mut self) -> Result<Option<&Token>> {
        self.peek_nth(0)
    }

    fn at(&mut self, token: &Token) -> Result<bool> {
        Ok(self.peek()? == Some(token))
    }

    fn advance(&mut self) -> Result<Token> {
        self.fill(0)?;
        match self.tokens.get(self.pos) {
            Some(lexeme) => {
                self.line = lexeme.line;
                self.span = lexeme.span;
                self.pos += 1;
                Ok(lexeme.token.clone())
            }
            None => Err(CompileError {
                line: self.lexer.last_line(),
                span: self.span,
                message: "unexpected end of file".to_string(),
            }),
        }
    }

    fn eat(&mut self, token: &Token) -> Result<bool> {
        if self.at(token)? {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result {
        if self.eat(token)? {
            return Ok(());
        }
        Err(self.unexpected(what))
    }

    fn expect_semicolon(&mut self) -> Result {
        self.expect(&Token::Semicolon, "';'")
    }

    fn expect_ident(&mut self) -> Result<Rc<str>> {
        if let Some(Token::Ident(name)) = self.peek()? {
            let name: Rc<str> = name.as_str().into();
            self.advance()?;
            return Ok(name);
        }
        Err(self.unexpected("identifier"))
    }

    /// Error at the next token.
    fn unexpected(&mut self, expected: &str) -> CompileError {
        if let Err(e) = self.fill(0) {
            return e;
        }
        match self.tokens.get(self.pos) {
            Some(lexeme) => CompileError {
                line: lexeme.line,
                span: lexeme.span,
                message: format!("expected {expected}, found {}", lexeme.token.describe()),
            },
            None => CompileError {
                line: self.lexer.last_line(),
                span: self.span,
                message: format!("expected {expected}, found end of file"),
            },
        }
    }

    /// Error at the last consumed token.
    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError { line: self.line, span: self.span, message: message.into() }
    }

    // ---- code ----

    fn here(&self) -> usize {
        self.program.instructions.len()
    }

    fn emit(&mut self, opcode: Opcode, operand: Operand) -> usize {
        self.program.emit(Instruction::new(opcode, operand, self.line))
    }

    fn emit_op(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, Operand::None)
    }

    fn emit_items(&mut self, opcode: Opcode, operand: Operand, stack_items: i32) -> usize {
        self.program.emit(Instruction::new(opcode, operand, self.line).with_items(stack_items))
    }

    fn emit_name(&mut self, opcode: Opcode, name: &Rc<str>) -> usize {
        self.emit(opcode, Operand::Identifier(name.clone()))
    }

    fn emit_jump(&mut self, opcode: Opcode) -> usize {
        self.emit(opcode, Operand::Address(INVALID_ADDRESS))
    }

    fn emit_jump_to(&mut self, opcode: Opcode, target: usize) -> usize {
        self.emit(opcode, Operand::Address(target))
    }

    fn patch_here(&mut self, at: usize) {
        let here = self.here();
        self.program.patch(at, here);
    }

    /// Emits a forward jump and leaves it on the address stack.
    fn push_jump(&mut self, opcode: Opcode) {
        let at = self.emit_jump(opcode);
        self.addresses.push(at);
    }

    /// Points the most recent pending jump at the next instruction.
    fn patch_pending(&mut self) {
        if let Some(at) = self.addresses.pop() {
            self.patch_here(at);
        }
    }

    fn last_instruction(&mut self) -> Option<&mut Instruction> {
        self.program.instructions.last_mut()
    }

    fn drop_last(&mut self) {
        self.program.instructions.pop();
    }

    // ---- blocks ----

    fn enter(&mut self, kind: BlockKind) {
        self.blocks.push(Block { kind, breaks: Vec::new(), continues: Vec::new() });
    }

    fn leave(&mut self, break_target: usize, continue_target: usize) {
        let Some(block) = self.blocks.pop() else { return };
        for at in block.breaks {
            self.program.patch(at, break_target);
        }
        for at in block.continues {
            self.program.patch(at, continue_target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opcodes(program: &Program) -> Vec<Opcode> {
        program.instructions().iter().map(|i| i.opcode).collect()
    }

    fn error(source: &str) -> CompileError {
        compile(source).unwrap_err()
    }

    #[test]
    fn main_starts_at_zero_and_ends_with_ret_null() {
        let program = compile("x = 1;").unwrap();
        assert_eq!(program.function_address("$main"), Some(0));
        assert_eq!(program.instructions().last().map(|i| i.opcode), Some(Opcode::RetNull));
    }

    #[test]
    fn functions_are_registered_and_calls_resolved() {
        let program = compile("function f(a) { return a; } function main() { return f(1); }").unwrap();
        let f = program.function_address("f").unwrap();
        assert_eq!(program.instructions()[f].opcode, Opcode::Bind);
        assert!(program
            .instructions()
            .iter()
            .any(|i| i.opcode == Opcode::Call && i.address() == Some(f) && i.stack_items == 1));
    }

    #[test]
    fn duplicate_function_is_an_error() {
        let e = error("function f() {}\nfunction f() {}");
        assert_eq!(e.line, 2);
        assert!(e.message.contains("duplicate function 'f'"));
    }

    #[test]
    fn unknown_function_is_an_error() {
        let e = error("function main() {\n  return nope(1);\n}");
        assert_eq!(e.line, 2);
        assert_eq!(e.message, "function 'nope' is not defined");
    }

    #[test]
    fn unresolved_calls_allowed_when_known_qualified_or_using_modules() {
        assert!(compile("x = typeof(1);").is_ok());
        assert!(compile("x = util::f();").is_ok());
        assert!(compile("use util; x = f();").is_ok());
        assert!(Compiler::new().with_known_functions(["host_fn"]).compile("host_fn();").is_ok());
    }

    #[test]
    fn literal_arrays_fold_into_constants() {
        let program = compile("a = [1, \"two\", [3]];").unwrap();
        let folded = program.instructions().iter().find(|i| i.opcode == Opcode::PushConstant).unwrap();
        let Operand::Constant(crate::value::Value::Array(array)) = &folded.operand else {
            panic!("expected an array constant");
        };
        assert_eq!(array.borrow().len(), 3);
        assert!(!opcodes(&program).contains(&Opcode::NewArray));
    }

    #[test]
    fn non_literal_arrays_append() {
        let program = compile("a = [1, b, ...c];").unwrap();
        let ops = opcodes(&program);
        assert!(ops.contains(&Opcode::NewArray));
        assert_eq!(ops.iter().filter(|op| **op == Opcode::Append).count(), 2);
        assert!(ops.contains(&Opcode::AppendAll));
    }

    #[test]
    fn nested_element_assignment_marks_outer_reads_for_update() {
        let program = compile("a[1][2] = 3;").unwrap();
        let code = program.instructions();
        let get = code.iter().find(|i| i.opcode == Opcode::GetElement).unwrap();
        assert_eq!(get.stack_items, 1);
        assert!(code.iter().any(|i| i.opcode == Opcode::SetElement));
    }

    #[test]
    fn compound_element_assignment_peeks() {
        let ops = opcodes(&compile("a[0] += 2;").unwrap());
        let peek = ops.iter().position(|op| *op == Opcode::PeekElement).unwrap();
        assert_eq!(&ops[peek + 1..peek + 4], &[Opcode::PushInt32, Opcode::Add, Opcode::SetElement]);
    }

    #[test]
    fn increments_patch_the_access() {
        let ops = opcodes(&compile("++x; y--; a[0]++;").unwrap());
        assert!(ops.contains(&Opcode::IncP));
        assert!(ops.contains(&Opcode::Dec));
        assert!(ops.contains(&Opcode::IncElement));
        // only the array read remains a plain variable push
        assert_eq!(ops.iter().filter(|op| **op == Opcode::PushVariable).count(), 1);
    }

    #[test]
    fn invalid_assignment_target() {
        let e = error("1 + 2 = 3;");
        assert!(e.message.contains("assignment"));
        let e = error("const K = 1; K = 2;");
        assert!(e.message.contains("constant 'K'"));
    }

    #[test]
    fn break_outside_loop() {
        assert!(error("break;").message.contains("outside"));
        assert!(error("continue;").message.contains("outside"));
        assert!(compile("switch (1) { case 1: break; }").is_ok());
    }

    #[test]
    fn break_out_of_try_pops_catch_point() {
        let program = compile("while (true) { try { break; } catch { } }").unwrap();
        let ops = opcodes(&program);
        let catch = ops.iter().position(|op| *op == Opcode::Catch).unwrap();
        assert_eq!(ops[catch + 1], Opcode::CPop);
    }

    #[test]
    fn continue_inside_switch_pops_switch_value() {
        let program = compile("foreach (x : [1]) { switch (x) { case 1: continue; } }").unwrap();
        let code = program.instructions();
        let case = code.iter().position(|i| i.opcode == Opcode::Case).unwrap();
        assert!(code[case..].iter().any(|i| i.opcode == Opcode::Pop && i.stack_items == 1));
    }

    #[test]
    fn syntax_error_reports_line_and_token() {
        let e = error("x = 1;\ny = (2;\n");
        assert_eq!(e.line, 2);
        assert_eq!(e.message, "expected ')', found Semicolon");
    }

    #[test]
    fn end_of_file_inside_block() {
        let e = error("function f() {\n  x = 1;\n");
        assert!(e.message.contains("end of file"));
    }

    #[test]
    fn lex_errors_become_compile_errors() {
        let e = error("x = 1;\ny = 2 @ 3;");
        assert_eq!(e.line, 2);
        assert!(e.message.contains('@'));
    }

    #[test]
    fn definitions_only_at_top_level() {
        assert!(error("if (1) { function f() {} }").message.contains("top level"));
        assert!(error("while (1) { use m; }").message.contains("top level"));
    }

    #[test]
    fn constants_and_uses_are_recorded() {
        let program = compile("use util; use util; const LIMIT = -5, NAME = \"n\";").unwrap();
        assert_eq!(program.required_modules(), ["util".to_string()]);
        assert_eq!(program.constants().get("LIMIT"), Some(&crate::value::Value::Int32(-5)));
        assert_eq!(program.constants().get("NAME"), Some(&crate::value::Value::from("n")));
    }

    #[test]
    fn expression_variable_reads_push_then_update() {
        let program = compile("with total = { return 1 + 2; };\nx = total;").unwrap();
        let code = program.instructions();
        let push = code.iter().position(|i| i.opcode == Opcode::PushExprVar).unwrap();
        assert_eq!(code[push + 1].opcode, Opcode::UpdateExprVar);
        let body = code[push].address().unwrap();
        assert!(body < push);
    }

    #[test]
    fn optimizer_can_be_disabled() {
        let source = "x = 1; if (x) { y = 2; }";
        let plain = Compiler::new().optimize(false).compile(source).unwrap();
        let optimized = compile(source).unwrap();
        assert!(plain.len() >= optimized.len());
    }

    #[test]
    fn named_arguments_tag_values() {
        let program = Compiler::new().with_known_functions(["f"]).compile("f(1, mode: 2);").unwrap();
        let code = program.instructions();
        let name = code.iter().find(|i| i.opcode == Opcode::Name).unwrap();
        assert_eq!(name.identifier().map(|n| &**n), Some("mode"));
        let call = code.iter().find(|i| i.opcode == Opcode::CallExternal).unwrap();
        assert_eq!(call.stack_items, 2);
    }
}
