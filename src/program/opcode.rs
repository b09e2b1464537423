/// VM operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,

    // ── literals ──
    PushNull,
    PushTrue,
    PushFalse,
    PushInt32,
    PushUInt32,
    PushInt64,
    PushUInt64,
    PushConstant,

    // ── variables ──
    PushVariable,
    PushConstantRef,
    PushExprVar,
    UpdateExprVar,
    SetExprVar,
    Set,
    Global,
    Array,
    GlobalArray,
    Bind,
    Inc,
    Dec,
    IncP,
    DecP,

    // ── containers ──
    NewArray,
    NewHashMap,
    GetElement,
    PeekElement,
    SetElement,
    IncElement,
    DecElement,
    IncPElement,
    DecPElement,
    Append,
    AppendAll,
    GetRange,
    HashMapSet,

    // ── attributes ──
    GetAttribute,
    SafeGetAttribute,
    SetAttribute,
    PeekAttribute,

    // ── operators ──
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Like,
    ILike,
    Match,
    IMatch,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Neg,
    Not,
    BitNot,
    Cast,
    Name,

    // ── control flow ──
    Jmp,
    Jz,
    Jnz,
    JzPeek,
    JnzPeek,
    Case,
    CaseRange,
    Pop,

    // ── calls ──
    Call,
    CallExternal,
    CallIndirect,
    CallMethod,
    SafeCallMethod,
    Return,
    RetNull,
    Exit,
    Abort,
    Print,

    // ── exceptions and iteration ──
    Catch,
    CPop,
    Foreach,
    Next,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::PushNull => "PUSHN",
            Opcode::PushTrue => "PUSHT",
            Opcode::PushFalse => "PUSHF",
            Opcode::PushInt32 => "PUSHI",
            Opcode::PushUInt32 => "PUSHU",
            Opcode::PushInt64 => "PUSHL",
            Opcode::PushUInt64 => "PUSHUL",
            Opcode::PushConstant => "PUSHC",
            Opcode::PushVariable => "PUSHV",
            Opcode::PushConstantRef => "PUSHK",
            Opcode::PushExprVar => "PUSHX",
            Opcode::UpdateExprVar => "UPDX",
            Opcode::SetExprVar => "SETX",
            Opcode::Set => "SET",
            Opcode::Global => "GLOBAL",
            Opcode::Array => "ARRAY",
            Opcode::GlobalArray => "GARRAY",
            Opcode::Bind => "BIND",
            Opcode::Inc => "INC",
            Opcode::Dec => "DEC",
            Opcode::IncP => "INCP",
            Opcode::DecP => "DECP",
            Opcode::NewArray => "NEWARR",
            Opcode::NewHashMap => "NEWMAP",
            Opcode::GetElement => "EGET",
            Opcode::PeekElement => "EPEEK",
            Opcode::SetElement => "ESET",
            Opcode::IncElement => "EINC",
            Opcode::DecElement => "EDEC",
            Opcode::IncPElement => "EINCP",
            Opcode::DecPElement => "EDECP",
            Opcode::Append => "APPEND",
            Opcode::AppendAll => "APPALL",
            Opcode::GetRange => "RANGE",
            Opcode::HashMapSet => "MAPSET",
            Opcode::GetAttribute => "GETATT",
            Opcode::SafeGetAttribute => "SGETAT",
            Opcode::SetAttribute => "SETATT",
            Opcode::PeekAttribute => "PEEKAT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Rem => "REM",
            Opcode::Concat => "CONCAT",
            Opcode::Like => "LIKE",
            Opcode::ILike => "ILIKE",
            Opcode::Match => "MATCH",
            Opcode::IMatch => "IMATCH",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::And => "AND",
            Opcode::Or => "OR",
            Opcode::BitAnd => "BITAND",
            Opcode::BitOr => "BITOR",
            Opcode::BitXor => "BITXOR",
            Opcode::Shl => "SHL",
            Opcode::Shr => "SHR",
            Opcode::Neg => "NEG",
            Opcode::Not => "NOT",
            Opcode::BitNot => "BITNOT",
            Opcode::Cast => "CAST",
            Opcode::Name => "NAME",
            Opcode::Jmp => "JMP",
            Opcode::Jz => "JZ",
            Opcode::Jnz => "JNZ",
            Opcode::JzPeek => "JZP",
            Opcode::JnzPeek => "JNZP",
            Opcode::Case => "CASE",
            Opcode::CaseRange => "CASER",
            Opcode::Pop => "POP",
            Opcode::Call => "CALL",
            Opcode::CallExternal => "CALLX",
            Opcode::CallIndirect => "CALLI",
            Opcode::CallMethod => "CALLM",
            Opcode::SafeCallMethod => "SCALLM",
            Opcode::Return => "RET",
            Opcode::RetNull => "RETN",
            Opcode::Exit => "EXIT",
            Opcode::Abort => "ABORT",
            Opcode::Print => "PRINT",
            Opcode::Catch => "CATCH",
            Opcode::CPop => "CPOP",
            Opcode::Foreach => "FOREACH",
            Opcode::Next => "NEXT",
        }
    }

    /// Unconditional and conditional jumps.
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::JzPeek | Opcode::JnzPeek)
    }

    /// Opcodes whose operand is a code address that moves with relocation.
    pub fn carries_address(self) -> bool {
        self.is_jump() || matches!(self, Opcode::Call | Opcode::Catch | Opcode::PushExprVar)
    }

    /// Opcodes that resolve a variable name and may use the inline cache.
    pub fn uses_variable_cache(self) -> bool {
        matches!(
            self,
            Opcode::PushVariable | Opcode::Set | Opcode::Inc | Opcode::Dec | Opcode::IncP | Opcode::DecP
        )
    }
}
