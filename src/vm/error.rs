use serde::Serialize;

/// Run-time failure kinds. Numeric codes are stable: scripts observe them
/// through `$errorcode` and hosts through [`RuntimeError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(i32)]
pub enum ErrorCode {
    #[error("Data stack underflow")]
    DataStackUnderflow = 1,
    #[error("Control stack underflow")]
    ControlStackUnderflow = 2,
    #[error("Condition value is not a valid boolean")]
    BadCondition = 3,
    #[error("Bad arithmetic conversion")]
    BadArithmeticConversion = 4,
    #[error("Invalid operation with NULL value")]
    NullValue = 5,
    #[error("Internal error")]
    Internal = 6,
    #[error("Entry point function not found")]
    NoEntryPoint = 7,
    #[error("Control stack overflow")]
    ControlStackOverflow = 8,
    #[error("Divide by zero")]
    DivideByZero = 9,
    #[error("Invalid operation with real numbers")]
    RealValue = 10,
    #[error("Function not found")]
    NoSuchFunction = 11,
    #[error("Invalid number of function's arguments")]
    InvalidArgumentCount = 12,
    #[error("Cannot do automatic type cast")]
    TypeCast = 13,
    #[error("Function or operation argument is not an object")]
    NotObject = 14,
    #[error("Unknown object's attribute")]
    NoSuchAttribute = 15,
    #[error("Requested module not found or cannot be loaded")]
    ModuleNotFound = 16,
    #[error("Argument is not of string type and cannot be converted to string")]
    NotString = 17,
    #[error("Invalid regular expression")]
    BadRegexp = 18,
    #[error("Function or operation argument is not a whole number")]
    NotInteger = 19,
    #[error("Invalid operation on object")]
    InvalidObjectOperation = 20,
    #[error("Bad (or incompatible) object class")]
    BadClass = 21,
    #[error("Variable already exist")]
    VariableAlreadyExists = 22,
    #[error("Array index is not an integer")]
    IndexNotInteger = 23,
    #[error("Attempt to use element access operation on non-container value")]
    NotContainer = 24,
    #[error("Cannot assign to a variable that is constant")]
    AssignmentToConstant = 25,
    #[error("Function or operation argument is not an iterator")]
    NotIterator = 27,
    #[error("Unknown object's method")]
    NoSuchMethod = 30,
    #[error("Constant not defined")]
    NoSuchConstant = 31,
    #[error("Execution aborted")]
    ExecutionAborted = 32,
    #[error("Operand is not a number")]
    NotNumber = 33,
    #[error("Hash map key is not a string")]
    KeyNotString = 34,
    #[error("Data stack overflow")]
    DataStackOverflow = 35,
    #[error("Too many nested script invocations")]
    TooManyNestedVms = 36,
    #[error("Execution interrupted by host")]
    Interrupted = 37,
}

impl ErrorCode {
    const ALL: [ErrorCode; 34] = [
        ErrorCode::DataStackUnderflow,
        ErrorCode::ControlStackUnderflow,
        ErrorCode::BadCondition,
        ErrorCode::BadArithmeticConversion,
        ErrorCode::NullValue,
        ErrorCode::Internal,
        ErrorCode::NoEntryPoint,
        ErrorCode::ControlStackOverflow,
        ErrorCode::DivideByZero,
        ErrorCode::RealValue,
        ErrorCode::NoSuchFunction,
        ErrorCode::InvalidArgumentCount,
        ErrorCode::TypeCast,
        ErrorCode::NotObject,
        ErrorCode::NoSuchAttribute,
        ErrorCode::ModuleNotFound,
        ErrorCode::NotString,
        ErrorCode::BadRegexp,
        ErrorCode::NotInteger,
        ErrorCode::InvalidObjectOperation,
        ErrorCode::BadClass,
        ErrorCode::VariableAlreadyExists,
        ErrorCode::IndexNotInteger,
        ErrorCode::NotContainer,
        ErrorCode::AssignmentToConstant,
        ErrorCode::NotIterator,
        ErrorCode::NoSuchMethod,
        ErrorCode::NoSuchConstant,
        ErrorCode::ExecutionAborted,
        ErrorCode::NotNumber,
        ErrorCode::KeyNotString,
        ErrorCode::DataStackOverflow,
        ErrorCode::TooManyNestedVms,
        ErrorCode::Interrupted,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<ErrorCode> {
        Self::ALL.iter().copied().find(|e| e.code() == code)
    }
}

/// Internal failure travelling through the dispatch loop. Carries either a
/// known code or an arbitrary one raised by `abort n`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fault {
    pub code: i32,
    pub message: String,
}

impl Fault {
    pub fn custom(code: i32) -> Fault {
        let message = match ErrorCode::from_code(code) {
            Some(known) => known.to_string(),
            None => format!("Script aborted with code {code}"),
        };
        Fault { code, message }
    }
}

impl From<ErrorCode> for Fault {
    fn from(code: ErrorCode) -> Self {
        Fault { code: code.code(), message: code.to_string() }
    }
}

pub(crate) type Exec<T = ()> = Result<T, Fault>;

/// A failed run: what went wrong, where, and in which loaded module.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("Error {code} in line {line}: {message}")]
pub struct RuntimeError {
    pub code: i32,
    pub line: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl RuntimeError {
    /// Errors raised before any instruction ran (entry lookup, module loading).
    pub fn detached(code: ErrorCode) -> RuntimeError {
        RuntimeError { code: code.code(), line: 0, message: code.to_string(), module: None }
    }

    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        assert_eq!(ErrorCode::DivideByZero.code(), 9);
        assert_eq!(ErrorCode::from_code(9), Some(ErrorCode::DivideByZero));
        assert_eq!(ErrorCode::from_code(32), Some(ErrorCode::ExecutionAborted));
        assert_eq!(ErrorCode::from_code(26), None);
    }

    #[test]
    fn runtime_error_display_format() {
        let e = RuntimeError { code: 9, line: 4, message: "Divide by zero".into(), module: None };
        assert_eq!(e.to_string(), "Error 9 in line 4: Divide by zero");
        assert_eq!(e.kind(), Some(ErrorCode::DivideByZero));
    }

    #[test]
    fn custom_fault_for_unknown_code() {
        let f = Fault::custom(4242);
        assert_eq!(f.code, 4242);
        assert!(f.message.contains("4242"));
        assert_eq!(Fault::custom(9).message, "Divide by zero");
    }

    #[test]
    fn runtime_error_serializes() {
        let e = RuntimeError { code: 11, line: 2, message: "Function not found".into(), module: Some("util".into()) };
        let v: serde_json::Value = serde_json::to_value(&e).unwrap();
        assert_eq!(v["code"], 11);
        assert_eq!(v["module"], "util");
    }
}
