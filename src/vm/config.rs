use serde::Deserialize;

/// Limits and switches for a [`Vm`](super::Vm).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Maximum number of nested script calls.
    pub control_stack_limit: usize,
    pub data_stack_limit: usize,
    /// Maximum number of nested VM runs sharing one execution context.
    pub max_nesting_depth: usize,
    /// Also register a module's functions under their bare names when the
    /// name is still free.
    pub import_unqualified: bool,
    pub inline_cache: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            control_stack_limit: 32768,
            data_stack_limit: 1 << 20,
            max_nesting_depth: 16,
            import_unqualified: true,
            inline_cache: true,
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str) -> Result<VmConfig, serde_json::Error> {
        serde_json::from_str(text)
    }
}
