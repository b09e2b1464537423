use std::cell::Cell;
use std::rc::Rc;

use super::ErrorCode;

/// Nesting counter shared by a VM and every VM started from inside it
/// (for example by a native function that runs another script).
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    depth: Rc<Cell<usize>>,
    limit: usize,
}

/// Holds one nesting level; releases it on drop.
#[derive(Debug)]
pub struct NestingGuard {
    depth: Rc<Cell<usize>>,
}

impl ExecutionContext {
    pub fn new(limit: usize) -> Self {
        ExecutionContext { depth: Rc::new(Cell::new(0)), limit }
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn enter(&self) -> Result<NestingGuard, ErrorCode> {
        let depth = self.depth.get();
        if depth >= self.limit {
            return Err(ErrorCode::TooManyNestedVms);
        }
        self.depth.set(depth + 1);
        Ok(NestingGuard { depth: self.depth.clone() })
    }
}

impl Drop for NestingGuard {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_bounded_and_released() {
        let ctx = ExecutionContext::new(2);
        let a = ctx.enter().unwrap();
        let shared = ctx.clone();
        let b = shared.enter().unwrap();
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.enter().unwrap_err(), ErrorCode::TooManyNestedVms);
        drop(b);
        drop(a);
        assert_eq!(ctx.depth(), 0);
    }
}
