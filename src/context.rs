use std::fmt;

/// Whether the call runs inside the local simulation of a remote procedure.
///
/// Inside a simulation the whole local replica is writable by selector, so writes can keep the
/// caller's query. Outside of it, writes must target a single document by `_id`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub nested_simulation: bool,
}

impl ExecutionContext {
    pub fn top_level() -> Self {
        ExecutionContext { nested_simulation: false }
    }

    pub fn nested() -> Self {
        ExecutionContext { nested_simulation: true }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExecutionMode {
    Authoritative,
    OptimisticTop,
    OptimisticNested,
}

impl ExecutionMode {
    pub fn optimistic(context: ExecutionContext) -> Self {
        if context.nested_simulation {
            ExecutionMode::OptimisticNested
        } else {
            ExecutionMode::OptimisticTop
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionMode::Authoritative => "authoritative",
            ExecutionMode::OptimisticTop => "optimistic-top",
            ExecutionMode::OptimisticNested => "optimistic-nested",
        };
        write!(f, "{}", name)
    }
}
