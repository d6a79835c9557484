use std::cell::Cell;

use uuid::Uuid;

/// Source of short random tokens (8 lowercase hex digits), used for
/// synthetic URIs and MIME boundaries.
pub trait IdSource {
    fn next_token(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_token(&self) -> String {
        Uuid::new_v4().simple().to_string()[..8].to_string()
    }
}

/// Deterministic tokens `00000001`, `00000002`, ...
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: Cell<u32>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdSource for SequentialIds {
    fn next_token(&self) -> String {
        let next = self.counter.get().wrapping_add(1);
        self.counter.set(next);
        format!("{:08x}", next)
    }
}
