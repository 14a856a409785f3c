use rewind_common::TransactionId;

/// Request-scoped capture state: which transaction mutations append to.
///
/// Owned by one unit of work and passed to every capturing call.
#[derive(Debug, Clone, Default)]
pub struct CaptureContext {
    active: Option<TransactionId>,
}

impl CaptureContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&mut self, transaction: TransactionId) {
        self.active = Some(transaction);
    }

    /// Stop capturing. Returns the transaction that was active.
    pub fn clear(&mut self) -> Option<TransactionId> {
        self.active.take()
    }

    pub fn active(&self) -> Option<TransactionId> {
        self.active
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_and_clear() {
        let mut ctx = CaptureContext::new();
        assert!(!ctx.is_active());
        let tx = TransactionId::new();
        ctx.activate(tx);
        assert_eq!(ctx.active(), Some(tx));
        assert_eq!(ctx.clear(), Some(tx));
        assert_eq!(ctx.clear(), None);
    }
}
