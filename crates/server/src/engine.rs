use std::sync::atomic::{AtomicBool, Ordering};

use skein::EngineProxy;

/// Minimal game-side collaborator for the standalone server.
pub struct SampleServerEngine {
    accepting: AtomicBool,
}

impl Default for SampleServerEngine {
    fn default() -> Self {
        Self {
            accepting: AtomicBool::new(true),
        }
    }
}

impl SampleServerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }
}

impl EngineProxy for SampleServerEngine {
    fn can_connect_to_challenge(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    fn networking_established(&self) {
        log::info!("Server networking established");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_follows_accepting_flag() {
        let engine = SampleServerEngine::default();
        assert!(engine.can_connect_to_challenge());

        engine.set_accepting(false);
        assert!(!engine.can_connect_to_challenge());
    }
}
