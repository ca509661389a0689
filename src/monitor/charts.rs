use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartBinding {
    pub slot: usize,
    pub generation: u64,
}

/// Which symbol draws into which chart slot.
///
/// Every bind gets a fresh generation. A poller remembers the generation it
/// was started with and only touches the slot while that binding is current,
/// so a replaced or detached poller can never draw over (or clear) a chart
/// that now belongs to someone else.
#[derive(Clone, Default)]
pub struct ChartRegistry {
    bindings: Arc<RwLock<HashMap<String, ChartBinding>>>,
    next_generation: Arc<AtomicU64>,
}

impl ChartRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `symbol` to `slot`, replacing any binding either one had.
    pub fn bind(&self, symbol: &str, slot: usize) -> ChartBinding {
        let binding = ChartBinding {
            slot,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let mut bindings = self.bindings.write().unwrap();
        bindings.retain(|_, b| b.slot != slot);
        bindings.insert(symbol.to_string(), binding);
        binding
    }

    pub fn detach_all(&self) {
        self.bindings.write().unwrap().clear();
    }

    pub fn binding(&self, symbol: &str) -> Option<ChartBinding> {
        self.bindings.read().unwrap().get(symbol).copied()
    }

    /// True while `symbol` is still bound with exactly this generation.
    pub fn is_current(&self, symbol: &str, binding: ChartBinding) -> bool {
        self.binding(symbol) == Some(binding)
    }
}
