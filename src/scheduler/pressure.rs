//! System memory pressure sampling

use crate::utils::lock;
use std::sync::Mutex;
use sysinfo::System;

/// Source of a `used / total` memory ratio
pub trait PressureProbe: Send + Sync {
    /// `None` when the platform cannot report memory.
    fn memory_pressure(&self) -> Option<f64>;
}

pub struct SystemPressure {
    system: Mutex<System>,
}

impl SystemPressure {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemPressure {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureProbe for SystemPressure {
    fn memory_pressure(&self) -> Option<f64> {
        let mut system = lock(&self.system, "sysinfo");
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        Some(system.used_memory() as f64 / total as f64)
    }
}

/// Constant reading, for tests and platforms without sampling
pub struct FixedPressure(pub Option<f64>);

impl PressureProbe for FixedPressure {
    fn memory_pressure(&self) -> Option<f64> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_pressure_is_a_ratio() {
        if let Some(ratio) = SystemPressure::new().memory_pressure() {
            assert!((0.0..=1.0).contains(&ratio));
        }
    }
}
