use std::thread;

use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync every write, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // Single core: one thread for requests, one for blocking store I/O,
        // and skip fsync so writes don't stall the only core.
        if cores <= 1 {
            warn!(cores, "CPU constraint detected, disabling fsync on writes");
            Self {
                logical_cores: cores,
                worker_threads: 2,
                strict_durability: false,
            }
        } else {
            Self {
                logical_cores: cores,
                worker_threads: cores.min(16),
                strict_durability: true,
            }
        }
    }

    pub fn log(&self) {
        info!(
            cores = self.logical_cores,
            workers = self.worker_threads,
            durability = if self.strict_durability { "strict (fsync)" } else { "relaxed (os buffered)" },
            "resource profile"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_core_relaxes_durability() {
        let p = SystemProfile::for_cores(1);
        assert_eq!(p.worker_threads, 2);
        assert!(!p.strict_durability);
    }

    #[test]
    fn workers_are_capped() {
        assert_eq!(SystemProfile::for_cores(4).worker_threads, 4);
        assert_eq!(SystemProfile::for_cores(64).worker_threads, 16);
        assert!(SystemProfile::for_cores(64).strict_durability);
    }
}
