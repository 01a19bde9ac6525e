//! Learning-rate schedule: linear warmup, then linear decay to zero.

/// Learning rate as a function of the global step.
///
/// ```text
/// step <  warmup: lr * step / warmup
/// step >= warmup: lr * (1 - step / total)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarmupLinearDecay {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl WarmupLinearDecay {
    /// Create a schedule peaking at `base_lr` after `warmup_steps` and
    /// reaching zero at `total_steps`.
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Self {
        Self {
            base_lr,
            warmup_steps,
            total_steps,
        }
    }

    /// Learning rate applied to the update taken at `step` (0-based).
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps as f64;
        }
        if self.total_steps == 0 {
            return 0.0;
        }
        let remaining = 1.0 - (step.min(self.total_steps) as f64 / self.total_steps as f64);
        self.base_lr * remaining
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}
