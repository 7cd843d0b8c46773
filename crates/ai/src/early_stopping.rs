/// Stops fitting once validation loss has not improved for `patience` epochs.
///
/// An epoch counts as an improvement only when its loss is strictly lower than
/// the best seen so far. Non-finite losses never improve.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: u32,
    best: Option<f64>,
    wait: u32,
}

impl EarlyStopping {
    pub fn new(patience: u32) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
        }
    }

    /// Record one epoch's validation loss. Returns `true` when fitting should stop.
    pub fn observe(&mut self, val_loss: f64) -> bool {
        let improved = val_loss.is_finite() && self.best.is_none_or(|best| val_loss < best);
        if improved {
            self.best = Some(val_loss);
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.patience
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
