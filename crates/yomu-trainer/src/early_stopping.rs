//! Early stopping on a monitored loss.

/// Outcome of recording one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// New best value; weights should be checkpointed.
    Improved,
    /// No improvement yet, `wait` epochs since the best.
    Waiting { wait: usize },
    /// Patience exhausted.
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    best: Option<f32>,
    best_epoch: Option<usize>,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            best_epoch: None,
            wait: 0,
        }
    }

    pub fn best(&self) -> Option<f32> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Record `loss` for `epoch`. NaN never counts as an improvement.
    pub fn update(&mut self, epoch: usize, loss: f32) -> Progress {
        let improved = match self.best {
            _ if loss.is_nan() => false,
            None => true,
            Some(best) => loss < best - self.min_delta,
        };

        if improved {
            self.best = Some(loss);
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return Progress::Improved;
        }

        self.wait += 1;
        if self.wait >= self.patience {
            Progress::Stop
        } else {
            Progress::Waiting { wait: self.wait }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_epoch_improves() {
        let mut es = EarlyStopping::new(2, 0.0);
        assert_eq!(es.update(1, 10.0), Progress::Improved);
        assert_eq!(es.best(), Some(10.0));
        assert_eq!(es.best_epoch(), Some(1));
    }

    #[test]
    fn test_stops_after_patience() {
        let mut es = EarlyStopping::new(2, 0.0);
        es.update(1, 5.0);
        assert_eq!(es.update(2, 5.0), Progress::Waiting { wait: 1 });
        assert_eq!(es.update(3, 6.0), Progress::Stop);
        assert_eq!(es.best_epoch(), Some(1));
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut es = EarlyStopping::new(2, 0.0);
        es.update(1, 5.0);
        es.update(2, 5.5);
        assert_eq!(es.update(3, 4.0), Progress::Improved);
        assert_eq!(es.update(4, 4.5), Progress::Waiting { wait: 1 });
    }

    #[test]
    fn test_min_delta() {
        let mut es = EarlyStopping::new(3, 0.5);
        es.update(1, 5.0);
        assert_eq!(es.update(2, 4.8), Progress::Waiting { wait: 1 });
        assert_eq!(es.update(3, 4.4), Progress::Improved);
    }

    #[test]
    fn test_nan_is_not_improvement() {
        let mut es = EarlyStopping::new(1, 0.0);
        assert_eq!(es.update(1, f32::NAN), Progress::Stop);
        assert_eq!(es.best(), None);
    }
}
