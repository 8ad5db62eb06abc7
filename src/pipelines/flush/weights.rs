// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline stages and their worker weights

use std::fmt;

static PIPELINE_ORDER: [Stage; 5] = Stage::ALL;

/// One ordered step of the frame pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Capture,
    Convert,
    Extract,
    Encode,
    Persist,
}

impl Stage {
    /// Every stage in pipeline order
    pub const ALL: [Stage; 5] = [
        Stage::Capture,
        Stage::Convert,
        Stage::Extract,
        Stage::Encode,
        Stage::Persist,
    ];

    /// Stages run by a flush cycle
    pub const DOWNSTREAM: [Stage; 4] = [
        Stage::Convert,
        Stage::Extract,
        Stage::Encode,
        Stage::Persist,
    ];

    /// Position in the weight vector
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stage fed by this one's output
    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Stages after this one, in order
    pub fn later(self) -> &'static [Stage] {
        &PIPELINE_ORDER[self.index() + 1..]
    }

    /// Position among the flush stages (convert = 0)
    ///
    /// `None` for capture, which never runs inside a flush.
    pub fn flush_slot(self) -> Option<usize> {
        self.index().checked_sub(1)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Capture => "capture",
            Stage::Convert => "convert",
            Stage::Extract => "extract",
            Stage::Encode => "encode",
            Stage::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// Number of workers committed to each stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageWeights([usize; 5]);

impl StageWeights {
    pub fn new(weights: [usize; 5]) -> Self {
        Self(weights)
    }

    pub fn get(&self, stage: Stage) -> usize {
        self.0[stage.index()]
    }

    /// Sum over the flush stages; invariant under redistribution
    pub fn downstream_total(&self) -> usize {
        Stage::DOWNSTREAM.iter().map(|stage| self.get(*stage)).sum()
    }

    pub fn as_array(&self) -> [usize; 5] {
        self.0
    }

    /// Move the weight of `from` onto `targets`, splitting it evenly
    ///
    /// The remainder of the split goes to the earliest targets. Targets
    /// at or before `from` are ignored, so weight only flows downstream.
    /// The capture weight never moves. Returns the share each target
    /// received; empty when nothing moved.
    pub fn redistribute(&mut self, from: Stage, targets: &[Stage]) -> Vec<(Stage, usize)> {
        if from == Stage::Capture {
            return Vec::new();
        }
        let targets: Vec<Stage> = targets.iter().copied().filter(|t| *t > from).collect();
        let idle = self.get(from);
        if targets.is_empty() || idle == 0 {
            return Vec::new();
        }

        let share = idle / targets.len();
        let remainder = idle % targets.len();
        self.0[from.index()] = 0;

        let mut moved = Vec::with_capacity(targets.len());
        for (position, target) in targets.into_iter().enumerate() {
            let amount = share + usize::from(position < remainder);
            if amount == 0 {
                continue;
            }
            self.0[target.index()] += amount;
            moved.push((target, amount));
        }
        moved
    }
}

impl fmt::Display for StageWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(Stage::Convert.next(), Some(Stage::Extract));
        assert_eq!(Stage::Persist.next(), None);
        assert_eq!(Stage::Encode.later(), &[Stage::Persist]);
        assert_eq!(Stage::Convert.flush_slot(), Some(0));
        assert_eq!(Stage::Capture.flush_slot(), None);
    }

    #[test]
    fn test_redistribute_splits_evenly_with_remainder_first() {
        let mut weights = StageWeights::new([1, 5, 2, 4, 2]);
        let moved = weights.redistribute(
            Stage::Convert,
            &[Stage::Extract, Stage::Encode, Stage::Persist],
        );
        assert_eq!(
            moved,
            vec![(Stage::Extract, 2), (Stage::Encode, 2), (Stage::Persist, 1)]
        );
        assert_eq!(weights.as_array(), [1, 0, 4, 6, 3]);
        assert_eq!(weights.downstream_total(), 13);
    }

    #[test]
    fn test_redistribute_never_flows_upstream() {
        let mut weights = StageWeights::new([1, 1, 2, 4, 2]);
        let moved = weights.redistribute(Stage::Encode, &[Stage::Convert]);
        assert!(moved.is_empty());
        assert_eq!(weights.as_array(), [1, 1, 2, 4, 2]);
    }

    #[test]
    fn test_last_stage_keeps_its_weight() {
        let mut weights = StageWeights::new([1, 1, 2, 4, 2]);
        assert!(weights.redistribute(Stage::Persist, &[]).is_empty());
        assert_eq!(weights.get(Stage::Persist), 2);
    }

    #[test]
    fn test_capture_weight_is_fixed() {
        let mut weights = StageWeights::new([3, 1, 1, 1, 1]);
        assert!(weights.redistribute(Stage::Capture, &[Stage::Convert]).is_empty());
        assert_eq!(weights.get(Stage::Capture), 3);
    }

    #[test]
    fn test_cascade_ends_on_persist() {
        let mut weights = StageWeights::new([1, 1, 2, 4, 2]);
        let total = weights.downstream_total();
        for stage in [Stage::Convert, Stage::Extract, Stage::Encode] {
            let targets: Vec<Stage> = stage.later().to_vec();
            weights.redistribute(stage, &targets);
            assert_eq!(weights.downstream_total(), total);
        }
        assert_eq!(weights.get(Stage::Persist), total);
    }
}
