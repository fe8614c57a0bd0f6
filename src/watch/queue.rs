use std::collections::BTreeSet;

use camino::Utf8PathBuf;

/// Changes waiting for one binding's task to run.
///
/// Triggers that arrive while the task is running pile up here and are
/// drained as a single batch, so any number of changes during a run cause
/// exactly one follow-up run.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    paths: BTreeSet<Utf8PathBuf>,
    triggers: usize,
}

/// Everything drained from a [`TriggerQueue`] at once.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Batch {
    /// Distinct changed paths, sorted.
    pub paths: Vec<Utf8PathBuf>,
    /// Number of raw triggers, including repeats of the same path.
    pub triggers: usize,
}

impl Batch {
    /// Short description for logs: the first path, plus how many others.
    pub fn describe(&self) -> String {
        match self.paths.as_slice() {
            [] => "nothing".to_string(),
            [one] => one.to_string(),
            [first, rest @ ..] => format!("{first} and {} more", rest.len()),
        }
    }
}

impl TriggerQueue {
    pub fn record(&mut self, path: Utf8PathBuf) {
        self.paths.insert(path);
        self.triggers += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.triggers == 0
    }

    pub fn drain(&mut self) -> Batch {
        let batch = Batch {
            paths: std::mem::take(&mut self.paths).into_iter().collect(),
            triggers: self.triggers,
        };
        self.triggers = 0;
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesces_repeats() {
        let mut queue = TriggerQueue::default();
        assert!(queue.is_empty());

        queue.record("styles/b.scss".into());
        queue.record("styles/a.scss".into());
        queue.record("styles/a.scss".into());

        let batch = queue.drain();
        assert_eq!(batch.triggers, 3);
        assert_eq!(
            batch.paths,
            vec![Utf8PathBuf::from("styles/a.scss"), Utf8PathBuf::from("styles/b.scss")]
        );
        assert_eq!(batch.describe(), "styles/a.scss and 1 more");

        assert!(queue.is_empty());
        assert_eq!(queue.drain(), Batch::default());
    }
}
