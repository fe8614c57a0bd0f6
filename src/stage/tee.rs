use camino::Utf8PathBuf;

use crate::pipeline::{Stage, Stream};

/// Emits the current stream into `dir` and passes it on unchanged, so one
/// pipeline can produce intermediate results.
///
/// Emitted files are written by the pipeline along with its final outputs,
/// so they share its failure policy: nothing is written when the pipeline
/// aborts, and a failed write fails the pipeline.
#[derive(Debug, Clone)]
pub struct Tee {
    dir: Utf8PathBuf,
}

impl Tee {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Stage for Tee {
    fn name(&self) -> &str {
        "tee"
    }

    fn process(&self, mut stream: Stream) -> Stream {
        let outputs: Vec<_> = stream
            .files()
            .iter()
            .map(|asset| (self.dir.join(asset.relative()), asset.contents.clone()))
            .collect();

        for (path, contents) in outputs {
            tracing::debug!(%path, "emitted");
            stream.emit(path, contents);
        }

        stream
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::error::{PipelineError, StageError};
    use crate::pipeline::{Asset, FailurePolicy, Pipeline};

    /// Fails every file it sees.
    struct Reject;

    impl Stage for Reject {
        fn name(&self) -> &str {
            "reject"
        }

        fn process(&self, stream: Stream) -> Stream {
            stream.map_files(self.name(), |_| Err(StageError::Css("rejected".into())))
        }
    }

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_tee_emits_and_passes_through() {
        let stream = Stream::new(vec![Asset::new("/src", "/src/css/a.css", ".a{}")]);
        let stream = Tee::new("/out").process(stream);

        assert_eq!(stream.files().len(), 1);
        assert_eq!(stream.emitted().len(), 1);
        assert_eq!(stream.emitted()[0].0, "/out/css/a.css");
        assert_eq!(stream.emitted()[0].1, b".a{}");
    }

    #[test]
    fn test_tee_output_is_written_by_pipeline() {
        let (_guard, root) = tempdir();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.css"), ".a{}").unwrap();

        let report = Pipeline::new([format!("{root}/src/*.css")], root.join("out"))
            .pipe(Tee::new(root.join("mid")))
            .run_blocking()
            .unwrap();

        assert_eq!(report.written.len(), 2);
        assert_eq!(fs::read_to_string(root.join("mid/a.css")).unwrap(), ".a{}");
        assert_eq!(fs::read_to_string(root.join("out/a.css")).unwrap(), ".a{}");
    }

    #[test]
    fn test_failed_tee_write_fails_pipeline_under_continue() {
        let (_guard, root) = tempdir();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.css"), ".a{}").unwrap();
        // a regular file where a directory is needed
        fs::write(root.join("blocker"), "").unwrap();

        let err = Pipeline::new([format!("{root}/src/*.css")], root.join("out"))
            .pipe(Tee::new(root.join("blocker/sub")))
            .policy(FailurePolicy::Continue)
            .run_blocking()
            .unwrap_err();

        assert!(matches!(err, PipelineError::Write(path, _) if path.starts_with(root.join("blocker"))));
    }

    #[test]
    fn test_abort_after_tee_writes_nothing() {
        let (_guard, root) = tempdir();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("src/a.css"), ".a{}").unwrap();

        let err = Pipeline::new([format!("{root}/src/*.css")], root.join("out"))
            .pipe(Tee::new(root.join("mid")))
            .pipe(Reject)
            .policy(FailurePolicy::Abort)
            .run_blocking()
            .unwrap_err();

        assert!(matches!(err, PipelineError::Aborted { ref stage, .. } if stage == "reject"));
        assert!(!root.join("mid").exists());
        assert!(!root.join("out").exists());
    }
}
