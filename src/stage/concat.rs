use crate::pipeline::{Asset, Stage, Stream};

/// Joins every file in the stream into one, in stream order.
///
/// The result is placed at `name` under the base of the first file, so it
/// lands directly in the pipeline's destination. An empty stream stays
/// empty.
#[derive(Debug, Clone)]
pub struct Concat {
    name: String,
    separator: String,
}

impl Concat {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            separator: "\n".into(),
        }
    }

    pub fn separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }
}

impl Stage for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn process(&self, stream: Stream) -> Stream {
        if stream.files().is_empty() {
            return stream;
        }

        let base = stream.files()[0].base.clone();
        let mut contents = Vec::new();
        for (i, file) in stream.files().iter().enumerate() {
            if i > 0 {
                contents.extend_from_slice(self.separator.as_bytes());
            }
            contents.extend_from_slice(&file.contents);
        }

        tracing::debug!(files = stream.files().len(), name = %self.name, "concatenated");

        let joined = Asset::new(base.clone(), base.join(&self.name), contents);
        stream.with_files(vec![joined])
    }
}
