use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Program;
use crate::error::StageError;
use crate::pipeline::{Asset, Stage, Stream};

/// Placeholder argument replaced with the path of the file being processed.
const FILE_ARG: &str = "{file}";

/// How often a program with a deadline is checked on.
const POLL: Duration = Duration::from_millis(20);

/// Runs an external program once per file and replaces the contents with
/// its stdout.
///
/// If the arguments contain `{file}` the program reads the file from disk
/// by path, otherwise the current contents are piped to its stdin. A
/// non-zero exit status fails the file with the program's stderr. A program
/// still running when the timeout passes is killed.
#[derive(Debug, Clone)]
pub struct External {
    label: String,
    program: Program,
    timeout: Option<Duration>,
}

impl External {
    pub fn new(label: impl Into<String>, program: Program) -> Self {
        Self {
            label: label.into(),
            program,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn run(&self, asset: &Asset) -> Result<Vec<u8>, StageError> {
        let by_path = self.program.args.iter().any(|arg| arg == FILE_ARG);
        let args = self.program.args.iter().map(|arg| match arg.as_str() {
            FILE_ARG => asset.path.as_str(),
            arg => arg,
        });

        let mut child = Command::new(&self.program.program)
            .args(args)
            .stdin(if by_path { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin and drain the outputs on their own threads, a large
        // file would otherwise fill a pipe while we are still writing.
        if let Some(mut stdin) = child.stdin.take() {
            let contents = asset.contents.clone();
            thread::spawn(move || {
                // A program that exits without reading is judged by its
                // exit status, not by the broken pipe.
                let _ = stdin.write_all(&contents);
            });
        }
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => match wait_until(&mut child, limit)? {
                Some(status) => status,
                None => {
                    // The drain threads are left to finish on their own; a
                    // grandchild may still hold the pipes open.
                    return Err(StageError::Timeout {
                        program: self.program.program.clone(),
                        limit,
                    });
                }
            },
        };

        let stdout = collect(stdout);
        if !status.success() {
            return Err(StageError::External {
                program: self.program.program.clone(),
                status,
                stderr: String::from_utf8_lossy(&collect(stderr)).trim().to_string(),
            });
        }

        Ok(stdout)
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Wait for `child` at most `limit`. Kills it and returns `None` when the
/// time is up.
fn wait_until(child: &mut Child, limit: Duration) -> std::io::Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            // It may have exited in the meantime, which is fine.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }

        thread::sleep(POLL);
    }
}

impl Stage for External {
    fn name(&self) -> &str {
        &self.label
    }

    fn process(&self, stream: Stream) -> Stream {
        stream.map_files(self.name(), |mut asset| {
            asset.contents = self.run(&asset)?;
            Ok(Some(asset))
        })
    }
}
