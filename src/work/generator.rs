//! Lazy, resumable work item generation

use super::WorkItem;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::iter::{Enumerate, Skip};
use std::path::PathBuf;
use tracing::debug;

/// Where a test reads its inputs from
#[derive(Debug, Clone)]
pub enum InputSource {
    /// One input per non-blank, non-comment line of a file
    File(PathBuf),
    /// Inputs given directly
    Inline(Vec<String>),
    /// The test takes no inputs
    None,
}

/// Boxed input iterator handed to the generator
pub type Inputs = Box<dyn Iterator<Item = String> + Send>;

impl InputSource {
    /// Open the source without materializing it
    pub fn open(&self) -> Result<Inputs> {
        match self {
            InputSource::File(path) => {
                let file = File::open(path)
                    .with_context(|| format!("Failed to open input file: {:?}", path))?;
                debug!("Reading inputs lazily from {:?}", path);
                let lines = BufReader::new(file)
                    .lines()
                    .map_while(|line| line.ok())
                    .filter_map(|line| normalize_input(&line));
                Ok(Box::new(lines))
            },
            InputSource::Inline(values) => Ok(Box::new(values.clone().into_iter())),
            InputSource::None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// Trim an input line, dropping blanks and `#` comments
fn normalize_input(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        None
    } else {
        Some(line.to_string())
    }
}

/// Yields `WorkItem`s for every input at position `>= resume`, in order
///
/// The generator is single-pass: once an item is yielded it is never
/// produced again.
pub struct WorkGenerator<I: Iterator> {
    inner: Skip<Enumerate<I>>,
    resume: usize,
}

impl<I: Iterator> WorkGenerator<I> {
    /// Create a generator over `inputs`, skipping the first `resume` entries
    pub fn new<C>(inputs: C, resume: usize) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        Self {
            inner: inputs.into_iter().enumerate().skip(resume),
            resume,
        }
    }

    /// The offset this generator started from
    pub fn resume(&self) -> usize {
        self.resume
    }
}

impl<I: Iterator> Iterator for WorkGenerator<I> {
    type Item = WorkItem<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(index, payload)| WorkItem::new(index, payload))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collect(inputs: Vec<&str>, resume: usize) -> Vec<(usize, String)> {
        WorkGenerator::new(inputs.into_iter().map(String::from), resume)
            .map(|item| (item.index, item.payload))
            .collect()
    }

    #[test]
    fn test_resume_skips_leading_items() {
        let items = collect(vec!["a", "b", "c"], 1);
        assert_eq!(items, vec![(1, "b".to_string()), (2, "c".to_string())]);
    }

    #[test]
    fn test_yields_max_len_minus_resume() {
        let inputs = vec!["a", "b", "c", "d", "e"];
        for resume in 0..=inputs.len() {
            let items = collect(inputs.clone(), resume);
            assert_eq!(items.len(), inputs.len() - resume);
            let indices: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
            assert_eq!(indices, (resume..inputs.len()).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_resume_past_end_is_empty() {
        assert!(collect(vec!["a", "b"], 3).is_empty());
        assert!(collect(vec![], 10).is_empty());
    }

    #[test]
    fn test_consumes_inputs_lazily() {
        // An unbounded source must not be drained up front
        let mut generator = WorkGenerator::new(0u64.., 2);
        let first = generator.next().unwrap();
        assert_eq!(first, WorkItem::new(2, 2));
        assert_eq!(generator.next().unwrap().index, 3);
    }

    #[test]
    fn test_file_source_skips_comments_and_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# targets").unwrap();
        writeln!(file, "example.org:80").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  torproject.org:443  ").unwrap();

        let source = InputSource::File(file.path().to_path_buf());
        let items: Vec<_> = WorkGenerator::new(source.open().unwrap(), 1).collect();

        assert_eq!(items, vec![WorkItem::new(1, "torproject.org:443".to_string())]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let source = InputSource::File(PathBuf::from("/nonexistent/inputs.txt"));
        assert!(source.open().is_err());
    }
}
