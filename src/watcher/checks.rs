use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use regex::Regex;

use crate::error::Result;
use crate::graph::EXIT_CODE_PREFIX;

/// Last `n` lines of a file, decoded lossily.
pub fn read_tail(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let reader = BufReader::new(File::open(path)?);
    let mut tail = VecDeque::with_capacity(n.min(1024));
    for line in reader.split(b'\n') {
        let line = line?;
        if tail.len() == n {
            tail.pop_front();
        }
        if n > 0 {
            tail.push_back(String::from_utf8_lossy(&line).trim_end().to_string());
        }
    }
    Ok(tail.into())
}

/// True when `marker` appears in the last `tail_lines` lines of the log.
/// A missing or unreadable log counts as no OOM.
pub fn log_has_oom(path: &Path, marker: &str, tail_lines: usize) -> bool {
    match read_tail(path, tail_lines) {
        Ok(lines) => lines.iter().any(|line| line.contains(marker)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read job log");
            false
        }
    }
}

/// Exit code printed by the job wrapper, searching from the end.
pub fn parse_exit_code(lines: &[String]) -> Result<Option<i32>> {
    let re = Regex::new(&format!(r"^{}(-?\d+)\s*$", regex::escape(EXIT_CODE_PREFIX)))?;
    Ok(lines
        .iter()
        .rev()
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps[1].parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_OOM_MARKER;
    use std::fs;

    #[test]
    fn oom_in_tail_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        let mut text = String::new();
        for i in 0..500 {
            text.push_str(&format!("epoch {}\n", i));
        }
        text.push_str(&format!(
            "tensorflow.python.framework.errors_impl.{}: OOM when allocating tensor\n",
            DEFAULT_OOM_MARKER
        ));
        fs::write(&path, text).unwrap();
        assert!(log_has_oom(&path, DEFAULT_OOM_MARKER, 100));
    }

    #[test]
    fn oom_outside_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        let mut text = format!("{}\n", DEFAULT_OOM_MARKER);
        for i in 0..100 {
            text.push_str(&format!("epoch {}\n", i));
        }
        fs::write(&path, text).unwrap();
        assert!(!log_has_oom(&path, DEFAULT_OOM_MARKER, 100));
        assert!(log_has_oom(&path, DEFAULT_OOM_MARKER, 101));
    }

    #[test]
    fn clean_and_missing_logs_have_no_oom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.log");
        fs::write(&path, "all good\n").unwrap();
        assert!(!log_has_oom(&path, DEFAULT_OOM_MARKER, 100));
        assert!(!log_has_oom(
            &dir.path().join("missing.log"),
            DEFAULT_OOM_MARKER,
            100
        ));
    }

    #[test]
    fn tail_keeps_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.log");
        fs::write(&path, "a\nb\nc\nd\n").unwrap();
        assert_eq!(read_tail(&path, 2).unwrap(), vec!["c", "d"]);
        assert!(read_tail(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn exit_code_from_wrapper_line() {
        let lines: Vec<String> = vec!["Traceback".into(), "Exit code: 137".into()];
        assert_eq!(parse_exit_code(&lines).unwrap(), Some(137));
        assert_eq!(parse_exit_code(&["nothing".to_string()]).unwrap(), None);
    }
}
